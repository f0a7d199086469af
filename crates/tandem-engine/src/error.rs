//! Engine error types.

use thiserror::Error;

use tandem_state::StateError;

/// Errors that abort a transition or an event batch.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid payload contents; raised before any side effect.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Payload could not be decoded (base64 or JSON).
    #[error("invalid event payload: {0}")]
    Payload(String),

    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed: {stderr}")]
    ExternalTool { command: String, stderr: String },

    /// The deployment definition in a checkout is missing or unreadable.
    #[error("deployment definition error: {0}")]
    Definition(String),

    #[error("no transfer notification for {name} after {attempts} attempts")]
    TransferTimeout { name: String, attempts: u32 },

    /// The sending side published a `failure` record.
    #[error("volume transfer for {name} reported failure")]
    TransferFailed { name: String },

    #[error("service registry error: {0}")]
    Registration(String),

    /// A URL of the deployment is already claimed by another identity.
    #[error("site {url} is already deployed by {owner}")]
    UrlConflict { url: String, owner: String },

    #[error("unknown cluster member: {0}")]
    UnknownMember(String),

    #[error("transfer wait for {0} cancelled")]
    Cancelled(String),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
