//! Transfer handshake: rendezvous between the node sending volume
//! snapshots and the node receiving them.
//!
//! The sender publishes `transfer/{identity}/{success|failure}` once its
//! action finished. The receiver polls that namespace at a fixed interval,
//! consumes the first record it finds and deletes the whole namespace so a
//! later transition never replays it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use tandem_core::TransferOutcome;
use tandem_core::config::HandshakeConfig;
use tandem_state::{CoordinationStore, transfer_namespace};

use crate::error::{EngineError, EngineResult};

#[derive(Clone)]
pub struct TransferHandshake {
    store: Arc<dyn CoordinationStore>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl TransferHandshake {
    pub fn new(store: Arc<dyn CoordinationStore>, config: &HandshakeConfig) -> Self {
        Self {
            store,
            poll_interval: config.poll_interval(),
            max_attempts: config.max_attempts,
        }
    }

    /// Publish the outcome of a transfer for `name`.
    pub async fn publish(&self, name: &str, outcome: TransferOutcome) -> EngineResult<()> {
        let key = format!("{}{}", transfer_namespace(name), outcome.as_str());
        self.store.put(&key, "").await?;
        Ok(())
    }

    /// Run `action` and publish its outcome.
    ///
    /// On failure the `failure` record is published, `recover` runs, and the
    /// action's error is returned. An error from `recover` itself is logged.
    pub async fn notify<A, R>(&self, name: &str, action: A, recover: R) -> EngineResult<()>
    where
        A: Future<Output = EngineResult<()>>,
        R: Future<Output = EngineResult<()>>,
    {
        match action.await {
            Ok(()) => {
                self.publish(name, TransferOutcome::Success).await?;
                info!(app = %name, "volume transfer succeeded");
                Ok(())
            }
            Err(e) => {
                error!(app = %name, error = %e, "volume transfer failed");
                if let Err(publish_err) = self.publish(name, TransferOutcome::Failure).await {
                    error!(app = %name, error = %publish_err, "could not publish transfer failure");
                }
                if let Err(recover_err) = recover.await {
                    error!(app = %name, error = %recover_err, "recovery after failed transfer failed");
                }
                Err(e)
            }
        }
    }

    /// Wait for the sender's record for `name` and consume it.
    pub async fn wait(
        &self,
        name: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> EngineResult<TransferOutcome> {
        let namespace = transfer_namespace(name);
        for attempt in 1..=self.max_attempts {
            if *shutdown.borrow() {
                return Err(EngineError::Cancelled(name.to_string()));
            }
            info!(app = %name, attempt, "waiting for transfer notification");
            let records = self.store.get_prefix(&namespace).await?;
            if let Some(record) = records.first() {
                let raw = record.key.rsplit('/').next().unwrap_or_default();
                let outcome = raw.parse::<TransferOutcome>().unwrap_or_else(|e| {
                    warn!(app = %name, error = %e, "treating unknown transfer record as failure");
                    TransferOutcome::Failure
                });
                self.store.delete(&namespace, true).await?;
                info!(app = %name, outcome = outcome.as_str(), "transfer notification received");
                return Ok(outcome);
            }
            if attempt < self.max_attempts && self.pause(shutdown).await {
                return Err(EngineError::Cancelled(name.to_string()));
            }
        }
        error!(app = %name, attempts = self.max_attempts, "master did not send a transfer notification");
        Err(EngineError::TransferTimeout {
            name: name.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Wait and require a `success` record.
    pub async fn expect_success(
        &self,
        name: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> EngineResult<()> {
        match self.wait(name, shutdown).await? {
            TransferOutcome::Success => Ok(()),
            TransferOutcome::Failure => Err(EngineError::TransferFailed {
                name: name.to_string(),
            }),
        }
    }

    /// Sleep one poll interval. Returns true when shutdown was signalled.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let changed = tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => return false,
            changed = shutdown.changed() => changed,
        };
        match changed {
            Ok(()) => *shutdown.borrow(),
            // Sender gone: cancellation is no longer possible.
            Err(_) => {
                tokio::time::sleep(self.poll_interval).await;
                false
            }
        }
    }
}
