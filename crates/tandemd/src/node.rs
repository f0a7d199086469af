//! Node wiring: ledger, collaborators and the dispatcher for this host.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use tandem_core::TandemConfig;
use tandem_engine::{Dispatcher, EngineSettings, TransferHandshake, TransitionEngine};
use tandem_state::RedbLedger;

/// Name of this node in the cluster membership.
pub fn node_name(config: &TandemConfig) -> anyhow::Result<String> {
    match &config.node.name {
        Some(name) if !name.trim().is_empty() => Ok(name.trim().to_string()),
        _ => hostname(),
    }
}

fn hostname() -> anyhow::Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: `buf` is writable for `buf.len()` bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("gethostname failed");
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

pub fn transition_engine(
    config: &TandemConfig,
    shutdown: watch::Receiver<bool>,
) -> TransitionEngine {
    let collab = tandem_exec::collaborators(config);
    let handshake = TransferHandshake::new(collab.store.clone(), &config.handshake);
    TransitionEngine::new(collab, handshake, EngineSettings::from(config), shutdown)
}

pub fn dispatcher(
    config: &TandemConfig,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Dispatcher> {
    let path = &config.paths.ledger;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let ledger = RedbLedger::open(path)
        .with_context(|| format!("cannot open event ledger {}", path.display()))?;
    info!(path = %path.display(), "event ledger opened");
    Ok(Dispatcher::new(
        Arc::new(ledger),
        transition_engine(config, shutdown),
    ))
}
