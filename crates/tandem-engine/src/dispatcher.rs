//! Entry point for delivered event batches.
//!
//! Every event ID goes through the ledger first: duplicates are skipped,
//! new IDs are recorded *before* the handler runs. A crash mid-transition
//! therefore leaves the event marked handled; redelivery will not retry
//! it and an operator re-sends the event instead.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use tracing::{error, info};

use tandem_core::{EventEnvelope, EventKind};
use tandem_state::EventLedger;

use crate::error::{EngineError, EngineResult};
use crate::transition::TransitionEngine;

/// Counts of what happened to the events of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub handled: usize,
    pub duplicates: usize,
    /// Events with an empty payload or an unknown name.
    pub ignored: usize,
}

pub struct Dispatcher {
    ledger: Arc<dyn EventLedger>,
    engine: TransitionEngine,
}

impl Dispatcher {
    pub fn new(ledger: Arc<dyn EventLedger>, engine: TransitionEngine) -> Self {
        Self { ledger, engine }
    }

    /// Handle a JSON array of event envelopes as delivered on stdin.
    pub async fn handle(&self, batch: &str, node: &str) -> EngineResult<BatchReport> {
        let events: Vec<EventEnvelope> = serde_json::from_str(batch)
            .map_err(|e| EngineError::Payload(format!("event batch is not valid json: {e}")))?;
        self.handle_events(&events, node).await
    }

    /// Handle events in order, stopping at the first failure.
    pub async fn handle_events(
        &self,
        events: &[EventEnvelope],
        node: &str,
    ) -> EngineResult<BatchReport> {
        let mut report = BatchReport::default();
        for event in events {
            if self.ledger.seen(&event.id)? {
                info!(id = %event.id, "event already handled in the past");
                report.duplicates += 1;
                continue;
            }
            self.ledger.record(&event.id)?;

            let kind = match event.name.parse::<EventKind>() {
                Ok(kind) => kind,
                Err(e) => {
                    error!(id = %event.id, error = %e, "ignoring event");
                    report.ignored += 1;
                    continue;
                }
            };

            let payload = decode_payload(&event.payload)?;
            if payload.trim().is_empty() {
                info!(id = %event.id, %kind, "empty payload, skipping event");
                report.ignored += 1;
                continue;
            }
            info!(id = %event.id, %kind, %payload, "received event");

            let result = match kind {
                EventKind::Deploy => self.engine.deploy(&parse(&payload)?, node).await,
                EventKind::Destroy => self.engine.destroy(&parse(&payload)?, node).await,
                EventKind::Migrate => self.engine.migrate(&parse(&payload)?, node).await,
            };
            if let Err(e) = result {
                error!(id = %event.id, %kind, error = %e, "event handling failed");
                return Err(e);
            }
            report.handled += 1;
        }
        Ok(report)
    }
}

/// Build an envelope for a manually triggered event.
pub fn manual_event(name: &str, args: &[String]) -> EventEnvelope {
    EventEnvelope {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        payload: STANDARD.encode(args.join(" ")),
        version: 1,
        ltime: 1,
    }
}

fn decode_payload(raw: &str) -> EngineResult<String> {
    let bytes = STANDARD
        .decode(raw.trim())
        .map_err(|e| EngineError::Payload(format!("payload is not base64: {e}")))?;
    String::from_utf8(bytes).map_err(|e| EngineError::Payload(format!("payload is not utf-8: {e}")))
}

fn parse<T: DeserializeOwned>(payload: &str) -> EngineResult<T> {
    serde_json::from_str(payload).map_err(|e| {
        error!(error = %e, "wrong event payload format");
        EngineError::Payload(format!("please provide json: {e}"))
    })
}
