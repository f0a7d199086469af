//! Event ledger: the per-node at-most-once filter in front of the
//! dispatcher.
//!
//! The ledger is append-only: an ID, once recorded, is never removed.
//! `seen` reflects every `record` made on the same ledger, including those
//! from earlier process invocations when backed by redb.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::HANDLED_EVENTS;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Durable set of handled event IDs.
pub trait EventLedger: Send + Sync {
    /// Whether `id` was recorded before.
    fn seen(&self, id: &str) -> StateResult<bool>;

    /// Record `id` as handled. Recording an already-known ID is a no-op.
    fn record(&self, id: &str) -> StateResult<()>;
}

/// Ledger persisted in a redb database.
#[derive(Clone)]
pub struct RedbLedger {
    db: Arc<Database>,
}

impl RedbLedger {
    /// Open (or create) a ledger at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!(?path, "event ledger opened");
        Ok(ledger)
    }

    /// Create an ephemeral in-memory redb ledger.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        Ok(ledger)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(HANDLED_EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Number of recorded events.
    pub fn len(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HANDLED_EVENTS).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    pub fn is_empty(&self) -> StateResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl EventLedger for RedbLedger {
    fn seen(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HANDLED_EVENTS).map_err(map_err!(Table))?;
        Ok(table.get(id).map_err(map_err!(Read))?.is_some())
    }

    fn record(&self, id: &str) -> StateResult<()> {
        let recorded_at = chrono::Utc::now().to_rfc3339();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HANDLED_EVENTS).map_err(map_err!(Table))?;
            if table.get(id).map_err(map_err!(Read))?.is_none() {
                table
                    .insert(id, recorded_at.as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, "event recorded");
        Ok(())
    }
}

/// Ledger kept in process memory (for tests and dry runs).
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

impl EventLedger for MemoryLedger {
    fn seen(&self, id: &str) -> StateResult<bool> {
        Ok(self.ids.lock().contains(id))
    }

    fn record(&self, id: &str) -> StateResult<()> {
        self.ids.lock().insert(id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redb_seen_after_record() {
        let ledger = RedbLedger::open_in_memory().unwrap();
        assert!(!ledger.seen("e1").unwrap());
        ledger.record("e1").unwrap();
        assert!(ledger.seen("e1").unwrap());
        assert!(!ledger.seen("e2").unwrap());
    }

    #[test]
    fn redb_record_is_idempotent() {
        let ledger = RedbLedger::open_in_memory().unwrap();
        ledger.record("e1").unwrap();
        ledger.record("e1").unwrap();
        assert_eq!(ledger.len().unwrap(), 1);
    }

    #[test]
    fn memory_ledger_behaves_like_redb() {
        let ledger = MemoryLedger::new();
        assert!(ledger.is_empty());
        ledger.record("e1").unwrap();
        ledger.record("e1").unwrap();
        assert!(ledger.seen("e1").unwrap());
        assert_eq!(ledger.len(), 1);
    }
}
