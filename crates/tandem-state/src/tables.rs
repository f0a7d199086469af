//! redb table definitions for the event ledger.

use redb::TableDefinition;

/// Handled event IDs mapped to the RFC 3339 time they were recorded.
pub const HANDLED_EVENTS: TableDefinition<&str, &str> = TableDefinition::new("handled_events");
