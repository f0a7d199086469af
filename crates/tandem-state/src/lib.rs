//! tandem-state — node-local event ledger and the coordination store seam.
//!
//! # Components
//!
//! - **`ledger`**: append-only set of handled event IDs, backed by
//!   [redb](https://docs.rs/redb) on disk or a `HashSet` in memory.
//! - **`kv`**: `CoordinationStore`, the shared key-value capability, with
//!   an in-memory implementation for tests and a key layout for the
//!   `site/` and `transfer/` namespaces.

pub mod error;
pub mod kv;
pub mod ledger;
pub mod tables;

pub use error::{StateError, StateResult};
pub use kv::{CoordinationStore, KvEntry, MemoryStore, SiteStore, site_key, transfer_namespace};
pub use ledger::{EventLedger, MemoryLedger, RedbLedger};
