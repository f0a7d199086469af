//! Coordination store: the shared, eventually-consistent key-value space
//! every node reads role assignments from and signals transfers through.
//!
//! Key layout:
//!
//! ```text
//! site/{identity}                      SiteRecord (JSON)
//! transfer/{identity}/{success|failure}  empty value, outcome in the key
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use tandem_core::SiteRecord;

use crate::error::{StateError, StateResult};

pub const SITE_PREFIX: &str = "site/";
pub const TRANSFER_PREFIX: &str = "transfer/";

/// Key of the routing record for `name`.
pub fn site_key(name: &str) -> String {
    format!("{SITE_PREFIX}{name}")
}

/// Namespace holding the transfer records for `name` (with trailing `/`).
pub fn transfer_namespace(name: &str) -> String {
    format!("{TRANSFER_PREFIX}{name}/")
}

/// A key and its value, as returned by prefix listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: String,
}

/// Key-value capability over the cluster coordination store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Value at `key`, or `None` when absent.
    async fn get(&self, key: &str) -> StateResult<Option<String>>;

    /// Every entry whose key starts with `prefix`, ordered by key.
    async fn get_prefix(&self, prefix: &str) -> StateResult<Vec<KvEntry>>;

    async fn put(&self, key: &str, value: &str) -> StateResult<()>;

    /// Delete `key`, or every key under it when `recursive`. Deleting an
    /// absent key succeeds.
    async fn delete(&self, key: &str, recursive: bool) -> StateResult<()>;
}

/// Typed accessors for the `site/` namespace.
#[async_trait]
pub trait SiteStore {
    async fn site(&self, name: &str) -> StateResult<Option<SiteRecord>>;
    async fn put_site(&self, record: &SiteRecord) -> StateResult<()>;
    async fn delete_site(&self, name: &str) -> StateResult<()>;
    async fn list_sites(&self) -> StateResult<Vec<SiteRecord>>;
}

#[async_trait]
impl<S: CoordinationStore + ?Sized> SiteStore for S {
    async fn site(&self, name: &str) -> StateResult<Option<SiteRecord>> {
        match self.get(&site_key(name)).await? {
            Some(raw) => {
                let record: SiteRecord = serde_json::from_str(&raw)
                    .map_err(|e| StateError::Deserialize(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn put_site(&self, record: &SiteRecord) -> StateResult<()> {
        let value =
            serde_json::to_string(record).map_err(|e| StateError::Serialize(e.to_string()))?;
        self.put(&site_key(&record.name), &value).await
    }

    async fn delete_site(&self, name: &str) -> StateResult<()> {
        self.delete(&site_key(name), false).await
    }

    async fn list_sites(&self) -> StateResult<Vec<SiteRecord>> {
        let mut sites = Vec::new();
        for entry in self.get_prefix(SITE_PREFIX).await? {
            match serde_json::from_str::<SiteRecord>(&entry.value) {
                Ok(record) => sites.push(record),
                Err(e) => debug!(key = %entry.key, error = %e, "skipping unreadable site record"),
            }
        }
        Ok(sites)
    }
}

/// In-process store (for tests and single-node dry runs).
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all keys currently stored.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> StateResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> StateResult<Vec<KvEntry>> {
        Ok(self
            .entries
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| KvEntry {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }

    async fn put(&self, key: &str, value: &str) -> StateResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> StateResult<()> {
        let mut entries = self.entries.lock();
        if recursive {
            entries.retain(|k, _| !k.starts_with(key));
        } else {
            entries.remove(key);
        }
        Ok(())
    }
}
