//! Consul-backed coordination store and cluster membership, driven
//! through the `consul` CLI of the local agent.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::{debug, warn};

use tandem_core::{Member, NodeName};
use tandem_engine::{ClusterMembership, EngineError, EngineResult};
use tandem_state::{CoordinationStore, KvEntry, StateError, StateResult};

use crate::runner::Tool;

/// Marker printed by `consul kv get` for an absent key.
const NO_KEY: &str = "No key exists";

fn store_err(e: EngineError) -> StateError {
    StateError::Store(e.to_string())
}

/// Key/value store of the Consul cluster.
#[derive(Debug, Clone)]
pub struct ConsulKv {
    consul: Tool,
}

impl ConsulKv {
    pub fn new(binary: &str) -> Self {
        Self {
            consul: Tool::new(binary),
        }
    }
}

#[async_trait]
impl CoordinationStore for ConsulKv {
    async fn get(&self, key: &str) -> StateResult<Option<String>> {
        let args = ["kv", "get", key];
        let output = self.consul.output(&args, None).await.map_err(store_err)?;
        if output.status.success() {
            let value = String::from_utf8_lossy(&output.stdout);
            return Ok(Some(value.strip_suffix('\n').unwrap_or(&value).to_string()));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains(NO_KEY) {
            debug!(%key, "key not found");
            return Ok(None);
        }
        Err(StateError::Store(format!(
            "{}: {}",
            self.consul.describe(&args),
            stderr.trim()
        )))
    }

    async fn get_prefix(&self, prefix: &str) -> StateResult<Vec<KvEntry>> {
        let raw = self
            .consul
            .run(&["kv", "export", prefix], None)
            .await
            .map_err(store_err)?;
        parse_export(&raw)
    }

    async fn put(&self, key: &str, value: &str) -> StateResult<()> {
        self.consul
            .run(&["kv", "put", key, value], None)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> StateResult<()> {
        let mut args = vec!["kv", "delete"];
        if recursive {
            args.push("-recurse");
        }
        args.push(key);
        self.consul.run(&args, None).await.map_err(store_err)?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct ExportedEntry {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

/// Parse the JSON document of `consul kv export` (base64 values).
pub fn parse_export(raw: &str) -> StateResult<Vec<KvEntry>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let exported: Vec<ExportedEntry> =
        serde_json::from_str(raw).map_err(|e| StateError::Deserialize(e.to_string()))?;
    exported
        .into_iter()
        .map(|entry| {
            let bytes = STANDARD
                .decode(entry.value.unwrap_or_default())
                .map_err(|e| StateError::Deserialize(format!("{}: {e}", entry.key)))?;
            Ok(KvEntry {
                key: entry.key,
                value: String::from_utf8_lossy(&bytes).into_owned(),
            })
        })
        .collect()
}

/// Cluster membership as listed by `consul members`.
#[derive(Debug, Clone)]
pub struct ConsulMembers {
    consul: Tool,
}

impl ConsulMembers {
    pub fn new(binary: &str) -> Self {
        Self {
            consul: Tool::new(binary),
        }
    }
}

#[async_trait]
impl ClusterMembership for ConsulMembers {
    async fn members(&self) -> EngineResult<HashMap<NodeName, Member>> {
        let raw = self.consul.run(&["members"], None).await?;
        Ok(parse_members(&raw))
    }
}

/// Parse the `consul members` table: `Node Address Status ...`, one member
/// per line after the header. The address port is dropped.
pub fn parse_members(raw: &str) -> HashMap<NodeName, Member> {
    let mut members = HashMap::new();
    for line in raw.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().take(3).collect();
        let [name, address, status] = fields[..] else {
            if !line.trim().is_empty() {
                warn!(%line, "skipping unparsable member line");
            }
            continue;
        };
        let ip = address
            .rsplit_once(':')
            .map_or(address, |(host, _)| host)
            .trim_start_matches('[')
            .trim_end_matches(']');
        members.insert(
            name.to_string(),
            Member {
                ip: ip.to_string(),
                status: status.to_string(),
            },
        );
    }
    members
}
