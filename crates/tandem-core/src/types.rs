//! Domain types shared across Tandem crates.
//!
//! Event payloads are decoded from JSON exactly as operators send them;
//! `SiteRecord` is the per-identity document persisted in the coordination
//! store and read back by the proxy templates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Name of a node in the cluster membership.
pub type NodeName = String;

// ── Roles ──────────────────────────────────────────────────────────

/// Role of a node for one application identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Live instance, exposed to traffic.
    Master,
    /// Warm standby receiving replicated snapshots.
    Slave,
    /// Not deployed on this node.
    None,
}

impl Role {
    /// Role of `node` given a master and an optional slave assignment.
    /// Master takes precedence if both name the same node.
    pub fn of(node: &str, master: Option<&str>, slave: Option<&str>) -> Self {
        if master == Some(node) {
            Role::Master
        } else if slave == Some(node) {
            Role::Slave
        } else {
            Role::None
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Master => "MASTER",
            Role::Slave => "SLAVE",
            Role::None => "NONE",
        })
    }
}

// ── Events ─────────────────────────────────────────────────────────

/// Lifecycle event kinds understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Deploy,
    Destroy,
    Migrate,
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(EventKind::Deploy),
            "destroy" => Ok(EventKind::Destroy),
            "migrate" => Ok(EventKind::Migrate),
            other => Err(format!("unknown event name: {other}")),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Deploy => "deploy",
            EventKind::Destroy => "destroy",
            EventKind::Migrate => "migrate",
        })
    }
}

/// One event of a delivered batch, as emitted by the cluster event system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    /// Base64-encoded JSON payload.
    #[serde(rename = "Payload", default)]
    pub payload: String,
    #[serde(rename = "Version", default)]
    pub version: u64,
    #[serde(rename = "LTime", default)]
    pub ltime: u64,
}

/// `deploy` payload: `{repo, branch, target, slave?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployPayload {
    pub repo: String,
    #[serde(default)]
    pub branch: Option<String>,
    /// Node that becomes the new master.
    pub target: NodeName,
    /// Node that becomes the new slave, if any.
    #[serde(default)]
    pub slave: Option<NodeName>,
}

/// `destroy` payload: `{repo, branch}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestroyPayload {
    pub repo: String,
    #[serde(default)]
    pub branch: Option<String>,
}

/// `migrate` payload: `{repo, branch, target: {repo?, branch?}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigratePayload {
    pub repo: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub target: MigrateTarget,
}

/// Destination of a migration. Missing fields default to the source's.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrateTarget {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

// ── Coordination store documents ───────────────────────────────────

/// Routing and role record persisted under `site/{identity}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub name: String,
    #[serde(default)]
    pub deploy_date: Option<String>,
    #[serde(default)]
    pub domain: String,
    /// IP of the master node.
    #[serde(default)]
    pub ip: String,
    /// Master node.
    #[serde(default)]
    pub node: Option<NodeName>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub redirect_from: Vec<String>,
    #[serde(default)]
    pub redirect_to: Vec<String>,
    #[serde(default)]
    pub tls: Option<String>,
    /// Slave node.
    #[serde(default)]
    pub slave: Option<NodeName>,
    /// Managed volume names.
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Backend address `{proto}{container}:{port}`.
    #[serde(rename = "ct", default)]
    pub backend_address: String,
}

/// Outcome published by the sending side of a volume transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferOutcome {
    Success,
    Failure,
}

impl TransferOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferOutcome::Success => "success",
            TransferOutcome::Failure => "failure",
        }
    }
}

impl FromStr for TransferOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TransferOutcome::Success),
            "failure" => Ok(TransferOutcome::Failure),
            other => Err(format!("unknown transfer outcome: {other}")),
        }
    }
}

// ── Membership ─────────────────────────────────────────────────────

/// Snapshot of one cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub ip: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_of_prefers_master() {
        assert_eq!(Role::of("a", Some("a"), Some("b")), Role::Master);
        assert_eq!(Role::of("b", Some("a"), Some("b")), Role::Slave);
        assert_eq!(Role::of("c", Some("a"), Some("b")), Role::None);
        assert_eq!(Role::of("a", None, None), Role::None);
        assert_eq!(Role::of("a", Some("a"), Some("a")), Role::Master);
    }

    #[test]
    fn envelope_uses_serf_field_names() {
        let raw = r#"{"ID":"e1","Name":"deploy","Payload":"e30=","Version":1,"LTime":7}"#;
        let env: EventEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.id, "e1");
        assert_eq!(env.name, "deploy");
        assert_eq!(env.ltime, 7);
    }

    #[test]
    fn deploy_payload_optional_fields() {
        let p: DeployPayload =
            serde_json::from_str(r#"{"repo":"r","branch":"b","target":"n1"}"#).unwrap();
        assert_eq!(p.slave, None);
        assert_eq!(p.branch.as_deref(), Some("b"));
    }

    #[test]
    fn site_record_keeps_backend_key() {
        let rec = SiteRecord {
            name: "app".into(),
            backend_address: "http://app_web_1:80".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["ct"], "http://app_web_1:80");
        assert!(json.get("backend_address").is_none());
    }

    #[test]
    fn event_kind_parse() {
        assert_eq!("migrate".parse::<EventKind>().unwrap(), EventKind::Migrate);
        assert!("restart".parse::<EventKind>().is_err());
    }
}
