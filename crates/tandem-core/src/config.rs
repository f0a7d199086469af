//! tandem.toml configuration parser.
//!
//! Every section and field has a default, so an absent or partial file is
//! valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    pub node: NodeConfig,
    pub paths: PathsConfig,
    pub consul: ConsulConfig,
    pub tools: ToolsConfig,
    pub handshake: HandshakeConfig,
    pub schedule: ScheduleConfig,
    pub registry: RegistryConfig,
    pub volumes: VolumesConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name as known to the cluster membership. Defaults to the host name.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root directory holding the deployment checkouts.
    pub deploy_root: PathBuf,
    /// Event ledger database.
    pub ledger: PathBuf,
    pub log_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            deploy_root: PathBuf::from("/deploy"),
            ledger: PathBuf::from("/deploy/events.redb"),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    pub binary: String,
    /// Local agent HTTP address (`host:port`).
    pub http_addr: String,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            binary: "consul".to_string(),
            http_addr: "127.0.0.1:8500".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub compose: String,
    pub git: String,
    pub buttervolume: String,
    pub docker: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            compose: "docker-compose".to_string(),
            git: "git".to_string(),
            buttervolume: "buttervolume".to_string(),
            docker: "docker".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl HandshakeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_attempts: 60,
        }
    }
}

/// Periods (minutes) used when enabling volume schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub snapshot_minutes: u32,
    pub replicate_minutes: u32,
    pub purge_minutes: u32,
    /// Snapshot retention pattern handed to the volume manager.
    pub purge_pattern: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            snapshot_minutes: 60,
            replicate_minutes: 60,
            purge_minutes: 1440,
            purge_pattern: "1h:1d:1w:4w:1y".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub check_interval_secs: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumesConfig {
    /// Volume driver marking a compose volume as managed.
    pub driver: String,
}

impl Default for VolumesConfig {
    fn default() -> Self {
        Self {
            driver: "btrfs".to_string(),
        }
    }
}

impl TandemConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TandemConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
