//! Capability interfaces the engine drives.
//!
//! Each external tool the transitions touch is one narrow trait; production
//! implementations live in `tandem-exec`, tests substitute recorders.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use tandem_core::{Member, NodeName};
use tandem_state::CoordinationStore;

use crate::compose::ComposeFile;
use crate::error::EngineResult;

/// Container/compose engine for one checkout.
#[async_trait]
pub trait DeploymentEngine: Send + Sync {
    /// Parsed definition of the checkout at `checkout`, or `None` when that
    /// checkout does not exist on this node.
    async fn definition(&self, checkout: &Path) -> EngineResult<Option<ComposeFile>>;

    /// Build and start every service of `project`.
    async fn up(&self, project: &str, checkout: &Path) -> EngineResult<()>;

    /// Stop `project`, removing its volumes when `delete_volumes`.
    async fn down(&self, project: &str, checkout: &Path, delete_volumes: bool) -> EngineResult<()>;
}

/// Source code fetcher.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Clone `repo` at `branch` into `dest`.
    async fn fetch(&self, repo: &str, branch: &str, dest: &Path) -> EngineResult<()>;

    /// Remove a checkout directory. Absent directories are ignored.
    async fn clean(&self, checkout: &Path) -> EngineResult<()>;
}

/// Copy-on-write volume manager.
///
/// A schedule period of `0` minutes disables that schedule.
#[async_trait]
pub trait VolumeManager: Send + Sync {
    /// Snapshot `volume`, returning the snapshot identifier.
    async fn snapshot(&self, volume: &str) -> EngineResult<String>;

    /// Restore `snapshot` (a snapshot ID, or a volume name for its latest
    /// snapshot), optionally as a differently named volume.
    async fn restore(&self, snapshot: &str, target: Option<&str>) -> EngineResult<()>;

    /// Send `snapshot` to the volume manager on `host`.
    async fn send(&self, snapshot: &str, host: &str) -> EngineResult<()>;

    async fn schedule_snapshot(&self, volume: &str, minutes: u32) -> EngineResult<()>;

    async fn schedule_replicate(&self, volume: &str, minutes: u32, host: &str) -> EngineResult<()>;

    async fn schedule_purge(&self, volume: &str, minutes: u32, pattern: &str) -> EngineResult<()>;

    /// Delete the live volume. Snapshots are kept.
    async fn delete(&self, volume: &str) -> EngineResult<()>;
}

/// Service registry with HTTP health checks.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn register(&self, name: &str, check_urls: &[String], interval_secs: u32)
    -> EngineResult<()>;

    async fn deregister(&self, name: &str) -> EngineResult<()>;
}

/// Cluster membership listing.
#[async_trait]
pub trait ClusterMembership: Send + Sync {
    async fn members(&self) -> EngineResult<HashMap<NodeName, Member>>;
}

/// Every collaborator a transition may call.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn CoordinationStore>,
    pub engine: Arc<dyn DeploymentEngine>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub volumes: Arc<dyn VolumeManager>,
    pub registry: Arc<dyn ServiceRegistry>,
    pub membership: Arc<dyn ClusterMembership>,
}
