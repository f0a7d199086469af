//! Recording collaborators shared by the engine integration tests.
//!
//! Each `Node` owns a call trace; every capability it hands to the engine
//! appends a line per side effect. Nodes built from the same `MemoryStore`
//! see each other's site and transfer records.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use tandem_core::config::{HandshakeConfig, ScheduleConfig};
use tandem_core::{Identity, Member, NodeName, SiteRecord};
use tandem_engine::*;
use tandem_state::{
    CoordinationStore, KvEntry, MemoryLedger, MemoryStore, SiteStore, StateResult,
};

pub const REPO: &str = "https://git.example.com/acme/shop";
pub const BRANCH: &str = "prod";
pub const OLD_DATE: &str = "2024-01-01T00:00:00.000000";

pub const COMPOSE: &str = r#"
services:
  web:
    environment:
      URL: https://shop.example.com
      REDIRECT_FROM: www.shop.example.com
      PORT: "8080"
  db: {}
volumes:
  data:
    driver: btrfs
  cache:
    driver: local
"#;

pub fn identity() -> Identity {
    Identity::resolve(REPO, BRANCH)
}

/// Managed volume name of `local` for the test identity.
pub fn vol(local: &str) -> String {
    format!("{}_{local}", identity().project())
}

#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn push(&self, line: impl Into<String>) {
        self.0.lock().push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Mutable state of one simulated node.
pub struct World {
    pub name: String,
    pub trace: Trace,
    pub deploy_root: PathBuf,
    /// Checkout directories present on this node.
    pub checkouts: Mutex<HashSet<PathBuf>>,
    /// Known old checkout, traced as `old`; anything else is `new`.
    pub old_checkout: Mutex<Option<PathBuf>>,
    pub compose: Mutex<ComposeFile>,
    pub members: Mutex<HashMap<NodeName, Member>>,
    pub fetch_failures: AtomicU32,
    pub fail_send: AtomicBool,
    pub fail_register: AtomicBool,
    pub fail_clean: AtomicBool,
}

impl World {
    fn label(&self, path: &Path) -> &'static str {
        if self.old_checkout.lock().as_deref() == Some(path) {
            "old"
        } else {
            "new"
        }
    }
}

pub struct Node {
    pub world: Arc<World>,
    pub store: MemoryStore,
    pub shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Node {
    pub fn new(name: &str, store: &MemoryStore) -> Self {
        let members = [("node-a", "10.0.0.1"), ("node-b", "10.0.0.2"), ("node-c", "10.0.0.3")]
            .into_iter()
            .map(|(n, ip)| {
                (
                    n.to_string(),
                    Member {
                        ip: ip.to_string(),
                        status: "alive".to_string(),
                    },
                )
            })
            .collect();
        let world = Arc::new(World {
            name: name.to_string(),
            trace: Trace::default(),
            deploy_root: PathBuf::from("/deploy"),
            checkouts: Mutex::new(HashSet::new()),
            old_checkout: Mutex::new(None),
            compose: Mutex::new(ComposeFile::parse(COMPOSE).unwrap()),
            members: Mutex::new(members),
            fetch_failures: AtomicU32::new(0),
            fail_send: AtomicBool::new(false),
            fail_register: AtomicBool::new(false),
            fail_clean: AtomicBool::new(false),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            world,
            store: store.clone(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn trace(&self) -> Vec<String> {
        self.world.trace.lines()
    }

    /// Give this node a live checkout of the recorded deployment.
    pub fn with_old_checkout(self) -> Self {
        let path = Checkout::at(&self.world.deploy_root, &identity(), OLD_DATE).path;
        self.world.checkouts.lock().insert(path.clone());
        *self.world.old_checkout.lock() = Some(path);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        let recorder = Recorder(self.world.clone());
        let recorder = Arc::new(recorder);
        Collaborators {
            store: Arc::new(TracingStore {
                inner: self.store.clone(),
                trace: self.world.trace.clone(),
            }),
            engine: recorder.clone(),
            fetcher: recorder.clone(),
            volumes: recorder.clone(),
            registry: recorder.clone(),
            membership: recorder,
        }
    }

    pub fn engine_with(&self, handshake: &HandshakeConfig) -> TransitionEngine {
        let collab = self.collaborators();
        let hs = TransferHandshake::new(collab.store.clone(), handshake);
        let settings = EngineSettings {
            deploy_root: self.world.deploy_root.clone(),
            schedule: ScheduleConfig::default(),
            volume_driver: "btrfs".to_string(),
            check_interval_secs: 60,
        };
        TransitionEngine::new(collab, hs, settings, self.shutdown_rx.clone())
    }

    pub fn engine(&self) -> TransitionEngine {
        self.engine_with(&fast_handshake())
    }

    pub fn dispatcher(&self, ledger: MemoryLedger) -> Dispatcher {
        Dispatcher::new(Arc::new(ledger), self.engine())
    }
}

pub fn fast_handshake() -> HandshakeConfig {
    HandshakeConfig {
        poll_interval_ms: 5,
        max_attempts: 200,
    }
}

/// Seed the store with a site record for the test identity.
pub async fn seed_site(store: &MemoryStore, master: Option<&str>, slave: Option<&str>) {
    let record = SiteRecord {
        name: identity().name().to_string(),
        deploy_date: Some(OLD_DATE.to_string()),
        node: master.map(String::from),
        slave: slave.map(String::from),
        url: Some("https://shop.example.com".to_string()),
        volumes: vec![vol("data")],
        ..Default::default()
    };
    store.put_site(&record).await.unwrap();
}

pub fn deploy_payload(target: &str, slave: Option<&str>) -> tandem_core::DeployPayload {
    tandem_core::DeployPayload {
        repo: REPO.to_string(),
        branch: Some(BRANCH.to_string()),
        target: target.to_string(),
        slave: slave.map(String::from),
    }
}

// ── Recording capabilities ─────────────────────────────────────────

struct Recorder(Arc<World>);

#[async_trait]
impl DeploymentEngine for Recorder {
    async fn definition(&self, checkout: &Path) -> EngineResult<Option<ComposeFile>> {
        if self.0.checkouts.lock().contains(checkout) {
            Ok(Some(self.0.compose.lock().clone()))
        } else {
            Ok(None)
        }
    }

    async fn up(&self, _project: &str, checkout: &Path) -> EngineResult<()> {
        self.0.trace.push(format!("up {}", self.0.label(checkout)));
        Ok(())
    }

    async fn down(&self, _project: &str, checkout: &Path, delete_volumes: bool) -> EngineResult<()> {
        let flag = if delete_volumes { " -v" } else { "" };
        self.0.trace.push(format!("down {}{flag}", self.0.label(checkout)));
        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for Recorder {
    async fn fetch(&self, repo: &str, branch: &str, dest: &Path) -> EngineResult<()> {
        self.0.trace.push(format!("fetch {repo} {branch}"));
        let remaining = self.0.fetch_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.0.fetch_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::ExternalTool {
                command: "git clone".into(),
                stderr: "network unreachable".into(),
            });
        }
        self.0.checkouts.lock().insert(dest.to_path_buf());
        Ok(())
    }

    async fn clean(&self, checkout: &Path) -> EngineResult<()> {
        self.0.trace.push(format!("clean {}", self.0.label(checkout)));
        if self.0.fail_clean.load(Ordering::SeqCst) {
            return Err(EngineError::ExternalTool {
                command: "rm".into(),
                stderr: "device or resource busy".into(),
            });
        }
        self.0.checkouts.lock().remove(checkout);
        Ok(())
    }
}

#[async_trait]
impl VolumeManager for Recorder {
    async fn snapshot(&self, volume: &str) -> EngineResult<String> {
        self.0.trace.push(format!("snapshot {volume}"));
        Ok(format!("{volume}@snap"))
    }

    async fn restore(&self, snapshot: &str, target: Option<&str>) -> EngineResult<()> {
        match target {
            Some(t) => self.0.trace.push(format!("restore {snapshot} as {t}")),
            None => self.0.trace.push(format!("restore {snapshot}")),
        }
        Ok(())
    }

    async fn send(&self, snapshot: &str, host: &str) -> EngineResult<()> {
        self.0.trace.push(format!("send {snapshot} {host}"));
        if self.0.fail_send.load(Ordering::SeqCst) {
            return Err(EngineError::ExternalTool {
                command: "buttervolume send".into(),
                stderr: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn schedule_snapshot(&self, volume: &str, minutes: u32) -> EngineResult<()> {
        self.0.trace.push(format!("schedule snapshot {volume} {minutes}"));
        Ok(())
    }

    async fn schedule_replicate(&self, volume: &str, minutes: u32, host: &str) -> EngineResult<()> {
        self.0
            .trace
            .push(format!("schedule replicate {volume} {minutes} {host}"));
        Ok(())
    }

    async fn schedule_purge(&self, volume: &str, minutes: u32, _pattern: &str) -> EngineResult<()> {
        self.0.trace.push(format!("schedule purge {volume} {minutes}"));
        Ok(())
    }

    async fn delete(&self, volume: &str) -> EngineResult<()> {
        self.0.trace.push(format!("delete {volume}"));
        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for Recorder {
    async fn register(
        &self,
        name: &str,
        check_urls: &[String],
        _interval_secs: u32,
    ) -> EngineResult<()> {
        self.0
            .trace
            .push(format!("register {name} checks={}", check_urls.len()));
        if self.0.fail_register.load(Ordering::SeqCst) {
            return Err(EngineError::Registration("500 Internal Server Error".into()));
        }
        Ok(())
    }

    async fn deregister(&self, name: &str) -> EngineResult<()> {
        self.0.trace.push(format!("deregister {name}"));
        Ok(())
    }
}

#[async_trait]
impl ClusterMembership for Recorder {
    async fn members(&self) -> EngineResult<HashMap<NodeName, Member>> {
        Ok(self.0.members.lock().clone())
    }
}

/// Store wrapper tracing every mutation as `kv put|delete {key}`.
struct TracingStore {
    inner: MemoryStore,
    trace: Trace,
}

#[async_trait]
impl CoordinationStore for TracingStore {
    async fn get(&self, key: &str) -> StateResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> StateResult<Vec<KvEntry>> {
        self.inner.get_prefix(prefix).await
    }

    async fn put(&self, key: &str, value: &str) -> StateResult<()> {
        self.trace.push(format!("kv put {key}"));
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str, recursive: bool) -> StateResult<()> {
        self.trace.push(format!("kv delete {key}"));
        self.inner.delete(key, recursive).await
    }
}
