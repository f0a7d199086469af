//! Runs deploy, destroy and migrate on this node.
//!
//! Each handler validates its payload before touching any collaborator,
//! resolves the OLD and NEW roles of this node, takes the plan for that
//! pair from `plan` and executes it step by step. A failing step aborts the
//! transition; only a failed outgoing transfer is compensated (the old
//! deployment is restarted).

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use tandem_core::config::{ScheduleConfig, TandemConfig};
use tandem_core::{
    DeployPayload, DestroyPayload, Identity, Member, MigratePayload, NodeName, Role, SiteRecord,
};
use tandem_state::SiteStore;

use crate::application::{Application, Checkout};
use crate::capability::Collaborators;
use crate::error::{EngineError, EngineResult};
use crate::handshake::TransferHandshake;
use crate::plan::{MigratePlan, Step, deploy_plan, destroy_plan};
use crate::roles::{RoleAssignment, RoleResolver};
use crate::volumes::{Volume, VolumeSet};

/// Engine settings, taken from `TandemConfig`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub deploy_root: PathBuf,
    pub schedule: ScheduleConfig,
    pub volume_driver: String,
    pub check_interval_secs: u32,
}

impl From<&TandemConfig> for EngineSettings {
    fn from(config: &TandemConfig) -> Self {
        Self {
            deploy_root: config.paths.deploy_root.clone(),
            schedule: config.schedule.clone(),
            volume_driver: config.volumes.driver.clone(),
            check_interval_secs: config.registry.check_interval_secs,
        }
    }
}

pub struct TransitionEngine {
    collab: Collaborators,
    handshake: TransferHandshake,
    settings: EngineSettings,
    shutdown: watch::Receiver<bool>,
}

/// Everything a plan step may need, gathered once per transition.
struct Transition<'a> {
    node: &'a str,
    repo: &'a str,
    branch: &'a str,
    old: Application,
    new: Application,
    old_assignment: RoleAssignment,
    new_assignment: RoleAssignment,
    members: HashMap<NodeName, Member>,
}

impl Transition<'_> {
    fn ip_of(&self, node: &str) -> EngineResult<String> {
        self.members
            .get(node)
            .map(|m| m.ip.clone())
            .ok_or_else(|| EngineError::UnknownMember(node.to_string()))
    }

    fn new_master(&self) -> EngineResult<&str> {
        self.new_assignment
            .master
            .as_deref()
            .ok_or_else(|| EngineError::config("no master assigned"))
    }
}

fn require_branch(branch: Option<&str>) -> EngineResult<&str> {
    match branch.map(str::trim) {
        Some(b) if !b.is_empty() => Ok(b),
        _ => Err(EngineError::config("branch is mandatory")),
    }
}

impl TransitionEngine {
    pub fn new(
        collab: Collaborators,
        handshake: TransferHandshake,
        settings: EngineSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            collab,
            handshake,
            settings,
            shutdown,
        }
    }

    // ── Deploy ─────────────────────────────────────────────────────

    pub async fn deploy(&self, payload: &DeployPayload, node: &str) -> EngineResult<()> {
        if payload.slave.as_deref() == Some(payload.target.as_str()) {
            return Err(EngineError::config(
                "slave must be different than the target master",
            ));
        }
        let branch = require_branch(payload.branch.as_deref())?;

        let identity = Identity::resolve(&payload.repo, branch);
        let old = Application::load(identity, &self.settings.deploy_root, &self.collab).await?;
        let old_assignment = old.assignment();
        let new_assignment = RoleAssignment::from_payload(payload);
        let old_role = old_assignment.role_of(node);
        let new_role = RoleResolver::new_role(payload, node);
        let had_replica = old_assignment.master.is_some() || old_assignment.slave.is_some();

        let members = self.collab.membership.members().await?;
        let plan = deploy_plan(old_role, new_role, had_replica);
        info!(app = %old.identity, %old_role, %new_role, steps = plan.len(), "deploy transition");

        let mut t = Transition {
            node,
            repo: &payload.repo,
            branch,
            new: old.clone(),
            old,
            old_assignment,
            new_assignment,
            members,
        };
        self.run(&plan, &mut t).await?;
        info!(app = %t.new.identity, "deploy finished");
        Ok(())
    }

    // ── Destroy ────────────────────────────────────────────────────

    pub async fn destroy(&self, payload: &DestroyPayload, node: &str) -> EngineResult<()> {
        let branch = require_branch(payload.branch.as_deref())?;
        let identity = Identity::resolve(&payload.repo, branch);
        let old = Application::load(identity, &self.settings.deploy_root, &self.collab).await?;
        let old_assignment = old.assignment();
        let old_role = old_assignment.role_of(node);

        let members = self.collab.membership.members().await?;
        let plan = destroy_plan(old_role);
        info!(app = %old.identity, %old_role, steps = plan.len(), "destroy transition");

        let mut t = Transition {
            node,
            repo: &payload.repo,
            branch,
            new: old.clone(),
            old,
            old_assignment,
            new_assignment: RoleAssignment::default(),
            members,
        };
        self.run(&plan, &mut t).await?;
        info!(app = %t.old.identity, "successfully destroyed");
        Ok(())
    }

    // ── Migrate ────────────────────────────────────────────────────

    pub async fn migrate(&self, payload: &MigratePayload, node: &str) -> EngineResult<()> {
        let branch = require_branch(payload.branch.as_deref())?;
        if payload.target.repo.is_none() && payload.target.branch.is_none() {
            return Err(EngineError::config(
                "migration target needs a repo or a branch",
            ));
        }
        let target_repo = payload.target.repo.as_deref().unwrap_or(&payload.repo);
        let target_branch = payload.target.branch.as_deref().unwrap_or(branch);

        let root = &self.settings.deploy_root;
        let source = Application::load(Identity::resolve(&payload.repo, branch), root, &self.collab)
            .await?;
        let target =
            Application::load(Identity::resolve(target_repo, target_branch), root, &self.collab)
                .await?;
        let source_master = source.assignment().master;
        let target_master = target.assignment().master;

        let plan = MigratePlan::for_node(node, source_master.as_deref(), target_master.as_deref());
        if plan.is_idle() {
            info!(source = %source.identity, target = %target.identity, "not concerned by this migration");
            return Ok(());
        }

        let driver = &self.settings.volume_driver;
        let pairs = VolumeSet::match_volumes(&source.volumes(driver), &target.volumes(driver));
        info!(
            count = pairs.len(),
            volumes = ?pairs.iter().map(|(s, _)| s.name.as_str()).collect::<Vec<_>>(),
            "found volumes to restore"
        );

        if plan.send {
            let target_master = target_master
                .as_deref()
                .ok_or_else(|| EngineError::config("migration target is not deployed"))?;
            let members = self.collab.membership.members().await?;
            let host = members
                .get(target_master)
                .map(|m| m.ip.clone())
                .ok_or_else(|| EngineError::UnknownMember(target_master.to_string()))?;
            let sources: Vec<Volume> = pairs.iter().map(|(s, _)| s.clone()).collect();
            self.handshake
                .notify(
                    source.name(),
                    self.send_volumes(&sources, &host),
                    self.up(&source),
                )
                .await?;
        }
        if plan.wait {
            let mut shutdown = self.shutdown.clone();
            self.handshake
                .expect_success(source.name(), &mut shutdown)
                .await?;
        }
        if plan.restore {
            self.down(&target, false).await?;
            for (source_vol, target_vol) in &pairs {
                self.collab
                    .volumes
                    .restore(&source_vol.name, Some(&target_vol.name))
                    .await?;
            }
            self.up(&target).await?;
        }
        info!(source = %source.identity, target = %target.identity, "migration restored");
        Ok(())
    }

    // ── Plan execution ─────────────────────────────────────────────

    async fn run(&self, plan: &[Step], t: &mut Transition<'_>) -> EngineResult<()> {
        for step in plan {
            debug!(app = %t.old.identity, ?step, "running step");
            self.step(*step, t).await?;
        }
        Ok(())
    }

    async fn step(&self, step: Step, t: &mut Transition<'_>) -> EngineResult<()> {
        let driver = self.settings.volume_driver.as_str();
        let schedule = &self.settings.schedule;
        let volumes = &self.collab.volumes;
        match step {
            Step::StopOld => self.down(&t.old, false).await,
            Step::DisableOldSchedule => {
                let replica_ip = match &t.old_assignment.slave {
                    Some(slave) => Some(t.ip_of(slave)?),
                    None => None,
                };
                for v in t.old.volumes(driver) {
                    match &replica_ip {
                        Some(ip) => volumes.schedule_replicate(&v.name, 0, ip).await?,
                        None => volumes.schedule_snapshot(&v.name, 0).await?,
                    }
                }
                Ok(())
            }
            Step::DisableOldPurge => {
                for v in t.old.volumes(driver) {
                    volumes
                        .schedule_purge(&v.name, 0, &schedule.purge_pattern)
                        .await?;
                }
                Ok(())
            }
            Step::SnapshotVolumes => {
                for v in t.old.volumes(driver) {
                    info!(volume = %v, "snapshotting volume");
                    volumes.snapshot(&v.name).await?;
                }
                Ok(())
            }
            Step::Fetch => {
                t.new = self.fetch(&t.new, t.repo, t.branch).await?;
                Ok(())
            }
            Step::CheckConsistency => self.check(&t.new).await,
            Step::SendToNewMaster => {
                let host = t.ip_of(t.new_master()?)?;
                let sources = t.old.volumes(driver);
                self.handshake
                    .notify(
                        t.old.name(),
                        self.send_volumes(&sources, &host),
                        self.up(&t.old),
                    )
                    .await
            }
            Step::WaitTransfer => {
                let mut shutdown = self.shutdown.clone();
                self.handshake
                    .expect_success(t.new.name(), &mut shutdown)
                    .await
            }
            Step::RestoreVolumes => {
                for v in t.new.volumes(driver) {
                    info!(volume = %v, "restoring latest snapshot");
                    volumes.restore(&v.name, None).await?;
                }
                Ok(())
            }
            Step::Start => self.up(&t.new).await,
            Step::EnableSchedule => {
                let replica_ip = match &t.new_assignment.slave {
                    Some(slave) => Some(t.ip_of(slave)?),
                    None => None,
                };
                for v in t.new.volumes(driver) {
                    match &replica_ip {
                        Some(ip) => {
                            volumes
                                .schedule_replicate(&v.name, schedule.replicate_minutes, ip)
                                .await?
                        }
                        None => {
                            volumes
                                .schedule_snapshot(&v.name, schedule.snapshot_minutes)
                                .await?
                        }
                    }
                }
                Ok(())
            }
            Step::EnablePurge => {
                for v in t.new.volumes(driver) {
                    volumes
                        .schedule_purge(&v.name, schedule.purge_minutes, &schedule.purge_pattern)
                        .await?;
                }
                Ok(())
            }
            Step::RegisterRouting => {
                let record = self.site_record(t)?;
                self.collab.store.put_site(&record).await?;
                info!(app = %t.new.identity, node = %t.node, "registered site record");
                Ok(())
            }
            Step::RegisterHealth => {
                let urls = t
                    .new
                    .definition
                    .as_ref()
                    .map(|d| d.exposed_urls())
                    .unwrap_or_default();
                self.collab
                    .registry
                    .register(t.new.name(), &urls, self.settings.check_interval_secs)
                    .await?;
                info!(app = %t.new.identity, checks = urls.len(), "registered in service registry");
                Ok(())
            }
            Step::DeregisterOld => {
                match &t.old.definition {
                    Some(def) if def.exposed_urls().is_empty() => {
                        debug!(app = %t.old.identity, "no exposed service to deregister");
                    }
                    Some(_) => {
                        self.collab.registry.deregister(t.old.name()).await?;
                        info!(app = %t.old.identity, "deregistered from service registry");
                    }
                    None => {
                        warn!(app = %t.old.identity, "no local definition, skipping deregistration");
                    }
                }
                Ok(())
            }
            Step::DeleteVolumes => {
                if t.old.live_checkout().is_some() {
                    self.down(&t.old, true).await
                } else {
                    for v in t.old.volumes(driver) {
                        info!(volume = %v, "destroying volume");
                        volumes.delete(&v.name).await?;
                    }
                    Ok(())
                }
            }
            Step::UnregisterRouting => {
                self.collab.store.delete_site(t.old.name()).await?;
                Ok(())
            }
            Step::CleanOldCheckout => {
                if let Some(checkout) = &t.old.checkout {
                    self.collab.fetcher.clean(&checkout.path).await?;
                }
                Ok(())
            }
        }
    }

    // ── Actions ────────────────────────────────────────────────────

    async fn up(&self, app: &Application) -> EngineResult<()> {
        match app.live_checkout() {
            Some(path) => {
                info!(app = %app.identity, "starting");
                self.collab.engine.up(&app.project(), path).await
            }
            None => {
                info!(app = %app.identity, "no deployment, cannot start");
                Ok(())
            }
        }
    }

    async fn down(&self, app: &Application, delete_volumes: bool) -> EngineResult<()> {
        match app.live_checkout() {
            Some(path) => {
                info!(app = %app.identity, delete_volumes, "stopping");
                self.collab
                    .engine
                    .down(&app.project(), path, delete_volumes)
                    .await
            }
            None => {
                info!(app = %app.identity, "no deployment, cannot stop");
                Ok(())
            }
        }
    }

    /// Clone a fresh checkout, retrying once, and load its definition.
    async fn fetch(&self, app: &Application, repo: &str, branch: &str) -> EngineResult<Application> {
        let checkout = Checkout::fresh(&self.settings.deploy_root, &app.identity);
        let fetcher = &self.collab.fetcher;
        if let Err(e) = fetcher.fetch(repo, branch, &checkout.path).await {
            warn!(app = %app.identity, error = %e, "failed to fetch, retrying");
            if let Err(e) = fetcher.clean(&checkout.path).await {
                warn!(app = %app.identity, error = %e, "failed to clean checkout before retry");
            }
            fetcher.fetch(repo, branch, &checkout.path).await?;
        }
        let definition = self
            .collab
            .engine
            .definition(&checkout.path)
            .await?
            .ok_or_else(|| {
                EngineError::Definition(format!(
                    "no deployment definition in {}",
                    checkout.path.display()
                ))
            })?;
        Ok(Application {
            identity: app.identity.clone(),
            site: app.site.clone(),
            checkout: Some(checkout),
            definition: Some(definition),
        })
    }

    /// Refuse URLs already served (or redirected) by another identity.
    async fn check(&self, app: &Application) -> EngineResult<()> {
        let Some(def) = &app.definition else {
            return Ok(());
        };
        let sites = self.collab.store.list_sites().await?;
        for service in def.service_names() {
            let mut urls = def.redirect_from(service);
            urls.extend(def.url(service));
            for site in sites.iter().filter(|s| s.name != app.name()) {
                for url in &urls {
                    if site.url.as_deref() == Some(url.as_str()) || site.redirect_from.contains(url)
                    {
                        let err = EngineError::UrlConflict {
                            url: url.clone(),
                            owner: site.name.clone(),
                        };
                        warn!(app = %app.identity, error = %err, "aborting");
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    async fn send_volumes(&self, sources: &[Volume], host: &str) -> EngineResult<()> {
        for v in sources {
            info!(volume = %v, "snapshotting volume");
            let snapshot = self.collab.volumes.snapshot(&v.name).await?;
            info!(%snapshot, %host, "sending snapshot");
            self.collab.volumes.send(&snapshot, host).await?;
        }
        Ok(())
    }

    fn site_record(&self, t: &Transition<'_>) -> EngineResult<SiteRecord> {
        let master = t.new_master()?;
        let app = &t.new;
        let volumes = app
            .volumes(&self.settings.volume_driver)
            .into_iter()
            .map(|v| v.name)
            .collect();
        let mut record = SiteRecord {
            name: app.name().to_string(),
            deploy_date: app.checkout.as_ref().map(|c| c.deploy_date.clone()),
            ip: t.ip_of(master)?,
            node: Some(master.to_string()),
            slave: t.new_assignment.slave.clone(),
            volumes,
            ..Default::default()
        };
        let def = app.definition.as_ref();
        if let Some((def, service)) = def.and_then(|d| d.primary_service().map(|s| (d, s))) {
            record.domain = def.domain(service).unwrap_or_default();
            record.url = def.url(service);
            record.redirect_from = def.redirect_from(service);
            record.redirect_to = def.redirect_to(service);
            record.tls = def.tls(service);
            record.backend_address = format!(
                "{}{}:{}",
                def.proto(service),
                app.container_name(service),
                def.port(service)
            );
        }
        Ok(record)
    }

    /// Role of `node` for an identity as currently recorded.
    pub async fn current_role(&self, identity: &Identity, node: &str) -> EngineResult<Role> {
        RoleResolver::new(self.collab.store.clone())
            .old_role(identity, node)
            .await
    }
}
