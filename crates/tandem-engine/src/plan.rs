//! Transition plans: the action sequence a node runs for each
//! (OLD role, NEW role) pair of an event.
//!
//! Plans are pure: every cell of the deploy and destroy tables is defined,
//! no-ops included, and the executor in `transition` runs them in order.

use serde::Serialize;

use tandem_core::Role;

/// One action of a transition.
///
/// "Old" steps act on the deployment as recorded before the event, "new"
/// steps on the deployment being put in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Step {
    /// Stop the old deployment, keeping its volumes.
    StopOld,
    /// Disable the old replication schedule, or the old snapshot schedule
    /// when there was no slave.
    DisableOldSchedule,
    DisableOldPurge,
    /// Snapshot every old volume in place.
    SnapshotVolumes,
    /// Fetch the new checkout (retried once).
    Fetch,
    /// Refuse URLs already claimed by another identity.
    CheckConsistency,
    /// Snapshot every volume and send it to the new master, under the
    /// transfer handshake. Restarts the old deployment on failure.
    SendToNewMaster,
    /// Wait for the transfer handshake to report success.
    WaitTransfer,
    /// Restore every volume from its latest snapshot.
    RestoreVolumes,
    /// Start the new deployment.
    Start,
    /// Replicate to the new slave, or schedule snapshots without one.
    EnableSchedule,
    EnablePurge,
    /// Write the site record.
    RegisterRouting,
    /// Register the service and its health checks.
    RegisterHealth,
    /// Deregister the old service.
    DeregisterOld,
    /// Stop the old deployment and delete its live volumes.
    DeleteVolumes,
    /// Delete the site record.
    UnregisterRouting,
    /// Remove the old checkout directory.
    CleanOldCheckout,
}

/// Deploy plan for a node moving from `old` to `new`.
///
/// `had_replica` tells whether any node held the data before this event;
/// a node becoming master from nothing then waits for it and restores.
pub fn deploy_plan(old: Role, new: Role, had_replica: bool) -> Vec<Step> {
    use Step::*;
    match (old, new) {
        (Role::Master, Role::Master) => vec![
            StopOld,
            DisableOldSchedule,
            DisableOldPurge,
            SnapshotVolumes,
            Fetch,
            CheckConsistency,
            Start,
            EnableSchedule,
            EnablePurge,
            RegisterRouting,
            RegisterHealth,
            CleanOldCheckout,
        ],
        (Role::Master, Role::Slave) | (Role::Master, Role::None) => vec![
            StopOld,
            DisableOldSchedule,
            DisableOldPurge,
            SendToNewMaster,
            DeregisterOld,
            DeleteVolumes,
            CleanOldCheckout,
        ],
        (Role::Slave, Role::Master) => vec![
            DisableOldPurge,
            Fetch,
            CheckConsistency,
            WaitTransfer,
            RestoreVolumes,
            Start,
            EnableSchedule,
            EnablePurge,
            RegisterRouting,
            RegisterHealth,
        ],
        (Role::Slave, Role::Slave) => vec![DisableOldPurge, EnablePurge],
        (Role::Slave, Role::None) => vec![DisableOldPurge],
        (Role::None, Role::Master) => {
            let mut steps = vec![Fetch, CheckConsistency];
            if had_replica {
                steps.extend([WaitTransfer, RestoreVolumes]);
            }
            steps.extend([Start, EnableSchedule, EnablePurge, RegisterRouting, RegisterHealth]);
            steps
        }
        (Role::None, Role::Slave) => vec![Fetch, EnablePurge],
        (Role::None, Role::None) => vec![],
    }
}

/// Destroy plan for a node holding `old`. Snapshots are always kept.
pub fn destroy_plan(old: Role) -> Vec<Step> {
    use Step::*;
    match old {
        Role::Master => vec![
            StopOld,
            DeregisterOld,
            DisableOldSchedule,
            DisableOldPurge,
            UnregisterRouting,
            SnapshotVolumes,
            DeleteVolumes,
            CleanOldCheckout,
        ],
        Role::Slave => vec![DisableOldPurge],
        Role::None => vec![],
    }
}

/// What a node does during a migration between two identities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigratePlan {
    /// Send fresh source snapshots to the target master.
    pub send: bool,
    /// Wait for the source master's transfer.
    pub wait: bool,
    /// Stop the target, restore matched volumes, restart it.
    pub restore: bool,
}

impl MigratePlan {
    pub fn for_node(node: &str, source_master: Option<&str>, target_master: Option<&str>) -> Self {
        let is_source = source_master == Some(node);
        let is_target = target_master == Some(node);
        let remote = source_master != target_master;
        Self {
            send: remote && is_source,
            wait: remote && is_target,
            restore: is_target,
        }
    }

    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}
