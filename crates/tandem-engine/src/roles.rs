//! Role resolution for the local node.
//!
//! OLD roles come from the site record as it stands before the event is
//! applied; NEW roles come from the event payload. Reads never fail on a
//! missing or unreadable record: both resolve to no assignment.

use std::sync::Arc;

use tracing::warn;

use tandem_core::{DeployPayload, Identity, NodeName, Role, SiteRecord};
use tandem_state::{CoordinationStore, SiteStore, StateError};

use crate::error::EngineResult;

/// Master and slave nodes assigned to one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleAssignment {
    pub master: Option<NodeName>,
    pub slave: Option<NodeName>,
}

impl RoleAssignment {
    pub fn from_site(site: Option<&SiteRecord>) -> Self {
        match site {
            Some(site) => Self {
                master: site.node.clone().filter(|n| !n.is_empty()),
                slave: site.slave.clone().filter(|n| !n.is_empty()),
            },
            None => Self::default(),
        }
    }

    pub fn from_payload(payload: &DeployPayload) -> Self {
        Self {
            master: Some(payload.target.clone()),
            slave: payload.slave.clone().filter(|n| !n.is_empty()),
        }
    }

    pub fn role_of(&self, node: &str) -> Role {
        Role::of(node, self.master.as_deref(), self.slave.as_deref())
    }
}

/// Read the site record of `name`, treating undecodable records as absent.
pub(crate) async fn read_site(
    store: &dyn CoordinationStore,
    name: &str,
) -> EngineResult<Option<SiteRecord>> {
    match store.site(name).await {
        Ok(site) => Ok(site),
        Err(StateError::Deserialize(e)) => {
            warn!(app = %name, error = %e, "unreadable site record, ignoring it");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

pub struct RoleResolver {
    store: Arc<dyn CoordinationStore>,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Assignment currently recorded for `identity`.
    pub async fn old_assignment(&self, identity: &Identity) -> EngineResult<RoleAssignment> {
        let site = read_site(self.store.as_ref(), identity.name()).await?;
        if site.is_none() {
            warn!(app = %identity, "could not determine the master and slave nodes");
        }
        Ok(RoleAssignment::from_site(site.as_ref()))
    }

    pub async fn old_role(&self, identity: &Identity, node: &str) -> EngineResult<Role> {
        Ok(self.old_assignment(identity).await?.role_of(node))
    }

    pub fn new_role(payload: &DeployPayload, node: &str) -> Role {
        RoleAssignment::from_payload(payload).role_of(node)
    }
}
