//! One application identity with its checkout on this node, its parsed
//! definition and its recorded site.

use std::path::{Path, PathBuf};

use tracing::info;

use tandem_core::{Identity, SiteRecord};

use crate::capability::Collaborators;
use crate::compose::ComposeFile;
use crate::error::EngineResult;
use crate::roles::{RoleAssignment, read_site};
use crate::volumes::{Volume, VolumeSet};

/// Timestamp format of deploy dates (also the checkout directory suffix).
pub const DEPLOY_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// A checkout directory `{deploy_root}/{identity}@{deploy_date}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub path: PathBuf,
    pub deploy_date: String,
}

impl Checkout {
    pub fn at(deploy_root: &Path, identity: &Identity, deploy_date: &str) -> Self {
        Self {
            path: deploy_root.join(format!("{}@{}", identity.name(), deploy_date)),
            deploy_date: deploy_date.to_string(),
        }
    }

    /// Checkout stamped with the current local time.
    pub fn fresh(deploy_root: &Path, identity: &Identity) -> Self {
        let date = chrono::Local::now().format(DEPLOY_DATE_FORMAT).to_string();
        Self::at(deploy_root, identity, &date)
    }
}

#[derive(Debug, Clone)]
pub struct Application {
    pub identity: Identity,
    /// Site record as read before the transition.
    pub site: Option<SiteRecord>,
    pub checkout: Option<Checkout>,
    /// Definition from the checkout, when it exists on this node.
    pub definition: Option<ComposeFile>,
}

impl Application {
    /// Load the recorded state of `identity` and its local checkout, if any.
    pub async fn load(
        identity: Identity,
        deploy_root: &Path,
        collab: &Collaborators,
    ) -> EngineResult<Self> {
        let site = read_site(collab.store.as_ref(), identity.name()).await?;
        let checkout = site
            .as_ref()
            .and_then(|s| s.deploy_date.as_deref())
            .map(|date| Checkout::at(deploy_root, &identity, date));
        if checkout.is_none() {
            info!(app = %identity, "no current deploy date found in the store");
        }
        let definition = match &checkout {
            Some(c) => collab.engine.definition(&c.path).await?,
            None => None,
        };
        Ok(Self {
            identity,
            site,
            checkout,
            definition,
        })
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn project(&self) -> String {
        self.identity.project()
    }

    /// Static container name; one container per project/service is assumed.
    pub fn container_name(&self, service: &str) -> String {
        format!("{}_{}_1", self.project(), service)
    }

    pub fn assignment(&self) -> RoleAssignment {
        RoleAssignment::from_site(self.site.as_ref())
    }

    pub fn volumes(&self, driver: &str) -> Vec<Volume> {
        VolumeSet::resolve(
            &self.identity,
            self.definition.as_ref(),
            self.site.as_ref(),
            driver,
        )
    }

    /// Path of the local checkout, only when its definition was found.
    pub fn live_checkout(&self) -> Option<&Path> {
        match (&self.checkout, &self.definition) {
            (Some(c), Some(_)) => Some(c.path.as_path()),
            _ => None,
        }
    }
}
