//! Managed volumes of an application.
//!
//! Live definitions win: when a checkout exists on this node, its
//! driver-backed volumes are named `{project}_{volume}`. Otherwise the list
//! persisted in the site record is used. Neither source means no volumes.

use std::fmt;

use tracing::{debug, info};

use tandem_core::{Identity, SiteRecord};

use crate::compose::ComposeFile;

/// A named copy-on-write volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Volume {
    pub name: String,
}

impl Volume {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Service-local part of the name (after the project slug).
    pub fn local_name(&self) -> &str {
        self.name
            .split_once('_')
            .map_or(self.name.as_str(), |(_, local)| local)
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub struct VolumeSet;

impl VolumeSet {
    pub fn resolve(
        identity: &Identity,
        definition: Option<&ComposeFile>,
        site: Option<&SiteRecord>,
        driver: &str,
    ) -> Vec<Volume> {
        if let Some(definition) = definition {
            let project = identity.project();
            return definition
                .volumes_with_driver(driver)
                .map(|v| Volume::new(format!("{project}_{v}")))
                .collect();
        }
        match site {
            Some(site) => {
                info!(app = %identity, "no checkout available, reading volumes from the store");
                site.volumes.iter().map(Volume::new).collect()
            }
            None => {
                debug!(app = %identity, "no volumes found");
                Vec::new()
            }
        }
    }

    /// Pair source and target volumes sharing a service-local name.
    pub fn match_volumes(source: &[Volume], target: &[Volume]) -> Vec<(Volume, Volume)> {
        source
            .iter()
            .flat_map(|s| {
                target
                    .iter()
                    .filter(move |t| t.local_name() == s.local_name())
                    .map(move |t| (s.clone(), t.clone()))
            })
            .collect()
    }
}
