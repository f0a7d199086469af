//! tandem-exec — production collaborators for the transition engine.
//!
//! Every capability shells out to the tool the fleet already runs
//! (`consul`, `docker-compose`, `git`, `buttervolume`), except service
//! registration which talks HTTP to the local Consul agent.

pub mod buttervolume;
pub mod compose;
pub mod consul;
pub mod git;
pub mod registry;
pub mod runner;

use std::sync::Arc;

use tandem_core::TandemConfig;
use tandem_engine::Collaborators;

pub use buttervolume::Buttervolume;
pub use compose::DockerCompose;
pub use consul::{ConsulKv, ConsulMembers};
pub use git::GitFetcher;
pub use registry::ConsulRegistry;
pub use runner::Tool;

/// Wire the production collaborators described by `config`.
pub fn collaborators(config: &TandemConfig) -> Collaborators {
    let tools = &config.tools;
    Collaborators {
        store: Arc::new(ConsulKv::new(&config.consul.binary)),
        engine: Arc::new(DockerCompose::new(&tools.compose)),
        fetcher: Arc::new(GitFetcher::new(&tools.git)),
        volumes: Arc::new(Buttervolume::new(&tools.buttervolume, &tools.docker)),
        registry: Arc::new(ConsulRegistry::new(config.consul.http_addr.clone())),
        membership: Arc::new(ConsulMembers::new(&config.consul.binary)),
    }
}
