//! docker-compose deployment engine.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use tandem_engine::{ComposeFile, DeploymentEngine, EngineError, EngineResult};

use crate::runner::Tool;

/// Definition file expected at the root of every checkout.
pub const COMPOSE_FILE: &str = "docker-compose.yml";

#[derive(Debug, Clone)]
pub struct DockerCompose {
    compose: Tool,
}

impl DockerCompose {
    pub fn new(command: &str) -> Self {
        Self {
            compose: Tool::new(command),
        }
    }
}

#[async_trait]
impl DeploymentEngine for DockerCompose {
    async fn definition(&self, checkout: &Path) -> EngineResult<Option<ComposeFile>> {
        let path = checkout.join(COMPOSE_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no deployment definition");
                return Ok(None);
            }
            Err(e) => {
                return Err(EngineError::Definition(format!(
                    "could not read {}: {e}",
                    path.display()
                )));
            }
        };
        ComposeFile::parse(&content).map(Some)
    }

    async fn up(&self, project: &str, checkout: &Path) -> EngineResult<()> {
        info!(%project, "starting compose project");
        self.compose
            .run(&["-p", project, "up", "-d", "--build"], Some(checkout))
            .await?;
        Ok(())
    }

    async fn down(&self, project: &str, checkout: &Path, delete_volumes: bool) -> EngineResult<()> {
        info!(%project, delete_volumes, "stopping compose project");
        let mut args = vec!["-p", project, "down"];
        if delete_volumes {
            args.push("-v");
        }
        self.compose.run(&args, Some(checkout)).await?;
        Ok(())
    }
}
