//! Git source fetcher.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use tandem_engine::{EngineError, EngineResult, SourceFetcher};

use crate::runner::Tool;

#[derive(Debug, Clone)]
pub struct GitFetcher {
    git: Tool,
}

impl GitFetcher {
    pub fn new(command: &str) -> Self {
        Self {
            git: Tool::new(command),
        }
    }
}

fn io_error(what: &str, path: &Path, e: std::io::Error) -> EngineError {
    EngineError::ExternalTool {
        command: format!("{what} {}", path.display()),
        stderr: e.to_string(),
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, repo: &str, branch: &str, dest: &Path) -> EngineResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("mkdir -p", parent, e))?;
        }
        let dest_arg = dest.to_string_lossy();
        let mut args = vec!["clone", "--depth", "1"];
        if !branch.is_empty() {
            args.extend(["-b", branch]);
        }
        args.extend([repo, dest_arg.as_ref()]);
        info!(%repo, %branch, dest = %dest.display(), "cloning");
        self.git.run(&args, None).await?;
        Ok(())
    }

    async fn clean(&self, checkout: &Path) -> EngineResult<()> {
        match tokio::fs::remove_dir_all(checkout).await {
            Ok(()) => {
                info!(path = %checkout.display(), "removed checkout");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("rm -r", checkout, e)),
        }
    }
}
