//! Buttervolume (btrfs) volume manager.

use async_trait::async_trait;
use tracing::info;

use tandem_engine::{EngineResult, VolumeManager};

use crate::runner::Tool;

#[derive(Debug, Clone)]
pub struct Buttervolume {
    buttervolume: Tool,
    docker: Tool,
}

impl Buttervolume {
    pub fn new(buttervolume: &str, docker: &str) -> Self {
        Self {
            buttervolume: Tool::new(buttervolume),
            docker: Tool::new(docker),
        }
    }

    async fn schedule(&self, job: &str, minutes: u32, volume: &str) -> EngineResult<()> {
        let timer = minutes.to_string();
        self.buttervolume
            .run(&["schedule", job, &timer, volume], None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VolumeManager for Buttervolume {
    async fn snapshot(&self, volume: &str) -> EngineResult<String> {
        info!(%volume, "snapshotting volume");
        let out = self.buttervolume.run(&["snapshot", volume], None).await?;
        Ok(out.trim().to_string())
    }

    async fn restore(&self, snapshot: &str, target: Option<&str>) -> EngineResult<()> {
        let mut args = vec!["restore", snapshot];
        args.extend(target);
        let backup = self.buttervolume.run(&args, None).await?;
        info!(%snapshot, target = target.unwrap_or(snapshot), backup = %backup.trim(), "restored snapshot");
        Ok(())
    }

    async fn send(&self, snapshot: &str, host: &str) -> EngineResult<()> {
        info!(%snapshot, %host, "sending snapshot");
        self.buttervolume.run(&["send", host, snapshot], None).await?;
        Ok(())
    }

    async fn schedule_snapshot(&self, volume: &str, minutes: u32) -> EngineResult<()> {
        self.schedule("snapshot", minutes, volume).await
    }

    async fn schedule_replicate(&self, volume: &str, minutes: u32, host: &str) -> EngineResult<()> {
        self.schedule(&format!("replicate:{host}"), minutes, volume)
            .await
    }

    async fn schedule_purge(&self, volume: &str, minutes: u32, pattern: &str) -> EngineResult<()> {
        self.schedule(&format!("purge:{pattern}"), minutes, volume)
            .await
    }

    async fn delete(&self, volume: &str) -> EngineResult<()> {
        info!(%volume, "destroying volume");
        self.docker.run(&["volume", "rm", volume], None).await?;
        Ok(())
    }
}
