//! External command execution.
//!
//! Commands are spawned directly with an argument vector; nothing goes
//! through a shell.

use std::path::Path;
use std::process::Output;

use tokio::process::Command;
use tracing::debug;

use tandem_engine::{EngineError, EngineResult};

/// A command-line tool, possibly with leading arguments
/// (e.g. `docker compose`).
#[derive(Debug, Clone)]
pub struct Tool {
    program: String,
    base_args: Vec<String>,
}

impl Tool {
    /// Parse `command` on whitespace: the first word is the program.
    pub fn new(command: &str) -> Self {
        let mut words = command.split_whitespace().map(String::from);
        let program = words.next().unwrap_or_default();
        Self {
            program,
            base_args: words.collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Command line as it would be typed, for logs and errors.
    pub fn describe(&self, args: &[&str]) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.base_args.iter().map(String::as_str))
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run and return the raw output, whatever the exit status.
    pub async fn output(&self, args: &[&str], cwd: Option<&Path>) -> EngineResult<Output> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args).args(args).kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        debug!(command = %self.describe(args), ?cwd, "running");
        cmd.output().await.map_err(|e| EngineError::ExternalTool {
            command: self.describe(args),
            stderr: format!("failed to execute: {e}"),
        })
    }

    /// Run and return stdout, failing on a non-zero exit status.
    pub async fn run(&self, args: &[&str], cwd: Option<&Path>) -> EngineResult<String> {
        let output = self.output(args, cwd).await?;
        if !output.status.success() {
            return Err(EngineError::ExternalTool {
                command: self.describe(args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
