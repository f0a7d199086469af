//! tandemd — the Tandem node daemon.
//!
//! Runs on every node as the cluster's event handler. Each invocation
//! handles one batch of events (from standard input) or one manually
//! triggered event, and exits non-zero when a transition failed.
//!
//! # Usage
//!
//! ```text
//! tandemd handle < events.json
//! tandemd event deploy '{"repo": "https://git.example.com/acme/shop",' '"branch": "prod", "target": "node-a"}'
//! tandemd identity https://git.example.com/acme/shop prod
//! ```

mod logging;
mod node;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{error, info};

use tandem_core::{Identity, TandemConfig};
use tandem_engine::{BatchReport, manual_event};

#[derive(Parser)]
#[command(name = "tandemd", about = "Tandem node daemon")]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = "/etc/tandem/tandem.toml")]
    config: PathBuf,

    /// Node name, overriding the configuration and the host name.
    #[arg(long, global = true)]
    node: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handle a JSON batch of cluster events read from standard input.
    Handle,

    /// Trigger one event by hand; the arguments are joined into its payload.
    Event {
        name: String,
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        payload: Vec<String>,
    },

    /// Print the identity of a repository and branch.
    Identity { repo: String, branch: String },

    /// Print this node's current role for a repository and branch.
    Role { repo: String, branch: String },

    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TandemConfig::load_or_default(&cli.config)
        .with_context(|| format!("cannot load {}", cli.config.display()))?;
    if let Some(node) = cli.node {
        config.node.name = Some(node);
    }
    logging::init(config.paths.log_file.as_deref())?;

    match cli.command {
        Command::Identity { repo, branch } => {
            println!("{}", Identity::resolve(&repo, &branch));
            Ok(())
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Role { repo, branch } => {
            let me = node::node_name(&config)?;
            let (_shutdown_tx, shutdown_rx) = watch::channel(false);
            let engine = node::transition_engine(&config, shutdown_rx);
            let role = engine
                .current_role(&Identity::resolve(&repo, &branch), &me)
                .await?;
            println!("{role}");
            Ok(())
        }
        Command::Handle => {
            let mut batch = String::new();
            tokio::io::stdin()
                .read_to_string(&mut batch)
                .await
                .context("cannot read events from stdin")?;
            run_batch(&config, Batch::Delivered(batch)).await
        }
        Command::Event { name, payload } => {
            run_batch(&config, Batch::Manual { name, payload }).await
        }
    }
}

enum Batch {
    Delivered(String),
    Manual { name: String, payload: Vec<String> },
}

async fn run_batch(config: &TandemConfig, batch: Batch) -> anyhow::Result<()> {
    let me = node::node_name(config)?;

    // ── Shutdown signal ──────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let dispatcher = node::dispatcher(config, shutdown_rx)?;
    let result = match batch {
        Batch::Delivered(raw) => dispatcher.handle(&raw, &me).await,
        Batch::Manual { name, payload } => {
            let event = manual_event(&name, &payload);
            info!(id = %event.id, %name, "manual event");
            dispatcher.handle_events(&[event], &me).await
        }
    };

    match result {
        Ok(BatchReport {
            handled,
            duplicates,
            ignored,
        }) => {
            info!(node = %me, handled, duplicates, ignored, "batch done");
            Ok(())
        }
        Err(e) => {
            error!(node = %me, error = %e, "batch aborted");
            Err(e.into())
        }
    }
}
