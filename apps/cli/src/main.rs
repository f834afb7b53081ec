//! Conclave CLI - run and inspect multi-agent collaborations
//!
//! This CLI provides a `conclave` command that classifies requests, runs a
//! collaborative task against the configured agent directory, and lists the
//! workspaces persisted by earlier runs.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use conclave_core::Config;
use tracing_subscriber::EnvFilter;

use commands::{classify, run, workspaces};

/// Conclave - multi-agent collaboration workspaces
#[derive(Parser, Debug)]
#[command(
    name = "conclave",
    author,
    version,
    about = "Conclave - multi-agent collaboration workspaces"
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Configuration file (overrides CONCLAVE_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report whether a message calls for multi-agent orchestration
    Detect {
        /// The message to classify
        message: String,
    },

    /// List the roles a message calls for
    Roles {
        /// The message to classify
        message: String,
    },

    /// Run a collaborative task
    ///
    /// Creates a workspace for the goal, selects one agent per role and
    /// delegates the workflow. Tasks are only delegated; executing them is
    /// up to the agents.
    Run(run::RunArgs),

    /// List persisted workspaces
    Workspaces {
        /// Only workspaces created by this agent
        #[arg(long)]
        parent: Option<String>,

        /// Only active workspaces
        #[arg(long)]
        active: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };

    match args.command {
        Command::Detect { message } => classify::detect(&config, &message),
        Command::Roles { message } => classify::roles(&message),
        Command::Run(run_args) => run::execute(&config, run_args).await,
        Command::Workspaces { parent, active, json } => {
            workspaces::execute(&config, parent.as_deref(), active, json).await
        }
    }
}
