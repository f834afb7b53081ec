//! `conclave run`: execute a collaborative task.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use conclave_core::{Communicator, Config, WorkspaceRegistry};
use conclave_orchestrator::{
    AgentRecord, AgentRole, CollaborationStatus, CollaborativeResult, CollaborativeTask,
    InMemoryAgentDirectory, Orchestrator, WorkflowStatus, identify_required_roles,
};
use serde_json::json;
use tracing::debug;

/// Arguments for `conclave run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Agent that owns the collaboration
    #[arg(long)]
    parent: String,

    /// What the collaboration should achieve
    #[arg(long)]
    goal: String,

    /// Required role; repeat for several. Inferred from the goal when omitted
    #[arg(long = "role")]
    roles: Vec<String>,

    /// Extra agent as NAME=ROLE, added to the configured agents
    #[arg(long = "agent", value_name = "NAME=ROLE")]
    agents: Vec<String>,

    /// Overall time budget in seconds
    #[arg(long)]
    max_duration_secs: Option<u64>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the run command.
pub async fn execute(config: &Config, args: RunArgs) -> Result<()> {
    let store = config.store.open().context("Failed to open workspace store")?;
    let registry = Arc::new(WorkspaceRegistry::new(store));
    let communicator = Arc::new(Communicator::with_config(registry, config.communicator.clone()));

    let directory = InMemoryAgentDirectory::from_entries(&config.agents)
        .context("Invalid [[agents]] configuration")?;
    for entry in &args.agents {
        directory.register(parse_agent(entry)?).await;
    }
    if directory.count().await == 0 {
        bail!("No agents available. Add [[agents]] to the config or pass --agent NAME=ROLE.");
    }

    let roles = if args.roles.is_empty() {
        identify_required_roles(&args.goal)
    } else {
        args.roles
            .iter()
            .map(|r| r.parse::<AgentRole>())
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid --role")?
    };
    debug!(roles = ?roles, "Resolved required roles");

    let orchestrator =
        Orchestrator::with_config(communicator, Arc::new(directory), config.orchestrator.clone());

    let mut task = CollaborativeTask::new(&args.goal, roles);
    if let Some(secs) = args.max_duration_secs {
        task = task.with_max_duration(Duration::from_secs(secs));
    }

    let result = orchestrator
        .execute_collaborative_task(&args.parent, task)
        .await
        .context("Collaborative task could not be started")?;
    let status = orchestrator.get_workflow_status(&result.workspace_id).await?;

    if args.json {
        let output = json!({ "result": result, "workflow": status });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_result(&result, &status);
    }

    if result.status == CollaborationStatus::Failed {
        bail!("Collaboration failed: {}", result.error.as_deref().unwrap_or("unknown error"));
    }
    Ok(())
}

fn parse_agent(entry: &str) -> Result<AgentRecord> {
    let Some((name, role)) = entry.split_once('=') else {
        bail!("Invalid --agent '{}': expected NAME=ROLE", entry);
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid --agent '{}': name is empty", entry);
    }
    let role: AgentRole = role.parse().with_context(|| format!("Invalid --agent '{}'", entry))?;
    Ok(AgentRecord::new(name, role))
}

fn print_result(result: &CollaborativeResult, status: &WorkflowStatus) {
    let outcome = match result.status {
        CollaborationStatus::Completed => result.status.as_str().green(),
        CollaborationStatus::Failed => result.status.as_str().red(),
    };

    println!("{} {}", "Workspace:".bold(), result.workspace_id);
    println!("{} {}", "Status:".bold(), outcome);
    println!("{} {}ms", "Duration:".bold(), result.duration.as_millis());
    if let Some(error) = &result.error {
        println!("{} {}", "Error:".bold(), error);
    }

    if !result.final_output.is_empty() {
        println!();
        println!("{}", result.final_output);
    }

    println!();
    println!(
        "{} {} ({:.0}%)",
        "Workflow:".bold(),
        status.phase,
        status.progress * 100.0
    );
    for summary in status.tasks.values() {
        println!(
            "  {}  {:<12} {:<12} {}",
            summary.id,
            summary.agent,
            summary.status.as_str(),
            summary.description
        );
    }
}
