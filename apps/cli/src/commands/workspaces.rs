//! `conclave workspaces`: list persisted workspaces.

use anyhow::{Context, Result};
use colored::Colorize;
use conclave_core::{Config, WorkspaceSnapshot, WorkspaceStatus};

/// Execute the workspaces command.
///
/// With `parent`, lists that agent's workspaces (optionally only active
/// ones); otherwise lists every active workspace.
pub async fn execute(
    config: &Config,
    parent: Option<&str>,
    active: bool,
    json: bool,
) -> Result<()> {
    let store = config.store.open().context("Failed to open workspace store")?;

    let mut found = match parent {
        Some(parent) => store.list_by_parent(parent).await?,
        None => store.list_active().await?,
    };
    if active {
        found.retain(|ws| ws.status == WorkspaceStatus::Active);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }

    if found.is_empty() {
        println!("No workspaces found.");
        return Ok(());
    }

    for ws in &found {
        print_workspace(ws);
    }
    Ok(())
}

fn print_workspace(ws: &WorkspaceSnapshot) {
    let status = match ws.status {
        WorkspaceStatus::Active => ws.status.as_str().cyan(),
        WorkspaceStatus::Completed => ws.status.as_str().green(),
        WorkspaceStatus::Failed | WorkspaceStatus::Cancelled => ws.status.as_str().red(),
    };
    let agents: Vec<&str> = ws.agents.iter().map(String::as_str).collect();

    println!("{}  {}", ws.id.bold(), ws.name);
    println!(
        "    status: {}  parent: {}  agents: {}  messages: {}  created: {}",
        status,
        ws.parent_agent,
        agents.join(","),
        ws.messages.len(),
        ws.created_at.format("%Y-%m-%d %H:%M:%S")
    );
}
