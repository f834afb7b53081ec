//! Message classification commands.

use anyhow::Result;
use colored::Colorize;
use conclave_core::Config;
use conclave_orchestrator::{detect_orchestration_need, identify_required_roles};

/// Prints whether `message` needs orchestration under the configured phrases.
pub fn detect(config: &Config, message: &str) -> Result<()> {
    if detect_orchestration_need(message, config.orchestrator.orchestration_phrases.as_slice()) {
        println!("{}", "orchestration needed".green());
    } else {
        println!("no orchestration needed");
    }
    Ok(())
}

/// Prints the roles `message` calls for, one per line.
pub fn roles(message: &str) -> Result<()> {
    for role in identify_required_roles(message) {
        println!("{role}");
    }
    Ok(())
}
