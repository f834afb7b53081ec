//! Subcommand implementations.

pub mod classify;
pub mod run;
pub mod workspaces;
