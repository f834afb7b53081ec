// Error types for orchestration

use conclave_core::CollaborationError;
use thiserror::Error;

use crate::roles::AgentRole;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// No agent in the directory could serve any requested role
    #[error("no suitable agents found for roles: {}", join_roles(.roles))]
    NoSuitableAgents {
        /// Roles that were requested
        roles: Vec<AgentRole>,
    },

    /// The research pipeline lacks one of its mandatory roles
    #[error("missing required agents: {}", join_roles(.missing))]
    MissingRequiredAgents {
        /// Roles without an agent
        missing: Vec<AgentRole>,
    },

    /// Aggregation found no completed task with a result
    #[error("no completed results in workspace {workspace_id}")]
    NoCompletedResults {
        /// Workspace that was aggregated
        workspace_id: String,
    },

    /// Unrecognized role name
    #[error("unknown agent role: {role}")]
    UnknownRole {
        /// The rejected role string
        role: String,
    },

    /// Workspace or task layer error
    #[error(transparent)]
    Collaboration(#[from] CollaborationError),
}

fn join_roles(roles: &[AgentRole]) -> String {
    roles.iter().map(AgentRole::as_str).collect::<Vec<_>>().join(", ")
}
