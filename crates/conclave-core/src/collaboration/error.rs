//! Error types for agent collaboration features.

use crate::collaboration::task::TaskStatus;
use crate::storage::error::StorageError;

/// Errors that can occur during agent collaboration operations.
#[derive(Debug, thiserror::Error)]
pub enum CollaborationError {
    /// No workspace with the given ID exists.
    #[error("workspace not found: {workspace_id}")]
    WorkspaceNotFound {
        /// ID of the missing workspace.
        workspace_id: String,
    },

    /// No task with the given ID exists.
    #[error("task not found: {task_id}")]
    TaskNotFound {
        /// ID of the missing task.
        task_id: String,
    },

    /// A delegation named an agent that is neither a participant nor the parent.
    #[error("agent {agent} is not a member of workspace {workspace_id}")]
    AgentNotInWorkspace {
        /// Name of the offending agent.
        agent: String,
        /// ID of the workspace.
        workspace_id: String,
    },

    /// A task transition that the lifecycle does not allow.
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// ID of the task.
        task_id: String,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// A status update that callers are not allowed to request directly.
    #[error("status {status} cannot be set through a status update")]
    UnsupportedStatusUpdate {
        /// The requested status.
        status: TaskStatus,
    },

    /// Invalid message type.
    #[error("invalid message type: {message_type}")]
    InvalidMessageType {
        /// The invalid message type string.
        message_type: String,
    },

    /// Invalid status name.
    #[error("invalid status: {status}")]
    InvalidStatus {
        /// The invalid status string.
        status: String,
    },

    /// Persisting a workspace after a mutation failed.
    #[error("failed to save workspace {workspace_id}: {source}")]
    SaveFailed {
        /// ID of the workspace.
        workspace_id: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },

    /// Database operation error.
    #[error("database error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for collaboration operations.
pub type Result<T> = std::result::Result<T, CollaborationError>;
