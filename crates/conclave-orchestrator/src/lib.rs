//! Multi-agent orchestration for Conclave.
//!
//! Selects agents by role from an [`AgentDirectory`], creates a workspace
//! for each collaboration and drives phased delegation through the
//! [`conclave_core::Communicator`].

pub mod directory;
pub mod error;
pub mod orchestrator;
pub mod roles;

pub use directory::{AgentDirectory, AgentRecord, InMemoryAgentDirectory};
pub use error::{OrchestrationError, Result};
pub use orchestrator::{
    CollaborationStatus, CollaborativeResult, CollaborativeTask, Orchestrator, TaskSummary,
    WorkflowPhase, WorkflowStatus,
};
pub use roles::{AgentRole, detect_orchestration_need, identify_required_roles};
