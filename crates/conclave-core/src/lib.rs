//! Conclave Core - shared workspaces and task delegation for multi-agent collaboration.
//!
//! This crate provides:
//! - [`Workspace`]: a persisted collaboration space with participants, an
//!   append-only message log and a shared key/value bag
//! - [`WorkspaceStore`] implementations backed by memory or SQLite
//! - [`Communicator`]: the message bus and delegated [`Task`] registry
//! - Configuration loading and error types
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use conclave_core::{
//!     Communicator, DelegationRequest, MemoryWorkspaceStore, NewWorkspace, WorkspaceRegistry,
//! };
//!
//! # async fn example() -> conclave_core::collaboration::Result<()> {
//! let registry = Arc::new(WorkspaceRegistry::new(Arc::new(MemoryWorkspaceStore::new())));
//! let workspace = registry.create(NewWorkspace::new("sales", "coach").with_agent("r1")).await?;
//!
//! let communicator = Communicator::new(registry);
//! let task = communicator
//!     .delegate_task(DelegationRequest::new(workspace.id(), "coach", "r1", "Gather Q3 figures"))
//!     .await?;
//! println!("delegated {}", task.id);
//! # Ok(())
//! # }
//! ```

pub mod collaboration;
pub mod config;
pub mod error;
pub mod storage;
pub mod workspace;

pub use collaboration::{
    CollaborationError, Communicator, DelegationRequest, MessageRequest, Task, TaskStats,
    TaskStatus,
};
pub use config::{AgentEntry, CommunicatorConfig, Config, OrchestratorConfig, StoreConfig};
pub use error::{ConclaveError, Result};
pub use storage::{
    Database, MemoryWorkspaceStore, SqliteWorkspaceStore, StorageError, WorkspaceStore,
};
pub use workspace::{
    AgentMessage, MessageType, NewWorkspace, Workspace, WorkspaceRegistry, WorkspaceSnapshot,
    WorkspaceStatus,
};
