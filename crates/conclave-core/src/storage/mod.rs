//! Storage layer for Conclave workspaces.
//!
//! Workspaces are persisted through the [`WorkspaceStore`] trait. Two
//! backends are provided: an in-memory map for tests and ephemeral runs,
//! and a SQLite database for durable deployments.

// SQL strings don't need hash-less raw strings
#![allow(clippy::needless_raw_string_hashes)]

pub mod database;
pub mod error;
pub mod workspace_store;

pub use database::Database;
pub use error::{StorageError, StorageResult};
pub use workspace_store::{MemoryWorkspaceStore, SqliteWorkspaceStore, WorkspaceStore};
