//! Agent collaboration: task delegation and the message bus.
//!
//! This module provides:
//! - The [`Task`] lifecycle with its forward-only status machine
//! - The [`Communicator`], which writes messages into workspaces and owns
//!   the table of delegated tasks
//! - Collaboration error types

pub mod communicator;
pub mod error;
pub mod task;

pub use communicator::{Communicator, DelegationRequest, MessageRequest, TaskStats};
pub use error::{CollaborationError, Result};
pub use task::{Task, TaskStatus};
