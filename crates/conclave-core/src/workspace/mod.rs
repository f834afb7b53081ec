//! Shared collaboration workspaces.
//!
//! A [`Workspace`] groups a parent agent, its participating agents, an
//! append-only message log, and a key/value bag of shared data. Every
//! mutation is applied under the workspace's own lock and then persisted
//! through the configured [`WorkspaceStore`] before the call returns.
//!
//! Live instances are handed out by the [`WorkspaceRegistry`], which keeps
//! exactly one [`Workspace`] per ID so concurrent callers share one lock.

pub mod message;
pub mod registry;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::collaboration::error::{CollaborationError, Result};
use crate::storage::WorkspaceStore;

pub use message::{AgentMessage, MessageType};
pub use registry::WorkspaceRegistry;

/// Lifecycle status of a workspace.
///
/// Transitions are caller-driven; the workspace never changes its own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    /// Collaboration is in progress.
    #[default]
    Active,
    /// Collaboration finished successfully.
    Completed,
    /// Collaboration failed.
    Failed,
    /// Collaboration was cancelled by its owner.
    Cancelled,
}

impl WorkspaceStatus {
    /// Converts a WorkspaceStatus to its wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceStatus::Active => "active",
            WorkspaceStatus::Completed => "completed",
            WorkspaceStatus::Failed => "failed",
            WorkspaceStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceStatus {
    type Err = CollaborationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(WorkspaceStatus::Active),
            "completed" => Ok(WorkspaceStatus::Completed),
            "failed" => Ok(WorkspaceStatus::Failed),
            "cancelled" => Ok(WorkspaceStatus::Cancelled),
            _ => Err(CollaborationError::InvalidStatus { status: s.to_string() }),
        }
    }
}

/// Parameters for creating a workspace.
#[derive(Debug, Clone, Default)]
pub struct NewWorkspace {
    /// Human-readable name.
    pub name: String,
    /// Identity of the creating agent.
    pub parent_agent: String,
    /// Initial participants.
    pub agents: Vec<String>,
    /// Initial shared data.
    pub shared_data: HashMap<String, Value>,
}

impl NewWorkspace {
    /// Creates parameters for an empty workspace owned by `parent_agent`.
    pub fn new(name: impl Into<String>, parent_agent: impl Into<String>) -> Self {
        Self { name: name.into(), parent_agent: parent_agent.into(), ..Self::default() }
    }

    /// Adds an initial participant.
    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agents.push(agent.into());
        self
    }

    /// Adds an initial shared data entry.
    #[must_use]
    pub fn with_shared_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.shared_data.insert(key.into(), value);
        self
    }

    /// Builds the initial snapshot with a fresh ID.
    pub(crate) fn into_snapshot(self) -> WorkspaceSnapshot {
        let now = Utc::now();
        WorkspaceSnapshot {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            parent_agent: self.parent_agent,
            agents: self.agents.into_iter().collect(),
            shared_data: self.shared_data,
            messages: Vec::new(),
            status: WorkspaceStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Point-in-time copy of a workspace, as persisted by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    /// Unique, immutable identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Identity of the creating agent.
    pub parent_agent: String,
    /// Participating agents.
    pub agents: BTreeSet<String>,
    /// Shared key/value data (last write wins).
    pub shared_data: HashMap<String, Value>,
    /// Append-only message log.
    pub messages: Vec<AgentMessage>,
    /// Lifecycle status.
    pub status: WorkspaceStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last mutation.
    pub updated_at: DateTime<Utc>,
}

/// Mutable portion of a workspace.
#[derive(Debug, Clone)]
struct WorkspaceState {
    agents: BTreeSet<String>,
    shared_data: HashMap<String, Value>,
    messages: Vec<AgentMessage>,
    status: WorkspaceStatus,
    updated_at: DateTime<Utc>,
}

/// A live, shared collaboration workspace.
pub struct Workspace {
    id: String,
    name: String,
    parent_agent: String,
    created_at: DateTime<Utc>,
    state: RwLock<WorkspaceState>,
    /// Serializes mutate-then-save so snapshots reach the store in order.
    persist_lock: Mutex<()>,
    store: Arc<dyn WorkspaceStore>,
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent_agent", &self.parent_agent)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Hydrates a live workspace from a persisted snapshot.
    pub fn from_snapshot(snapshot: WorkspaceSnapshot, store: Arc<dyn WorkspaceStore>) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name,
            parent_agent: snapshot.parent_agent,
            created_at: snapshot.created_at,
            state: RwLock::new(WorkspaceState {
                agents: snapshot.agents,
                shared_data: snapshot.shared_data,
                messages: snapshot.messages,
                status: snapshot.status,
                updated_at: snapshot.updated_at,
            }),
            persist_lock: Mutex::new(()),
            store,
        }
    }

    /// Returns the workspace ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the workspace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the identity of the creating agent.
    pub fn parent_agent(&self) -> &str {
        &self.parent_agent
    }

    /// Returns the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the timestamp of the last mutation.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.read_state().updated_at
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> WorkspaceStatus {
        self.read_state().status
    }

    /// Returns whether `agent` is a participant.
    pub fn has_agent(&self, agent: &str) -> bool {
        self.read_state().agents.contains(agent)
    }

    /// Returns whether `agent` may send or receive delegated work here,
    /// i.e. it is a participant or the parent agent.
    pub fn is_member(&self, agent: &str) -> bool {
        self.parent_agent == agent || self.has_agent(agent)
    }

    /// Returns the participants in name order.
    pub fn agents(&self) -> Vec<String> {
        self.read_state().agents.iter().cloned().collect()
    }

    /// Returns the number of participants.
    pub fn agent_count(&self) -> usize {
        self.read_state().agents.len()
    }

    /// Returns a copy of the full message log.
    pub fn messages(&self) -> Vec<AgentMessage> {
        self.read_state().messages.clone()
    }

    /// Returns messages sent by, sent to, or broadcast to `agent`, in log order.
    pub fn messages_for_agent(&self, agent: &str) -> Vec<AgentMessage> {
        self.read_state().messages.iter().filter(|m| m.involves(agent)).cloned().collect()
    }

    /// Returns messages stamped strictly after `since`, in log order.
    pub fn messages_since(&self, since: DateTime<Utc>) -> Vec<AgentMessage> {
        self.read_state().messages.iter().filter(|m| m.timestamp > since).cloned().collect()
    }

    /// Returns a shared data value.
    pub fn shared_data(&self, key: &str) -> Option<Value> {
        self.read_state().shared_data.get(key).cloned()
    }

    /// Returns a copy of the whole shared data bag.
    pub fn shared_data_snapshot(&self) -> HashMap<String, Value> {
        self.read_state().shared_data.clone()
    }

    /// Returns a point-in-time copy of the workspace.
    pub fn snapshot(&self) -> WorkspaceSnapshot {
        self.snapshot_from(&self.read_state())
    }

    /// Adds a participant. Adding an existing participant is a no-op.
    pub async fn add_agent(&self, agent: &str) -> Result<()> {
        let agent = agent.to_string();
        let added = self.mutate(move |state| state.agents.insert(agent)).await?;
        debug!(workspace_id = %self.id, added, "Added agent to workspace");
        Ok(())
    }

    /// Removes a participant. Removing a missing participant is a no-op.
    pub async fn remove_agent(&self, agent: &str) -> Result<()> {
        let agent = agent.to_string();
        let removed = self.mutate(move |state| state.agents.remove(&agent)).await?;
        debug!(workspace_id = %self.id, removed, "Removed agent from workspace");
        Ok(())
    }

    /// Appends a message to the log.
    pub async fn add_message(&self, message: AgentMessage) -> Result<()> {
        let message_id = message.id.clone();
        let message_type = message.message_type;
        self.mutate(move |state| state.messages.push(message)).await?;
        debug!(
            workspace_id = %self.id,
            message_id = %message_id,
            message_type = %message_type,
            "Message appended"
        );
        Ok(())
    }

    /// Sets a shared data value, replacing any previous value for `key`.
    pub async fn set_shared_data(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        self.mutate(move |state| {
            state.shared_data.insert(key, value);
        })
        .await
    }

    /// Sets the lifecycle status.
    pub async fn set_status(&self, status: WorkspaceStatus) -> Result<()> {
        self.mutate(move |state| state.status = status).await?;
        debug!(workspace_id = %self.id, status = %status, "Workspace status changed");
        Ok(())
    }

    /// Applies `f` to the state and persists the resulting snapshot.
    ///
    /// The state lock is released before the store is called. If the save
    /// fails the state is restored to what it was before `f` ran, so memory
    /// never holds a change the store rejected.
    async fn mutate<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WorkspaceState) -> T + Send,
        T: Send,
    {
        // Held across the save: no other mutation can land between the
        // snapshot and a rollback.
        let _persist = self.persist_lock.lock().await;

        let (output, snapshot, previous) = {
            let mut state = self.write_state();
            let previous = state.clone();
            let output = f(&mut state);
            state.updated_at = Utc::now();
            (output, self.snapshot_from(&state), previous)
        };

        if let Err(source) = self.store.save(&snapshot).await {
            *self.write_state() = previous;
            warn!(
                workspace_id = %self.id,
                error = %source,
                "Save failed, workspace change rolled back"
            );
            return Err(CollaborationError::SaveFailed { workspace_id: self.id.clone(), source });
        }

        Ok(output)
    }

    fn snapshot_from(&self, state: &WorkspaceState) -> WorkspaceSnapshot {
        WorkspaceSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            parent_agent: self.parent_agent.clone(),
            agents: state.agents.clone(),
            shared_data: state.shared_data.clone(),
            messages: state.messages.clone(),
            status: state.status,
            created_at: self.created_at,
            updated_at: state.updated_at,
        }
    }

    // Workspace state is only touched inside short, panic-free sections, so
    // a poisoned lock still holds consistent data.
    fn read_state(&self) -> RwLockReadGuard<'_, WorkspaceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, WorkspaceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
