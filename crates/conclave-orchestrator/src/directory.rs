//! Agent directory consulted when selecting agents by role.
//!
//! The orchestrator only reads the directory. [`InMemoryAgentDirectory`]
//! is the provided implementation; embedders with their own agent registry
//! implement [`AgentDirectory`] over it.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use conclave_core::AgentEntry;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::roles::AgentRole;

/// Directory entry describing one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// The agent's unique name.
    pub name: String,
    /// The agent's declared role.
    pub role: AgentRole,
    /// The agent's description.
    #[serde(default)]
    pub description: String,
}

impl AgentRecord {
    /// Creates a record with an empty description.
    pub fn new(name: impl Into<String>, role: AgentRole) -> Self {
        Self { name: name.into(), role, description: String::new() }
    }

    /// Builds a record from a configured agent entry.
    ///
    /// # Errors
    /// * `OrchestrationError::UnknownRole` - If the entry's role is not recognized
    pub fn from_entry(entry: &AgentEntry) -> Result<Self> {
        Ok(Self {
            name: entry.name.clone(),
            role: entry.role.parse()?,
            description: entry.description.clone().unwrap_or_default(),
        })
    }
}

/// Read access to the agents available for collaboration.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Lists the names of every known agent.
    async fn list_agents(&self) -> Vec<String>;

    /// Looks up one agent by name.
    async fn get_agent(&self, name: &str) -> Option<AgentRecord>;
}

/// Directory held in process memory.
pub struct InMemoryAgentDirectory {
    agents: RwLock<HashMap<String, AgentRecord>>,
}

impl fmt::Debug for InMemoryAgentDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryAgentDirectory")
            .field("agent_count", &self.agents.try_read().map(|a| a.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryAgentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAgentDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self { agents: RwLock::new(HashMap::new()) }
    }

    /// Creates a directory holding `records`.
    pub fn with_agents(records: impl IntoIterator<Item = AgentRecord>) -> Self {
        let agents = records.into_iter().map(|r| (r.name.clone(), r)).collect();
        Self { agents: RwLock::new(agents) }
    }

    /// Creates a directory from configured `[[agents]]` entries.
    ///
    /// # Errors
    /// * `OrchestrationError::UnknownRole` - If any entry names an unknown role
    pub fn from_entries(entries: &[AgentEntry]) -> Result<Self> {
        let records = entries.iter().map(AgentRecord::from_entry).collect::<Result<Vec<_>>>()?;
        Ok(Self::with_agents(records))
    }

    /// Registers an agent.
    ///
    /// # Returns
    /// Returns `true` if the agent was newly registered, `false` if it replaced an existing agent.
    pub async fn register(&self, record: AgentRecord) -> bool {
        debug!(agent = %record.name, role = %record.role, "Registering agent");

        let mut agents = self.agents.write().await;
        let name = record.name.clone();
        let was_new = agents.insert(name.clone(), record).is_none();

        if !was_new {
            warn!(agent = %name, "Agent replaced in directory");
        }

        was_new
    }

    /// Unregisters an agent.
    ///
    /// # Returns
    /// Returns `true` if the agent was found and removed, `false` otherwise.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.agents.write().await.remove(name).is_some();

        if !removed {
            warn!(agent = %name, "Attempted to unregister non-existent agent");
        }

        removed
    }

    /// Returns the number of registered agents.
    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }
}

#[async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn list_agents(&self) -> Vec<String> {
        self.agents.read().await.keys().cloned().collect()
    }

    async fn get_agent(&self, name: &str) -> Option<AgentRecord> {
        self.agents.read().await.get(name).cloned()
    }
}
