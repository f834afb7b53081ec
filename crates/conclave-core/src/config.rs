//! Configuration for Conclave.
//!
//! Configuration is read from a TOML file. Every section is optional and
//! falls back to its defaults:
//!
//! ```toml
//! [store]
//! backend = "sqlite"
//! path = "conclave.db"
//!
//! [communicator]
//! notify_on_timeout = true
//! cleanup_after_secs = 3600
//!
//! [orchestrator]
//! default_max_duration_secs = 600
//!
//! [[agents]]
//! name = "r1"
//! role = "researcher"
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ConclaveError, Result};
use crate::storage::{MemoryWorkspaceStore, SqliteWorkspaceStore, WorkspaceStore};

/// Environment variable naming the configuration file used by [`Config::load`].
pub const CONFIG_ENV_VAR: &str = "CONCLAVE_CONFIG";

/// Phrases that mark a message as needing multi-agent orchestration.
pub const DEFAULT_ORCHESTRATION_PHRASES: &[&str] = &[
    "research and analyze",
    "comprehensive analysis",
    "investigate and",
    "compare multiple",
    "multi-step",
    "coordinate",
    "in-depth research",
    "analyze and report",
    "research and report",
    "thorough investigation",
    "detailed report",
    "step by step analysis",
    "break down and",
    "collaborate",
];

/// Workspace store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map; contents are lost on exit.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite,
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Which backend to use.
    #[serde(default)]
    pub backend: StoreBackend,
    /// Path of the SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "conclave.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backend: StoreBackend::default(), path: default_store_path() }
    }
}

impl StoreConfig {
    /// Opens the configured store.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQLite database cannot be opened.
    pub fn open(&self) -> Result<Arc<dyn WorkspaceStore>> {
        debug!(backend = ?self.backend, path = %self.path, "Opening workspace store");
        match self.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryWorkspaceStore::new())),
            StoreBackend::Sqlite => Ok(Arc::new(SqliteWorkspaceStore::open(&self.path)?)),
        }
    }
}

/// Communicator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommunicatorConfig {
    /// Send a `result` message to the delegator when a task times out.
    #[serde(default = "default_true")]
    pub notify_on_timeout: bool,
    /// Retention for finished tasks, in seconds.
    #[serde(default = "default_cleanup_after_secs")]
    pub cleanup_after_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_cleanup_after_secs() -> u64 {
    3600
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self { notify_on_timeout: true, cleanup_after_secs: default_cleanup_after_secs() }
    }
}

impl CommunicatorConfig {
    /// Retention to pass to `Communicator::cleanup_completed_tasks`.
    pub fn cleanup_after(&self) -> Duration {
        Duration::from_secs(self.cleanup_after_secs)
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrchestratorConfig {
    /// Time budget used when a collaborative task does not set one.
    #[serde(default = "default_max_duration_secs")]
    pub default_max_duration_secs: u64,
    /// Phrases that trigger orchestration, matched case-insensitively.
    #[serde(default = "default_orchestration_phrases")]
    pub orchestration_phrases: Vec<String>,
    /// Fall back to a `general` agent when no agent has the requested role.
    #[serde(default = "default_true")]
    pub general_role_fallback: bool,
}

fn default_max_duration_secs() -> u64 {
    600
}

fn default_orchestration_phrases() -> Vec<String> {
    DEFAULT_ORCHESTRATION_PHRASES.iter().map(ToString::to_string).collect()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_max_duration_secs: default_max_duration_secs(),
            orchestration_phrases: default_orchestration_phrases(),
            general_role_fallback: true,
        }
    }
}

impl OrchestratorConfig {
    /// Default time budget as a duration.
    pub fn default_max_duration(&self) -> Duration {
        Duration::from_secs(self.default_max_duration_secs)
    }
}

/// A statically configured agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentEntry {
    /// Unique agent name.
    pub name: String,
    /// Declared role, e.g. `researcher`.
    pub role: String,
    /// Free text description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Root configuration for Conclave.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Communicator configuration.
    #[serde(default)]
    pub communicator: CommunicatorConfig,
    /// Orchestrator configuration.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Agents known to the directory.
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `ConclaveError::Config` if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConclaveError::Config(e.to_string()))
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| ConclaveError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), agents = config.agents.len(), "Loaded configuration");
        Ok(config)
    }

    /// Loads configuration from the file named by `CONCLAVE_CONFIG`, or
    /// returns defaults when the variable is unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the named file cannot be read or parsed.
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }
}
