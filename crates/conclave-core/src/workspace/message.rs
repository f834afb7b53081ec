//! Messages exchanged between agents inside a workspace.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::collaboration::error::CollaborationError;

/// Kind of a message in the workspace log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Delegation of a task to another agent.
    TaskRequest,
    /// Outcome of a delegated task.
    Result,
    /// Question addressed to another agent.
    Question,
    /// Free-form status update.
    Status,
}

impl MessageType {
    /// Converts a MessageType to its wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::TaskRequest => "task_request",
            MessageType::Result => "result",
            MessageType::Question => "question",
            MessageType::Status => "status",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = CollaborationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_request" => Ok(MessageType::TaskRequest),
            "result" => Ok(MessageType::Result),
            "question" => Ok(MessageType::Question),
            "status" => Ok(MessageType::Status),
            _ => Err(CollaborationError::InvalidMessageType { message_type: s.to_string() }),
        }
    }
}

/// A message appended to a workspace log.
///
/// Messages are immutable once appended. An empty `to` marks a broadcast
/// visible to every participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message identifier.
    pub id: String,
    /// Name of the sending agent.
    pub from: String,
    /// Name of the recipient agent (empty for broadcasts).
    #[serde(default)]
    pub to: String,
    /// Type of message.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Free text content.
    pub content: String,
    /// Open metadata bag (task_id, priority, timeout, context, ...).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    /// Creates a message stamped with the current time.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            message_type,
            content: content.into(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Replaces the metadata bag.
    #[must_use]
    pub fn with_metadata_map(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns whether this message is addressed to every participant.
    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty()
    }

    /// Returns whether `agent` sent, received, or can see this message as a broadcast.
    pub fn involves(&self, agent: &str) -> bool {
        self.is_broadcast() || self.to == agent || self.from == agent
    }
}
