//! Message bus and task registry for workspace collaboration.
//!
//! The [`Communicator`] writes messages into workspaces and owns the
//! in-memory table of delegated [`Task`]s. It never executes a task: an
//! external executor reports progress through
//! [`Communicator::update_task_status`].
//!
//! Nothing here schedules itself. [`Communicator::check_timeouts`] and
//! [`Communicator::cleanup_completed_tasks`] must be called periodically by
//! the embedding service; a task whose executor goes silent stays
//! `in_progress` until one of them runs.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::collaboration::error::{CollaborationError, Result};
use crate::collaboration::task::{Task, TaskStatus};
use crate::config::CommunicatorConfig;
use crate::workspace::{AgentMessage, MessageType, WorkspaceRegistry};

/// Request to append a message to a workspace.
#[derive(Debug, Clone)]
pub struct MessageRequest {
    /// Target workspace.
    pub workspace_id: String,
    /// Sending agent.
    pub from: String,
    /// Recipient agent; empty for a broadcast.
    pub to: String,
    /// Type of message.
    pub message_type: MessageType,
    /// Free text content.
    pub content: String,
    /// Metadata attached to the message.
    pub metadata: HashMap<String, Value>,
}

impl MessageRequest {
    /// Creates a request with empty metadata.
    pub fn new(
        workspace_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            from: from.into(),
            to: to.into(),
            message_type,
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Request to delegate a task to another agent.
#[derive(Debug, Clone)]
pub struct DelegationRequest {
    /// Workspace the task belongs to.
    pub workspace_id: String,
    /// Delegating agent.
    pub from: String,
    /// Executing agent.
    pub to: String,
    /// What the executor should do.
    pub description: String,
    /// Scheduling hint, higher is more urgent.
    pub priority: i32,
    /// Context handed to the executor.
    pub context: HashMap<String, Value>,
    /// Maximum time in progress; zero means no timeout.
    pub timeout: Duration,
}

impl DelegationRequest {
    /// Creates a request with priority 0, empty context and no timeout.
    pub fn new(
        workspace_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            from: from.into(),
            to: to.into(),
            description: description.into(),
            priority: 0,
            context: HashMap::new(),
            timeout: Duration::ZERO,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Per-status task counts for one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    /// Number of tasks in each status.
    pub by_status: BTreeMap<TaskStatus, usize>,
    /// Number of tasks overall.
    pub total: usize,
}

impl TaskStats {
    /// Returns the number of tasks in `status`.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    /// Returns every status count keyed by wire name, plus `"total"`.
    pub fn to_map(&self) -> BTreeMap<String, usize> {
        let mut map: BTreeMap<String, usize> = TaskStatus::ALL
            .into_iter()
            .map(|status| (status.as_str().to_string(), self.count(status)))
            .collect();
        map.insert("total".to_string(), self.total);
        map
    }
}

/// Message bus and task registry shared by every caller.
pub struct Communicator {
    workspaces: Arc<WorkspaceRegistry>,
    tasks: RwLock<HashMap<String, Task>>,
    config: CommunicatorConfig,
}

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("task_count", &self.tasks.try_read().map(|t| t.len()).unwrap_or(0))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Communicator {
    /// Creates a communicator with default configuration.
    pub fn new(workspaces: Arc<WorkspaceRegistry>) -> Self {
        Self::with_config(workspaces, CommunicatorConfig::default())
    }

    /// Creates a communicator with explicit configuration.
    pub fn with_config(workspaces: Arc<WorkspaceRegistry>, config: CommunicatorConfig) -> Self {
        Self { workspaces, tasks: RwLock::new(HashMap::new()), config }
    }

    /// Returns the workspace registry this communicator writes into.
    pub fn workspaces(&self) -> &Arc<WorkspaceRegistry> {
        &self.workspaces
    }

    /// Appends a message to a workspace and persists it.
    ///
    /// # Returns
    /// The ID of the appended message.
    ///
    /// # Errors
    /// * `CollaborationError::WorkspaceNotFound` - If the workspace does not exist
    /// * `CollaborationError::SaveFailed` - If the workspace could not be persisted
    pub async fn send_message(&self, request: MessageRequest) -> Result<String> {
        let workspace = self.workspaces.get(&request.workspace_id).await?;

        let message =
            AgentMessage::new(request.from, request.to, request.message_type, request.content)
                .with_metadata_map(request.metadata);
        let message_id = message.id.clone();

        debug!(
            workspace_id = %request.workspace_id,
            from = %message.from,
            to = %message.to,
            message_type = %message.message_type,
            "Sending message"
        );
        workspace.add_message(message).await?;

        Ok(message_id)
    }

    /// Sends a message addressed to every participant of a workspace.
    pub async fn broadcast_to_workspace(
        &self,
        workspace_id: &str,
        from: &str,
        content: &str,
        message_type: MessageType,
    ) -> Result<String> {
        self.send_message(MessageRequest::new(workspace_id, from, "", message_type, content))
            .await
    }

    /// Returns the messages visible to `agent` in a workspace.
    pub async fn get_messages(&self, workspace_id: &str, agent: &str) -> Result<Vec<AgentMessage>> {
        Ok(self.workspaces.get(workspace_id).await?.messages_for_agent(agent))
    }

    /// Returns the messages of a workspace stamped after `since`.
    pub async fn get_messages_since(
        &self,
        workspace_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AgentMessage>> {
        Ok(self.workspaces.get(workspace_id).await?.messages_since(since))
    }

    /// Delegates a task and notifies its executor with a `task_request` message.
    ///
    /// Both `from` and `to` must be participants of the workspace or its
    /// parent agent. The returned task is already `assigned`.
    ///
    /// # Errors
    /// * `CollaborationError::WorkspaceNotFound` - If the workspace does not exist
    /// * `CollaborationError::AgentNotInWorkspace` - If either agent is not a member
    pub async fn delegate_task(&self, request: DelegationRequest) -> Result<Task> {
        let workspace = self.workspaces.get(&request.workspace_id).await?;

        for agent in [&request.from, &request.to] {
            if !workspace.is_member(agent) {
                return Err(CollaborationError::AgentNotInWorkspace {
                    agent: agent.clone(),
                    workspace_id: request.workspace_id.clone(),
                });
            }
        }

        let mut task =
            Task::new(&request.workspace_id, &request.from, &request.to, &request.description)
                .with_priority(request.priority)
                .with_context(request.context.clone())
                .with_timeout(request.timeout);
        // Assigned before it becomes visible, so an executor that reads the
        // task_request can start it straight away.
        task.assign()?;
        let task_id = task.id.clone();

        self.tasks.write().await.insert(task_id.clone(), task.clone());

        let notification = MessageRequest {
            workspace_id: request.workspace_id.clone(),
            from: request.from.clone(),
            to: request.to.clone(),
            message_type: MessageType::TaskRequest,
            content: request.description,
            metadata: HashMap::from([
                ("task_id".to_string(), json!(task_id)),
                ("priority".to_string(), json!(request.priority)),
                ("timeout".to_string(), json!(request.timeout.as_millis() as u64)),
                ("context".to_string(), json!(request.context)),
            ]),
        };
        // A failed send leaves no task_request in the log, so the task goes too.
        if let Err(e) = self.send_message(notification).await {
            self.tasks.write().await.remove(&task_id);
            return Err(e);
        }

        info!(
            workspace_id = %task.workspace_id,
            task_id = %task.id,
            from = %task.from,
            to = %task.to,
            priority = task.priority,
            "Delegated task"
        );
        Ok(task)
    }

    /// Applies a status update reported by a task's executor.
    ///
    /// `in_progress` starts the task; `completed`, `failed` and `cancelled`
    /// finish it. Completion and failure also send a `result` message from
    /// the executor back to the delegator. The transition stands even if that
    /// message cannot be saved; the failure is logged.
    ///
    /// # Errors
    /// * `CollaborationError::TaskNotFound` - If the task does not exist
    /// * `CollaborationError::InvalidTransition` - If the lifecycle forbids the move
    /// * `CollaborationError::UnsupportedStatusUpdate` - For `pending`, `assigned` or `timeout`
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: &str,
        error_msg: &str,
    ) -> Result<()> {
        let task = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| CollaborationError::TaskNotFound { task_id: task_id.to_string() })?;
            match status {
                TaskStatus::InProgress => task.start()?,
                TaskStatus::Completed => task.complete(result)?,
                TaskStatus::Failed => task.fail(error_msg)?,
                TaskStatus::Cancelled => task.cancel()?,
                TaskStatus::Pending | TaskStatus::Assigned | TaskStatus::Timeout => {
                    return Err(CollaborationError::UnsupportedStatusUpdate { status });
                }
            }
            task.clone()
        };

        info!(task_id = %task_id, status = %status, "Task status updated");

        if matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
            let content = if status == TaskStatus::Completed { result } else { error_msg };
            let notification = result_notification(&task, content, Utc::now());
            if let Err(e) = self.send_message(notification).await {
                warn!(task_id = %task_id, error = %e, "Failed to notify delegator of task result");
            }
        }

        Ok(())
    }

    /// Returns a task by ID.
    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| CollaborationError::TaskNotFound { task_id: task_id.to_string() })
    }

    /// Lists the tasks of a workspace, oldest first.
    pub async fn list_tasks(&self, workspace_id: &str) -> Vec<Task> {
        self.collect_tasks(|task| task.workspace_id == workspace_id).await
    }

    /// Lists the tasks assigned to `agent`, oldest first.
    pub async fn list_tasks_for_agent(&self, agent: &str) -> Vec<Task> {
        self.collect_tasks(|task| task.to == agent).await
    }

    /// Counts the tasks of a workspace by status.
    pub async fn get_task_stats(&self, workspace_id: &str) -> TaskStats {
        let tasks = self.tasks.read().await;
        let mut stats = TaskStats::default();
        for task in tasks.values().filter(|task| task.workspace_id == workspace_id) {
            *stats.by_status.entry(task.status).or_insert(0) += 1;
            stats.total += 1;
        }
        stats
    }

    /// Cancels every non-terminal task of a workspace.
    ///
    /// # Returns
    /// The IDs of the cancelled tasks.
    pub async fn cancel_workspace_tasks(&self, workspace_id: &str) -> Vec<String> {
        let mut tasks = self.tasks.write().await;
        let mut cancelled = Vec::new();
        for task in tasks
            .values_mut()
            .filter(|task| task.workspace_id == workspace_id && !task.status.is_terminal())
        {
            if task.cancel().is_ok() {
                cancelled.push(task.id.clone());
            }
        }
        cancelled.sort();
        if !cancelled.is_empty() {
            info!(
                workspace_id = %workspace_id,
                count = cancelled.len(),
                "Cancelled workspace tasks"
            );
        }
        cancelled
    }

    /// Removes terminal tasks that completed more than `older_than` ago.
    ///
    /// # Returns
    /// The number of removed tasks.
    pub async fn cleanup_completed_tasks(&self, older_than: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return 0;
        };
        self.remove_completed_before(cutoff).await
    }

    async fn remove_completed_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| {
            !(task.status.is_terminal() && task.completed_at.is_some_and(|done| done < cutoff))
        });
        let removed = before - tasks.len();
        if removed > 0 {
            info!(removed, "Cleaned up completed tasks");
        }
        removed
    }

    /// Moves every in-progress task that outlived its timeout to `timeout`.
    ///
    /// When `notify_on_timeout` is enabled the delegator receives a `result`
    /// message with status `timeout`; delivery failures are only logged.
    ///
    /// # Returns
    /// The tasks transitioned by this call.
    pub async fn check_timeouts(&self) -> Vec<Task> {
        self.check_timeouts_at(Utc::now()).await
    }

    async fn check_timeouts_at(&self, now: DateTime<Utc>) -> Vec<Task> {
        let timed_out: Vec<Task> = {
            let mut tasks = self.tasks.write().await;
            tasks
                .values_mut()
                .filter(|task| task.is_timed_out(now))
                .filter_map(|task| task.time_out(now).ok().map(|()| task.clone()))
                .collect()
        };

        for task in &timed_out {
            warn!(
                workspace_id = %task.workspace_id,
                task_id = %task.id,
                to = %task.to,
                timeout_ms = task.timeout.as_millis() as u64,
                "Task timed out"
            );
            if self.config.notify_on_timeout {
                let content = task.error.clone().unwrap_or_default();
                if let Err(e) = self.send_message(result_notification(task, &content, now)).await {
                    warn!(task_id = %task.id, error = %e, "Failed to notify delegator of timeout");
                }
            }
        }

        timed_out
    }

    async fn collect_tasks<F>(&self, predicate: F) -> Vec<Task>
    where
        F: Fn(&Task) -> bool + Send,
    {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<Task> =
            tasks.values().filter(|task| predicate(task)).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        matching
    }
}

/// Builds the `result` message sent from a task's executor to its delegator.
fn result_notification(task: &Task, content: &str, now: DateTime<Utc>) -> MessageRequest {
    MessageRequest::new(&task.workspace_id, &task.to, &task.from, MessageType::Result, content)
        .with_metadata("task_id", json!(task.id))
        .with_metadata("status", json!(task.status.as_str()))
        .with_metadata("duration_ms", json!(task.elapsed(now).as_millis() as u64))
}
