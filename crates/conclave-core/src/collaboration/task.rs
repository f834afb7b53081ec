//! Delegated tasks and their lifecycle.
//!
//! Status only ever moves forward:
//!
//! ```text
//! pending -> assigned -> in_progress -> timeout
//!    \          \             \
//!     +----------+-------------+-> completed | failed | cancelled
//! ```
//!
//! Terminal statuses accept no further transition.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::collaboration::error::{CollaborationError, Result};

/// Lifecycle status of a delegated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet handed to its executor.
    Pending,
    /// Handed to the target agent.
    Assigned,
    /// The executor has started working on it.
    InProgress,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
    /// Exceeded its timeout while in progress.
    Timeout,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::Assigned,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Timeout,
    ];

    /// Converts a TaskStatus to its wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Timeout => "timeout",
        }
    }

    /// Returns whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }

    /// Returns whether the lifecycle allows moving from `self` to `to`.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        match (self, to) {
            (TaskStatus::Pending, TaskStatus::Assigned)
            | (TaskStatus::Assigned, TaskStatus::InProgress)
            | (TaskStatus::InProgress, TaskStatus::Timeout) => true,
            (from, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled) => {
                !from.is_terminal()
            }
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CollaborationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CollaborationError::InvalidStatus { status: s.to_string() })
    }
}

/// A unit of work delegated from one agent to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: String,
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
    /// Open context bag handed to the executor.
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Maximum time in progress; zero means no timeout.
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Current status.
    pub status: TaskStatus,
    /// Result text supplied on completion.
    pub result: Option<String>,
    /// Error text supplied on failure.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When the executor started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a pending task with a fresh ID.
    pub fn new(
        workspace_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            from: from.into(),
            to: to.into(),
            description: description.into(),
            priority: 0,
            context: HashMap::new(),
            timeout: Duration::ZERO,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the context bag.
    #[must_use]
    pub fn with_context(mut self, context: HashMap<String, Value>) -> Self {
        self.context = context;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Moves `pending -> assigned`.
    pub fn assign(&mut self) -> Result<()> {
        self.transition(TaskStatus::Assigned)
    }

    /// Moves `assigned -> in_progress` and stamps `started_at`.
    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::InProgress)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Finishes the task with a result.
    pub fn complete(&mut self, result: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Finishes the task with an error.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Cancels the task.
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(TaskStatus::Cancelled)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Forces `in_progress -> timeout`, stamping `completed_at = now`.
    pub fn time_out(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Timeout)?;
        self.error = Some(format!("task exceeded timeout of {}ms", self.timeout.as_millis()));
        self.completed_at = Some(now);
        Ok(())
    }

    /// Returns whether the task is in progress and has run longer than its timeout.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::InProgress || self.timeout.is_zero() {
            return false;
        }
        self.started_at.is_some_and(|started| {
            (now - started).to_std().is_ok_and(|running| running > self.timeout)
        })
    }

    /// Time from start (or creation, if never started) to completion or `now`.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let begin = self.started_at.unwrap_or(self.created_at);
        let end = self.completed_at.unwrap_or(now);
        (end - begin).to_std().unwrap_or_default()
    }

    fn transition(&mut self, to: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(CollaborationError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Serializes a `Duration` as whole milliseconds.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assigned_task() -> Task {
        let mut task = Task::new("ws-1", "coach", "r1", "dig in");
        task.assign().unwrap();
        task
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new("ws-1", "coach", "r1", "dig in");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
        assert!(task.timeout.is_zero());
    }

    #[test]
    fn test_happy_path_stamps_times() {
        let mut task = assigned_task();
        task.start().unwrap();
        assert!(task.started_at.is_some());

        task.complete("found it").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("found it"));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_start_requires_assignment() {
        let mut task = Task::new("ws-1", "coach", "r1", "dig in");
        let err = task.start().unwrap_err();
        assert!(matches!(
            err,
            CollaborationError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::InProgress,
                ..
            }
        ));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for finish in [
            (|t: &mut Task| t.complete("ok")) as fn(&mut Task) -> Result<()>,
            |t: &mut Task| t.fail("boom"),
            |t: &mut Task| t.cancel(),
            |t: &mut Task| t.time_out(Utc::now()),
        ] {
            let mut task = assigned_task();
            task.start().unwrap();
            finish(&mut task).unwrap();
            assert!(task.status.is_terminal());

            let status = task.status;
            assert!(task.assign().is_err());
            assert!(task.start().is_err());
            assert!(task.complete("again").is_err());
            assert!(task.fail("again").is_err());
            assert!(task.cancel().is_err());
            assert!(task.time_out(Utc::now()).is_err());
            assert_eq!(task.status, status);
        }
    }

    #[test]
    fn test_timeout_only_from_in_progress() {
        let mut task = assigned_task();
        assert!(task.time_out(Utc::now()).is_err());
        assert_eq!(task.status, TaskStatus::Assigned);
    }

    #[test]
    fn test_cancel_before_start() {
        let mut task = assigned_task();
        task.cancel().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_is_timed_out() {
        let mut task = assigned_task().with_timeout(Duration::from_millis(100));
        task.start().unwrap();
        let started = task.started_at.unwrap();

        assert!(!task.is_timed_out(started + chrono::Duration::milliseconds(50)));
        assert!(task.is_timed_out(started + chrono::Duration::milliseconds(150)));

        task.timeout = Duration::ZERO;
        assert!(!task.is_timed_out(started + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_elapsed_uses_start_and_completion() {
        let mut task = assigned_task();
        task.start().unwrap();
        let started = task.started_at.unwrap();
        task.completed_at = Some(started + chrono::Duration::milliseconds(250));
        assert_eq!(task.elapsed(Utc::now()), Duration::from_millis(250));
    }

    #[test]
    fn test_status_names_round_trip() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_timeout_serialized_as_millis() {
        let task = Task::new("ws-1", "coach", "r1", "dig in").with_timeout(Duration::from_secs(2));
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["timeout"], 2000);
        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back.timeout, Duration::from_secs(2));
    }
}
