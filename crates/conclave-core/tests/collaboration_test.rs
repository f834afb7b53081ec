//! Tests for workspace messaging and task delegation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use conclave_core::collaboration::{
    CollaborationError, Communicator, DelegationRequest, MessageRequest, TaskStatus,
};
use conclave_core::storage::{SqliteWorkspaceStore, StorageError, StorageResult, WorkspaceStore};
use conclave_core::workspace::{MessageType, NewWorkspace, WorkspaceRegistry, WorkspaceSnapshot};
use conclave_core::MemoryWorkspaceStore;
use serde_json::json;
use tokio::time::{Duration, sleep};

async fn setup() -> (Communicator, Arc<WorkspaceRegistry>, String) {
    let registry = Arc::new(WorkspaceRegistry::new(Arc::new(MemoryWorkspaceStore::new())));
    let ws = registry
        .create(NewWorkspace::new("research", "coach").with_agent("r1").with_agent("s1"))
        .await
        .unwrap();
    let id = ws.id().to_string();
    (Communicator::new(Arc::clone(&registry)), registry, id)
}

/// Memory store with a per-save delay and an optional failing save.
struct ScriptedStore {
    inner: MemoryWorkspaceStore,
    save_delay: Duration,
    fail_save: Option<usize>,
    saves: AtomicUsize,
}

impl ScriptedStore {
    fn slow(save_delay: Duration) -> Self {
        Self {
            inner: MemoryWorkspaceStore::new(),
            save_delay,
            fail_save: None,
            saves: AtomicUsize::new(0),
        }
    }

    /// Fails the `n`th save (1-based) and accepts every other one.
    fn failing_save(n: usize) -> Self {
        Self { fail_save: Some(n), ..Self::slow(Duration::ZERO) }
    }
}

#[async_trait]
impl WorkspaceStore for ScriptedStore {
    async fn get(&self, id: &str) -> StorageResult<WorkspaceSnapshot> {
        self.inner.get(id).await
    }

    async fn save(&self, workspace: &WorkspaceSnapshot) -> StorageResult<()> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.save_delay.is_zero() {
            sleep(self.save_delay).await;
        }
        if self.fail_save == Some(n) {
            return Err(StorageError::InvalidData(format!("save {n} rejected")));
        }
        self.inner.save(workspace).await
    }

    async fn list_by_parent(&self, parent_agent: &str) -> StorageResult<Vec<WorkspaceSnapshot>> {
        self.inner.list_by_parent(parent_agent).await
    }

    async fn list_active(&self) -> StorageResult<Vec<WorkspaceSnapshot>> {
        self.inner.list_active().await
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        self.inner.delete(id).await
    }
}

async fn setup_with_store(
    store: ScriptedStore,
) -> (Arc<Communicator>, Arc<WorkspaceRegistry>, String) {
    let registry = Arc::new(WorkspaceRegistry::new(Arc::new(store)));
    let ws = registry
        .create(NewWorkspace::new("research", "coach").with_agent("r1"))
        .await
        .unwrap();
    let id = ws.id().to_string();
    (Arc::new(Communicator::new(Arc::clone(&registry))), registry, id)
}

#[tokio::test]
async fn test_send_message_to_unknown_workspace() {
    let (comm, _registry, _ws) = setup().await;

    let err = comm
        .send_message(MessageRequest::new("nope", "coach", "r1", MessageType::Question, "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, CollaborationError::WorkspaceNotFound { .. }));
}

#[tokio::test]
async fn test_messages_visible_per_agent() {
    let (comm, _registry, ws) = setup().await;

    comm.send_message(MessageRequest::new(&ws, "coach", "r1", MessageType::Question, "for r1"))
        .await
        .unwrap();
    comm.send_message(MessageRequest::new(&ws, "coach", "s1", MessageType::Question, "for s1"))
        .await
        .unwrap();
    comm.broadcast_to_workspace(&ws, "coach", "everyone", MessageType::Status).await.unwrap();

    let r1: Vec<String> =
        comm.get_messages(&ws, "r1").await.unwrap().into_iter().map(|m| m.content).collect();
    assert_eq!(r1, vec!["for r1", "everyone"]);

    let coach = comm.get_messages(&ws, "coach").await.unwrap();
    assert_eq!(coach.len(), 3);
}

#[tokio::test]
async fn test_get_messages_since() {
    let (comm, _registry, ws) = setup().await;

    comm.broadcast_to_workspace(&ws, "coach", "first", MessageType::Status).await.unwrap();
    let cutoff = comm.get_messages(&ws, "coach").await.unwrap()[0].timestamp;
    sleep(Duration::from_millis(5)).await;
    comm.broadcast_to_workspace(&ws, "coach", "second", MessageType::Status).await.unwrap();

    let newer = comm.get_messages_since(&ws, cutoff).await.unwrap();
    assert_eq!(newer.len(), 1);
    assert_eq!(newer[0].content, "second");
}

#[tokio::test]
async fn test_delegate_task_writes_task_request() {
    let (comm, registry, ws) = setup().await;

    let task = comm
        .delegate_task(
            DelegationRequest::new(&ws, "coach", "r1", "Find sources")
                .with_priority(5)
                .with_context("topic", json!("rust"))
                .with_timeout(Duration::from_secs(30)),
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.priority, 5);

    let workspace = registry.get(&ws).await.unwrap();
    let messages = workspace.messages_for_agent("r1");
    assert_eq!(messages.len(), 1);
    let request = &messages[0];
    assert_eq!(request.message_type, MessageType::TaskRequest);
    assert_eq!(request.content, "Find sources");
    assert_eq!(request.metadata["task_id"], json!(task.id));
    assert_eq!(request.metadata["priority"], json!(5));
    assert_eq!(request.metadata["timeout"], json!(30_000));
    assert_eq!(request.metadata["context"]["topic"], json!("rust"));
}

#[tokio::test]
async fn test_delegation_membership() {
    let (comm, _registry, ws) = setup().await;

    let err = comm
        .delegate_task(DelegationRequest::new(&ws, "coach", "stranger", "work"))
        .await
        .unwrap_err();
    match err {
        CollaborationError::AgentNotInWorkspace { agent, workspace_id } => {
            assert_eq!(agent, "stranger");
            assert_eq!(workspace_id, ws);
        }
        other => panic!("Expected AgentNotInWorkspace, got {other:?}"),
    }

    let err = comm
        .delegate_task(DelegationRequest::new(&ws, "stranger", "r1", "work"))
        .await
        .unwrap_err();
    assert!(matches!(err, CollaborationError::AgentNotInWorkspace { .. }));

    // The parent agent may receive work as well as hand it out.
    assert!(comm.delegate_task(DelegationRequest::new(&ws, "r1", "coach", "review")).await.is_ok());
    assert!(comm.delegate_task(DelegationRequest::new(&ws, "r1", "s1", "summarize")).await.is_ok());
    assert_eq!(comm.list_tasks(&ws).await.len(), 2);
}

#[tokio::test]
async fn test_completion_notifies_delegator() {
    let (comm, registry, ws) = setup().await;
    let task =
        comm.delegate_task(DelegationRequest::new(&ws, "coach", "r1", "work")).await.unwrap();

    comm.update_task_status(&task.id, TaskStatus::InProgress, "", "").await.unwrap();
    comm.update_task_status(&task.id, TaskStatus::Completed, "three sources", "").await.unwrap();

    let stored = comm.get_task(&task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.result.as_deref(), Some("three sources"));
    assert!(stored.completed_at.is_some());

    let workspace = registry.get(&ws).await.unwrap();
    let result = workspace
        .messages()
        .into_iter()
        .find(|m| m.message_type == MessageType::Result)
        .unwrap();
    assert_eq!(result.from, "r1");
    assert_eq!(result.to, "coach");
    assert_eq!(result.content, "three sources");
    assert_eq!(result.metadata["task_id"], json!(task.id));
    assert_eq!(result.metadata["status"], json!("completed"));
    assert!(result.metadata["duration_ms"].is_u64());
}

#[tokio::test]
async fn test_failure_notifies_delegator() {
    let (comm, registry, ws) = setup().await;
    let task =
        comm.delegate_task(DelegationRequest::new(&ws, "coach", "s1", "work")).await.unwrap();

    comm.update_task_status(&task.id, TaskStatus::Failed, "", "source offline").await.unwrap();

    let stored = comm.get_task(&task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("source offline"));

    let result = registry
        .get(&ws)
        .await
        .unwrap()
        .messages()
        .into_iter()
        .find(|m| m.message_type == MessageType::Result)
        .unwrap();
    assert_eq!(result.content, "source offline");
    assert_eq!(result.metadata["status"], json!("failed"));
}

#[tokio::test]
async fn test_cancel_sends_no_result() {
    let (comm, registry, ws) = setup().await;
    let task =
        comm.delegate_task(DelegationRequest::new(&ws, "coach", "r1", "work")).await.unwrap();

    comm.update_task_status(&task.id, TaskStatus::Cancelled, "", "").await.unwrap();

    assert_eq!(comm.get_task(&task.id).await.unwrap().status, TaskStatus::Cancelled);
    let workspace = registry.get(&ws).await.unwrap();
    assert!(workspace.messages().iter().all(|m| m.message_type != MessageType::Result));
}

#[tokio::test]
async fn test_terminal_tasks_are_final() {
    let (comm, _registry, ws) = setup().await;
    let task =
        comm.delegate_task(DelegationRequest::new(&ws, "coach", "r1", "work")).await.unwrap();
    comm.update_task_status(&task.id, TaskStatus::Completed, "done", "").await.unwrap();

    for status in
        [TaskStatus::InProgress, TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled]
    {
        let err = comm.update_task_status(&task.id, status, "again", "again").await.unwrap_err();
        assert!(matches!(err, CollaborationError::InvalidTransition { .. }), "{status}");
    }
    let stored = comm.get_task(&task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.result.as_deref(), Some("done"));
}

#[tokio::test]
async fn test_unsupported_status_updates() {
    let (comm, _registry, ws) = setup().await;
    let task =
        comm.delegate_task(DelegationRequest::new(&ws, "coach", "r1", "work")).await.unwrap();

    for status in [TaskStatus::Pending, TaskStatus::Assigned, TaskStatus::Timeout] {
        let err = comm.update_task_status(&task.id, status, "", "").await.unwrap_err();
        assert!(matches!(err, CollaborationError::UnsupportedStatusUpdate { .. }));
    }
    assert_eq!(comm.get_task(&task.id).await.unwrap().status, TaskStatus::Assigned);
}

#[tokio::test]
async fn test_update_unknown_task() {
    let (comm, _registry, _ws) = setup().await;

    let err =
        comm.update_task_status("missing", TaskStatus::InProgress, "", "").await.unwrap_err();
    assert!(matches!(err, CollaborationError::TaskNotFound { .. }));
    assert!(matches!(
        comm.get_task("missing").await.unwrap_err(),
        CollaborationError::TaskNotFound { .. }
    ));
}

#[tokio::test]
async fn test_timeout_transition_happens_once() {
    let (comm, _registry, ws) = setup().await;
    let task = comm
        .delegate_task(
            DelegationRequest::new(&ws, "coach", "r1", "slow work")
                .with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();
    comm.update_task_status(&task.id, TaskStatus::InProgress, "", "").await.unwrap();

    sleep(Duration::from_millis(150)).await;

    let first = comm.check_timeouts().await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, task.id);
    assert_eq!(first[0].status, TaskStatus::Timeout);

    let second = comm.check_timeouts().await;
    assert!(second.is_empty());
    assert_eq!(comm.get_task(&task.id).await.unwrap().status, TaskStatus::Timeout);
}

#[tokio::test]
async fn test_tasks_without_timeout_never_time_out() {
    let (comm, _registry, ws) = setup().await;
    let task = comm
        .delegate_task(DelegationRequest::new(&ws, "coach", "r1", "open ended"))
        .await
        .unwrap();
    comm.update_task_status(&task.id, TaskStatus::InProgress, "", "").await.unwrap();

    sleep(Duration::from_millis(20)).await;
    assert!(comm.check_timeouts().await.is_empty());
}

#[tokio::test]
async fn test_task_stats_sum_to_total() {
    let (comm, _registry, ws) = setup().await;

    let mut ids = Vec::new();
    for i in 0..5 {
        let to = if i % 2 == 0 { "r1" } else { "s1" };
        let task = comm
            .delegate_task(DelegationRequest::new(&ws, "coach", to, format!("job {i}")))
            .await
            .unwrap();
        ids.push(task.id);
    }
    comm.update_task_status(&ids[0], TaskStatus::InProgress, "", "").await.unwrap();
    comm.update_task_status(&ids[1], TaskStatus::Completed, "ok", "").await.unwrap();
    comm.update_task_status(&ids[2], TaskStatus::Failed, "", "boom").await.unwrap();

    let stats = comm.get_task_stats(&ws).await;
    assert_eq!(stats.total, 5);
    assert_eq!(stats.count(TaskStatus::Assigned), 2);
    assert_eq!(stats.count(TaskStatus::InProgress), 1);

    let map = stats.to_map();
    let sum: usize = map.iter().filter(|(k, _)| k.as_str() != "total").map(|(_, v)| v).sum();
    assert_eq!(sum, map["total"]);

    assert_eq!(comm.get_task_stats("other").await.total, 0);
}

#[tokio::test]
async fn test_list_tasks_for_agent() {
    let (comm, _registry, ws) = setup().await;
    comm.delegate_task(DelegationRequest::new(&ws, "coach", "r1", "a")).await.unwrap();
    comm.delegate_task(DelegationRequest::new(&ws, "coach", "s1", "b")).await.unwrap();
    comm.delegate_task(DelegationRequest::new(&ws, "coach", "r1", "c")).await.unwrap();

    let r1: Vec<String> =
        comm.list_tasks_for_agent("r1").await.into_iter().map(|t| t.description).collect();
    assert_eq!(r1.len(), 2);
    assert!(r1.contains(&"a".to_string()));
    assert!(r1.contains(&"c".to_string()));
}

#[tokio::test]
async fn test_cancel_workspace_tasks() {
    let (comm, registry, ws) = setup().await;
    let other =
        registry.create(NewWorkspace::new("other", "coach").with_agent("r1")).await.unwrap();

    let done = comm.delegate_task(DelegationRequest::new(&ws, "coach", "r1", "a")).await.unwrap();
    let open = comm.delegate_task(DelegationRequest::new(&ws, "coach", "s1", "b")).await.unwrap();
    let elsewhere =
        comm.delegate_task(DelegationRequest::new(other.id(), "coach", "r1", "c")).await.unwrap();
    comm.update_task_status(&done.id, TaskStatus::Completed, "ok", "").await.unwrap();

    let cancelled = comm.cancel_workspace_tasks(&ws).await;
    assert_eq!(cancelled, vec![open.id.clone()]);
    assert_eq!(comm.get_task(&done.id).await.unwrap().status, TaskStatus::Completed);
    assert_eq!(comm.get_task(&open.id).await.unwrap().status, TaskStatus::Cancelled);
    assert_eq!(comm.get_task(&elsewhere.id).await.unwrap().status, TaskStatus::Assigned);
}

#[tokio::test]
async fn test_concurrent_delegations_share_one_log() {
    let (comm, registry, ws) = setup().await;
    let comm = Arc::new(comm);

    let mut handles = Vec::new();
    for i in 0..16 {
        let comm = Arc::clone(&comm);
        let ws = ws.clone();
        handles.push(tokio::spawn(async move {
            comm.delegate_task(DelegationRequest::new(&ws, "coach", "r1", format!("job {i}")))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(comm.list_tasks(&ws).await.len(), 16);
    let workspace = registry.get(&ws).await.unwrap();
    assert_eq!(workspace.messages().len(), 16);

    let persisted = registry.store().get(&ws).await.unwrap();
    assert_eq!(persisted.messages.len(), 16);
}

#[tokio::test]
async fn test_messages_survive_sqlite_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conclave.db");
    let path = path.to_str().unwrap();

    let ws_id = {
        let store = Arc::new(SqliteWorkspaceStore::open(path).unwrap());
        let registry = Arc::new(WorkspaceRegistry::new(store));
        let ws = registry
            .create(NewWorkspace::new("durable", "coach").with_agent("r1"))
            .await
            .unwrap();
        let comm = Communicator::new(Arc::clone(&registry));
        comm.delegate_task(DelegationRequest::new(ws.id(), "coach", "r1", "persist me"))
            .await
            .unwrap();
        ws.id().to_string()
    };

    let store = SqliteWorkspaceStore::open(path).unwrap();
    let snapshot = store.get(&ws_id).await.unwrap();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].content, "persist me");
    assert!(snapshot.agents.contains("r1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_task_request_reader_can_start_task_immediately() {
    let store = ScriptedStore::slow(Duration::from_millis(20));
    let (comm, _registry, ws) = setup_with_store(store).await;

    let executor = {
        let comm = Arc::clone(&comm);
        let ws = ws.clone();
        tokio::spawn(tokio::time::timeout(Duration::from_secs(2), async move {
            loop {
                let messages = comm.get_messages(&ws, "r1").await.unwrap();
                if let Some(request) =
                    messages.iter().find(|m| m.message_type == MessageType::TaskRequest)
                {
                    let task_id = request.metadata["task_id"].as_str().unwrap().to_string();
                    comm.update_task_status(&task_id, TaskStatus::InProgress, "", "").await?;
                    return Ok::<_, CollaborationError>(task_id);
                }
                sleep(Duration::from_millis(1)).await;
            }
        }))
    };

    let task = comm.delegate_task(DelegationRequest::new(&ws, "coach", "r1", "go")).await.unwrap();

    let started = executor.await.unwrap().unwrap().unwrap();
    assert_eq!(started, task.id);
    assert_eq!(comm.get_task(&task.id).await.unwrap().status, TaskStatus::InProgress);
}

#[tokio::test]
async fn test_failed_delegation_leaves_no_request_behind() {
    // Save 1 creates the workspace, save 2 carries the task request.
    let (comm, registry, ws) = setup_with_store(ScriptedStore::failing_save(2)).await;

    let err = comm
        .delegate_task(DelegationRequest::new(&ws, "coach", "r1", "lost"))
        .await
        .unwrap_err();
    assert!(matches!(err, CollaborationError::SaveFailed { .. }));
    assert!(comm.list_tasks(&ws).await.is_empty());

    let workspace = registry.get(&ws).await.unwrap();
    assert!(workspace.messages().is_empty());

    comm.broadcast_to_workspace(&ws, "coach", "still here", MessageType::Status).await.unwrap();
    let persisted = registry.store().get(&ws).await.unwrap();
    assert_eq!(persisted.messages.len(), 1);
    assert_eq!(persisted.messages[0].message_type, MessageType::Status);
}

#[tokio::test]
async fn test_completion_stands_when_result_message_cannot_be_saved() {
    // Save 3 carries the result message.
    let (comm, registry, ws) = setup_with_store(ScriptedStore::failing_save(3)).await;
    let task =
        comm.delegate_task(DelegationRequest::new(&ws, "coach", "r1", "work")).await.unwrap();

    comm.update_task_status(&task.id, TaskStatus::Completed, "done", "").await.unwrap();

    let stored = comm.get_task(&task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.result.as_deref(), Some("done"));

    let workspace = registry.get(&ws).await.unwrap();
    assert!(workspace.messages().iter().all(|m| m.message_type != MessageType::Result));
}
