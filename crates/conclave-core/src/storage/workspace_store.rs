//! Workspace persistence contract and its implementations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Row, params};
use tokio::sync::RwLock;
use tracing::debug;

use crate::storage::database::Database;
use crate::storage::error::{StorageError, StorageResult};
use crate::workspace::{WorkspaceSnapshot, WorkspaceStatus};

/// Durable storage for workspaces.
///
/// `save` is called after every workspace mutation with the full snapshot,
/// so implementations must treat it as an upsert.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Loads a workspace.
    ///
    /// # Errors
    /// * `StorageError::NotFound` - If no workspace has this ID
    async fn get(&self, id: &str) -> StorageResult<WorkspaceSnapshot>;

    /// Inserts or replaces a workspace.
    async fn save(&self, workspace: &WorkspaceSnapshot) -> StorageResult<()>;

    /// Lists workspaces created by `parent_agent`, oldest first.
    async fn list_by_parent(&self, parent_agent: &str) -> StorageResult<Vec<WorkspaceSnapshot>>;

    /// Lists workspaces whose status is active, oldest first.
    async fn list_active(&self) -> StorageResult<Vec<WorkspaceSnapshot>>;

    /// Deletes a workspace.
    ///
    /// # Errors
    /// * `StorageError::NotFound` - If no workspace has this ID
    async fn delete(&self, id: &str) -> StorageResult<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Workspace store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryWorkspaceStore {
    workspaces: RwLock<HashMap<String, WorkspaceSnapshot>>,
}

impl MemoryWorkspaceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn filtered<F>(&self, predicate: F) -> Vec<WorkspaceSnapshot>
    where
        F: Fn(&WorkspaceSnapshot) -> bool + Send,
    {
        let workspaces = self.workspaces.read().await;
        let mut matching: Vec<WorkspaceSnapshot> =
            workspaces.values().filter(|ws| predicate(ws)).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        matching
    }
}

#[async_trait]
impl WorkspaceStore for MemoryWorkspaceStore {
    async fn get(&self, id: &str) -> StorageResult<WorkspaceSnapshot> {
        self.workspaces
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found_error(id))
    }

    async fn save(&self, workspace: &WorkspaceSnapshot) -> StorageResult<()> {
        self.workspaces.write().await.insert(workspace.id.clone(), workspace.clone());
        Ok(())
    }

    async fn list_by_parent(&self, parent_agent: &str) -> StorageResult<Vec<WorkspaceSnapshot>> {
        Ok(self.filtered(|ws| ws.parent_agent == parent_agent).await)
    }

    async fn list_active(&self) -> StorageResult<Vec<WorkspaceSnapshot>> {
        Ok(self.filtered(|ws| ws.status == WorkspaceStatus::Active).await)
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        self.workspaces.write().await.remove(id).map(|_| ()).ok_or_else(|| not_found_error(id))
    }
}

// ============================================================================
// SQLite store
// ============================================================================

const SELECT_COLUMNS: &str = "SELECT id, name, parent_agent, agents_json, shared_data_json, \
     messages_json, status, created_at, updated_at FROM workspaces";

/// Workspace store backed by a SQLite database.
pub struct SqliteWorkspaceStore {
    db: Arc<StdMutex<Database>>,
}

impl SqliteWorkspaceStore {
    /// Creates a store over an open database.
    pub fn new(db: Arc<StdMutex<Database>>) -> Self {
        Self { db }
    }

    /// Opens (or creates) the database file at `path`.
    pub fn open(path: &str) -> StorageResult<Self> {
        Ok(Self::new(Arc::new(StdMutex::new(Database::open(path)?))))
    }

    /// Opens a fresh in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::new(Arc::new(StdMutex::new(Database::open_in_memory()?))))
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|e| StorageError::InvalidData(format!("Database lock error: {}", e)))
    }

    fn query_list(&self, clause: &str, arg: &str) -> StorageResult<Vec<WorkspaceSnapshot>> {
        let db = self.lock()?;
        let sql = format!("{} WHERE {} ORDER BY created_at ASC, id ASC", SELECT_COLUMNS, clause);
        let mut stmt = db.conn().prepare(&sql)?;
        let workspaces = stmt
            .query_map(params![arg], workspace_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(workspaces)
    }
}

#[async_trait]
impl WorkspaceStore for SqliteWorkspaceStore {
    async fn get(&self, id: &str) -> StorageResult<WorkspaceSnapshot> {
        let db = self.lock()?;
        let mut stmt = db.conn().prepare(&format!("{} WHERE id = ?1", SELECT_COLUMNS))?;
        let mut rows = stmt.query_map(params![id], workspace_from_row)?;
        match rows.next() {
            Some(Ok(workspace)) => Ok(workspace),
            Some(Err(e)) => Err(e.into()),
            None => Err(not_found_error(id)),
        }
    }

    async fn save(&self, workspace: &WorkspaceSnapshot) -> StorageResult<()> {
        let agents_json = serde_json::to_string(&workspace.agents)?;
        let shared_data_json = serde_json::to_string(&workspace.shared_data)?;
        let messages_json = serde_json::to_string(&workspace.messages)?;

        let mut db = self.lock()?;
        db.conn_mut().execute(
            r#"
            INSERT INTO workspaces (
                id, name, parent_agent, agents_json, shared_data_json, messages_json,
                status, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                parent_agent = excluded.parent_agent,
                agents_json = excluded.agents_json,
                shared_data_json = excluded.shared_data_json,
                messages_json = excluded.messages_json,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
            params![
                workspace.id,
                workspace.name,
                workspace.parent_agent,
                agents_json,
                shared_data_json,
                messages_json,
                workspace.status.as_str(),
                workspace.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                workspace.updated_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
            ],
        )?;
        debug!(
            workspace_id = %workspace.id,
            messages = workspace.messages.len(),
            "Saved workspace"
        );
        Ok(())
    }

    async fn list_by_parent(&self, parent_agent: &str) -> StorageResult<Vec<WorkspaceSnapshot>> {
        self.query_list("parent_agent = ?1", parent_agent)
    }

    async fn list_active(&self) -> StorageResult<Vec<WorkspaceSnapshot>> {
        self.query_list("status = ?1", WorkspaceStatus::Active.as_str())
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        let mut db = self.lock()?;
        let deleted = db.conn_mut().execute("DELETE FROM workspaces WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(not_found_error(id));
        }
        debug!(workspace_id = %id, "Deleted workspace row");
        Ok(())
    }
}

// ============================================================================
// Row Parsing Helpers
// ============================================================================

fn not_found_error(id: &str) -> StorageError {
    StorageError::NotFound(format!("workspace with id {} not found", id))
}

fn invalid_column(idx: usize, column_name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, column_name.to_string(), rusqlite::types::Type::Text)
}

/// Parses a JSON column into a deserializable type.
fn parse_json_field<T>(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let json_str: String = row.get(idx)?;
    serde_json::from_str(&json_str).map_err(|_| invalid_column(idx, column_name))
}

/// Parses an RFC3339 timestamp column.
fn parse_timestamp(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let timestamp_str: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&timestamp_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| invalid_column(idx, column_name))
}

fn workspace_from_row(row: &Row) -> rusqlite::Result<WorkspaceSnapshot> {
    let status_str: String = row.get(6)?;
    let status = status_str.parse::<WorkspaceStatus>().map_err(|_| invalid_column(6, "status"))?;

    Ok(WorkspaceSnapshot {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_agent: row.get(2)?,
        agents: parse_json_field(row, 3, "agents_json")?,
        shared_data: parse_json_field(row, 4, "shared_data_json")?,
        messages: parse_json_field(row, 5, "messages_json")?,
        status,
        created_at: parse_timestamp(row, 7, "created_at")?,
        updated_at: parse_timestamp(row, 8, "updated_at")?,
    })
}
