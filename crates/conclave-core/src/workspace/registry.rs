//! Registry of live workspaces backed by a store.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::collaboration::error::{CollaborationError, Result};
use crate::storage::{StorageError, WorkspaceStore};
use crate::workspace::{NewWorkspace, Workspace, WorkspaceSnapshot};

/// Hands out one shared [`Workspace`] instance per ID.
///
/// Instances are created through [`WorkspaceRegistry::create`] or hydrated
/// lazily from the store on first access.
pub struct WorkspaceRegistry {
    store: Arc<dyn WorkspaceStore>,
    live: RwLock<HashMap<String, Arc<Workspace>>>,
}

impl fmt::Debug for WorkspaceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceRegistry")
            .field("live_count", &self.live.try_read().map(|l| l.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl WorkspaceRegistry {
    /// Creates a registry on top of `store`.
    pub fn new(store: Arc<dyn WorkspaceStore>) -> Self {
        Self { store, live: RwLock::new(HashMap::new()) }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn WorkspaceStore> {
        &self.store
    }

    /// Creates and persists a new workspace.
    pub async fn create(&self, params: NewWorkspace) -> Result<Arc<Workspace>> {
        let snapshot = params.into_snapshot();
        let workspace_id = snapshot.id.clone();

        self.store.save(&snapshot).await.map_err(|source| CollaborationError::SaveFailed {
            workspace_id: workspace_id.clone(),
            source,
        })?;

        let workspace = Arc::new(Workspace::from_snapshot(snapshot, Arc::clone(&self.store)));
        self.live.write().await.insert(workspace_id.clone(), Arc::clone(&workspace));

        info!(
            workspace_id = %workspace_id,
            name = %workspace.name(),
            parent_agent = %workspace.parent_agent(),
            "Created workspace"
        );
        Ok(workspace)
    }

    /// Returns the live workspace for `id`, loading it from the store if needed.
    ///
    /// # Errors
    /// * `CollaborationError::WorkspaceNotFound` - If the store has no such workspace
    pub async fn get(&self, id: &str) -> Result<Arc<Workspace>> {
        if let Some(workspace) = self.live.read().await.get(id) {
            return Ok(Arc::clone(workspace));
        }

        let snapshot = self.store.get(id).await.map_err(|e| not_found_or_storage(id, e))?;
        debug!(workspace_id = %id, "Hydrated workspace from store");

        // Another caller may have hydrated the same workspace meanwhile.
        let mut live = self.live.write().await;
        let workspace = live.entry(id.to_string()).or_insert_with(|| {
            Arc::new(Workspace::from_snapshot(snapshot, Arc::clone(&self.store)))
        });
        Ok(Arc::clone(workspace))
    }

    /// Lists persisted workspaces created by `parent_agent`.
    pub async fn list_by_parent(&self, parent_agent: &str) -> Result<Vec<WorkspaceSnapshot>> {
        Ok(self.store.list_by_parent(parent_agent).await?)
    }

    /// Lists persisted workspaces whose status is active.
    pub async fn list_active(&self) -> Result<Vec<WorkspaceSnapshot>> {
        Ok(self.store.list_active().await?)
    }

    /// Deletes a workspace from the registry and the store.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.live.write().await.remove(id);
        self.store.delete(id).await.map_err(|e| not_found_or_storage(id, e))?;
        info!(workspace_id = %id, "Deleted workspace");
        Ok(())
    }

    /// Returns the number of workspaces currently held in memory.
    pub async fn live_count(&self) -> usize {
        self.live.read().await.len()
    }
}

fn not_found_or_storage(id: &str, err: StorageError) -> CollaborationError {
    if err.is_not_found() {
        CollaborationError::WorkspaceNotFound { workspace_id: id.to_string() }
    } else {
        CollaborationError::Storage(err)
    }
}
