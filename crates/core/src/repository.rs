//! Persistence seam for targets, jobs and tool runs.
//!
//! The orchestrator only needs `get_by_id` / `create` / `update` / `list`
//! plus [`Repository::modify`], a read-modify-write that is atomic with
//! respect to other calls on the same repository (the session scope).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Entity, Finding, ScanJob, Target, ToolRun};

/// Closure applied inside [`Repository::modify`].
pub type Mutation<T> = Box<dyn FnOnce(&mut T) + Send>;

#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<T>, StoreError>;

    /// Insert a new record. Fails with [`StoreError::Conflict`] if the id exists.
    async fn create(&self, item: T) -> Result<T, StoreError>;

    /// Replace an existing record. Fails with [`StoreError::NotFound`] otherwise.
    async fn update(&self, item: T) -> Result<T, StoreError>;

    async fn list(&self) -> Result<Vec<T>, StoreError>;

    /// Apply `mutation` to the stored record in one step and return the result.
    async fn modify(&self, id: Uuid, mutation: Mutation<T>) -> Result<T, StoreError>;
}

/// Process-local repository backed by a `HashMap`.
pub struct InMemoryRepository<T> {
    items: RwLock<HashMap<Uuid, T>>,
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Backend(format!("{} store lock poisoned", T::KIND))
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<T>, StoreError> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        Ok(items.get(&id).cloned())
    }

    async fn create(&self, item: T) -> Result<T, StoreError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        let id = item.id();
        if items.contains_key(&id) {
            return Err(StoreError::Conflict { kind: T::KIND, id });
        }
        items.insert(id, item.clone());
        Ok(item)
    }

    async fn update(&self, item: T) -> Result<T, StoreError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        let id = item.id();
        match items.get_mut(&id) {
            Some(slot) => {
                *slot = item.clone();
                Ok(item)
            }
            None => Err(StoreError::NotFound { kind: T::KIND, id }),
        }
    }

    async fn list(&self) -> Result<Vec<T>, StoreError> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        Ok(items.values().cloned().collect())
    }

    async fn modify(&self, id: Uuid, mutation: Mutation<T>) -> Result<T, StoreError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        let item = items
            .get_mut(&id)
            .ok_or(StoreError::NotFound { kind: T::KIND, id })?;
        mutation(item);
        Ok(item.clone())
    }
}

/// The repositories the worker and scheduler share.
#[derive(Clone)]
pub struct Repositories {
    pub targets: Arc<dyn Repository<Target>>,
    pub jobs: Arc<dyn Repository<ScanJob>>,
    pub tool_runs: Arc<dyn Repository<ToolRun>>,
    pub findings: Arc<dyn Repository<Finding>>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            targets: Arc::new(InMemoryRepository::<Target>::new()),
            jobs: Arc::new(InMemoryRepository::<ScanJob>::new()),
            tool_runs: Arc::new(InMemoryRepository::<ToolRun>::new()),
            findings: Arc::new(InMemoryRepository::<Finding>::new()),
        }
    }

    /// All tool runs belonging to `job_id`, oldest first.
    pub async fn tool_runs_for_job(&self, job_id: Uuid) -> Result<Vec<ToolRun>, StoreError> {
        let mut runs: Vec<ToolRun> = self
            .tool_runs
            .list()
            .await?
            .into_iter()
            .filter(|r| r.job_id == job_id)
            .collect();
        runs.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.tool_name.cmp(&b.tool_name))
                .then_with(|| a.attempt.cmp(&b.attempt))
        });
        Ok(runs)
    }

    pub async fn findings_for_run(&self, tool_run_id: Uuid) -> Result<Vec<Finding>, StoreError> {
        Ok(self
            .findings
            .list()
            .await?
            .into_iter()
            .filter(|f| f.tool_run_id == tool_run_id)
            .collect())
    }
}
