use std::sync::Arc;

use async_trait::async_trait;
use recon_worker::{JobLifecycleManager, WorkerError};
use uuid::Uuid;

use crate::error::SubmitError;

/// Where due schedules send their jobs.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Create a new pending job for `target_id` and hand it to the worker.
    /// Returns the new job's id.
    async fn submit(&self, target_id: Uuid, tools: Vec<String>) -> Result<Uuid, SubmitError>;
}

/// Scheduled jobs take the same path as any other job: the worker's policy
/// admission runs before a tool starts.
#[async_trait]
impl JobSubmitter for Arc<JobLifecycleManager> {
    async fn submit(&self, target_id: Uuid, tools: Vec<String>) -> Result<Uuid, SubmitError> {
        match self.enqueue(target_id, tools).await {
            Ok(job) => Ok(job.id),
            Err(WorkerError::TargetNotFound(id)) => Err(SubmitError::TargetNotFound(id)),
            Err(e) => Err(SubmitError::Failed(e.to_string())),
        }
    }
}
