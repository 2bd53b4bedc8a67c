use std::path::PathBuf;

use recon_core::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Why a due schedule could not hand its job to the worker.
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    #[error("target {0} not found")]
    TargetNotFound(Uuid),

    #[error("job submission failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("schedule '{0}' already exists")]
    DuplicateName(String),

    #[error("schedule '{0}' not found")]
    NotFound(String),

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("invalid interval '{0}' (expected e.g. 90s, 15m, 1h30m, 1d)")]
    InvalidInterval(String),

    #[error("schedule '{0}' requests no tools")]
    EmptyTools(String),

    #[error("invalid schedule '{name}': {reason}")]
    InvalidSchedule { name: String, reason: String },

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to read schedules file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
