use std::path::PathBuf;
use std::time::Duration;

use recon_core::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Why a single tool invocation did not produce output.
///
/// Recorded on the ToolRun; it never fails the owning job.
#[derive(Debug, Clone, Error)]
pub enum ToolExecutionError {
    #[error("tool '{0}' is not installed")]
    NotInstalled(String),

    #[error("tool '{tool}' timed out after {}s", timeout.as_secs_f64())]
    Timeout { tool: String, timeout: Duration },

    #[error("tool execution failed: {0}")]
    Failed(String),
}

/// Orchestration-layer failures. Any of these ends the job `failed`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("scan job {0} not found")]
    JobNotFound(Uuid),

    #[error("target {0} not found")]
    TargetNotFound(Uuid),

    #[error("scan job {0} is already being processed")]
    AlreadySubmitted(Uuid),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("'{0}' is already registered")]
    DuplicateName(String),
}

#[derive(Debug, Error)]
#[error("normalization failed: {0}")]
pub struct NormalizeError(pub String);

#[derive(Debug, Error)]
pub enum ToolsFileError {
    #[error("failed to read tools file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid tools file: {0}")]
    Invalid(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
