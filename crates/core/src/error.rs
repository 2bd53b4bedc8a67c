use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by [`Repository`](crate::Repository) implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("{kind} already exists: {id}")]
    Conflict { kind: &'static str, id: Uuid },

    #[error("Storage backend error: {0}")]
    Backend(String),
}
