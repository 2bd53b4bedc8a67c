//! Shared building blocks for the recon orchestrator: the scan data model,
//! process configuration and the repository seam used by the worker and
//! scheduler.

pub mod config;
pub mod error;
pub mod model;
pub mod repository;

pub use config::Config;
pub use error::StoreError;
pub use model::*;
pub use repository::{InMemoryRepository, Repositories, Repository};
