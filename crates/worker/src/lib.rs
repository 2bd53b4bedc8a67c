//! Scan job execution.
//!
//! This crate provides:
//! - The [`ToolAdapter`] and [`Normalizer`] seams with name-keyed registries
//! - [`CommandAdapter`], a subprocess adapter configured from the tools file
//! - [`JobLifecycleManager`], which admits jobs through the policy engine and
//!   runs their tools concurrently to a terminal status

pub mod adapter;
pub mod command;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod normalizer;

pub use adapter::{AdapterRegistry, ToolAdapter, ToolOptions, ToolOutput};
pub use command::{CommandAdapter, ToolSpec, ToolsFile};
pub use config::WorkerConfig;
pub use error::{
    NormalizeError, RegistryError, ToolExecutionError, ToolsFileError, WorkerError,
};
pub use lifecycle::JobLifecycleManager;
pub use normalizer::{Normalizer, NormalizerRegistry};
