//! The tool adapter seam and its registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, ToolExecutionError};

/// Extra named values an adapter may substitute into its invocation.
pub type ToolOptions = BTreeMap<String, String>;

/// Raw result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// The command line that was executed, for the ToolRun record.
    pub command: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one external scanner against a target.
///
/// Implementations must honour `timeout` and return
/// [`ToolExecutionError::Timeout`] when it passes. A non-zero exit is not an
/// error: it is reported through [`ToolOutput::exit_code`].
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        target: &str,
        options: &ToolOptions,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolExecutionError>;
}

/// Adapters keyed by lowercase tool name.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ToolAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. Returns error if the name is already registered.
    pub fn register(&mut self, adapter: impl ToolAdapter + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(adapter))
    }

    pub fn register_arc(&mut self, adapter: Arc<dyn ToolAdapter>) -> Result<(), RegistryError> {
        let key = adapter.name().trim().to_ascii_lowercase();
        if self.adapters.contains_key(&key) {
            return Err(RegistryError::DuplicateName(key));
        }
        self.adapters.insert(key, adapter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolAdapter>> {
        self.adapters.get(&name.trim().to_ascii_lowercase()).cloned()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
