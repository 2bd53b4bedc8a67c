//! Turning raw tool output into findings.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use recon_core::Finding;
use uuid::Uuid;

use crate::error::{NormalizeError, RegistryError};

/// Parses one tool's raw stdout into findings attributed to `tool_run_id`.
#[async_trait]
pub trait Normalizer: Send + Sync {
    /// The tool whose output this normalizer understands.
    fn tool(&self) -> &str;

    async fn parse(
        &self,
        raw_output: &str,
        tool_run_id: Uuid,
    ) -> Result<Vec<Finding>, NormalizeError>;
}

/// Normalizers keyed by lowercase tool name.
#[derive(Default)]
pub struct NormalizerRegistry {
    normalizers: HashMap<String, Arc<dyn Normalizer>>,
}

impl NormalizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, normalizer: impl Normalizer + 'static) -> Result<(), RegistryError> {
        let key = normalizer.tool().trim().to_ascii_lowercase();
        if self.normalizers.contains_key(&key) {
            return Err(RegistryError::DuplicateName(key));
        }
        self.normalizers.insert(key, Arc::new(normalizer));
        Ok(())
    }

    pub fn get(&self, tool: &str) -> Option<Arc<dyn Normalizer>> {
        self.normalizers.get(&tool.trim().to_ascii_lowercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.normalizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normalizers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Lines;

    #[async_trait]
    impl Normalizer for Lines {
        fn tool(&self) -> &str {
            "subfinder"
        }

        async fn parse(&self, raw: &str, run: Uuid) -> Result<Vec<Finding>, NormalizeError> {
            Ok(raw
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| Finding::new(run, l.trim(), "info"))
                .collect())
        }
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let mut registry = NormalizerRegistry::new();
        registry.register(Lines).unwrap();
        assert!(registry.register(Lines).is_err());

        let run = Uuid::new_v4();
        let findings = registry
            .get("SubFinder")
            .unwrap()
            .parse("a.example.org\n\nb.example.org\n", run)
            .await
            .unwrap();
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.tool_run_id == run));
    }
}
