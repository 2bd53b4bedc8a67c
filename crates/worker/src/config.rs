use std::collections::HashMap;
use std::time::Duration;

use recon_core::config::WorkerSettings;

/// Runtime knobs for the job lifecycle manager.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Hard timeout for tools without an override.
    pub default_timeout: Duration,
    /// Per-tool overrides keyed by lowercase tool name.
    pub tool_timeouts: HashMap<String, Duration>,
    /// How long to wait before re-trying a job or tool slot at capacity.
    pub slot_retry_delay: Duration,
    /// Extra attempts after a failed tool run; 0 disables retries.
    pub max_tool_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(3600),
            tool_timeouts: HashMap::new(),
            slot_retry_delay: Duration::from_millis(250),
            max_tool_retries: 0,
        }
    }
}

impl WorkerConfig {
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            default_timeout: settings.default_tool_timeout(),
            tool_timeouts: HashMap::new(),
            slot_retry_delay: settings.slot_retry_delay(),
            max_tool_retries: settings.max_tool_retries,
        }
    }

    pub fn with_tool_timeouts(mut self, timeouts: HashMap<String, Duration>) -> Self {
        self.tool_timeouts.extend(
            timeouts
                .into_iter()
                .map(|(name, timeout)| (name.to_ascii_lowercase(), timeout)),
        );
        self
    }

    pub fn timeout_for(&self, tool: &str) -> Duration {
        self.tool_timeouts
            .get(&tool.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.default_timeout)
    }
}
