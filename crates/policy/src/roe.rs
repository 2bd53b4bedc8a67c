//! The Rules of Engagement document.
//!
//! Deserialized once from YAML or JSON (see [`crate::loader`]) and read-only
//! afterwards. Unknown fields are rejected so typos fail at load time instead
//! of silently falling back to defaults.

use std::collections::BTreeMap;
use std::fmt;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tools that stay blocked unless a policy explicitly enables them.
pub const DEFAULT_HIGH_RISK_TOOLS: &[&str] = &["sqlmap", "hydra", "metasploit"];

// ── Document ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesOfEngagement {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub tool_policies: BTreeMap<String, ToolPolicy>,
    #[serde(default = "default_high_risk_tools")]
    pub high_risk_tools: Vec<String>,
}

impl Default for RulesOfEngagement {
    fn default() -> Self {
        Self {
            name: default_name(),
            rate_limit: RateLimitConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            network: NetworkConfig::default(),
            tool_policies: BTreeMap::new(),
            high_risk_tools: default_high_risk_tools(),
        }
    }
}

impl RulesOfEngagement {
    /// Check every field; the first problem found is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".to_string()));
        }

        if self.rate_limit.enabled {
            if !self.rate_limit.rps.is_finite() || self.rate_limit.rps <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "rate_limit.rps must be a positive number, got {}",
                    self.rate_limit.rps
                )));
            }
            if self.rate_limit.burst == 0 {
                return Err(ConfigError::Invalid(
                    "rate_limit.burst must be at least 1".to_string(),
                ));
            }
        }

        if self.concurrency.enabled {
            if self.concurrency.max_parallel_jobs == 0 {
                return Err(ConfigError::Invalid(
                    "concurrency.max_parallel_jobs must be at least 1".to_string(),
                ));
            }
            if self.concurrency.max_parallel_tools == 0 {
                return Err(ConfigError::Invalid(
                    "concurrency.max_parallel_tools must be at least 1".to_string(),
                ));
            }
        }

        // CIDRs are checked even when the network section is disabled.
        parse_networks("network.allow", &self.network.allow)?;
        parse_networks("network.deny", &self.network.deny)?;

        for name in self.tool_policies.keys().chain(self.high_risk_tools.iter()) {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "tool names must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

// ── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Sustained tool invocations per second.
    #[serde(default = "default_rps", alias = "requests_per_second")]
    pub rps: f64,
    /// Bucket capacity: how many invocations may start back to back.
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rps: default_rps(),
            burst: default_burst(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_max_jobs")]
    pub max_parallel_jobs: usize,
    #[serde(default = "default_max_tools")]
    pub max_parallel_tools: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: default_max_jobs(),
            max_parallel_tools: default_max_tools(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
            enabled: true,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Per-tool settings. Missing fields resolve to an enabled, MEDIUM-risk tool
/// that needs no approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolPolicy {
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub requires_approval: bool,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            risk_level: RiskLevel::Medium,
            enabled: true,
            requires_approval: false,
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Parse a list of CIDR strings, failing on the first invalid entry.
pub(crate) fn parse_networks(
    field: &'static str,
    values: &[String],
) -> Result<Vec<IpNetwork>, ConfigError> {
    values
        .iter()
        .map(|value| {
            value
                .trim()
                .parse::<IpNetwork>()
                .map_err(|e| ConfigError::InvalidCidr {
                    field,
                    value: value.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

fn default_name() -> String {
    "default".to_string()
}

fn default_high_risk_tools() -> Vec<String> {
    DEFAULT_HIGH_RISK_TOOLS.iter().map(|s| s.to_string()).collect()
}

fn default_rps() -> f64 {
    10.0
}

fn default_burst() -> u32 {
    20
}

fn default_max_jobs() -> usize {
    5
}

fn default_max_tools() -> usize {
    10
}

fn default_true() -> bool {
    true
}
