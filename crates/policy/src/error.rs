//! Error taxonomy for policy loading and admission.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An invalid Rules of Engagement document. Fatal at engine construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported policy file format '{0}' (expected .yml, .yaml or .json)")]
    UnsupportedFormat(String),

    #[error("invalid CIDR '{value}' in {field}: {reason}")]
    InvalidCidr {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid policy: {0}")]
    Invalid(String),
}

/// Which rule a [`Violation`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Network,
    Tool,
    Concurrency,
}

/// A single violated rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// The target or tool name the rule rejected.
    pub subject: String,
    pub message: String,
}

/// Every rule a job submission violated, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub violations: Vec<Violation>,
}

impl PolicyViolation {
    pub fn messages(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.message.as_str()).collect()
    }

    /// True when the only problem is a full job pool, i.e. the submission
    /// would be admitted once capacity frees up.
    pub fn is_capacity_only(&self) -> bool {
        !self.violations.is_empty()
            && self
                .violations
                .iter()
                .all(|v| v.kind == ViolationKind::Concurrency)
    }

    pub fn of_kind(&self, kind: ViolationKind) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(move |v| v.kind == kind)
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "policy violation: {}", self.messages().join("; "))
    }
}

impl std::error::Error for PolicyViolation {}

/// Either failure mode of the policy layer, for callers that need one type.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Violation(#[from] PolicyViolation),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
