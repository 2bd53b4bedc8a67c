//! Reading and writing Rules of Engagement documents.
//!
//! The format follows the file extension: `.yml` / `.yaml` for YAML and
//! `.json` for JSON. Every document is validated before it is returned.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::ConfigError;
use crate::roe::RulesOfEngagement;

/// Serialization format of a policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyFormat {
    Yaml,
    Json,
}

impl PolicyFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "yml" | "yaml" => Ok(PolicyFormat::Yaml),
            "json" => Ok(PolicyFormat::Json),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Load and validate a policy file.
pub fn load_policy(path: &Path) -> Result<RulesOfEngagement, ConfigError> {
    let format = PolicyFormat::from_path(path)?;
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let roe = parse_policy(&contents, format)?;
    info!(
        path = %path.display(),
        policy = %roe.name,
        tool_policies = roe.tool_policies.len(),
        "loaded rules of engagement"
    );
    Ok(roe)
}

/// Parse and validate a policy document held in memory.
pub fn parse_policy(
    contents: &str,
    format: PolicyFormat,
) -> Result<RulesOfEngagement, ConfigError> {
    let roe: RulesOfEngagement = match format {
        PolicyFormat::Yaml => serde_yaml::from_str(contents)?,
        PolicyFormat::Json => serde_json::from_str(contents)?,
    };
    roe.validate()?;
    Ok(roe)
}

/// Serialize a policy document in the given format.
pub fn render_policy(
    roe: &RulesOfEngagement,
    format: PolicyFormat,
) -> Result<String, ConfigError> {
    match format {
        PolicyFormat::Yaml => Ok(serde_yaml::to_string(roe)?),
        PolicyFormat::Json => Ok(serde_json::to_string_pretty(roe)?),
    }
}
