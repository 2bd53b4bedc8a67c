use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use recon_core::{Config, Repositories};
use recon_policy::PolicyEngine;
use recon_worker::{JobLifecycleManager, ToolsFile, WorkerConfig};
use tracing::info;

use crate::cli::CliArgs;

/// Command-line paths take precedence over the environment.
pub fn apply_overrides(config: &mut Config, args: &CliArgs) {
    if let Some(path) = &args.policy {
        config.paths.policy_file = path.clone();
    }
    if let Some(path) = &args.tools_file {
        config.paths.tools_file = path.clone();
    }
    if let Some(path) = &args.schedules {
        config.paths.schedules_file = path.clone();
    }
}

pub fn load_engine(config: &Config) -> Result<Arc<PolicyEngine>> {
    let path = &config.paths.policy_file;
    let engine = PolicyEngine::from_file(path)
        .with_context(|| format!("failed to load policy from {}", path.display()))?;
    Ok(Arc::new(engine))
}

/// Build a lifecycle manager over in-memory repositories, with one adapter
/// per entry of the tools file.
pub fn build_manager(
    config: &Config,
    engine: Arc<PolicyEngine>,
) -> Result<Arc<JobLifecycleManager>> {
    let path: &PathBuf = &config.paths.tools_file;
    let tools = ToolsFile::load(path)
        .with_context(|| format!("failed to load tools from {}", path.display()))?;
    let adapters = tools.adapters().context("invalid tools file")?;
    info!(adapters = adapters.len(), "tool adapters registered");

    let worker = WorkerConfig::from_settings(&config.worker).with_tool_timeouts(tools.timeouts());
    Ok(Arc::new(JobLifecycleManager::new(
        engine,
        Repositories::in_memory(),
        adapters,
        worker,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_paths_override_env_config() {
        let mut config = Config::for_profile("RECON_CLI_TEST_UNSET");
        let args = CliArgs::try_parse_from([
            "recon",
            "--policy",
            "/tmp/roe.json",
            "--schedules",
            "/tmp/s.yml",
            "daemon",
        ])
        .unwrap();
        let tools_before = config.paths.tools_file.clone();

        apply_overrides(&mut config, &args);
        assert_eq!(config.paths.policy_file, PathBuf::from("/tmp/roe.json"));
        assert_eq!(config.paths.schedules_file, PathBuf::from("/tmp/s.yml"));
        assert_eq!(config.paths.tools_file, tools_before);
    }

    #[test]
    fn test_missing_policy_file_is_an_error() {
        let mut config = Config::for_profile("RECON_CLI_TEST_UNSET");
        config.paths.policy_file = PathBuf::from("/nonexistent/roe.yml");
        let err = load_engine(&config).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/roe.yml"));
    }
}
