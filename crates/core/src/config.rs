use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

/// Process-level settings. The Rules of Engagement document itself lives in
/// the file named by `paths.policy_file` and is loaded by `recon-policy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub paths: PathsConfig,
    pub worker: WorkerSettings,
    pub scheduler: SchedulerSettings,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RECON_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("RECON_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            paths: PathsConfig::from_env_profiled(p),
            worker: WorkerSettings::from_env_profiled(p),
            scheduler: SchedulerSettings::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  policy:      {}", self.paths.policy_file.display());
        tracing::info!("  tools:       {}", self.paths.tools_file.display());
        tracing::info!("  schedules:   {}", self.paths.schedules_file.display());
        tracing::info!(
            "  worker:      default_timeout={}s, slot_retry={}ms, max_tool_retries={}",
            self.worker.default_tool_timeout_secs,
            self.worker.slot_retry_ms,
            self.worker.max_tool_retries
        );
        tracing::info!("  scheduler:   tick={}ms", self.scheduler.tick_ms);
    }
}

// ── Paths ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub policy_file: PathBuf,
    pub tools_file: PathBuf,
    pub schedules_file: PathBuf,
}

impl PathsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            policy_file: PathBuf::from(profiled_env_or(p, "RECON_POLICY_FILE", "config/roe.yml")),
            tools_file: PathBuf::from(profiled_env_or(p, "RECON_TOOLS_FILE", "config/tools.yml")),
            schedules_file: PathBuf::from(profiled_env_or(
                p,
                "RECON_SCHEDULES_FILE",
                "config/schedules.yml",
            )),
        }
    }
}

// ── Worker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Hard timeout for tools without their own `timeout_secs`.
    pub default_tool_timeout_secs: u64,
    /// Delay before re-trying a job or tool slot that was at capacity.
    pub slot_retry_ms: u64,
    /// Extra attempts (each a new ToolRun) after a failed tool run.
    pub max_tool_retries: u32,
}

impl WorkerSettings {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            default_tool_timeout_secs: profiled_env_u64(p, "RECON_DEFAULT_TOOL_TIMEOUT_SECS", 3600),
            slot_retry_ms: profiled_env_u64(p, "RECON_SLOT_RETRY_MS", 250),
            max_tool_retries: profiled_env_u32(p, "RECON_MAX_TOOL_RETRIES", 0),
        }
    }

    pub fn default_tool_timeout(&self) -> Duration {
        Duration::from_secs(self.default_tool_timeout_secs)
    }

    pub fn slot_retry_delay(&self) -> Duration {
        Duration::from_millis(self.slot_retry_ms)
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub tick_ms: u64,
}

impl SchedulerSettings {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            tick_ms: profiled_env_u64(p, "RECON_SCHEDULER_TICK_MS", 1000),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}
