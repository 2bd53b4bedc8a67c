//! Subprocess-backed tool adapters and the tools file that declares them.
//!
//! Each tool is a program plus an argument template. `{target}` and any
//! `{option}` placeholder in the arguments are substituted at run time; the
//! program is spawned directly (no shell), so targets are never interpreted.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterRegistry, ToolAdapter, ToolOptions, ToolOutput};
use crate::error::{ToolExecutionError, ToolsFileError};

// ── CommandAdapter ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CommandAdapter {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandAdapter {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }

    pub fn from_spec(name: &str, spec: &ToolSpec) -> Self {
        Self::new(name, spec.program.clone(), spec.args.clone())
    }

    fn render_args(&self, target: &str, options: &ToolOptions) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                let mut rendered = arg.replace("{target}", target);
                for (key, value) in options {
                    rendered = rendered.replace(&format!("{{{key}}}"), value);
                }
                rendered
            })
            .collect()
    }
}

#[async_trait]
impl ToolAdapter for CommandAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        target: &str,
        options: &ToolOptions,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolExecutionError> {
        let args = self.render_args(target, options);
        let command = std::iter::once(self.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        debug!(
            tool = %self.name,
            command = %command,
            timeout_secs = timeout.as_secs(),
            "spawning tool process"
        );

        let start = Instant::now();
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ToolExecutionError::NotInstalled(self.program.clone())
                }
                _ => ToolExecutionError::Failed(format!("failed to spawn {}: {e}", self.program)),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolExecutionError::Failed(format!(
                    "{} execution error: {e}",
                    self.program
                )));
            }
            Err(_) => {
                warn!(tool = %self.name, timeout_secs = timeout.as_secs(), "tool timed out");
                return Err(ToolExecutionError::Timeout {
                    tool: self.name.clone(),
                    timeout,
                });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            debug!(tool = %self.name, exit_code = exit_code, "tool returned non-zero exit code");
        }

        Ok(ToolOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
            command,
        })
    }
}

// ── Tools file ──────────────────────────────────────────────────────

/// One entry of the tools file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Overrides the worker's default timeout for this tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsFile {
    #[serde(default)]
    pub tools: BTreeMap<String, ToolSpec>,
}

impl ToolsFile {
    pub fn load(path: &Path) -> Result<Self, ToolsFileError> {
        let contents = fs::read_to_string(path).map_err(|source| ToolsFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = Self::parse(&contents)?;
        info!(path = %path.display(), tools = file.tools.len(), "loaded tools file");
        Ok(file)
    }

    pub fn parse(contents: &str) -> Result<Self, ToolsFileError> {
        let file: ToolsFile = serde_yaml::from_str(contents)?;
        for (name, spec) in &file.tools {
            if name.trim().is_empty() {
                return Err(ToolsFileError::Invalid("tool names must not be empty".to_string()));
            }
            if spec.program.trim().is_empty() {
                return Err(ToolsFileError::Invalid(format!(
                    "tool '{name}' has an empty program"
                )));
            }
            if spec.timeout_secs == Some(0) {
                return Err(ToolsFileError::Invalid(format!(
                    "tool '{name}' timeout_secs must be at least 1"
                )));
            }
        }
        Ok(file)
    }

    /// One [`CommandAdapter`] per declared tool.
    pub fn adapters(&self) -> Result<AdapterRegistry, ToolsFileError> {
        let mut registry = AdapterRegistry::new();
        for (name, spec) in &self.tools {
            registry.register(CommandAdapter::from_spec(name, spec))?;
        }
        Ok(registry)
    }

    /// Per-tool timeout overrides, keyed by lowercase tool name.
    pub fn timeouts(&self) -> HashMap<String, Duration> {
        self.tools
            .iter()
            .filter_map(|(name, spec)| {
                spec.timeout_secs
                    .map(|secs| (name.to_ascii_lowercase(), Duration::from_secs(secs)))
            })
            .collect()
    }
}
