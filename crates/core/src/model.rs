//! Scan data model: targets, jobs, tool runs and normalized findings.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Anything stored in a [`Repository`](crate::Repository).
pub trait Entity: Clone + Send + Sync + 'static {
    /// Human-readable kind used in store errors ("ScanJob", "ToolRun", ...).
    const KIND: &'static str;

    fn id(&self) -> Uuid;
}

// ── Target ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Ip,
    Cidr,
    Domain,
    Url,
}

impl TargetType {
    /// Infer the type of a raw target value.
    pub fn infer(value: &str) -> Self {
        let value = value.trim();
        if value.parse::<IpAddr>().is_ok() {
            return TargetType::Ip;
        }
        if let Some((addr, prefix)) = value.split_once('/') {
            if addr.parse::<IpAddr>().is_ok() && prefix.parse::<u8>().is_ok() {
                return TargetType::Cidr;
            }
        }
        if value.starts_with("http://") || value.starts_with("https://") {
            return TargetType::Url;
        }
        TargetType::Domain
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Ip => write!(f, "ip"),
            TargetType::Cidr => write!(f, "cidr"),
            TargetType::Domain => write!(f, "domain"),
            TargetType::Url => write!(f, "url"),
        }
    }
}

/// Something that can be scanned. Owned by the target repository; jobs only
/// reference it by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub value: String,
    pub target_type: TargetType,
    /// Free-form engagement scope label (e.g. "external", "lab").
    pub scope: String,
    pub created_at: DateTime<Utc>,
}

impl Target {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into().trim().to_string();
        Self {
            id: Uuid::new_v4(),
            target_type: TargetType::infer(&value),
            value,
            scope: "default".to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }
}

impl Entity for Target {
    const KIND: &'static str = "Target";

    fn id(&self) -> Uuid {
        self.id
    }
}

// ── ScanJob ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A unit of work: one or more tools run against a single target.
///
/// Created `pending` by the scheduler or an API caller; only the worker
/// mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub target_id: Uuid,
    pub tools: Vec<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ScanJob {
    pub fn new(target_id: Uuid, tools: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id,
            tools,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Entity for ScanJob {
    const KIND: &'static str = "ScanJob";

    fn id(&self) -> Uuid {
        self.id
    }
}

// ── ToolRun ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ToolRunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ToolRunStatus::Completed | ToolRunStatus::Failed | ToolRunStatus::Cancelled
        )
    }
}

impl fmt::Display for ToolRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolRunStatus::Pending => "pending",
            ToolRunStatus::Running => "running",
            ToolRunStatus::Completed => "completed",
            ToolRunStatus::Failed => "failed",
            ToolRunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One execution of one tool against the job's target. Retries get a fresh
/// `ToolRun` with `attempt` incremented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub tool_name: String,
    pub target: String,
    pub status: ToolRunStatus,
    pub attempt: u32,
    /// The failed run this one retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<Uuid>,
    pub command: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock runtime in seconds.
    pub duration: Option<f64>,
}

impl ToolRun {
    pub fn new(job_id: Uuid, tool_name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            tool_name: tool_name.into(),
            target: target.into(),
            status: ToolRunStatus::Pending,
            attempt: 1,
            retry_of: None,
            command: None,
            stdout: None,
            stderr: None,
            exit_code: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            duration: None,
        }
    }

    /// A fresh pending run for the same tool, used when retrying.
    pub fn retry_of(previous: &ToolRun) -> Self {
        let mut run = ToolRun::new(previous.job_id, &previous.tool_name, &previous.target);
        run.attempt = previous.attempt + 1;
        run.retry_of = Some(previous.id);
        run
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Entity for ToolRun {
    const KIND: &'static str = "ToolRun";

    fn id(&self) -> Uuid {
        self.id
    }
}

// ── Finding ─────────────────────────────────────────────────────────

/// A normalized result extracted from a tool's raw output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub tool_run_id: Uuid,
    pub title: String,
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Finding {
    pub fn new(tool_run_id: Uuid, title: impl Into<String>, severity: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_run_id,
            title: title.into(),
            severity: severity.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl Entity for Finding {
    const KIND: &'static str = "Finding";

    fn id(&self) -> Uuid {
        self.id
    }
}
