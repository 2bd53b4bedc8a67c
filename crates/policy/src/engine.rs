//! The policy engine: admission checks plus runtime rate and slot gating.
//!
//! Construct one [`PolicyEngine`] per process and share it (behind an `Arc`)
//! with every worker and scheduler. Its runtime state (active ids, token
//! count, per-tool counters) lives only in memory and resets on restart.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::concurrency::{ConcurrencyTracker, JobSlot, ToolSlot};
use crate::error::{ConfigError, PolicyViolation, Violation, ViolationKind};
use crate::loader::load_policy;
use crate::network::{NetworkDecision, NetworkPolicy};
use crate::rate_limit::RateLimiter;
use crate::roe::{RiskLevel, RulesOfEngagement, ToolPolicy};
use crate::tools::ToolPolicyRegistry;

// ── Result types ────────────────────────────────────────────────────

/// A job submission that passed every rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub target: String,
    pub tools: Vec<String>,
    /// Why the network check let the target through.
    pub network_reason: String,
    /// Non-blocking notes, e.g. high-risk tools.
    pub warnings: Vec<String>,
    /// Tools whose policy asks for operator approval.
    pub approval_required: Vec<String>,
}

/// Outcome of [`PolicyEngine::acquire_rate_limit`]. Not an error: a denied
/// caller retries after `wait`, unless [`exceeds_burst`](Self::exceeds_burst).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub acquired: bool,
    pub wait: Duration,
}

impl RateDecision {
    /// The request asked for more tokens than the bucket holds; retrying
    /// cannot succeed.
    pub fn exceeds_burst(&self) -> bool {
        !self.acquired && self.wait == Duration::MAX
    }
}

/// Point-in-time view of the engine's runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub policy: String,
    pub active_jobs: usize,
    pub active_tools: usize,
    pub max_parallel_jobs: usize,
    pub max_parallel_tools: usize,
    pub concurrency_enabled: bool,
    pub rate_limit_enabled: bool,
    pub tokens_available: Option<f64>,
    pub tool_invocations: HashMap<String, u64>,
}

// ── Engine ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct PolicyEngine {
    rules: RulesOfEngagement,
    network: NetworkPolicy,
    tools: ToolPolicyRegistry,
    /// `None` when rate limiting is disabled.
    rate_limiter: Option<RateLimiter>,
    tracker: Arc<ConcurrencyTracker>,
}

impl PolicyEngine {
    /// Build an engine from a policy document. Refuses invalid documents.
    pub fn new(rules: RulesOfEngagement) -> Result<Self, ConfigError> {
        rules.validate()?;

        let network = NetworkPolicy::from_config(&rules.network)?;
        let tools = ToolPolicyRegistry::from_rules(&rules);
        let rate_limiter = rules
            .rate_limit
            .enabled
            .then(|| RateLimiter::new(rules.rate_limit.rps, rules.rate_limit.burst));
        let tracker = Arc::new(ConcurrencyTracker::new(
            rules.concurrency.max_parallel_jobs,
            rules.concurrency.max_parallel_tools,
            rules.concurrency.enabled,
        ));

        info!(
            policy = %rules.name,
            rps = rules.rate_limit.rps,
            burst = rules.rate_limit.burst,
            max_jobs = rules.concurrency.max_parallel_jobs,
            max_tools = rules.concurrency.max_parallel_tools,
            "policy engine initialised"
        );

        Ok(Self {
            rules,
            network,
            tools,
            rate_limiter,
            tracker,
        })
    }

    /// Load a policy file and build an engine from it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::new(load_policy(path)?)
    }

    pub fn rules(&self) -> &RulesOfEngagement {
        &self.rules
    }

    pub fn is_target_allowed(&self, target: &str) -> NetworkDecision {
        self.network.is_target_allowed(target)
    }

    pub fn is_tool_allowed(&self, name: &str) -> bool {
        self.tools.is_tool_allowed(name)
    }

    pub fn get_tool_policy(&self, name: &str) -> ToolPolicy {
        self.tools.get_policy(name)
    }

    /// Pre-flight admission check for a job.
    ///
    /// Runs the network check, every per-tool check and a job-capacity check,
    /// and reports all violated rules together. Reserves nothing.
    pub fn validate_job<S: AsRef<str>>(
        &self,
        target: &str,
        tools: &[S],
    ) -> Result<ValidationResult, PolicyViolation> {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        let mut approval_required = Vec::new();

        let network = self.network.is_target_allowed(target);
        if !network.allowed {
            violations.push(Violation {
                kind: ViolationKind::Network,
                subject: target.to_string(),
                message: network.reason.clone(),
            });
        }

        if tools.is_empty() {
            violations.push(Violation {
                kind: ViolationKind::Tool,
                subject: String::new(),
                message: "job requests no tools".to_string(),
            });
        }

        for tool in tools.iter().map(AsRef::as_ref) {
            if !self.tools.is_tool_allowed(tool) {
                let message = if self.tools.is_high_risk(tool) {
                    format!("tool '{tool}' is high risk and not enabled by policy")
                } else {
                    format!("tool '{tool}' is not allowed by policy")
                };
                violations.push(Violation {
                    kind: ViolationKind::Tool,
                    subject: tool.to_string(),
                    message,
                });
                continue;
            }

            let policy = self.tools.get_policy(tool);
            if policy.risk_level >= RiskLevel::High {
                warnings.push(format!("tool '{tool}' is {} risk", policy.risk_level));
            }
            if policy.requires_approval {
                warnings.push(format!("tool '{tool}' requires approval"));
                approval_required.push(tool.to_string());
            }
        }

        if !self.tracker.has_job_capacity() {
            violations.push(Violation {
                kind: ViolationKind::Concurrency,
                subject: target.to_string(),
                message: format!(
                    "maximum parallel jobs reached ({})",
                    self.tracker.max_jobs()
                ),
            });
        }

        if !violations.is_empty() {
            let err = PolicyViolation { violations };
            warn!(target = %target, error = %err, "job rejected by policy");
            return Err(err);
        }

        Ok(ValidationResult {
            target: target.to_string(),
            tools: tools.iter().map(|t| t.as_ref().to_string()).collect(),
            network_reason: network.reason,
            warnings,
            approval_required,
        })
    }

    /// Try to take `n` rate-limit tokens. Always succeeds when rate limiting
    /// is disabled. `n` above the configured burst is refused outright with
    /// `wait == Duration::MAX`.
    pub fn acquire_rate_limit(&self, n: u32) -> RateDecision {
        let Some(limiter) = &self.rate_limiter else {
            return RateDecision {
                acquired: true,
                wait: Duration::ZERO,
            };
        };
        match limiter.try_acquire_at(n, std::time::Instant::now()) {
            Ok(()) => RateDecision {
                acquired: true,
                wait: Duration::ZERO,
            },
            Err(wait) if wait == Duration::MAX => {
                warn!(tokens = n, burst = limiter.burst(), "rate limit request exceeds burst");
                RateDecision {
                    acquired: false,
                    wait,
                }
            }
            Err(wait) => {
                debug!(tokens = n, wait_ms = wait.as_millis() as u64, "rate limit exceeded");
                RateDecision {
                    acquired: false,
                    wait,
                }
            }
        }
    }

    // ── Slot registration ───────────────────────────────────────────

    /// Reserve a job slot. `false` means the pool is full; retry later.
    pub fn register_job_start(&self, job_id: &str) -> bool {
        let ok = self.tracker.try_acquire_job(job_id);
        if ok {
            debug!(job_id = %job_id, "job slot acquired");
        }
        ok
    }

    pub fn register_job_end(&self, job_id: &str) {
        if self.tracker.release_job(job_id) {
            debug!(job_id = %job_id, "job slot released");
        }
    }

    /// Reserve a tool slot. `false` means the pool is full; retry later.
    pub fn register_tool_start(&self, tool_run_id: &str, tool: &str) -> bool {
        let ok = self.tracker.try_acquire_tool(tool_run_id, tool);
        if ok {
            debug!(tool_run_id = %tool_run_id, tool = %tool, "tool slot acquired");
        }
        ok
    }

    pub fn register_tool_end(&self, tool_run_id: &str, tool: &str) {
        if self.tracker.release_tool(tool_run_id) {
            debug!(tool_run_id = %tool_run_id, tool = %tool, "tool slot released");
        }
    }

    /// Scoped form of [`register_job_start`](Self::register_job_start): the
    /// slot is released when the returned guard drops.
    pub fn try_job_slot(&self, job_id: &str) -> Option<JobSlot> {
        JobSlot::acquire(&self.tracker, job_id)
    }

    /// Scoped form of [`register_tool_start`](Self::register_tool_start).
    pub fn try_tool_slot(&self, tool_run_id: &str, tool: &str) -> Option<ToolSlot> {
        ToolSlot::acquire(&self.tracker, tool_run_id, tool)
    }

    pub fn status(&self) -> EngineStatus {
        let counts = self.tracker.counts();
        EngineStatus {
            policy: self.rules.name.clone(),
            active_jobs: counts.jobs,
            active_tools: counts.tools,
            max_parallel_jobs: self.tracker.max_jobs(),
            max_parallel_tools: self.tracker.max_tools(),
            concurrency_enabled: self.tracker.is_enabled(),
            rate_limit_enabled: self.rate_limiter.is_some(),
            tokens_available: self.rate_limiter.as_ref().map(RateLimiter::available),
            tool_invocations: self.tracker.invocations(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(yaml: &str) -> PolicyEngine {
        let rules: RulesOfEngagement = serde_yaml::from_str(yaml).unwrap();
        PolicyEngine::new(rules).unwrap()
    }

    #[test]
    fn invalid_policy_refuses_to_start() {
        let mut rules = RulesOfEngagement::default();
        rules.network.allow = vec!["300.0.0.0/8".to_string()];
        assert!(matches!(
            PolicyEngine::new(rules),
            Err(ConfigError::InvalidCidr { .. })
        ));
    }

    #[test]
    fn single_disallowed_tool_named_alone() {
        let e = engine("high_risk_tools: [sqlmap]\n");
        let err = e.validate_job("192.168.1.10", &["nmap", "sqlmap"]).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        let v = &err.violations[0];
        assert_eq!(v.kind, ViolationKind::Tool);
        assert_eq!(v.subject, "sqlmap");
        assert!(err.to_string().contains("sqlmap"));
        assert!(!err.to_string().contains("nmap"));
    }

    #[test]
    fn every_violation_aggregated() {
        let e = engine(
            r#"
network:
  deny: ["10.0.0.0/8"]
high_risk_tools: [sqlmap, hydra]
"#,
        );
        let err = e
            .validate_job("10.9.9.9", &["sqlmap", "hydra", "nmap"])
            .unwrap_err();
        assert_eq!(err.violations.len(), 3);
        assert_eq!(err.of_kind(ViolationKind::Network).count(), 1);
        assert_eq!(err.of_kind(ViolationKind::Tool).count(), 2);
    }

    #[test]
    fn high_risk_and_approval_warnings() {
        let e = engine(
            r#"
tool_policies:
  sqlmap:
    risk_level: high
    requires_approval: true
  nmap:
    risk_level: low
"#,
        );
        let result = e.validate_job("scanme.example.org", &["nmap", "sqlmap"]).unwrap();
        assert_eq!(result.approval_required, vec!["sqlmap".to_string()]);
        assert!(result.warnings.iter().any(|w| w == "tool 'sqlmap' is HIGH risk"));
        assert!(!result.warnings.iter().any(|w| w.contains("nmap")));
    }

    #[test]
    fn empty_tool_list_rejected() {
        let e = engine("{}");
        let empty: [&str; 0] = [];
        let err = e.validate_job("192.168.1.1", &empty).unwrap_err();
        assert_eq!(err.violations[0].kind, ViolationKind::Tool);
    }

    #[test]
    fn validate_reserves_nothing() {
        let e = engine("concurrency:\n  max_parallel_jobs: 1\n");
        for _ in 0..3 {
            e.validate_job("192.168.1.1", &["nmap"]).unwrap();
        }
        assert_eq!(e.status().active_jobs, 0);
    }

    #[test]
    fn full_job_pool_reported_as_capacity() {
        let e = engine("concurrency:\n  max_parallel_jobs: 1\n");
        assert!(e.register_job_start("busy"));
        let err = e.validate_job("192.168.1.1", &["nmap"]).unwrap_err();
        assert!(err.is_capacity_only());

        e.register_job_end("busy");
        assert!(e.validate_job("192.168.1.1", &["nmap"]).is_ok());
    }

    #[test]
    fn disabled_rate_limit_always_acquires() {
        let e = engine("rate_limit:\n  enabled: false\n  rps: 0\n");
        for _ in 0..100 {
            let d = e.acquire_rate_limit(1);
            assert!(d.acquired);
            assert_eq!(d.wait, Duration::ZERO);
        }
        assert!(!e.status().rate_limit_enabled);
    }

    #[test]
    fn rate_limit_reports_wait() {
        let e = engine("rate_limit:\n  rps: 1\n  burst: 2\n");
        assert!(e.acquire_rate_limit(1).acquired);
        assert!(e.acquire_rate_limit(1).acquired);
        let denied = e.acquire_rate_limit(1);
        assert!(!denied.acquired);
        assert!(denied.wait > Duration::ZERO);
        assert!(denied.wait <= Duration::from_secs(1));
    }

    #[test]
    fn rate_limit_request_above_burst_refused() {
        let e = engine("rate_limit:\n  rps: 5\n  burst: 2\n");
        let d = e.acquire_rate_limit(3);
        assert!(!d.acquired);
        assert!(d.exceeds_burst());
        assert!(e.acquire_rate_limit(2).acquired);

        let empty = e.acquire_rate_limit(1);
        assert!(!empty.acquired);
        assert!(!empty.exceeds_burst());
    }

    #[test]
    fn register_start_end_pairs() {
        let e = engine("concurrency:\n  max_parallel_tools: 1\n");
        assert!(e.register_tool_start("run-1", "nmap"));
        assert!(!e.register_tool_start("run-2", "nmap"));
        e.register_tool_end("run-1", "nmap");
        e.register_tool_end("run-1", "nmap");
        assert!(e.register_tool_start("run-2", "nmap"));

        let status = e.status();
        assert_eq!(status.active_tools, 1);
        assert_eq!(status.tool_invocations["nmap"], 2);
    }

    #[test]
    fn scoped_slots_release() {
        let e = engine("concurrency:\n  max_parallel_jobs: 1\n  max_parallel_tools: 1\n");
        {
            let _job = e.try_job_slot("job").unwrap();
            let _tool = e.try_tool_slot("run", "nmap").unwrap();
            assert!(e.try_job_slot("job-2").is_none());
            assert!(e.try_tool_slot("run-2", "nmap").is_none());
        }
        let status = e.status();
        assert_eq!((status.active_jobs, status.active_tools), (0, 0));
    }
}
