//! Rules of Engagement enforcement for reconnaissance scans.
//!
//! This crate provides:
//! - The policy document schema with YAML/JSON loading and validation
//! - CIDR allow/deny evaluation of scan targets
//! - Per-tool allow lists and risk levels
//! - A token-bucket rate limiter for tool invocations
//! - Bounded job and tool slot pools with scoped guards
//! - [`PolicyEngine`], which combines all of the above

pub mod concurrency;
pub mod engine;
pub mod error;
pub mod loader;
pub mod network;
pub mod rate_limit;
pub mod roe;
pub mod tools;

pub use concurrency::{ActiveCounts, ConcurrencyTracker, JobSlot, ToolSlot};
pub use engine::{EngineStatus, PolicyEngine, RateDecision, ValidationResult};
pub use error::{ConfigError, PolicyError, PolicyViolation, Violation, ViolationKind};
pub use loader::{load_policy, parse_policy, render_policy, PolicyFormat};
pub use network::{NetworkDecision, NetworkPolicy};
pub use rate_limit::RateLimiter;
pub use roe::{RiskLevel, RulesOfEngagement, ToolPolicy};
