//! Bounded sets of active job and tool ids.
//!
//! Both pools share one lock. Every acquire is a single check-and-insert so
//! two racing callers can never both take the last slot.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Default)]
struct ActiveSets {
    jobs: HashSet<String>,
    /// Active tool slot id -> tool name.
    tools: HashMap<String, String>,
    /// Cumulative successful tool starts per tool name.
    invocations: HashMap<String, u64>,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCounts {
    pub jobs: usize,
    pub tools: usize,
}

#[derive(Debug)]
pub struct ConcurrencyTracker {
    max_jobs: usize,
    max_tools: usize,
    enabled: bool,
    state: Mutex<ActiveSets>,
}

impl ConcurrencyTracker {
    /// With `enabled = false` the maxima are ignored but ids are still tracked.
    pub fn new(max_jobs: usize, max_tools: usize, enabled: bool) -> Self {
        Self {
            max_jobs,
            max_tools,
            enabled,
            state: Mutex::new(ActiveSets::default()),
        }
    }

    pub fn max_jobs(&self) -> usize {
        self.max_jobs
    }

    pub fn max_tools(&self) -> usize {
        self.max_tools
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn state(&self) -> MutexGuard<'_, ActiveSets> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a job slot. Fails without side effects when the pool is full
    /// or `id` already holds a slot.
    pub fn try_acquire_job(&self, id: &str) -> bool {
        let mut state = self.state();
        if state.jobs.contains(id) {
            return false;
        }
        if self.enabled && state.jobs.len() >= self.max_jobs {
            return false;
        }
        state.jobs.insert(id.to_string());
        true
    }

    /// Free a job slot. Returns whether a slot was held; repeated calls are no-ops.
    pub fn release_job(&self, id: &str) -> bool {
        self.state().jobs.remove(id)
    }

    /// Reserve a tool slot for the tool run `id` executing `name`.
    pub fn try_acquire_tool(&self, id: &str, name: &str) -> bool {
        let mut state = self.state();
        if state.tools.contains_key(id) {
            return false;
        }
        if self.enabled && state.tools.len() >= self.max_tools {
            return false;
        }
        state.tools.insert(id.to_string(), name.to_string());
        *state.invocations.entry(name.to_string()).or_insert(0) += 1;
        true
    }

    pub fn release_tool(&self, id: &str) -> bool {
        self.state().tools.remove(id).is_some()
    }

    pub fn counts(&self) -> ActiveCounts {
        let state = self.state();
        ActiveCounts {
            jobs: state.jobs.len(),
            tools: state.tools.len(),
        }
    }

    /// Whether one more job would currently fit. Advisory only: it reserves nothing.
    pub fn has_job_capacity(&self) -> bool {
        !self.enabled || self.state().jobs.len() < self.max_jobs
    }

    pub fn invocations(&self) -> HashMap<String, u64> {
        self.state().invocations.clone()
    }

    /// Number of slots currently held by runs of tool `name`.
    pub fn active_for_tool(&self, name: &str) -> usize {
        self.state().tools.values().filter(|n| *n == name).count()
    }
}

// ── Scoped slots ────────────────────────────────────────────────────

/// A held job slot, released on drop.
#[derive(Debug)]
pub struct JobSlot {
    tracker: Arc<ConcurrencyTracker>,
    id: String,
}

impl JobSlot {
    pub fn acquire(tracker: &Arc<ConcurrencyTracker>, id: &str) -> Option<Self> {
        tracker.try_acquire_job(id).then(|| Self {
            tracker: Arc::clone(tracker),
            id: id.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        if self.tracker.release_job(&self.id) {
            debug!(job_id = %self.id, "released job slot");
        }
    }
}

/// A held tool slot, released on drop.
#[derive(Debug)]
pub struct ToolSlot {
    tracker: Arc<ConcurrencyTracker>,
    id: String,
    tool: String,
}

impl ToolSlot {
    pub fn acquire(tracker: &Arc<ConcurrencyTracker>, id: &str, tool: &str) -> Option<Self> {
        tracker.try_acquire_tool(id, tool).then(|| Self {
            tracker: Arc::clone(tracker),
            id: id.to_string(),
            tool: tool.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }
}

impl Drop for ToolSlot {
    fn drop(&mut self) {
        if self.tracker.release_tool(&self.id) {
            debug!(tool_run_id = %self.id, tool = %self.tool, "released tool slot");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn job_pool_bounded() {
        let tracker = ConcurrencyTracker::new(3, 10, true);
        assert!(tracker.try_acquire_job("j1"));
        assert!(tracker.try_acquire_job("j2"));
        assert!(tracker.try_acquire_job("j3"));
        assert!(!tracker.try_acquire_job("j4"));
        assert_eq!(tracker.counts().jobs, 3);

        assert!(tracker.release_job("j2"));
        assert!(tracker.try_acquire_job("j4"));
        assert!(!tracker.try_acquire_job("j5"));
    }

    #[test]
    fn release_is_idempotent() {
        let tracker = ConcurrencyTracker::new(1, 1, true);
        assert!(tracker.try_acquire_tool("t1", "nmap"));
        assert!(tracker.release_tool("t1"));
        assert!(!tracker.release_tool("t1"));
        assert!(!tracker.release_job("never-held"));
        assert_eq!(tracker.counts(), ActiveCounts { jobs: 0, tools: 0 });
    }

    #[test]
    fn duplicate_id_rejected() {
        let tracker = ConcurrencyTracker::new(5, 5, true);
        assert!(tracker.try_acquire_job("j1"));
        assert!(!tracker.try_acquire_job("j1"));
        assert_eq!(tracker.counts().jobs, 1);
    }

    #[test]
    fn disabled_tracker_has_no_maximum() {
        let tracker = ConcurrencyTracker::new(1, 1, false);
        assert!(tracker.try_acquire_job("a"));
        assert!(tracker.try_acquire_job("b"));
        assert!(tracker.has_job_capacity());
        assert_eq!(tracker.counts().jobs, 2);
    }

    #[test]
    fn invocations_count_successful_starts() {
        let tracker = ConcurrencyTracker::new(5, 1, true);
        assert!(tracker.try_acquire_tool("r1", "nmap"));
        assert!(!tracker.try_acquire_tool("r2", "nmap"));
        assert_eq!(tracker.active_for_tool("nmap"), 1);
        tracker.release_tool("r1");
        assert!(tracker.try_acquire_tool("r2", "nmap"));
        assert_eq!(tracker.invocations()["nmap"], 2);
    }

    #[test]
    fn slot_guard_releases_on_drop() {
        let tracker = Arc::new(ConcurrencyTracker::new(1, 1, true));
        {
            let slot = JobSlot::acquire(&tracker, "job").expect("slot");
            assert_eq!(slot.id(), "job");
            assert!(JobSlot::acquire(&tracker, "other").is_none());
        }
        assert_eq!(tracker.counts().jobs, 0);

        let tool = ToolSlot::acquire(&tracker, "run", "nikto").expect("slot");
        assert_eq!(tracker.counts().tools, 1);
        drop(tool);
        assert_eq!(tracker.counts().tools, 0);
    }

    #[test]
    fn slot_released_when_holder_panics() {
        let tracker = Arc::new(ConcurrencyTracker::new(1, 1, true));
        let t = Arc::clone(&tracker);
        let result = thread::spawn(move || {
            let _slot = ToolSlot::acquire(&t, "run", "nmap").expect("slot");
            panic!("tool blew up");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(tracker.counts().tools, 0);
    }

    #[test]
    fn racing_acquires_respect_maximum() {
        let tracker = Arc::new(ConcurrencyTracker::new(4, 4, true));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || tracker.try_acquire_job(&format!("job-{i}")))
            })
            .collect();
        let won = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(won, 4);
        assert_eq!(tracker.counts().jobs, 4);
    }
}
