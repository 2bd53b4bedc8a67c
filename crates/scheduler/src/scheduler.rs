//! [`Scheduler`]: recurring and cron scan schedules.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cron::{parse_cron, CronFields};
use crate::entry::{Frequency, ScheduleEntry};
use crate::error::{SchedulerError, SubmitError};
use crate::submitter::JobSubmitter;

/// A job created by a due schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredSchedule {
    pub schedule: String,
    pub job_id: Uuid,
}

/// Holds schedule entries and submits a new job each time one comes due.
///
/// Call [`tick_at`](Scheduler::tick_at) from a loop (or use
/// [`run`](Scheduler::run)). Every firing creates a fresh ScanJob through the
/// [`JobSubmitter`], so scheduled work goes through the same policy
/// admission as any other job.
pub struct Scheduler {
    submitter: Arc<dyn JobSubmitter>,
    entries: Mutex<BTreeMap<String, ScheduleEntry>>,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(submitter: impl JobSubmitter + 'static) -> Self {
        Self {
            submitter: Arc::new(submitter),
            entries: Mutex::new(BTreeMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, ScheduleEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Registration ────────────────────────────────────────────────

    /// Fire every `interval`, starting one interval from now.
    pub fn schedule_recurring(
        &self,
        target_id: Uuid,
        tools: Vec<String>,
        interval: Duration,
        name: Option<&str>,
    ) -> Result<ScheduleEntry, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval("0s".to_string()));
        }
        self.insert(name, "recurring", target_id, tools, Frequency::Interval(interval))
    }

    /// Fire on a cron schedule. Unset fields of `fields` match everything.
    pub fn schedule_cron(
        &self,
        target_id: Uuid,
        tools: Vec<String>,
        fields: &CronFields,
        name: Option<&str>,
    ) -> Result<ScheduleEntry, SchedulerError> {
        let (expression, schedule) = parse_cron(&fields.to_string())?;
        self.insert(
            name,
            "cron",
            target_id,
            tools,
            Frequency::Cron {
                expression,
                schedule,
            },
        )
    }

    fn insert(
        &self,
        name: Option<&str>,
        kind: &str,
        target_id: Uuid,
        tools: Vec<String>,
        frequency: Frequency,
    ) -> Result<ScheduleEntry, SchedulerError> {
        let name = match name.map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => generated_name(kind),
        };
        if tools.is_empty() {
            return Err(SchedulerError::EmptyTools(name));
        }

        let entry = ScheduleEntry::new(name.clone(), target_id, tools, frequency, Utc::now());
        let mut entries = self.entries();
        if entries.contains_key(&name) {
            return Err(SchedulerError::DuplicateName(name));
        }
        entries.insert(name.clone(), entry.clone());
        info!(
            schedule = %name,
            target_id = %target_id,
            frequency = %entry.frequency.describe(),
            next_run = ?entry.next_run,
            "schedule added"
        );
        Ok(entry)
    }

    /// Remove a schedule. Returns `false` if no schedule had that name.
    pub fn unschedule(&self, name: &str) -> bool {
        let removed = self.entries().remove(name).is_some();
        if removed {
            info!(schedule = %name, "schedule removed");
        }
        removed
    }

    /// All schedules, ordered by name.
    pub fn list_schedules(&self) -> Vec<ScheduleEntry> {
        self.entries().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<ScheduleEntry> {
        self.entries().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    // ── Firing ──────────────────────────────────────────────────────

    /// Names of the schedules due at `now`.
    pub fn due_entries(&self, now: DateTime<Utc>) -> Vec<String> {
        self.entries()
            .values()
            .filter(|e| e.is_due(now))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Submit a job for every schedule due at `now`.
    ///
    /// A due schedule is advanced even if its submission fails, so a missing
    /// target does not re-fire on every tick; the schedule itself is kept.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<FiredSchedule> {
        let due: Vec<(String, Uuid, Vec<String>)> = self
            .entries()
            .values()
            .filter(|e| e.is_due(now))
            .map(|e| (e.name.clone(), e.target_id, e.tools.clone()))
            .collect();

        let mut fired = Vec::new();
        for (name, target_id, tools) in due {
            match self.submitter.submit(target_id, tools).await {
                Ok(job_id) => {
                    info!(schedule = %name, job_id = %job_id, "schedule fired");
                    fired.push(FiredSchedule {
                        schedule: name.clone(),
                        job_id,
                    });
                }
                Err(SubmitError::TargetNotFound(id)) => {
                    warn!(
                        schedule = %name,
                        target_id = %id,
                        "scheduled target no longer exists, skipping"
                    );
                }
                Err(e) => {
                    error!(schedule = %name, error = %e, "scheduled job submission failed");
                }
            }

            if let Some(entry) = self.entries().get_mut(&name) {
                entry.record_run(now);
            }
        }
        fired
    }

    pub async fn tick(&self) -> Vec<FiredSchedule> {
        self.tick_at(Utc::now()).await
    }

    /// Submit a job for `name` immediately, outside its schedule. Does not
    /// move `next_run`.
    pub async fn run_now(&self, name: &str) -> Result<Uuid, SchedulerError> {
        let (target_id, tools) = self
            .entries()
            .get(name)
            .map(|e| (e.target_id, e.tools.clone()))
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;
        let job_id = self.submitter.submit(target_id, tools).await?;
        info!(schedule = %name, job_id = %job_id, "schedule triggered manually");
        Ok(job_id)
    }

    // ── Loop ────────────────────────────────────────────────────────

    /// Signal [`run`](Self::run) to stop after the current tick.
    pub fn shutdown(&self) {
        info!("scheduler shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Get an Arc to the shutdown flag (for external shutdown signaling).
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Tick every `interval` until shutdown is signalled.
    pub async fn run(&self, interval: Duration) {
        info!(
            schedules = self.len(),
            tick_ms = interval.as_millis() as u64,
            "scheduler started"
        );
        while !self.shutdown.load(Ordering::Relaxed) {
            let fired = self.tick().await;
            if !fired.is_empty() {
                debug!(jobs = fired.len(), "scheduler tick submitted jobs");
            }
            tokio::time::sleep(interval).await;
        }
        info!("scheduler stopped");
    }
}

fn generated_name(kind: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{kind}-{}", &id[..8])
}
