//! Per-schedule entry type.

use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use uuid::Uuid;

use crate::cron::is_cron_due;

/// How often a schedule fires.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Fixed period, first firing one period after creation.
    Interval(Duration),
    /// Normalized 6-field cron expression.
    Cron {
        expression: String,
        #[serde(skip)]
        schedule: Schedule,
    },
}

impl Frequency {
    /// The first firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Frequency::Interval(every) => chrono::Duration::from_std(*every)
                .ok()
                .and_then(|d| after.checked_add_signed(d)),
            Frequency::Cron { schedule, .. } => schedule.after(&after).next(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Frequency::Interval(every) => format!("every {}s", every.as_secs()),
            Frequency::Cron { expression, .. } => format!("cron '{expression}'"),
        }
    }
}

/// A recurring scan: which target, which tools, how often.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleEntry {
    pub name: String,
    pub target_id: Uuid,
    pub tools: Vec<String>,
    pub frequency: Frequency,
    pub created_at: DateTime<Utc>,
    /// When the schedule last fired.
    pub last_run: Option<DateTime<Utc>>,
    /// When the schedule fires next.
    pub next_run: Option<DateTime<Utc>>,
    /// Jobs submitted so far.
    pub run_count: u64,
}

impl ScheduleEntry {
    pub(crate) fn new(
        name: String,
        target_id: Uuid,
        tools: Vec<String>,
        frequency: Frequency,
        now: DateTime<Utc>,
    ) -> Self {
        let next_run = frequency.next_after(now);
        Self {
            name,
            target_id,
            tools,
            frequency,
            created_at: now,
            last_run: None,
            next_run,
            run_count: 0,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match &self.frequency {
            Frequency::Interval(_) => self.next_run.is_some_and(|next| next <= now),
            Frequency::Cron { schedule, .. } => {
                is_cron_due(schedule, now, self.last_run.unwrap_or(self.created_at))
            }
        }
    }

    pub(crate) fn record_run(&mut self, at: DateTime<Utc>) {
        self.last_run = Some(at);
        self.next_run = self.frequency.next_after(at);
        self.run_count += 1;
    }
}
