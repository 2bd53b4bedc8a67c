//! Recurring scan scheduling.
//!
//! Schedules fire on a fixed interval or a cron expression. Each firing
//! creates a new ScanJob for an existing Target and submits it through a
//! [`JobSubmitter`], normally the worker's `JobLifecycleManager`, so the
//! policy engine still decides whether anything runs.

pub mod cron;
mod entry;
pub mod error;
pub mod file;
mod scheduler;
mod submitter;


pub use self::scheduler::{FiredSchedule, Scheduler};
pub use self::cron::{normalize_cron, parse_interval, CronFields};
pub use self::entry::{Frequency, ScheduleEntry};
pub use self::error::{SchedulerError, SubmitError};
pub use self::file::{ScheduleSpec, SchedulesFile};
pub use self::submitter::JobSubmitter;
