//! The schedules file: recurring scans declared in YAML.
//!
//! ```yaml
//! schedules:
//!   - name: lab-hourly-ports
//!     target: 192.168.10.0/24
//!     tools: [nmap]
//!     interval: 1h
//!   - target: 192.168.10.20
//!     tools: [httpx, nuclei]
//!     cron: "30 2 * * *"
//! ```

use std::fs;
use std::path::Path;

use recon_core::{Repository, Target};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cron::{parse_interval, CronFields};
use crate::entry::ScheduleEntry;
use crate::error::SchedulerError;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub target: String,
    pub tools: Vec<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub cron: Option<String>,
}

impl ScheduleSpec {
    fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.target.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulesFile {
    #[serde(default)]
    pub schedules: Vec<ScheduleSpec>,
}

impl SchedulesFile {
    pub fn load(path: &Path) -> Result<Self, SchedulerError> {
        let contents = fs::read_to_string(path).map_err(|source| SchedulerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = Self::parse(&contents)?;
        info!(path = %path.display(), schedules = file.schedules.len(), "loaded schedules file");
        Ok(file)
    }

    /// Parse and check that each entry has exactly one of `interval` / `cron`.
    pub fn parse(contents: &str) -> Result<Self, SchedulerError> {
        let file: SchedulesFile = serde_yaml::from_str(contents)?;
        for spec in &file.schedules {
            match (&spec.interval, &spec.cron) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(SchedulerError::InvalidSchedule {
                        name: spec.label(),
                        reason: "exactly one of 'interval' or 'cron' is required".to_string(),
                    })
                }
            }
        }
        Ok(file)
    }

    /// Register every entry on `scheduler`. Targets are looked up by value in
    /// `targets` and created when missing.
    pub async fn apply(
        &self,
        scheduler: &Scheduler,
        targets: &dyn Repository<Target>,
    ) -> Result<Vec<ScheduleEntry>, SchedulerError> {
        let mut added = Vec::with_capacity(self.schedules.len());
        for spec in &self.schedules {
            let target = find_or_create_target(targets, &spec.target).await?;
            let name = spec.name.as_deref();
            let entry = match (&spec.interval, &spec.cron) {
                (Some(interval), _) => {
                    let every = parse_interval(interval)
                        .ok_or_else(|| SchedulerError::InvalidInterval(interval.clone()))?;
                    scheduler.schedule_recurring(target.id, spec.tools.clone(), every, name)?
                }
                (None, Some(expr)) => {
                    let fields: CronFields = expr.parse()?;
                    scheduler.schedule_cron(target.id, spec.tools.clone(), &fields, name)?
                }
                (None, None) => {
                    return Err(SchedulerError::InvalidSchedule {
                        name: spec.label(),
                        reason: "missing 'interval' or 'cron'".to_string(),
                    })
                }
            };
            added.push(entry);
        }
        Ok(added)
    }
}

async fn find_or_create_target(
    targets: &dyn Repository<Target>,
    value: &str,
) -> Result<Target, SchedulerError> {
    let value = value.trim();
    if let Some(existing) = targets.list().await?.into_iter().find(|t| t.value == value) {
        return Ok(existing);
    }
    Ok(targets.create(Target::new(value)).await?)
}
