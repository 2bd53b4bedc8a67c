//! Job lifecycle orchestration.
//!
//! [`JobLifecycleManager`] drives a [`ScanJob`] from `pending` to a terminal
//! status:
//!
//! 1. Admission: the job's target and tools go through
//!    [`PolicyEngine::validate_job`]. Any network or tool violation fails the
//!    job before a single ToolRun exists. A full job pool is backpressure: the
//!    job stays pending and admission is retried after `slot_retry_delay`.
//! 2. Dispatch: one pending ToolRun per tool is recorded, then each tool waits
//!    for a rate-limit token (in listed order) and is spawned as an
//!    independent task that holds a tool slot while the adapter runs.
//! 3. Completion: once every ToolRun is terminal the job is `completed`,
//!    whatever the individual tools returned. Store failures and other
//!    orchestration errors end the job `failed`.
//!
//! Slots are scoped guards, so every exit path (including cancellation and
//! panicking tasks) gives them back.

mod unit;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use recon_core::{JobStatus, Repositories, ScanJob, Target, ToolRun, ToolRunStatus};
use recon_policy::PolicyEngine;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::AdapterRegistry;
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::normalizer::NormalizerRegistry;

use self::unit::{acquire_rate_token, is_cancelled, pause, ToolUnit};

pub struct JobLifecycleManager {
    engine: Arc<PolicyEngine>,
    repos: Repositories,
    adapters: Arc<AdapterRegistry>,
    normalizers: Arc<NormalizerRegistry>,
    config: Arc<WorkerConfig>,
    /// Cancellation senders for jobs currently being processed.
    in_flight: Mutex<HashMap<Uuid, watch::Sender<bool>>>,
}

impl JobLifecycleManager {
    pub fn new(
        engine: Arc<PolicyEngine>,
        repos: Repositories,
        adapters: AdapterRegistry,
        config: WorkerConfig,
    ) -> Self {
        Self {
            engine,
            repos,
            adapters: Arc::new(adapters),
            normalizers: Arc::new(NormalizerRegistry::new()),
            config: Arc::new(config),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_normalizers(mut self, normalizers: NormalizerRegistry) -> Self {
        self.normalizers = Arc::new(normalizers);
        self
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.engine
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn is_in_flight(&self, job_id: Uuid) -> bool {
        self.in_flight().contains_key(&job_id)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<Uuid, watch::Sender<bool>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Create a pending job for an existing target and submit it.
    pub async fn enqueue(
        self: &Arc<Self>,
        target_id: Uuid,
        tools: Vec<String>,
    ) -> Result<ScanJob, WorkerError> {
        if self.repos.targets.get_by_id(target_id).await?.is_none() {
            return Err(WorkerError::TargetNotFound(target_id));
        }
        let job = self.repos.jobs.create(ScanJob::new(target_id, tools)).await?;
        debug!(job_id = %job.id, target_id = %target_id, "job enqueued");
        drop(self.submit(job.id));
        Ok(job)
    }

    /// Process `job_id` in a background task.
    pub fn submit(self: &Arc<Self>, job_id: Uuid) -> JoinHandle<Result<ScanJob, WorkerError>> {
        let cancel = self.register(job_id);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let cancel = cancel.ok_or(WorkerError::AlreadySubmitted(job_id))?;
            this.drive(job_id, cancel).await
        })
    }

    /// Process `job_id` on the current task and return the final job.
    pub async fn process_job(&self, job_id: Uuid) -> Result<ScanJob, WorkerError> {
        let cancel = self
            .register(job_id)
            .ok_or(WorkerError::AlreadySubmitted(job_id))?;
        self.drive(job_id, cancel).await
    }

    /// Cancel a job. In-flight jobs are signalled; their running tools are
    /// interrupted and pending tools end `cancelled`. A job that was never
    /// submitted is marked `cancelled` directly. Returns `false` for unknown
    /// or already terminal jobs.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        if self.signal_cancel(job_id) {
            info!(job_id = %job_id, "cancelling in-flight job");
            return true;
        }

        match self.repos.jobs.get_by_id(job_id).await {
            Ok(Some(job)) if !job.is_terminal() => {}
            Ok(_) => return false,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to load job for cancellation");
                return false;
            }
        }
        match self.set_terminal(job_id, JobStatus::Cancelled, None).await {
            Ok(job) => {
                info!(job_id = %job_id, "cancelled job before processing");
                job.status == JobStatus::Cancelled
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to cancel job");
                false
            }
        }
    }

    fn signal_cancel(&self, job_id: Uuid) -> bool {
        match self.in_flight().get(&job_id) {
            Some(tx) => {
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// `None` when the job is already in flight.
    fn register(&self, job_id: Uuid) -> Option<watch::Receiver<bool>> {
        let mut in_flight = self.in_flight();
        if in_flight.contains_key(&job_id) {
            return None;
        }
        let (tx, rx) = watch::channel(false);
        in_flight.insert(job_id, tx);
        Some(rx)
    }

    // ── Processing ──────────────────────────────────────────────────

    async fn drive(
        &self,
        job_id: Uuid,
        cancel: watch::Receiver<bool>,
    ) -> Result<ScanJob, WorkerError> {
        let result = self.execute(job_id, cancel).await;
        self.in_flight().remove(&job_id);

        match result {
            Ok(job) => Ok(job),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "job orchestration failed");
                let message = e.to_string();
                if let Err(store_err) = self
                    .set_terminal(job_id, JobStatus::Failed, Some(message))
                    .await
                {
                    error!(job_id = %job_id, error = %store_err, "failed to mark job failed");
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        job_id: Uuid,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ScanJob, WorkerError> {
        let job = self
            .repos
            .jobs
            .get_by_id(job_id)
            .await?
            .ok_or(WorkerError::JobNotFound(job_id))?;
        if job.status != JobStatus::Pending {
            debug!(job_id = %job_id, status = %job.status, "job is not pending, skipping");
            return Ok(job);
        }
        let target = self
            .repos
            .targets
            .get_by_id(job.target_id)
            .await?
            .ok_or(WorkerError::TargetNotFound(job.target_id))?;

        // ── Admission ──
        let slot_key = job_id.to_string();
        let _job_slot = loop {
            if is_cancelled(&cancel) {
                info!(job_id = %job_id, "job cancelled before admission");
                return self.set_terminal(job_id, JobStatus::Cancelled, None).await;
            }
            match self.engine.validate_job(&target.value, &job.tools) {
                Ok(validation) => {
                    if let Some(slot) = self.engine.try_job_slot(&slot_key) {
                        for warning in &validation.warnings {
                            warn!(job_id = %job_id, warning = %warning, "policy warning");
                        }
                        if !validation.approval_required.is_empty() {
                            info!(
                                job_id = %job_id,
                                tools = ?validation.approval_required,
                                "tools flagged as requiring approval"
                            );
                        }
                        break slot;
                    }
                    debug!(job_id = %job_id, "job slot taken concurrently, waiting");
                }
                Err(violation) if violation.is_capacity_only() => {
                    debug!(job_id = %job_id, "job pool full, waiting");
                }
                Err(violation) => {
                    warn!(
                        job_id = %job_id,
                        target = %target.value,
                        error = %violation,
                        "job denied by policy"
                    );
                    return self
                        .set_terminal(job_id, JobStatus::Failed, Some(violation.to_string()))
                        .await;
                }
            }
            pause(self.config.slot_retry_delay, &mut cancel).await;
        };

        let started_at = Utc::now();
        let job = self
            .repos
            .jobs
            .modify(
                job_id,
                Box::new(move |j: &mut ScanJob| {
                    j.status = JobStatus::Running;
                    j.started_at = Some(started_at);
                }),
            )
            .await?;
        info!(job_id = %job_id, target = %target.value, tools = ?job.tools, "job admitted");

        // ── Dispatch ──
        let result = self.run_tools(&job, &target, &mut cancel).await;

        let cancelled = is_cancelled(&cancel);
        let leftover = self.settle_unfinished_runs(job_id).await?;
        if leftover > 0 {
            debug!(job_id = %job_id, runs = leftover, "settled unfinished tool runs");
        }
        result?;

        let status = if cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        let finished = self.set_terminal(job_id, status, None).await?;

        let runs = self.repos.tool_runs_for_job(job_id).await?;
        let failed = runs
            .iter()
            .filter(|r| r.status == ToolRunStatus::Failed)
            .count();
        info!(
            job_id = %job_id,
            status = %finished.status,
            tool_runs = runs.len(),
            failed = failed,
            "job finished"
        );
        Ok(finished)
    }

    /// Record a pending ToolRun per tool, dispatch each behind the rate
    /// limiter and wait for every unit to finish.
    async fn run_tools(
        &self,
        job: &ScanJob,
        target: &Target,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), WorkerError> {
        let mut pending = Vec::with_capacity(job.tools.len());
        for tool in &job.tools {
            pending.push(
                self.repos
                    .tool_runs
                    .create(ToolRun::new(job.id, tool, &target.value))
                    .await?,
            );
        }

        let mut units = Vec::with_capacity(pending.len());
        for run in pending {
            if !acquire_rate_token(&self.engine, &run.tool_name, cancel).await {
                break;
            }
            let unit = ToolUnit {
                engine: Arc::clone(&self.engine),
                repos: self.repos.clone(),
                adapters: Arc::clone(&self.adapters),
                normalizers: Arc::clone(&self.normalizers),
                config: Arc::clone(&self.config),
                cancel: cancel.clone(),
            };
            let run_id = run.id;
            units.push((run_id, tokio::spawn(unit.run(run))));
        }

        // Join every unit before reporting, so no ToolRun outlives its job.
        let mut first_error = None;
        for (run_id, handle) in units {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    error!(job_id = %job.id, tool_run_id = %run_id, error = %e, "tool unit failed");
                    first_error.get_or_insert(e);
                }
                Err(join_err) => {
                    error!(
                        job_id = %job.id,
                        tool_run_id = %run_id,
                        error = %join_err,
                        "tool unit panicked"
                    );
                    self.fail_retry_chain(job.id, run_id, format!("tool task aborted: {join_err}"))
                        .await?;
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Mark every non-terminal run descended from `first` through retries
    /// `failed`. A unit that panics may have moved on to a retry run.
    async fn fail_retry_chain(
        &self,
        job_id: Uuid,
        first: Uuid,
        message: String,
    ) -> Result<(), WorkerError> {
        let runs = self.repos.tool_runs_for_job(job_id).await?;
        let mut chain = vec![first];
        while let Some(next) = runs.iter().find(|r| r.retry_of == chain.last().copied()) {
            chain.push(next.id);
        }
        for run_id in chain {
            let message = message.clone();
            self.repos
                .tool_runs
                .modify(
                    run_id,
                    Box::new(move |r: &mut ToolRun| {
                        if !r.is_terminal() {
                            r.status = ToolRunStatus::Failed;
                            r.error_message = Some(message);
                            r.completed_at = Some(Utc::now());
                        }
                    }),
                )
                .await?;
        }
        Ok(())
    }

    /// Settle this job's ToolRuns that never reached a terminal status once
    /// every unit has been joined: `pending` ones were never dispatched and
    /// become `cancelled`; `running` ones lost their unit and become `failed`.
    /// Returns how many were touched.
    async fn settle_unfinished_runs(&self, job_id: Uuid) -> Result<usize, WorkerError> {
        let mut count = 0;
        for run in self.repos.tool_runs_for_job(job_id).await? {
            if run.is_terminal() {
                continue;
            }
            self.repos
                .tool_runs
                .modify(
                    run.id,
                    Box::new(|r: &mut ToolRun| match r.status {
                        ToolRunStatus::Pending => {
                            r.status = ToolRunStatus::Cancelled;
                            r.completed_at = Some(Utc::now());
                        }
                        ToolRunStatus::Running => {
                            r.status = ToolRunStatus::Failed;
                            r.error_message =
                                Some("tool task aborted before recording a result".to_string());
                            r.completed_at = Some(Utc::now());
                        }
                        _ => {}
                    }),
                )
                .await?;
            count += 1;
        }
        Ok(count)
    }

    /// Move a job to a terminal status. Already terminal jobs are left alone.
    async fn set_terminal(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<ScanJob, WorkerError> {
        let job = self
            .repos
            .jobs
            .modify(
                job_id,
                Box::new(move |j: &mut ScanJob| {
                    if j.is_terminal() {
                        return;
                    }
                    j.status = status;
                    j.completed_at = Some(Utc::now());
                    if error_message.is_some() {
                        j.error_message = error_message;
                    }
                }),
            )
            .await?;
        Ok(job)
    }
}
