//! One tool's execution inside a job: slot, adapter call, record, retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use recon_core::{Repositories, ToolRun, ToolRunStatus};
use recon_policy::PolicyEngine;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterRegistry, ToolOptions, ToolOutput};
use crate::config::WorkerConfig;
use crate::error::{ToolExecutionError, WorkerError};
use crate::normalizer::NormalizerRegistry;

// ── Cancellation helpers ────────────────────────────────────────────

pub(crate) fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Resolves once the job is cancelled. Never resolves if the sender is gone.
pub(crate) async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Sleep for `delay`, waking early on cancellation.
pub(crate) async fn pause(delay: Duration, cancel: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = wait_cancelled(cancel) => {}
    }
}

/// Wait until the rate limiter hands out a token. Returns `false` if the
/// job was cancelled first.
pub(crate) async fn acquire_rate_token(
    engine: &PolicyEngine,
    tool: &str,
    cancel: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        if is_cancelled(cancel) {
            return false;
        }
        let decision = engine.acquire_rate_limit(1);
        if decision.acquired {
            return true;
        }
        if decision.exceeds_burst() {
            warn!(tool = %tool, "rate limit can never grant this request");
            return false;
        }
        debug!(
            tool = %tool,
            wait_ms = decision.wait.as_millis() as u64,
            "rate limited, resubmitting after wait"
        );
        pause(decision.wait, cancel).await;
    }
}

// ── Tool unit ───────────────────────────────────────────────────────

enum Outcome {
    Finished(Result<ToolOutput, ToolExecutionError>),
    Cancelled,
}

pub(crate) struct ToolUnit {
    pub(crate) engine: Arc<PolicyEngine>,
    pub(crate) repos: Repositories,
    pub(crate) adapters: Arc<AdapterRegistry>,
    pub(crate) normalizers: Arc<NormalizerRegistry>,
    pub(crate) config: Arc<WorkerConfig>,
    pub(crate) cancel: watch::Receiver<bool>,
}

impl ToolUnit {
    /// Run `run` to a terminal status, retrying failures with fresh ToolRuns
    /// up to `max_tool_retries` times. Returns the last run.
    pub(crate) async fn run(mut self, first: ToolRun) -> Result<ToolRun, WorkerError> {
        let mut run = first;
        loop {
            let finished = self.attempt(run).await?;
            let retry = finished.status == ToolRunStatus::Failed
                && finished.attempt <= self.config.max_tool_retries
                && !is_cancelled(&self.cancel);
            if !retry {
                return Ok(finished);
            }
            if !acquire_rate_token(&self.engine, &finished.tool_name, &mut self.cancel).await {
                return Ok(finished);
            }
            run = self.repos.tool_runs.create(ToolRun::retry_of(&finished)).await?;
            info!(
                job_id = %run.job_id,
                tool = %run.tool_name,
                attempt = run.attempt,
                "retrying failed tool"
            );
        }
    }

    async fn attempt(&mut self, run: ToolRun) -> Result<ToolRun, WorkerError> {
        let slot_key = run.id.to_string();
        let _slot = loop {
            if is_cancelled(&self.cancel) {
                return self.finish_cancelled(&run, None).await;
            }
            if let Some(slot) = self.engine.try_tool_slot(&slot_key, &run.tool_name) {
                break slot;
            }
            debug!(tool_run_id = %run.id, tool = %run.tool_name, "tool slot unavailable, waiting");
            pause(self.config.slot_retry_delay, &mut self.cancel).await;
        };

        let started_at = Utc::now();
        self.repos
            .tool_runs
            .modify(
                run.id,
                Box::new(move |r: &mut ToolRun| {
                    r.status = ToolRunStatus::Running;
                    r.started_at = Some(started_at);
                }),
            )
            .await?;
        info!(
            job_id = %run.job_id,
            tool = %run.tool_name,
            tool_run_id = %run.id,
            attempt = run.attempt,
            "tool started"
        );

        let timeout = self.config.timeout_for(&run.tool_name);
        let clock = Instant::now();
        let outcome = match self.adapters.get(&run.tool_name) {
            None => Outcome::Finished(Err(ToolExecutionError::NotInstalled(run.tool_name.clone()))),
            Some(adapter) => {
                let options = ToolOptions::new();
                let call =
                    tokio::time::timeout(timeout, adapter.run(&run.target, &options, timeout));
                tokio::select! {
                    result = call => Outcome::Finished(result.unwrap_or_else(|_| {
                        Err(ToolExecutionError::Timeout {
                            tool: run.tool_name.clone(),
                            timeout,
                        })
                    })),
                    _ = wait_cancelled(&mut self.cancel) => Outcome::Cancelled,
                }
            }
        };
        let elapsed = clock.elapsed().as_secs_f64();

        let finished = match outcome {
            Outcome::Cancelled => return self.finish_cancelled(&run, Some(elapsed)).await,
            Outcome::Finished(Ok(output)) => self.record_output(&run, output).await?,
            Outcome::Finished(Err(err)) => self.record_error(&run, err, elapsed).await?,
        };

        if finished.status == ToolRunStatus::Completed {
            self.spawn_normalizer(&finished);
        }
        Ok(finished)
    }

    async fn record_output(
        &self,
        run: &ToolRun,
        output: ToolOutput,
    ) -> Result<ToolRun, WorkerError> {
        let success = output.success();
        let exit_code = output.exit_code;
        if success {
            info!(
                job_id = %run.job_id,
                tool = %run.tool_name,
                tool_run_id = %run.id,
                duration_secs = output.duration.as_secs_f64(),
                "tool completed"
            );
        } else {
            warn!(
                job_id = %run.job_id,
                tool = %run.tool_name,
                tool_run_id = %run.id,
                exit_code = exit_code,
                "tool exited with non-zero status"
            );
        }

        let tool = run.tool_name.clone();
        let updated = self
            .repos
            .tool_runs
            .modify(
                run.id,
                Box::new(move |r: &mut ToolRun| {
                    r.status = if success {
                        ToolRunStatus::Completed
                    } else {
                        ToolRunStatus::Failed
                    };
                    r.command = Some(output.command);
                    r.stdout = Some(output.stdout);
                    r.stderr = Some(output.stderr);
                    r.exit_code = Some(exit_code);
                    r.duration = Some(output.duration.as_secs_f64());
                    r.completed_at = Some(Utc::now());
                    if !success {
                        r.error_message = Some(format!("{tool} exited with status {exit_code}"));
                    }
                }),
            )
            .await?;
        Ok(updated)
    }

    async fn record_error(
        &self,
        run: &ToolRun,
        err: ToolExecutionError,
        elapsed: f64,
    ) -> Result<ToolRun, WorkerError> {
        warn!(
            job_id = %run.job_id,
            tool = %run.tool_name,
            tool_run_id = %run.id,
            error = %err,
            "tool execution failed"
        );
        let message = err.to_string();
        let updated = self
            .repos
            .tool_runs
            .modify(
                run.id,
                Box::new(move |r: &mut ToolRun| {
                    r.status = ToolRunStatus::Failed;
                    r.error_message = Some(message);
                    r.duration = Some(elapsed);
                    r.completed_at = Some(Utc::now());
                }),
            )
            .await?;
        Ok(updated)
    }

    async fn finish_cancelled(
        &self,
        run: &ToolRun,
        elapsed: Option<f64>,
    ) -> Result<ToolRun, WorkerError> {
        info!(job_id = %run.job_id, tool = %run.tool_name, tool_run_id = %run.id, "tool cancelled");
        let updated = self
            .repos
            .tool_runs
            .modify(
                run.id,
                Box::new(move |r: &mut ToolRun| {
                    r.status = ToolRunStatus::Cancelled;
                    r.duration = elapsed;
                    r.completed_at = Some(Utc::now());
                }),
            )
            .await?;
        Ok(updated)
    }

    /// Normalize the run's stdout in the background. Failures are logged only.
    fn spawn_normalizer(&self, run: &ToolRun) {
        let Some(raw) = run.stdout.clone().filter(|s| !s.trim().is_empty()) else {
            return;
        };
        let Some(normalizer) = self.normalizers.get(&run.tool_name) else {
            debug!(tool = %run.tool_name, "no normalizer registered");
            return;
        };

        let findings_repo = Arc::clone(&self.repos.findings);
        let run_id = run.id;
        let tool = run.tool_name.clone();
        tokio::spawn(async move {
            match normalizer.parse(&raw, run_id).await {
                Ok(findings) => {
                    let count = findings.len();
                    for finding in findings {
                        if let Err(e) = findings_repo.create(finding).await {
                            warn!(tool_run_id = %run_id, error = %e, "failed to store finding");
                        }
                    }
                    info!(
                        tool_run_id = %run_id,
                        tool = %tool,
                        findings = count,
                        "normalized tool output"
                    );
                }
                Err(e) => {
                    warn!(tool_run_id = %run_id, tool = %tool, error = %e, "normalization failed");
                }
            }
        });
    }
}
