use std::sync::Arc;

use anyhow::{bail, Context, Result};
use recon_core::{Config, Finding, Repository, ScanJob, Target};
use recon_policy::{render_policy, PolicyEngine, PolicyFormat};
use recon_scheduler::{Scheduler, SchedulesFile};
use serde_json::json;
use tracing::{info, warn};

use crate::cli::OutputFormat;
use crate::config::{build_manager, load_engine};

pub fn policy(config: &Config, format: OutputFormat) -> Result<()> {
    let engine = load_engine(config)?;
    let format = match format {
        OutputFormat::Yaml => PolicyFormat::Yaml,
        OutputFormat::Json => PolicyFormat::Json,
    };
    println!("{}", render_policy(engine.rules(), format)?);
    info!(status = %serde_json::to_string(&engine.status())?, "engine status");
    Ok(())
}

pub fn validate(config: &Config, target: &str, tools: &[String]) -> Result<()> {
    let engine = load_engine(config)?;
    match engine.validate_job(target, tools) {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(violation) => {
            println!("{}", serde_json::to_string_pretty(&violation)?);
            bail!("job rejected: {violation}");
        }
    }
}

/// Run one job on the current process. Ctrl-C cancels it; the partial
/// results are still printed.
pub async fn run(config: &Config, target: &str, tools: Vec<String>) -> Result<()> {
    let engine = load_engine(config)?;
    let manager = build_manager(config, engine)?;
    let repos = manager.repositories().clone();

    let target = repos.targets.create(Target::new(target)).await?;
    let job = repos.jobs.create(ScanJob::new(target.id, tools)).await?;
    let mut handle = manager.submit(job.id);

    let job = tokio::select! {
        res = &mut handle => res.context("job task panicked")??,
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %job.id, "interrupted, cancelling job");
            manager.cancel(job.id).await;
            handle.await.context("job task panicked")??
        }
    };

    let runs = repos.tool_runs_for_job(job.id).await?;
    let mut findings: Vec<Finding> = Vec::new();
    for run in &runs {
        findings.extend(repos.findings_for_run(run.id).await?);
    }

    let report = json!({
        "target": target,
        "job": job,
        "tool_runs": runs,
        "findings": findings,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Load the schedules file and fire scans until Ctrl-C.
pub async fn daemon(config: &Config) -> Result<()> {
    let engine = load_engine(config)?;
    let manager = build_manager(config, Arc::clone(&engine))?;

    let path = &config.paths.schedules_file;
    let file = SchedulesFile::load(path)
        .with_context(|| format!("failed to load schedules from {}", path.display()))?;

    let scheduler = Arc::new(Scheduler::new(Arc::clone(&manager)));
    let added = file
        .apply(&scheduler, manager.repositories().targets.as_ref())
        .await?;
    for entry in &added {
        info!(
            schedule = %entry.name,
            frequency = %entry.frequency.describe(),
            tools = ?entry.tools,
            "schedule loaded"
        );
    }

    let runner = Arc::clone(&scheduler);
    let tick = config.scheduler.tick_interval();
    let handle = tokio::spawn(async move { runner.run(tick).await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    scheduler.shutdown();
    handle.await.context("scheduler task panicked")?;

    log_final_status(&engine);
    Ok(())
}

fn log_final_status(engine: &PolicyEngine) {
    let status = engine.status();
    info!(
        active_jobs = status.active_jobs,
        active_tools = status.active_tools,
        "daemon stopped"
    );
}
