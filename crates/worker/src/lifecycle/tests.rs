//! Tests for the job lifecycle manager.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use recon_core::{Finding, JobStatus, Repositories, ScanJob, Target, ToolRunStatus};
    use recon_policy::{PolicyEngine, RulesOfEngagement};
    use uuid::Uuid;

    use crate::adapter::{AdapterRegistry, ToolAdapter, ToolOptions, ToolOutput};
    use crate::config::WorkerConfig;
    use crate::error::{NormalizeError, ToolExecutionError, WorkerError};
    use crate::lifecycle::JobLifecycleManager;
    use crate::normalizer::{Normalizer, NormalizerRegistry};

    // ── Fixtures ────────────────────────────────────────────────────

    #[derive(Clone, Copy)]
    enum Behavior {
        Exit(i32),
        Sleep(Duration),
        Panic,
        /// Exits 1 on the first call, panics on every later one.
        FailThenPanic,
        NotInstalled,
    }

    struct FakeTool {
        name: &'static str,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    impl FakeTool {
        fn new(name: &'static str, behavior: Behavior) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    behavior,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl ToolAdapter for FakeTool {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(
            &self,
            target: &str,
            _options: &ToolOptions,
            _timeout: Duration,
        ) -> Result<ToolOutput, ToolExecutionError> {
            let previous = self.calls.fetch_add(1, Ordering::SeqCst);
            let exit_code = match self.behavior {
                Behavior::Exit(code) => code,
                Behavior::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    0
                }
                Behavior::Panic => panic!("adapter crashed"),
                Behavior::FailThenPanic if previous == 0 => 1,
                Behavior::FailThenPanic => panic!("adapter crashed on retry"),
                Behavior::NotInstalled => {
                    return Err(ToolExecutionError::NotInstalled(self.name.to_string()))
                }
            };
            Ok(ToolOutput {
                exit_code,
                stdout: format!("{} scanned {target}\n", self.name),
                stderr: String::new(),
                duration: Duration::from_millis(1),
                command: format!("{} {target}", self.name),
            })
        }
    }

    struct LineNormalizer;

    #[async_trait]
    impl Normalizer for LineNormalizer {
        fn tool(&self) -> &str {
            "b"
        }

        async fn parse(&self, raw: &str, run: Uuid) -> Result<Vec<Finding>, NormalizeError> {
            Ok(raw.lines().map(|l| Finding::new(run, l, "info")).collect())
        }
    }

    fn engine(yaml: &str) -> Arc<PolicyEngine> {
        let rules: RulesOfEngagement = serde_yaml::from_str(yaml).unwrap();
        Arc::new(PolicyEngine::new(rules).unwrap())
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            slot_retry_delay: Duration::from_millis(10),
            ..WorkerConfig::default()
        }
    }

    fn manager(
        engine: Arc<PolicyEngine>,
        tools: Vec<FakeTool>,
        config: WorkerConfig,
    ) -> Arc<JobLifecycleManager> {
        let mut adapters = AdapterRegistry::new();
        for tool in tools {
            adapters.register(tool).unwrap();
        }
        Arc::new(JobLifecycleManager::new(
            engine,
            Repositories::in_memory(),
            adapters,
            config,
        ))
    }

    async fn pending_job(m: &JobLifecycleManager, target: &str, tools: &[&str]) -> ScanJob {
        let repos = m.repositories();
        let target = repos.targets.create(Target::new(target)).await.unwrap();
        let job = ScanJob::new(target.id, tools.iter().map(|t| t.to_string()).collect());
        repos.jobs.create(job).await.unwrap()
    }

    async fn wait_for_running(m: &JobLifecycleManager, job_id: Uuid, count: usize) {
        for _ in 0..200 {
            let runs = m.repositories().tool_runs_for_job(job_id).await.unwrap();
            let running = runs
                .iter()
                .filter(|r| r.status == ToolRunStatus::Running)
                .count();
            if running >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tools never started");
    }

    // ── Completion ──────────────────────────────────────────────────

    #[tokio::test]
    async fn job_completes_even_when_a_tool_fails() {
        let (a, _) = FakeTool::new("a", Behavior::Exit(1));
        let (b, _) = FakeTool::new("b", Behavior::Exit(0));
        let m = manager(engine("{}"), vec![a, b], config());
        let job = pending_job(&m, "192.168.1.10", &["a", "b"]).await;

        let finished = m.process_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert!(finished.started_at.is_some());
        assert!(finished.completed_at.is_some());
        assert!(finished.error_message.is_none());

        let runs = m.repositories().tool_runs_for_job(job.id).await.unwrap();
        let status_of = |tool: &str| runs.iter().find(|r| r.tool_name == tool).unwrap().status;
        assert_eq!(runs.len(), 2);
        assert_eq!(status_of("a"), ToolRunStatus::Failed);
        assert_eq!(status_of("b"), ToolRunStatus::Completed);

        let a_run = runs.iter().find(|r| r.tool_name == "a").unwrap();
        assert_eq!(a_run.exit_code, Some(1));
        assert!(a_run.error_message.as_deref().unwrap().contains("status 1"));
        let b_run = runs.iter().find(|r| r.tool_name == "b").unwrap();
        assert_eq!(b_run.command.as_deref(), Some("b 192.168.1.10"));
        assert!(b_run.stdout.as_deref().unwrap().contains("scanned"));

        let status = m.engine().status();
        assert_eq!((status.active_jobs, status.active_tools), (0, 0));
    }

    #[tokio::test]
    async fn missing_adapter_fails_only_its_run() {
        let (b, _) = FakeTool::new("b", Behavior::Exit(0));
        let m = manager(engine("{}"), vec![b], config());
        let job = pending_job(&m, "scanme.example.org", &["ghost", "b"]).await;

        let finished = m.process_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);

        let runs = m.repositories().tool_runs_for_job(job.id).await.unwrap();
        let ghost = runs.iter().find(|r| r.tool_name == "ghost").unwrap();
        assert_eq!(ghost.status, ToolRunStatus::Failed);
        assert!(ghost.error_message.as_deref().unwrap().contains("not installed"));
    }

    #[tokio::test]
    async fn adapter_error_recorded_on_run() {
        let (a, _) = FakeTool::new("a", Behavior::NotInstalled);
        let m = manager(engine("{}"), vec![a], config());
        let job = pending_job(&m, "192.168.1.10", &["a"]).await;

        m.process_job(job.id).await.unwrap();
        let runs = m.repositories().tool_runs_for_job(job.id).await.unwrap();
        assert_eq!(runs[0].status, ToolRunStatus::Failed);
        assert!(runs[0].exit_code.is_none());
        assert!(runs[0].duration.is_some());
    }

    #[tokio::test]
    async fn timeout_fails_run_but_not_job() {
        let (slow, _) = FakeTool::new("slow", Behavior::Sleep(Duration::from_secs(30)));
        let cfg = config().with_tool_timeouts(
            [("slow".to_string(), Duration::from_millis(50))].into_iter().collect(),
        );
        let m = manager(engine("{}"), vec![slow], cfg);
        let job = pending_job(&m, "192.168.1.10", &["slow"]).await;

        let finished = m.process_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        let runs = m.repositories().tool_runs_for_job(job.id).await.unwrap();
        assert_eq!(runs[0].status, ToolRunStatus::Failed);
        assert!(runs[0].error_message.as_deref().unwrap().contains("timed out"));
        assert_eq!(m.engine().status().active_tools, 0);
    }

    #[tokio::test]
    async fn panicking_adapter_releases_its_slot() {
        let (boom, _) = FakeTool::new("boom", Behavior::Panic);
        let (ok, _) = FakeTool::new("ok", Behavior::Exit(0));
        let m = manager(engine("{}"), vec![boom, ok], config());
        let job = pending_job(&m, "192.168.1.10", &["boom", "ok"]).await;

        let finished = m.process_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);

        let runs = m.repositories().tool_runs_for_job(job.id).await.unwrap();
        let boom = runs.iter().find(|r| r.tool_name == "boom").unwrap();
        assert_eq!(boom.status, ToolRunStatus::Failed);
        assert!(boom.error_message.as_deref().unwrap().contains("aborted"));
        assert_eq!(m.engine().status().active_tools, 0);
    }

    #[tokio::test]
    async fn panic_during_retry_fails_the_retry_run() {
        let (flaky, calls) = FakeTool::new("flaky", Behavior::FailThenPanic);
        let cfg = WorkerConfig {
            max_tool_retries: 1,
            ..config()
        };
        let m = manager(engine("{}"), vec![flaky], cfg);
        let job = pending_job(&m, "192.168.1.10", &["flaky"]).await;

        let finished = m.process_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let runs = m.repositories().tool_runs_for_job(job.id).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.is_terminal()));

        let first = runs.iter().find(|r| r.attempt == 1).unwrap();
        let retry = runs.iter().find(|r| r.attempt == 2).unwrap();
        assert_eq!(retry.retry_of, Some(first.id));
        assert_eq!(first.status, ToolRunStatus::Failed);
        assert!(first.error_message.as_deref().unwrap().contains("exited with status 1"));
        assert_eq!(retry.status, ToolRunStatus::Failed);
        assert!(retry.error_message.as_deref().unwrap().contains("aborted"));
        assert_eq!(m.engine().status().active_tools, 0);
    }

    #[tokio::test]
    async fn failed_tool_retried_with_new_runs() {
        let (a, calls) = FakeTool::new("a", Behavior::Exit(2));
        let cfg = WorkerConfig {
            max_tool_retries: 2,
            ..config()
        };
        let m = manager(engine("{}"), vec![a], cfg);
        let job = pending_job(&m, "192.168.1.10", &["a"]).await;

        let finished = m.process_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let runs = m.repositories().tool_runs_for_job(job.id).await.unwrap();
        let mut attempts: Vec<u32> = runs.iter().map(|r| r.attempt).collect();
        attempts.sort();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert!(runs.iter().all(|r| r.status == ToolRunStatus::Failed));
    }

    #[tokio::test]
    async fn normalizer_stores_findings_for_completed_runs() {
        let (a, _) = FakeTool::new("a", Behavior::Exit(1));
        let (b, _) = FakeTool::new("b", Behavior::Exit(0));
        let mut normalizers = NormalizerRegistry::new();
        normalizers.register(LineNormalizer).unwrap();
        let m = Arc::new({
            let mut adapters = AdapterRegistry::new();
            adapters.register(a).unwrap();
            adapters.register(b).unwrap();
            JobLifecycleManager::new(engine("{}"), Repositories::in_memory(), adapters, config())
                .with_normalizers(normalizers)
        });
        let job = pending_job(&m, "192.168.1.10", &["a", "b"]).await;
        m.process_job(job.id).await.unwrap();

        let runs = m.repositories().tool_runs_for_job(job.id).await.unwrap();
        let b_run = runs.iter().find(|r| r.tool_name == "b").unwrap();

        let mut findings = Vec::new();
        for _ in 0..100 {
            findings = m.repositories().findings_for_run(b_run.id).await.unwrap();
            if !findings.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].title, "b scanned 192.168.1.10");
        assert_eq!(m.repositories().findings.list().await.unwrap().len(), 1);
    }

    // ── Admission ───────────────────────────────────────────────────

    #[tokio::test]
    async fn denied_job_never_starts_a_tool() {
        let (nmap, calls) = FakeTool::new("nmap", Behavior::Exit(0));
        let m = manager(
            engine("network:\n  deny: [\"10.0.0.0/8\"]\nhigh_risk_tools: [sqlmap]\n"),
            vec![nmap],
            config(),
        );
        let job = pending_job(&m, "10.1.2.3", &["nmap", "sqlmap"]).await;

        let finished = m.process_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        let message = finished.error_message.unwrap();
        assert!(message.contains("10.0.0.0/8"), "{message}");
        assert!(message.contains("sqlmap"), "{message}");

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(m
            .repositories()
            .tool_runs_for_job(job.id)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(m.engine().status().active_jobs, 0);
    }

    #[tokio::test]
    async fn full_job_pool_is_backpressure_not_failure() {
        let (a, _) = FakeTool::new("a", Behavior::Exit(0));
        let m = manager(engine("concurrency:\n  max_parallel_jobs: 1\n"), vec![a], config());
        let job = pending_job(&m, "192.168.1.10", &["a"]).await;

        assert!(m.engine().register_job_start("someone-else"));
        let handle = m.submit(job.id);
        tokio::time::sleep(Duration::from_millis(80)).await;

        let waiting = m.repositories().jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(waiting.status, JobStatus::Pending);

        m.engine().register_job_end("someone-else");
        let finished = handle.await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn rate_limit_spaces_out_tool_starts() {
        let tools: Vec<FakeTool> = ["a", "b", "c"]
            .into_iter()
            .map(|n| FakeTool::new(n, Behavior::Exit(0)).0)
            .collect();
        let m = manager(engine("rate_limit:\n  rps: 20\n  burst: 1\n"), tools, config());
        let job = pending_job(&m, "192.168.1.10", &["a", "b", "c"]).await;

        let start = Instant::now();
        let finished = m.process_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        // One token up front, then two refills at 50ms each.
        assert!(start.elapsed() >= Duration::from_millis(90), "{:?}", start.elapsed());
    }

    #[tokio::test]
    async fn tool_pool_bounds_parallel_runs() {
        let tools: Vec<FakeTool> = ["a", "b", "c"]
            .into_iter()
            .map(|n| FakeTool::new(n, Behavior::Sleep(Duration::from_millis(40))).0)
            .collect();
        let m = manager(engine("concurrency:\n  max_parallel_tools: 1\n"), tools, config());
        let job = pending_job(&m, "192.168.1.10", &["a", "b", "c"]).await;

        let start = Instant::now();
        let finished = m.process_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert!(start.elapsed() >= Duration::from_millis(120));
        assert_eq!(m.engine().status().tool_invocations.values().sum::<u64>(), 3);
    }

    #[tokio::test]
    async fn missing_target_fails_job() {
        let (a, _) = FakeTool::new("a", Behavior::Exit(0));
        let m = manager(engine("{}"), vec![a], config());
        let job = m
            .repositories()
            .jobs
            .create(ScanJob::new(Uuid::new_v4(), vec!["a".to_string()]))
            .await
            .unwrap();

        let err = m.process_job(job.id).await.unwrap_err();
        assert!(matches!(err, WorkerError::TargetNotFound(_)));
        let stored = m.repositories().jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error_message.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn unknown_job_is_an_error() {
        let m = manager(engine("{}"), vec![], config());
        let err = m.process_job(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, WorkerError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn enqueue_requires_existing_target() {
        let (a, _) = FakeTool::new("a", Behavior::Exit(0));
        let m = manager(engine("{}"), vec![a], config());
        let err = m.enqueue(Uuid::new_v4(), vec!["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, WorkerError::TargetNotFound(_)));

        let target = m
            .repositories()
            .targets
            .create(Target::new("192.168.1.10"))
            .await
            .unwrap();
        let job = m.enqueue(target.id, vec!["a".to_string()]).await.unwrap();
        for _ in 0..100 {
            let stored = m.repositories().jobs.get_by_id(job.id).await.unwrap().unwrap();
            if stored.is_terminal() {
                assert_eq!(stored.status, JobStatus::Completed);
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("enqueued job never finished");
    }

    // ── Cancellation ────────────────────────────────────────────────

    #[tokio::test]
    async fn cancel_interrupts_running_and_pending_tools() {
        let (first, first_calls) = FakeTool::new("first", Behavior::Sleep(Duration::from_secs(30)));
        let (second, second_calls) =
            FakeTool::new("second", Behavior::Sleep(Duration::from_secs(30)));
        let m = manager(
            engine("concurrency:\n  max_parallel_tools: 1\n"),
            vec![first, second],
            config(),
        );
        let job = pending_job(&m, "192.168.1.10", &["first", "second"]).await;

        let handle = m.submit(job.id);
        wait_for_running(&m, job.id, 1).await;
        assert!(m.is_in_flight(job.id));
        assert!(m.cancel(job.id).await);

        let finished = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("cancelled job should finish promptly")
            .unwrap()
            .unwrap();
        assert_eq!(finished.status, JobStatus::Cancelled);
        // Only one tool ever got the single slot.
        let started = first_calls.load(Ordering::SeqCst) + second_calls.load(Ordering::SeqCst);
        assert_eq!(started, 1);

        let runs = m.repositories().tool_runs_for_job(job.id).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == ToolRunStatus::Cancelled));

        let status = m.engine().status();
        assert_eq!((status.active_jobs, status.active_tools), (0, 0));
        assert!(!m.is_in_flight(job.id));
    }

    #[tokio::test]
    async fn cancel_before_submission() {
        let m = manager(engine("{}"), vec![], config());
        let job = pending_job(&m, "192.168.1.10", &["a"]).await;

        assert!(m.cancel(job.id).await);
        assert!(!m.cancel(job.id).await);
        assert!(!m.cancel(Uuid::new_v4()).await);

        let finished = m.process_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Cancelled);
        assert!(m
            .repositories()
            .tool_runs_for_job(job.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn double_submission_rejected() {
        let (slow, _) = FakeTool::new("slow", Behavior::Sleep(Duration::from_millis(200)));
        let m = manager(engine("{}"), vec![slow], config());
        let job = pending_job(&m, "192.168.1.10", &["slow"]).await;

        let first = m.submit(job.id);
        let second = m.submit(job.id);
        assert!(matches!(
            second.await.unwrap(),
            Err(WorkerError::AlreadySubmitted(_))
        ));
        assert_eq!(first.await.unwrap().unwrap().status, JobStatus::Completed);
    }
}
