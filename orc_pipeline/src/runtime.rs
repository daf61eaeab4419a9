//! ABOUTME: Pipeline runtime (C9): retrying tasks, chord fan-out/join, bounded async waits
//! ABOUTME: No single-threaded loop; correctness rests on the per-app lock and store correlation

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, info, warn};

/// Outcome of a single task attempt. Only `Retryable` triggers another attempt;
/// `Fatal` and `Cancelled` propagate straight to the error continuation.
#[derive(Debug, Clone)]
pub enum TaskError {
    Retryable(String),
    Fatal(String),
    Cancelled(String),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable(msg) => write!(f, "retryable: {msg}"),
            Self::Fatal(msg) => write!(f, "fatal: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
        }
    }
}

impl std::error::Error for TaskError {}

pub type TaskResult<T> = std::result::Result<T, TaskError>;

#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    Fixed,
    Exponential { multiplier: f64 },
}

/// Generic retry-policy descriptor attached per task type, rather than
/// hand-coded at each call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: Option<Backoff>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay: Duration::from_secs(0),
            backoff: None,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            backoff: None,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            None | Some(Backoff::Fixed) => self.delay,
            Some(Backoff::Exponential { multiplier }) => {
                let scaled = self.delay.as_secs_f64() * multiplier.powi(attempt as i32);
                Duration::from_secs_f64(scaled)
            }
        }
    }
}

/// Cooperative cancellation signal raised when a task exceeds its soft time limit.
pub type CancelToken = tokio_util::sync::CancellationToken;

/// A discrete, retryable, cancellable unit of orchestration work.
#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self, cancel: &CancelToken) -> TaskResult<serde_json::Value>;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `d_wait`/`N_wait`: `async_wait` poll delay and attempt budget.
    pub wait_retry_attempts: u32,
    pub wait_retry_delay: Duration,
    /// Poll granularity for chord join completion.
    pub chord_poll_interval: Duration,
    /// Exceeding this raises a cancellable error; exceeding the hard limit terminates the task.
    pub soft_time_limit: Duration,
    pub hard_time_limit: Duration,
    /// Bound on concurrently executing tasks across the whole runtime.
    pub worker_pool_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            wait_retry_attempts: 30,
            wait_retry_delay: Duration::from_secs(10),
            chord_poll_interval: Duration::from_secs(20),
            soft_time_limit: Duration::from_secs(600),
            hard_time_limit: Duration::from_secs(1800),
            worker_pool_size: 8,
        }
    }
}

impl From<&orc_config::PipelineConfig> for RuntimeConfig {
    fn from(config: &orc_config::PipelineConfig) -> Self {
        Self {
            wait_retry_attempts: config.wait_retry_attempts,
            wait_retry_delay: Duration::from_secs(config.wait_retry_delay_seconds),
            chord_poll_interval: Duration::from_secs(config.chord_poll_interval_seconds),
            soft_time_limit: Duration::from_secs(config.soft_time_limit_seconds),
            hard_time_limit: Duration::from_secs(config.hard_time_limit_seconds),
            worker_pool_size: config.worker_pool_size,
        }
    }
}

struct ChordState {
    remaining: AtomicUsize,
    failed: AtomicBool,
    results: Mutex<Vec<serde_json::Value>>,
    failure: Mutex<Option<TaskError>>,
}

impl ChordState {
    fn new(total: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(total),
            failed: AtomicBool::new(false),
            results: Mutex::new(Vec::with_capacity(total)),
            failure: Mutex::new(None),
        }
    }

    async fn record(&self, outcome: TaskResult<serde_json::Value>) {
        match outcome {
            Ok(value) => {
                self.results.lock().await.push(value);
            }
            Err(err) => {
                self.failed.store(true, Ordering::SeqCst);
                *self.failure.lock().await = Some(err);
            }
        }
        self.remaining.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Worker-pool-bounded task runtime. Holds no domain state of its own; chord
/// join counters are the only runtime-owned state, kept in-memory per job_id
/// since a restarted process re-derives outstanding deployer state from the
/// job's own snapshot rather than from the runtime.
#[derive(Clone)]
pub struct PipelineRuntime {
    config: RuntimeConfig,
    semaphore: Arc<Semaphore>,
    chords: Arc<RwLock<HashMap<String, Arc<ChordState>>>>,
    queue_depth: Arc<AtomicUsize>,
    metrics: Option<Arc<orc_obs::Metrics>>,
}

impl PipelineRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            config,
            semaphore,
            chords: Arc::new(RwLock::new(HashMap::new())),
            queue_depth: Arc::new(AtomicUsize::new(0)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<orc_obs::Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Runs one task to terminal success/failure, retrying `Retryable` outcomes
    /// per its own policy and enforcing the soft/hard time limits.
    pub async fn execute(&self, task: Arc<dyn Task>) -> TaskResult<serde_json::Value> {
        let depth = self.queue_depth.fetch_add(1, Ordering::SeqCst) + 1;
        self.report_queue_depth(depth);
        let result = self.execute_inner(task).await;
        let depth = self.queue_depth.fetch_sub(1, Ordering::SeqCst) - 1;
        self.report_queue_depth(depth);
        result
    }

    fn report_queue_depth(&self, depth: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_queue_depth(depth as i64);
        }
    }

    async fn execute_inner(&self, task: Arc<dyn Task>) -> TaskResult<serde_json::Value> {
        let _permit = self.semaphore.acquire().await.expect("semaphore not closed");
        let policy = task.retry_policy();

        for attempt in 0..policy.attempts.max(1) {
            if attempt > 0 {
                let delay = policy.delay_for(attempt - 1);
                debug!(task = task.name(), attempt, delay_ms = delay.as_millis() as u64, "retrying task");
                tokio::time::sleep(delay).await;
            }

            let outcome = self.run_with_time_limits(task.clone()).await;

            match outcome {
                Ok(value) => return Ok(value),
                Err(TaskError::Retryable(msg)) => {
                    if attempt + 1 >= policy.attempts.max(1) {
                        warn!(task = task.name(), "retry budget exhausted");
                        return Err(TaskError::Retryable(msg));
                    }
                    continue;
                }
                Err(terminal) => return Err(terminal),
            }
        }

        unreachable!("loop always returns before exhausting attempts.max(1) iterations")
    }

    async fn run_with_time_limits(&self, task: Arc<dyn Task>) -> TaskResult<serde_json::Value> {
        let cancel = CancelToken::new();
        let soft_limit = self.config.soft_time_limit;
        let task_for_run = task.clone();
        let cancel_for_run = cancel.clone();

        let guarded = async move {
            tokio::select! {
                result = task_for_run.run(&cancel_for_run) => result,
                _ = tokio::time::sleep(soft_limit) => {
                    cancel_for_run.cancel();
                    Err(TaskError::Cancelled(format!("{} exceeded soft time limit", task_for_run.name())))
                }
            }
        };

        match tokio::time::timeout(self.config.hard_time_limit, guarded).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(TaskError::Cancelled(format!("{} exceeded hard time limit", task.name())))
            }
        }
    }

    /// `chord(group[task…], join)`: dispatches `group` concurrently under `job_id`'s
    /// counter; callers run `join` themselves only once every branch has completed
    /// and none failed fatally. Any group task failing fatally short-circuits the
    /// result so the caller can route it to the error continuation instead.
    pub async fn chord(
        &self,
        job_id: &str,
        group: Vec<Arc<dyn Task>>,
    ) -> TaskResult<Vec<serde_json::Value>> {
        let total = group.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let state = Arc::new(ChordState::new(total));
        self.chords.write().await.insert(job_id.to_string(), state.clone());

        let mut handles = Vec::with_capacity(total);
        for task in group {
            let runtime = self.clone();
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                let outcome = runtime.execute(task).await;
                state.record(outcome).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        self.chords.write().await.remove(job_id);

        if state.failed.load(Ordering::SeqCst) {
            let failure = state.failure.lock().await.take();
            return Err(failure.unwrap_or_else(|| TaskError::Fatal("chord group failed".into())));
        }

        info!(job_id, completed = total, "chord join ready");
        Ok(state.results.lock().await.clone())
    }

    /// Outstanding branch count for a chord still in flight; `None` once it has
    /// either completed or was never dispatched under this job_id.
    pub async fn chord_remaining(&self, job_id: &str) -> Option<usize> {
        let chords = self.chords.read().await;
        chords.get(job_id).map(|s| s.remaining.load(Ordering::SeqCst))
    }
}

/// `async_wait(result)`: polls `poll` up to `N_wait` times with delay `d_wait`
/// rather than blocking a thread. Used for chord-join waits, lock-acquire
/// suspension, and bounded settling waits (e.g. undeploy fan-out).
pub async fn async_wait<F, Fut, T>(attempts: u32, delay: Duration, mut poll: F) -> TaskResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 0..attempts.max(1) {
        if let Some(value) = poll().await {
            return Ok(value);
        }
        if attempt + 1 < attempts.max(1) {
            tokio::time::sleep(delay).await;
        }
    }
    Err(TaskError::Retryable("async_wait exhausted its retry budget".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct AlwaysOk;

    #[async_trait]
    impl Task for AlwaysOk {
        async fn run(&self, _cancel: &CancelToken) -> TaskResult<serde_json::Value> {
            Ok(serde_json::json!({"ok": true}))
        }

        fn name(&self) -> &str {
            "always_ok"
        }
    }

    struct AlwaysFatal;

    #[async_trait]
    impl Task for AlwaysFatal {
        async fn run(&self, _cancel: &CancelToken) -> TaskResult<serde_json::Value> {
            Err(TaskError::Fatal("boom".into()))
        }

        fn name(&self) -> &str {
            "always_fatal"
        }
    }

    struct FlakyThenOk {
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl Task for FlakyThenOk {
        async fn run(&self, _cancel: &CancelToken) -> TaskResult<serde_json::Value> {
            if self.remaining_failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(TaskError::Retryable("not yet".into()))
            } else {
                Ok(serde_json::json!({"attempt": "final"}))
            }
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::fixed(5, Duration::from_millis(1))
        }

        fn name(&self) -> &str {
            "flaky_then_ok"
        }
    }

    struct SoftTimeoutTask;

    #[async_trait]
    impl Task for SoftTimeoutTask {
        async fn run(&self, cancel: &CancelToken) -> TaskResult<serde_json::Value> {
            cancel.cancelled().await;
            Err(TaskError::Cancelled("observed cancellation".into()))
        }

        fn name(&self) -> &str {
            "soft_timeout"
        }
    }

    fn runtime_with(soft: Duration, hard: Duration) -> PipelineRuntime {
        PipelineRuntime::new(RuntimeConfig {
            soft_time_limit: soft,
            hard_time_limit: hard,
            ..RuntimeConfig::default()
        })
    }

    #[tokio::test]
    async fn execute_returns_success_output() {
        let runtime = runtime_with(Duration::from_secs(5), Duration::from_secs(10));
        let result = runtime.execute(Arc::new(AlwaysOk)).await.expect("success");
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn execute_retries_until_exhausted_then_propagates() {
        let runtime = runtime_with(Duration::from_secs(5), Duration::from_secs(10));
        let task = Arc::new(AlwaysFatal);
        let err = runtime.execute(task).await.expect_err("fatal never retries");
        assert!(matches!(err, TaskError::Fatal(_)));
    }

    #[tokio::test]
    async fn retryable_task_succeeds_within_its_retry_budget() {
        let runtime = runtime_with(Duration::from_secs(5), Duration::from_secs(10));
        let task = Arc::new(FlakyThenOk {
            remaining_failures: AtomicU32::new(2),
        });
        let result = runtime.execute(task).await.expect("eventually succeeds");
        assert_eq!(result, serde_json::json!({"attempt": "final"}));
    }

    #[tokio::test]
    async fn soft_time_limit_cancels_cooperative_task() {
        let runtime = runtime_with(Duration::from_millis(5), Duration::from_secs(10));
        let err = runtime
            .execute(Arc::new(SoftTimeoutTask))
            .await
            .expect_err("soft limit should cancel");
        assert!(matches!(err, TaskError::Cancelled(_)));
    }

    #[tokio::test]
    async fn chord_joins_once_every_branch_completes() {
        let runtime = runtime_with(Duration::from_secs(5), Duration::from_secs(10));
        let group: Vec<Arc<dyn Task>> = vec![Arc::new(AlwaysOk), Arc::new(AlwaysOk)];
        let results = runtime.chord("job-1", group).await.expect("all succeed");
        assert_eq!(results.len(), 2);
        assert!(runtime.chord_remaining("job-1").await.is_none());
    }

    #[tokio::test]
    async fn chord_fails_fast_when_a_branch_is_fatal() {
        let runtime = runtime_with(Duration::from_secs(5), Duration::from_secs(10));
        let group: Vec<Arc<dyn Task>> = vec![Arc::new(AlwaysOk), Arc::new(AlwaysFatal)];
        let err = runtime.chord("job-2", group).await.expect_err("one branch is fatal");
        assert!(matches!(err, TaskError::Fatal(_)));
    }

    #[tokio::test]
    async fn async_wait_polls_until_value_is_available() {
        let calls = AtomicU32::new(0);
        let result = async_wait(5, Duration::from_millis(1), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                None
            } else {
                Some(n)
            }
        })
        .await
        .expect("eventually produces a value");
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn async_wait_exhausts_its_budget() {
        let result: TaskResult<u32> = async_wait(3, Duration::from_millis(1), || async { None }).await;
        assert!(matches!(result, Err(TaskError::Retryable(_))));
    }
}
