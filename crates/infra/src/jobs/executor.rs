//! Job executor with retry and backoff logic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::store::JobStore;
use super::types::{Job, JobKind, JobResult, JobStatus};

pub type JobHandler = Box<dyn Fn(&Job) -> JobResult + Send + Sync>;

#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    pub poll_interval: Duration,
    /// Thread name, also used in log fields.
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to a running executor thread.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Stop polling and wait for the in-flight job to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    pub uptime_secs: u64,
}

/// Outcome of running one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    Succeeded,
    /// Failed; the job is scheduled for another attempt.
    WillRetry(String),
    /// Failed for the last time and moved to the dead-letter list.
    DeadLettered(String),
}

/// Polls a job store, runs jobs with the registered handlers and applies
/// the retry policy.
pub struct JobExecutor<S: JobStore> {
    store: S,
    handlers: HashMap<String, JobHandler>,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a kind's [`type_name`](JobKind::type_name);
    /// `"*"` catches every kind without its own handler.
    pub fn register_handler<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> JobResult + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Box::new(handler));
    }

    fn handler_for(&self, kind: &JobKind) -> Option<&JobHandler> {
        self.handlers
            .get(kind.type_name())
            .or_else(|| self.handlers.get("*"))
    }

    pub fn spawn(self, config: JobExecutorConfig) -> std::io::Result<JobExecutorHandle>
    where
        S: Send,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let loop_stats = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || executor_loop(self, config, shutdown_rx, loop_stats))?;

        Ok(JobExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    /// Run one claimed job and persist the outcome.
    pub fn execute(&self, job: &mut Job) -> Execution {
        let started = Utc::now();

        let result = match self.handler_for(&job.kind) {
            Some(handler) => handler(job),
            None => JobResult::Failure(format!("no handler for job kind {}", job.kind.type_name())),
        };

        let outcome = match result {
            JobResult::Success => {
                job.mark_completed(started);
                Execution::Succeeded
            }
            JobResult::Failure(error) => {
                job.mark_failed(error.clone(), started);
                self.failed(job, error)
            }
            JobResult::RetryNow => {
                job.mark_failed("retry requested".to_string(), started);
                if job.status.is_retriable() {
                    job.scheduled_at = None;
                }
                self.failed(job, "retry requested".to_string())
            }
            JobResult::RetryAfter(delay) => {
                job.mark_failed("retry after delay".to_string(), started);
                if job.status.is_retriable() {
                    job.scheduled_at =
                        Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX));
                }
                self.failed(job, "retry after delay".to_string())
            }
        };

        let persisted = match &outcome {
            Execution::DeadLettered(error) => self.store.dead_letter(job.clone(), error.clone()),
            _ => self.store.update(job),
        };
        if let Err(e) = persisted {
            error!(job_id = %job.id, error = %e, "failed to persist job outcome");
        }

        outcome
    }

    fn failed(&self, job: &Job, error: String) -> Execution {
        if matches!(job.status, JobStatus::DeadLettered { .. }) {
            warn!(job_id = %job.id, kind = job.kind.type_name(), attempts = job.attempt, error = %error, "job dead-lettered");
            Execution::DeadLettered(error)
        } else {
            debug!(job_id = %job.id, attempt = job.attempt, error = %error, "job failed, will retry");
            Execution::WillRetry(error)
        }
    }

    /// Claim and run jobs until none is ready. Returns how many ran.
    pub fn drain(&self) -> usize {
        let mut ran = 0;
        while let Ok(Some(mut job)) = self.store.claim_next() {
            self.execute(&mut job);
            ran += 1;
        }
        ran
    }
}

fn executor_loop<S: JobStore + 'static>(
    executor: JobExecutor<S>,
    config: JobExecutorConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    info!(executor = %config.name, "job executor started");
    let start_time = Instant::now();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match executor.store.claim_next() {
            Ok(Some(mut job)) => {
                debug!(executor = %config.name, job_id = %job.id, kind = job.kind.type_name(), "claimed job");
                let outcome = executor.execute(&mut job);

                let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
                s.uptime_secs = start_time.elapsed().as_secs();
                s.jobs_processed += 1;
                match outcome {
                    Execution::Succeeded => s.jobs_succeeded += 1,
                    Execution::WillRetry(_) => s.jobs_failed += 1,
                    Execution::DeadLettered(_) => {
                        s.jobs_failed += 1;
                        s.jobs_dead_lettered += 1;
                    }
                }
            }
            Ok(None) => thread::sleep(config.poll_interval),
            Err(e) => {
                error!(executor = %config.name, error = %e, "failed to claim job");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(executor = %config.name, "job executor stopped");
}
