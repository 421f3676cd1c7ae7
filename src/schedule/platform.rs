use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default time a single run may take before the platform expires it
pub const DEFAULT_RUN_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("No handler registered for job '{0}'")]
    UnknownJob(String),

    #[error("A handler is already registered for job '{0}'")]
    AlreadyRegistered(String),

    #[error("The scheduling platform has shut down")]
    ShutDown,
}

/// Work bound to a job identifier.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, task: BackgroundTask);
}

/// A host facility that runs registered jobs in time-boxed slots.
pub trait SchedulingPlatform: Send + Sync {
    fn register(&self, job_id: &str, handler: Arc<dyn JobHandler>) -> Result<(), ScheduleError>;

    /// Request one run of `job_id` no earlier than `earliest_start`.
    ///
    /// A newer request replaces a pending one for the same job.
    fn schedule_next(&self, job_id: &str, earliest_start: DateTime<Utc>) -> Result<(), ScheduleError>;
}

// ============================================================================
// Background Task
// ============================================================================

/// Context handed to a job for one run.
///
/// The platform fires [`expiration`](Self::expiration) when the run is being
/// preempted. The job reports its outcome with [`complete`](Self::complete);
/// dropping the task without completing reports failure.
#[derive(Debug)]
pub struct BackgroundTask {
    job_id: String,
    expiration: CancellationToken,
    completion: Option<oneshot::Sender<bool>>,
}

impl BackgroundTask {
    pub fn new(job_id: &str, expiration: CancellationToken, completion: oneshot::Sender<bool>) -> Self {
        Self {
            job_id: job_id.to_string(),
            expiration,
            completion: Some(completion),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn expiration(&self) -> &CancellationToken {
        &self.expiration
    }

    pub fn complete(mut self, success: bool) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(success);
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if let Some(tx) = self.completion.take() {
            tracing::warn!(job_id = %self.job_id, "Background task dropped without completing");
            let _ = tx.send(false);
        }
    }
}

// ============================================================================
// Local Platform
// ============================================================================

/// Record of one finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub job_id: String,
    pub success: bool,
    /// The platform expired the run before it completed
    pub expired: bool,
}

/// In-process [`SchedulingPlatform`] backed by tokio timers.
///
/// Every run gets a fixed budget; when it runs out the task's expiration
/// token fires and the job is expected to wind down and complete.
#[derive(Clone)]
pub struct LocalPlatform {
    inner: Arc<Inner>,
}

struct Inner {
    budget: Duration,
    handlers: Mutex<HashMap<String, Arc<dyn JobHandler>>>,
    /// Pending run per job, tagged with a generation so a run can tell
    /// whether it is still the current request
    pending: Mutex<HashMap<String, (u64, JoinHandle<()>)>>,
    generation: std::sync::atomic::AtomicU64,
    completions: Mutex<Vec<Completion>>,
    completion_tx: broadcast::Sender<Completion>,
    shutdown: CancellationToken,
}

impl LocalPlatform {
    pub fn new(budget: Duration) -> Self {
        let (completion_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                budget,
                handlers: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                generation: std::sync::atomic::AtomicU64::new(0),
                completions: Mutex::new(Vec::new()),
                completion_tx,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Finished runs, oldest first
    pub fn completions(&self) -> Vec<Completion> {
        lock(&self.inner.completions).clone()
    }

    /// Notified after each run finishes
    pub fn subscribe_completions(&self) -> broadcast::Receiver<Completion> {
        self.inner.completion_tx.subscribe()
    }

    /// Whether a run of `job_id` is waiting to start
    pub fn is_scheduled(&self, job_id: &str) -> bool {
        lock(&self.inner.pending).contains_key(job_id)
    }

    /// Stop all pending runs and refuse new requests. Running jobs see
    /// their expiration fire.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        for (_, (_, handle)) in lock(&self.inner.pending).drain() {
            handle.abort();
        }
    }
}

impl Default for LocalPlatform {
    fn default() -> Self {
        Self::new(DEFAULT_RUN_BUDGET)
    }
}

impl SchedulingPlatform for LocalPlatform {
    fn register(&self, job_id: &str, handler: Arc<dyn JobHandler>) -> Result<(), ScheduleError> {
        let mut handlers = lock(&self.inner.handlers);
        if handlers.contains_key(job_id) {
            return Err(ScheduleError::AlreadyRegistered(job_id.to_string()));
        }
        handlers.insert(job_id.to_string(), handler);
        tracing::debug!(job_id = %job_id, "Registered background job");
        Ok(())
    }

    fn schedule_next(&self, job_id: &str, earliest_start: DateTime<Utc>) -> Result<(), ScheduleError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ScheduleError::ShutDown);
        }
        let handler = lock(&self.inner.handlers)
            .get(job_id)
            .cloned()
            .ok_or_else(|| ScheduleError::UnknownJob(job_id.to_string()))?;

        let delay = (earliest_start - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let generation = self
            .inner
            .generation
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let inner = self.inner.clone();
        let id = job_id.to_string();
        // Held across spawn so the run cannot look itself up before it is recorded
        let mut pending = lock(&self.inner.pending);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let current = {
                let mut pending = lock(&inner.pending);
                let current = pending.get(&id).is_some_and(|(g, _)| *g == generation);
                if current {
                    pending.remove(&id);
                }
                current
            };
            if !current {
                // Superseded by a newer request
                return;
            }

            inner.run_once(&id, handler).await;
        });

        if let Some((_, previous)) = pending.insert(job_id.to_string(), (generation, handle)) {
            previous.abort();
        }
        drop(pending);
        tracing::debug!(job_id = %job_id, delay_secs = delay.as_secs(), "Scheduled background job");
        Ok(())
    }
}

impl Inner {
    async fn run_once(&self, job_id: &str, handler: Arc<dyn JobHandler>) {
        let expiration = self.shutdown.child_token();
        let (tx, rx) = oneshot::channel();
        let task = BackgroundTask::new(job_id, expiration.clone(), tx);

        let budget = self.budget;
        let timer = expiration.clone();
        let budget_timer = tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(budget) => timer.cancel(),
            }
        });

        tracing::debug!(job_id = %job_id, "Running background job");
        handler.run(task).await;

        let expired = expiration.is_cancelled();
        budget_timer.abort();
        let success = rx.await.unwrap_or(false);

        tracing::info!(job_id = %job_id, success, expired, "Background job finished");
        let completion = Completion {
            job_id: job_id.to_string(),
            success,
            expired,
        };
        lock(&self.completions).push(completion.clone());
        let _ = self.completion_tx.send(completion);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
