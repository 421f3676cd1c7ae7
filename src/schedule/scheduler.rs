use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::platform::{BackgroundTask, JobHandler, ScheduleError, SchedulingPlatform};
use crate::error::{BatchRefreshError, FeedError};
use crate::storage::Database;
use crate::sync::{BatchRefreshResult, RefreshOrchestrator};

pub const REFRESH_JOB_ID: &str = "feedsync.refresh";
pub const CLEANUP_JOB_ID: &str = "feedsync.cleanup";

/// Timing for the two background jobs
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub refresh_interval: Duration,
    pub cleanup_interval: Duration,
    /// Hard cap on a refresh run, independent of the platform budget
    pub refresh_deadline: Duration,
    /// Read articles older than this are deleted by cleanup
    pub retention: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(15 * 60),
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
            refresh_deadline: Duration::from_secs(25),
            retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Binds batch refresh and retention cleanup to a [`SchedulingPlatform`].
///
/// Both jobs re-arm themselves at the start of every run, so a run that is
/// cut short still leaves the next one scheduled.
pub struct BackgroundScheduler {
    platform: Arc<dyn SchedulingPlatform>,
    orchestrator: Arc<RefreshOrchestrator>,
    db: Database,
    settings: SchedulerSettings,
}

impl BackgroundScheduler {
    pub fn new(
        platform: Arc<dyn SchedulingPlatform>,
        orchestrator: Arc<RefreshOrchestrator>,
        db: Database,
        settings: SchedulerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            platform,
            orchestrator,
            db,
            settings,
        })
    }

    /// Register both job handlers with the platform.
    pub fn register(self: &Arc<Self>) -> Result<(), ScheduleError> {
        self.platform
            .register(REFRESH_JOB_ID, Arc::new(RefreshJob(Arc::downgrade(self))))?;
        self.platform
            .register(CLEANUP_JOB_ID, Arc::new(CleanupJob(Arc::downgrade(self))))?;
        Ok(())
    }

    /// Register and arm both jobs for their first run.
    pub fn start(self: &Arc<Self>) -> Result<(), ScheduleError> {
        self.register()?;
        self.schedule_refresh()?;
        self.schedule_cleanup()?;
        tracing::info!(
            refresh_interval_secs = self.settings.refresh_interval.as_secs(),
            cleanup_interval_secs = self.settings.cleanup_interval.as_secs(),
            "Background jobs scheduled"
        );
        Ok(())
    }

    pub fn schedule_refresh(&self) -> Result<(), ScheduleError> {
        self.platform
            .schedule_next(REFRESH_JOB_ID, after(self.settings.refresh_interval))
    }

    pub fn schedule_cleanup(&self) -> Result<(), ScheduleError> {
        self.platform
            .schedule_next(CLEANUP_JOB_ID, after(self.settings.cleanup_interval))
    }

    /// One refresh run: re-arm, then race the batch against the deadline and
    /// the platform's expiration.
    ///
    /// Whichever loses is cancelled. Feeds whose import already committed
    /// stay persisted.
    pub async fn run_refresh(&self, task: BackgroundTask) {
        if let Err(e) = self.schedule_refresh() {
            tracing::warn!(error = %e, "Failed to re-arm refresh job");
        }

        let cancel = CancellationToken::new();
        let work = self.orchestrator.refresh_all_until(&cancel, None);
        tokio::pin!(work);

        let finished = tokio::select! {
            result = &mut work => Some(result),
            _ = tokio::time::sleep(self.settings.refresh_deadline) => {
                tracing::warn!(
                    deadline_secs = self.settings.refresh_deadline.as_secs(),
                    "Background refresh hit its deadline"
                );
                None
            }
            _ = task.expiration().cancelled() => {
                tracing::warn!("Background refresh expired by the platform");
                None
            }
        };

        let success = match finished {
            Some(result) => refresh_succeeded(&result),
            None => {
                cancel.cancel();
                // Let the batch observe cancellation and settle its status
                let _ = work.await;
                false
            }
        };

        task.complete(success);
    }

    /// One cleanup run: re-arm, then drop read articles past retention.
    pub async fn run_cleanup(&self, task: BackgroundTask) {
        if let Err(e) = self.schedule_cleanup() {
            tracing::warn!(error = %e, "Failed to re-arm cleanup job");
        }

        let retention = chrono::Duration::from_std(self.settings.retention)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let success = tokio::select! {
            result = self.db.delete_read_articles_older_than(cutoff) => match result {
                Ok(removed) => {
                    tracing::info!(removed, "Removed old read articles");
                    true
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Article cleanup failed");
                    false
                }
            },
            _ = task.expiration().cancelled() => false,
        };

        task.complete(success);
    }
}

/// Partial failures and an empty subscription list still count as a
/// completed run for the platform's bookkeeping.
fn refresh_succeeded(result: &Result<BatchRefreshResult, BatchRefreshError>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => matches!(
            e.error,
            FeedError::PartialFailure { .. } | FeedError::NoActiveFeeds
        ),
    }
}

fn after(interval: Duration) -> chrono::DateTime<Utc> {
    let interval = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(interval)
        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
}

struct RefreshJob(Weak<BackgroundScheduler>);

#[async_trait]
impl JobHandler for RefreshJob {
    async fn run(&self, task: BackgroundTask) {
        match self.0.upgrade() {
            Some(scheduler) => scheduler.run_refresh(task).await,
            None => task.complete(false),
        }
    }
}

struct CleanupJob(Weak<BackgroundScheduler>);

#[async_trait]
impl JobHandler for CleanupJob {
    async fn run(&self, task: BackgroundTask) {
        match self.0.upgrade() {
            Some(scheduler) => scheduler.run_cleanup(task).await,
            None => task.complete(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_success_rules() {
        assert!(refresh_succeeded(&Ok(BatchRefreshResult::default())));

        let partial = BatchRefreshError::new(FeedError::PartialFailure {
            failed: 1,
            total: 2,
        });
        assert!(refresh_succeeded(&Err(partial)));
        assert!(refresh_succeeded(&Err(BatchRefreshError::new(
            FeedError::NoActiveFeeds
        ))));

        for error in [
            FeedError::CompleteFailure("down".into()),
            FeedError::Cancelled,
            FeedError::AlreadyRunning,
        ] {
            assert!(!refresh_succeeded(&Err(BatchRefreshError::new(error))));
        }
    }

    #[test]
    fn test_after_saturates() {
        assert_eq!(after(Duration::MAX), chrono::DateTime::<Utc>::MAX_UTC);
        assert!(after(Duration::from_secs(60)) > Utc::now());
    }

    #[test]
    fn test_default_settings() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.refresh_deadline, Duration::from_secs(25));
        assert_eq!(settings.retention, Duration::from_secs(30 * 86_400));
    }
}
