use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::connectivity::Connectivity;
use crate::error::{BatchRefreshError, FeedError};
use crate::feed::FetchClient;
use crate::storage::{Database, Feed};

/// Default number of feeds fetched at the same time
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

// ============================================================================
// Results
// ============================================================================

/// Outcome of refreshing one feed. Failures are carried, not returned.
#[derive(Debug, Clone)]
pub struct RefreshResult {
    pub feed_id: i64,
    pub feed_title: String,
    pub success: bool,
    pub error: Option<FeedError>,
    pub new_articles: usize,
}

impl RefreshResult {
    fn succeeded(feed: &Feed, new_articles: usize) -> Self {
        Self {
            feed_id: feed.id,
            feed_title: feed.title.clone(),
            success: true,
            error: None,
            new_articles,
        }
    }

    fn failed(feed: &Feed, error: FeedError) -> Self {
        Self {
            feed_id: feed.id,
            feed_title: feed.title.clone(),
            success: false,
            error: Some(error),
            new_articles: 0,
        }
    }
}

/// Aggregate of one batch refresh. `results` is in completion order.
#[derive(Debug, Clone, Default)]
pub struct BatchRefreshResult {
    pub total_feeds: usize,
    pub successful_feeds: usize,
    pub failed_feeds: usize,
    pub results: Vec<RefreshResult>,
    pub total_new_articles: usize,
}

impl BatchRefreshResult {
    pub fn is_complete_success(&self) -> bool {
        self.failed_feeds == 0
    }

    pub fn is_partial_success(&self) -> bool {
        self.successful_feeds > 0 && self.failed_feeds > 0
    }

    pub fn is_complete_failure(&self) -> bool {
        self.successful_feeds == 0 && self.failed_feeds > 0
    }

    fn record(&mut self, result: RefreshResult) {
        if result.success {
            self.successful_feeds += 1;
            self.total_new_articles += result.new_articles;
        } else {
            self.failed_feeds += 1;
        }
        self.results.push(result);
    }

    /// Number of feeds attempted so far
    fn completed(&self) -> usize {
        self.results.len()
    }
}

/// Observable orchestrator state, written only by the task driving a batch.
#[derive(Debug, Clone, Default)]
pub struct RefreshStatus {
    pub is_running: bool,
    /// Fraction of feeds completed in the current (or last) batch, 0.0..=1.0
    pub progress: f64,
    pub last_result: Option<BatchRefreshResult>,
    /// When a batch last refreshed at least one feed successfully
    pub last_success_at: Option<Instant>,
}

/// Clears `is_running` however the batch ends, including cancellation.
struct RunningGuard<'a>(&'a watch::Sender<RefreshStatus>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|status| status.is_running = false);
    }
}

type FeedLocks = std::sync::Mutex<HashMap<i64, Arc<Mutex<()>>>>;

/// Shared handle on one feed's mutex. The map entry is removed when the last
/// lease goes away, including when a refresh is cancelled mid-flight.
struct FeedLockLease<'a> {
    locks: &'a FeedLocks,
    feed_id: i64,
    lock: Arc<Mutex<()>>,
}

impl FeedLockLease<'_> {
    fn mutex(&self) -> &Mutex<()> {
        &self.lock
    }
}

impl Drop for FeedLockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this lease remain; new leases need the map lock
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.feed_id);
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Coordinates fetch, parse and import across feeds.
///
/// Batches are single-flight. Work on any one feed is serialized, so a
/// [`refresh_one`](Self::refresh_one) call racing a batch over the same
/// feed waits its turn instead of interleaving imports.
pub struct RefreshOrchestrator {
    db: Database,
    client: FetchClient,
    connectivity: Arc<dyn Connectivity>,
    max_concurrent: usize,
    batch_guard: Mutex<()>,
    feed_locks: FeedLocks,
    pub(super) status: watch::Sender<RefreshStatus>,
}

impl RefreshOrchestrator {
    pub fn new(db: Database, client: FetchClient, connectivity: Arc<dyn Connectivity>) -> Self {
        let (status, _) = watch::channel(RefreshStatus::default());
        Self {
            db,
            client,
            connectivity,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            batch_guard: Mutex::new(()),
            feed_locks: std::sync::Mutex::new(HashMap::new()),
            status,
        }
    }

    /// Bound on concurrent fetches within a batch (minimum 1)
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Subscribe to status updates
    pub fn status(&self) -> watch::Receiver<RefreshStatus> {
        self.status.subscribe()
    }

    /// True when online and no batch is running
    pub fn can_refresh(&self) -> bool {
        self.connectivity.is_connected() && !self.status.borrow().is_running
    }

    /// Refresh a single feed.
    ///
    /// Never fails: errors are reported in the returned [`RefreshResult`].
    pub async fn refresh_one(&self, feed: &Feed) -> RefreshResult {
        if !self.connectivity.is_connected() {
            return RefreshResult::failed(feed, FeedError::NetworkUnavailable);
        }

        let lease = self.feed_lock(feed.id);
        let _serial = lease.mutex().lock().await;

        match self.refresh_locked(feed).await {
            Ok(created) => {
                tracing::debug!(feed_id = feed.id, new_articles = created, "Feed refreshed");
                RefreshResult::succeeded(feed, created)
            }
            Err(e) => {
                tracing::warn!(
                    feed_id = feed.id,
                    title = %feed.title,
                    network = e.is_network(),
                    error = %e,
                    "Feed refresh failed"
                );
                RefreshResult::failed(feed, e)
            }
        }
    }

    async fn refresh_locked(&self, feed: &Feed) -> Result<usize, FeedError> {
        let channel = self.client.fetch_channel(&feed.url).await?;

        if feed.icon_url.is_none() {
            if let Some(icon) = channel.icon_url.as_deref() {
                self.db.fill_feed_icon(feed.id, icon).await?;
            }
        }

        let created = self.db.import_articles(feed, &channel.items).await?;
        if created == 0 {
            // The importer only bumps last_updated when it adds something
            self.db.mark_feed_refreshed(feed.id).await?;
        }
        Ok(created)
    }

    fn feed_lock(&self, feed_id: i64) -> FeedLockLease<'_> {
        let mut locks = self
            .feed_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        FeedLockLease {
            locks: &self.feed_locks,
            feed_id,
            lock: locks.entry(feed_id).or_default().clone(),
        }
    }

    /// Refresh every active feed.
    ///
    /// See [`refresh_all_until`](Self::refresh_all_until).
    pub async fn refresh_all(
        &self,
        progress_tx: Option<mpsc::Sender<(usize, usize)>>,
    ) -> Result<BatchRefreshResult, BatchRefreshError> {
        self.refresh_all_until(&CancellationToken::new(), progress_tx)
            .await
    }

    /// Refresh every active feed, stopping early if `cancel` fires.
    ///
    /// Feeds are fetched concurrently up to the configured bound. After each
    /// feed completes, `(completed, total)` is sent on `progress_tx`. The
    /// batch is classified only once every feed has been attempted:
    ///
    /// - all succeeded: `Ok`
    /// - some failed: `PartialFailure` with the full result attached
    /// - all failed: `CompleteFailure` with the full result attached
    ///
    /// On cancellation in-flight feeds are dropped (their uncommitted imports
    /// roll back) and `Cancelled` is returned with what completed so far.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if another batch is in progress, `NoActiveFeeds` if
    /// nothing is subscribed or everything is paused.
    pub async fn refresh_all_until(
        &self,
        cancel: &CancellationToken,
        progress_tx: Option<mpsc::Sender<(usize, usize)>>,
    ) -> Result<BatchRefreshResult, BatchRefreshError> {
        let Ok(_batch) = self.batch_guard.try_lock() else {
            tracing::debug!("Batch refresh already running");
            return Err(BatchRefreshError::new(FeedError::AlreadyRunning));
        };

        self.status.send_modify(|status| {
            status.is_running = true;
            status.progress = 0.0;
        });
        let _running = RunningGuard(&self.status);

        let feeds = self
            .db
            .fetch_active_feeds()
            .await
            .map_err(|e| BatchRefreshError::new(e.into()))?;
        if feeds.is_empty() {
            return Err(BatchRefreshError::new(FeedError::NoActiveFeeds));
        }

        let total = feeds.len();
        tracing::info!(feeds = total, "Starting batch refresh");

        let mut pending = stream::iter(feeds)
            .map(|feed| async move { self.refresh_one(&feed).await }.boxed())
            .buffer_unordered(self.max_concurrent);

        let mut batch = BatchRefreshResult {
            total_feeds: total,
            ..BatchRefreshResult::default()
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(
                        completed = batch.completed(),
                        total,
                        "Batch refresh cancelled"
                    );
                    self.status.send_modify(|status| status.last_result = Some(batch.clone()));
                    return Err(BatchRefreshError::with_result(FeedError::Cancelled, batch));
                }
                next = pending.next() => {
                    let Some(result) = next else { break };
                    batch.record(result);

                    let done = batch.completed();
                    self.status.send_modify(|status| {
                        status.progress = done as f64 / total as f64;
                    });
                    if let Some(tx) = &progress_tx {
                        // A slow receiver must not hold the batch past cancellation
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {}
                            sent = tx.send((done, total)) => {
                                if let Err(e) = sent {
                                    tracing::debug!(error = %e, "Progress receiver dropped");
                                }
                            }
                        }
                    }
                }
            }
        }
        drop(pending);

        tracing::info!(
            total,
            successful = batch.successful_feeds,
            failed = batch.failed_feeds,
            new_articles = batch.total_new_articles,
            "Batch refresh finished"
        );

        self.status.send_modify(|status| {
            status.last_result = Some(batch.clone());
            if batch.successful_feeds > 0 {
                status.last_success_at = Some(Instant::now());
            }
        });

        if batch.is_complete_failure() {
            let reason = batch
                .results
                .iter()
                .find_map(|r| r.error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(BatchRefreshError::with_result(
                FeedError::CompleteFailure(reason),
                batch,
            ));
        }
        if batch.is_partial_success() {
            let error = FeedError::PartialFailure {
                failed: batch.failed_feeds,
                total,
            };
            return Err(BatchRefreshError::with_result(error, batch));
        }
        Ok(batch)
    }
}
