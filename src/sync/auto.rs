use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::connectivity::Connectivity;
use super::refresh::RefreshOrchestrator;

/// Skip reconnect refreshes when a batch succeeded this recently
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(5 * 60);

/// What a connectivity observation led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoSyncOutcome {
    /// Not an offline-to-online transition
    NoEdge,
    /// Reconnected, but the last success is within the quiet period
    QuietPeriod,
    /// Reconnected and the batch refresh ran cleanly
    Refreshed,
    /// Reconnected and the batch refresh reported an error (logged)
    Failed,
}

/// Refreshes all feeds when the network comes back.
///
/// Edge-triggered: only a disconnected-to-connected transition counts, and
/// it is ignored if a batch succeeded within the quiet period.
pub struct AutoSync {
    orchestrator: Arc<RefreshOrchestrator>,
    connectivity: Arc<dyn Connectivity>,
    quiet_period: Duration,
    was_connected: bool,
}

impl AutoSync {
    pub fn new(orchestrator: Arc<RefreshOrchestrator>, connectivity: Arc<dyn Connectivity>) -> Self {
        let was_connected = connectivity.is_connected();
        Self {
            orchestrator,
            connectivity,
            quiet_period: DEFAULT_QUIET_PERIOD,
            was_connected,
        }
    }

    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.quiet_period = quiet_period;
        self
    }

    /// Run until `cancel` fires or the connectivity source goes away.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut rx = self.connectivity.subscribe();
        // Re-read after subscribing so a change in between is not lost
        self.was_connected = self.connectivity.is_connected();

        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(connected) => connected,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Connectivity notifications lagged, resyncing");
                        self.connectivity.is_connected()
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            self.observe(connected, &cancel).await;
        }

        tracing::debug!("Auto-sync stopped");
    }

    /// Feed one connectivity observation through the trigger.
    pub async fn observe(&mut self, connected: bool, cancel: &CancellationToken) -> AutoSyncOutcome {
        let reconnected = connected && !self.was_connected;
        self.was_connected = connected;
        if !reconnected {
            return AutoSyncOutcome::NoEdge;
        }

        let last_success = self.orchestrator.status().borrow().last_success_at;
        if within_quiet_period(last_success, self.quiet_period) {
            tracing::debug!("Reconnected, skipping refresh during quiet period");
            return AutoSyncOutcome::QuietPeriod;
        }

        tracing::info!("Reconnected, refreshing feeds");
        match self.orchestrator.refresh_all_until(cancel, None).await {
            Ok(batch) => {
                tracing::info!(new_articles = batch.total_new_articles, "Auto-sync complete");
                AutoSyncOutcome::Refreshed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Auto-sync refresh failed");
                AutoSyncOutcome::Failed
            }
        }
    }
}

fn within_quiet_period(last_success: Option<Instant>, quiet_period: Duration) -> bool {
    last_success.is_some_and(|at| at.elapsed() < quiet_period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FetchClient, FetchOptions};
    use crate::storage::Database;
    use crate::sync::ConnectivityMonitor;

    async fn setup(connected: bool) -> (AutoSync, Arc<RefreshOrchestrator>, Arc<ConnectivityMonitor>) {
        let db = Database::open(":memory:").await.unwrap();
        let monitor = Arc::new(ConnectivityMonitor::new(connected));
        let client = FetchClient::new(FetchOptions::default()).unwrap();
        let orchestrator = Arc::new(RefreshOrchestrator::new(db, client, monitor.clone()));
        let auto = AutoSync::new(orchestrator.clone(), monitor.clone());
        (auto, orchestrator, monitor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_period_window() {
        let quiet = Duration::from_secs(300);
        assert!(!within_quiet_period(None, quiet));

        let at = Instant::now();
        assert!(within_quiet_period(Some(at), quiet));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!within_quiet_period(Some(at), quiet));
    }

    #[tokio::test]
    async fn test_only_rising_edge_triggers() {
        let (mut auto, _, monitor) = setup(false).await;
        let cancel = CancellationToken::new();

        assert_eq!(auto.observe(false, &cancel).await, AutoSyncOutcome::NoEdge);

        // No feeds are subscribed, so the triggered batch reports NoActiveFeeds
        monitor.set_connected(true);
        assert_eq!(auto.observe(true, &cancel).await, AutoSyncOutcome::Failed);
        assert_eq!(auto.observe(true, &cancel).await, AutoSyncOutcome::NoEdge);

        assert_eq!(auto.observe(false, &cancel).await, AutoSyncOutcome::NoEdge);
        assert_eq!(auto.observe(true, &cancel).await, AutoSyncOutcome::Failed);
    }

    #[tokio::test]
    async fn test_recent_success_suppresses_refresh() {
        let (auto, orchestrator, _) = setup(false).await;
        let mut auto = auto.with_quiet_period(Duration::from_secs(300));
        let cancel = CancellationToken::new();

        orchestrator
            .status
            .send_modify(|status| status.last_success_at = Some(Instant::now()));

        assert_eq!(auto.observe(true, &cancel).await, AutoSyncOutcome::QuietPeriod);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (auto, _, _) = setup(true).await;
        let cancel = CancellationToken::new();
        let handle = auto.spawn(cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
