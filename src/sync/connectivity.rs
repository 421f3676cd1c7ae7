use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a single reachability probe may take before counting as offline
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffered connectivity notifications per subscriber
const CHANNEL_CAPACITY: usize = 16;

/// Source of network reachability for the refresh engine.
pub trait Connectivity: Send + Sync {
    /// Current reachability.
    fn is_connected(&self) -> bool;

    /// Stream of reachability observations. Repeated values are allowed;
    /// consumers decide what counts as a transition.
    fn subscribe(&self) -> broadcast::Receiver<bool>;
}

/// In-process connectivity state fed by [`set_connected`](Self::set_connected)
/// or by [`spawn_probe`].
#[derive(Debug)]
pub struct ConnectivityMonitor {
    connected: AtomicBool,
    tx: broadcast::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_connected: bool) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            connected: AtomicBool::new(initially_connected),
            tx,
        }
    }

    /// Record an observation and notify subscribers.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        // No subscribers is fine
        let _ = self.tx.send(connected);
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityMonitor {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Periodically probe `addr` (`host:port`) with a TCP connect and publish
/// changes to `monitor`.
///
/// Only changes are published, so subscribers see one notification per
/// transition. The loop exits when `cancel` fires.
pub fn spawn_probe(
    monitor: Arc<ConnectivityMonitor>,
    addr: String,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let reachable = matches!(
                tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&addr)).await,
                Ok(Ok(_))
            );

            if reachable != monitor.is_connected() {
                tracing::info!(addr = %addr, connected = reachable, "Connectivity changed");
                monitor.set_connected(reachable);
            }
        }

        tracing::debug!(addr = %addr, "Connectivity probe stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_monitor_broadcasts_every_observation() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_connected(true);
        monitor.set_connected(true);

        assert!(monitor.is_connected());
        assert!(rx.recv().await.unwrap());
        assert!(rx.recv().await.unwrap());
    }

    #[tokio::test]
    async fn test_probe_detects_reachable_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();
        let handle = spawn_probe(
            monitor.clone(),
            addr,
            Duration::from_millis(20),
            cancel.clone(),
        );

        let observed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(observed);
        assert!(monitor.is_connected());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_reports_unreachable_port() {
        // Bind then drop to get a port nothing listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let monitor = Arc::new(ConnectivityMonitor::new(true));
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();
        let handle = spawn_probe(
            monitor.clone(),
            addr,
            Duration::from_millis(20),
            cancel.clone(),
        );

        let observed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!observed);

        cancel.cancel();
        handle.await.unwrap();
    }
}
