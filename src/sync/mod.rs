//! Refresh orchestration and connectivity-driven synchronization.
//!
//! - [`refresh`] - single-flight batch refresh with per-feed serialization
//! - [`connectivity`] - reachability source and TCP probe
//! - [`auto`] - edge-triggered refresh on reconnect
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use feedsync::sync::{ConnectivityMonitor, RefreshOrchestrator};
//!
//! let monitor = Arc::new(ConnectivityMonitor::new(true));
//! let orchestrator = RefreshOrchestrator::new(db, client, monitor);
//! match orchestrator.refresh_all(None).await {
//!     Ok(batch) => println!("{} new articles", batch.total_new_articles),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```

mod auto;
mod connectivity;
mod refresh;

pub use auto::{AutoSync, AutoSyncOutcome, DEFAULT_QUIET_PERIOD};
pub use connectivity::{spawn_probe, Connectivity, ConnectivityMonitor};
pub use refresh::{
    BatchRefreshResult, RefreshOrchestrator, RefreshResult, RefreshStatus, DEFAULT_MAX_CONCURRENT,
};
