//! Feed ingestion and synchronization engine.
//!
//! Fetches RSS/Atom documents, parses them with a tolerant streaming parser,
//! imports new items into SQLite without duplicates, and keeps feeds fresh
//! through batch refreshes driven by connectivity changes and a background
//! job scheduler.

pub mod config;
pub mod error;
pub mod feed;
pub mod schedule;
pub mod storage;
pub mod sync;
pub mod util;

pub use error::{BatchRefreshError, FeedError, NetworkCause};
