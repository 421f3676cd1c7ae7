//! Feed retrieval and parsing.
//!
//! - [`date`] - ordered-format timestamp resolution
//! - [`parser`] - streaming RSS/Atom state machine producing a [`Channel`]
//! - [`fetcher`] - HTTP retrieval mapped onto the [`FeedError`](crate::error::FeedError) taxonomy
//!
//! # Example
//!
//! ```ignore
//! use feedsync::feed::{FetchClient, FetchOptions};
//!
//! let client = FetchClient::new(FetchOptions::default())?;
//! let channel = client.fetch_channel("https://example.com/feed.xml").await?;
//! println!("{} items", channel.items.len());
//! ```

mod date;
mod fetcher;
mod parser;

pub use date::parse_date;
pub use fetcher::{FetchClient, FetchOptions, DEFAULT_MAX_FEED_BYTES};
pub use parser::{
    parse_channel, parse_channel_str, Channel, DocumentParser, Item, ParseEvent, XmlEvents,
};
