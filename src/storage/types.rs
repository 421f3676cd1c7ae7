use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The feed database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// The referenced feed no longer exists
    #[error("Feed {0} no longer exists")]
    FeedNotFound(i64),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) messages
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub icon_url: Option<String>,
    pub last_updated: Option<i64>,
    pub is_active: bool,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            title: self.title,
            url: self.url,
            icon_url: self.icon_url,
            last_updated: self.last_updated.and_then(from_unix),
            is_active: self.is_active,
        }
    }
}

/// Internal row type for Article queries, converted via into_article()
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub guid: Option<String>,
    pub title: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<i64>,
    pub url: Option<String>,
    pub is_read: bool,
    pub is_bookmarked: bool,
    pub fetched_at: i64,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            feed_id: self.feed_id,
            guid: self.guid,
            title: self.title,
            content: self.content,
            summary: self.summary,
            author: self.author,
            published_at: self.published_at.and_then(from_unix),
            url: self.url,
            is_read: self.is_read,
            is_bookmarked: self.is_bookmarked,
            fetched_at: from_unix(self.fetched_at).unwrap_or_default(),
        }
    }
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

// ============================================================================
// Data Structures
// ============================================================================

/// A durable subscription record.
///
/// `last_updated` only advances after a successful import pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    /// Source URL of the RSS/Atom document
    pub url: String,
    pub icon_url: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Inactive feeds are skipped by batch refresh
    pub is_active: bool,
}

/// A persisted, deduplicated article owned by a feed.
///
/// Within a feed no two articles share a non-empty `url`; articles without
/// a `url` are unique by `title`.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub guid: Option<String>,
    pub title: String,
    /// Full description/content from the feed
    pub content: Option<String>,
    /// Plain-text excerpt of `content`
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub is_read: bool,
    pub is_bookmarked: bool,
    /// First time the importer saw the article
    pub fetched_at: DateTime<Utc>,
}
