use chrono::Utc;

use super::articles::article_exists;
use super::schema::Database;
use super::types::{DatabaseError, Feed};
use crate::feed::Item;
use crate::util::{excerpt, strip_control_chars};

/// Plain-text summary length stored alongside the full content
const SUMMARY_CHARS: usize = 280;

impl Database {
    /// Merge parsed items into `feed`, skipping ones it already has.
    ///
    /// The whole batch (new articles plus the `last_updated` bump) commits as
    /// one transaction. Writers are serialized through the write gate so the
    /// existence check and the insert cannot interleave with another import.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::FeedNotFound` when the feed was deleted, in
    /// which case nothing is written.
    pub async fn import_articles(&self, feed: &Feed, items: &[Item]) -> Result<usize, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        // Take the write lock up front so the first read does not leave a
        // deferred upgrade to fail against another connection
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let (present,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM feeds WHERE id = ?)")
            .bind(feed.id)
            .fetch_one(&mut *tx)
            .await?;
        if !present {
            return Err(DatabaseError::FeedNotFound(feed.id));
        }

        let now = Utc::now().timestamp();
        let mut created = 0usize;

        for item in items {
            let url = item
                .link
                .as_deref()
                .map(str::trim)
                .filter(|link| !link.is_empty());

            if article_exists(&mut *tx, feed.id, url, &item.title).await? {
                tracing::debug!(feed_id = feed.id, title = %item.title, "Skipping known article");
                continue;
            }

            let summary = item
                .description
                .as_deref()
                .map(|d| excerpt(&strip_control_chars(d), SUMMARY_CHARS))
                .filter(|s| !s.is_empty());

            sqlx::query(
                r#"
                INSERT INTO articles
                    (feed_id, guid, title, content, summary, author, published_at, url, is_read, fetched_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
            )
            .bind(feed.id)
            .bind(&item.guid)
            .bind(&item.title)
            .bind(&item.description)
            .bind(summary)
            .bind(&item.author)
            .bind(item.published_at.map(|d| d.timestamp()))
            .bind(url)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            created += 1;
        }

        if created > 0 {
            sqlx::query("UPDATE feeds SET last_updated = ? WHERE id = ?")
                .bind(now)
                .bind(feed.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            feed_id = feed.id,
            received = items.len(),
            created,
            "Imported articles"
        );
        Ok(created)
    }
}
