use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedDbRow};

const FEED_COLUMNS: &str = "id, title, url, icon_url, last_updated, is_active";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe to a feed, returning the stored record.
    ///
    /// Subscribing to an existing URL updates its title (and icon, when one
    /// is given) and returns the existing record.
    pub async fn create_feed(
        &self,
        url: &str,
        title: &str,
        icon_url: Option<&str>,
    ) -> Result<Feed, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let row: FeedDbRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO feeds (title, url, icon_url)
            VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                icon_url = COALESCE(excluded.icon_url, feeds.icon_url)
            RETURNING {}
        "#,
            FEED_COLUMNS
        ))
        .bind(title)
        .bind(url)
        .bind(icon_url)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(feed_id = row.id, url = %url, "Subscribed to feed");
        Ok(row.into_feed())
    }

    /// Get a single feed by ID
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let row: Option<FeedDbRow> =
            sqlx::query_as(&format!("SELECT {} FROM feeds WHERE id = ?", FEED_COLUMNS))
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(FeedDbRow::into_feed))
    }

    /// All feeds, active or not, ordered by title
    pub async fn fetch_all_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(&format!(
            "SELECT {} FROM feeds ORDER BY title, id",
            FEED_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    /// Feeds that take part in batch refresh, ordered by title
    pub async fn fetch_active_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(&format!(
            "SELECT {} FROM feeds WHERE is_active = 1 ORDER BY title, id",
            FEED_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    /// Pause or resume a feed
    pub async fn set_feed_active(&self, feed_id: i64, active: bool) -> Result<(), DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let result = sqlx::query("UPDATE feeds SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::FeedNotFound(feed_id));
        }
        Ok(())
    }

    /// Advance `last_updated` to now after a successful import pass
    pub async fn mark_feed_refreshed(&self, feed_id: i64) -> Result<(), DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("UPDATE feeds SET last_updated = ? WHERE id = ?")
            .bind(now)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::FeedNotFound(feed_id));
        }
        Ok(())
    }

    /// Record the channel's icon unless the feed already has one
    pub async fn fill_feed_icon(&self, feed_id: i64, icon_url: &str) -> Result<bool, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let result =
            sqlx::query("UPDATE feeds SET icon_url = ? WHERE id = ? AND icon_url IS NULL")
                .bind(icon_url)
                .bind(feed_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Unsubscribe; the feed's articles are removed by cascade
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
