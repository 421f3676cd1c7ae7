use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::{Article, ArticleDbRow, DatabaseError};

/// Rows read per query when listing a feed's articles
const ARTICLE_PAGE_SIZE: i64 = 500;

impl Database {
    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Every article of one feed, newest first.
    ///
    /// Reads in pages of [`ARTICLE_PAGE_SIZE`] rows; nothing is truncated.
    pub async fn fetch_articles(&self, feed_id: i64) -> Result<Vec<Article>, DatabaseError> {
        let mut articles = Vec::new();
        loop {
            let page = self
                .fetch_articles_page(feed_id, articles.len() as i64, ARTICLE_PAGE_SIZE)
                .await?;
            let last = (page.len() as i64) < ARTICLE_PAGE_SIZE;
            articles.extend(page);
            if last {
                return Ok(articles);
            }
        }
    }

    /// One page of a feed's articles in the same order as [`fetch_articles`](Self::fetch_articles)
    pub async fn fetch_articles_page(
        &self,
        feed_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Article>, DatabaseError> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(
            r#"
            SELECT id, feed_id, guid, title, content, summary, author,
                   published_at, url, is_read, is_bookmarked, fetched_at
            FROM articles
            WHERE feed_id = ?
            ORDER BY published_at DESC, fetched_at DESC, id
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(feed_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// Whether `feed_id` already has an article matching the dedup key.
    ///
    /// With a URL the match is by URL; without one it is by title among the
    /// feed's URL-less articles.
    pub async fn exists_article(
        &self,
        feed_id: i64,
        url: Option<&str>,
        title: &str,
    ) -> Result<bool, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(article_exists(&mut *conn, feed_id, url, title).await?)
    }

    /// Number of unread articles in a feed
    pub async fn unread_count(&self, feed_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ? AND is_read = 0")
                .bind(feed_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Mark article as read (idempotent), returns whether it was changed
    pub async fn mark_article_read(&self, article_id: i64) -> Result<bool, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let result = sqlx::query("UPDATE articles SET is_read = 1 WHERE id = ? AND is_read = 0")
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically toggle the bookmark flag, returning the new value
    pub async fn toggle_article_bookmarked(&self, article_id: i64) -> Result<bool, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let (bookmarked,): (bool,) = sqlx::query_as(
            "UPDATE articles SET is_bookmarked = NOT is_bookmarked WHERE id = ? RETURNING is_bookmarked",
        )
        .bind(article_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(bookmarked)
    }

    /// Delete read articles published (or, lacking a date, first seen) before
    /// `cutoff` in a single statement. Returns the number removed.
    pub async fn delete_read_articles_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let result = sqlx::query(
            "DELETE FROM articles WHERE is_read = 1 AND COALESCE(published_at, fetched_at) < ?",
        )
        .bind(cutoff.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Dedup lookup usable both on a pooled connection and inside a transaction.
pub(crate) async fn article_exists(
    conn: &mut SqliteConnection,
    feed_id: i64,
    url: Option<&str>,
    title: &str,
) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) = match url {
        Some(url) => {
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM articles WHERE feed_id = ? AND url = ?)")
                .bind(feed_id)
                .bind(url)
                .fetch_one(&mut *conn)
                .await?
        }
        None => {
            sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM articles WHERE feed_id = ? AND url IS NULL AND title = ?)",
            )
            .bind(feed_id)
            .bind(title)
            .fetch_one(&mut *conn)
            .await?
        }
    };
    Ok(exists)
}
