//! Concurrency tests against an on-disk database.
//!
//! In-memory stores use SQLite's shared cache, which queues table locks
//! instead of reporting `SQLITE_BUSY`. These tests use a real file so writer
//! contention behaves as it does for the daemon.

use std::sync::Arc;

use feedsync::feed::{FetchClient, FetchOptions, Item};
use feedsync::storage::Database;
use feedsync::sync::{ConnectivityMonitor, RefreshOrchestrator};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestStore {
    db: Database,
    _tmpdir: TempDir,
}

async fn file_store() -> TestStore {
    let tmpdir = tempfile::tempdir().unwrap();
    let db_path = tmpdir.path().join("feeds.db");
    let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
    TestStore {
        db,
        _tmpdir: tmpdir,
    }
}

fn items(prefix: &str, count: usize) -> Vec<Item> {
    (0..count)
        .map(|i| Item {
            title: format!("{prefix} {i}"),
            link: Some(format!("https://example.com/{prefix}/{i}")),
            ..Item::default()
        })
        .collect()
}

fn rss(title: &str, count: usize) -> String {
    let entries: String = (0..count)
        .map(|i| format!("<item><title>{title} {i}</title><link>https://example.com/{title}/{i}</link></item>"))
        .collect();
    format!(r#"<rss version="2.0"><channel><title>{title}</title>{entries}</channel></rss>"#)
}

#[tokio::test]
async fn test_import_survives_concurrent_single_row_writes() {
    let store = file_store().await;
    let a = store
        .db
        .create_feed("https://a.example/rss", "A", None)
        .await
        .unwrap();
    let b_id = store
        .db
        .create_feed("https://b.example/rss", "B", None)
        .await
        .unwrap()
        .id;

    for round in 0..5 {
        let writer = {
            let db = store.db.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    db.mark_feed_refreshed(b_id).await.unwrap();
                }
            })
        };

        let created = store
            .db
            .import_articles(&a, &items(&format!("round{round}"), 200))
            .await
            .unwrap();
        assert_eq!(created, 200);
        writer.await.unwrap();
    }

    assert_eq!(store.db.fetch_articles(a.id).await.unwrap().len(), 1_000);
}

#[tokio::test]
async fn test_batch_with_empty_feeds_succeeds_on_disk() {
    let server = MockServer::start().await;
    let store = file_store().await;

    for i in 0..6 {
        // Half the feeds carry many items, half none, so zero-import passes
        // write `last_updated` while other feeds are mid-import
        let count = if i % 2 == 0 { 150 } else { 0 };
        let route = format!("/feed{i}.xml");
        Mock::given(method("GET"))
            .and(path(route.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&format!("feed{i}"), count)))
            .mount(&server)
            .await;
        store
            .db
            .create_feed(&format!("{}{route}", server.uri()), &format!("feed{i}"), None)
            .await
            .unwrap();
    }

    let client = FetchClient::new(FetchOptions::default()).unwrap();
    let monitor = Arc::new(ConnectivityMonitor::new(true));
    let orchestrator =
        RefreshOrchestrator::new(store.db.clone(), client, monitor).with_max_concurrent(4);

    let first = orchestrator.refresh_all(None).await.unwrap();
    assert_eq!(first.failed_feeds, 0);
    assert_eq!(first.total_new_articles, 450);

    // Every feed now imports nothing; all of them take the mark-refreshed path
    let second = orchestrator.refresh_all(None).await.unwrap();
    assert_eq!(second.failed_feeds, 0);
    assert_eq!(second.total_new_articles, 0);

    for feed in store.db.fetch_all_feeds().await.unwrap() {
        assert!(feed.last_updated.is_some(), "{} never refreshed", feed.title);
    }
}
