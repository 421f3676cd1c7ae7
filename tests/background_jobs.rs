//! Integration tests for the background scheduler and auto-sync trigger.
//!
//! Jobs run on `LocalPlatform` against wiremock feeds and an in-memory
//! database.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feedsync::feed::{FetchClient, FetchOptions, Item};
use feedsync::schedule::{
    BackgroundScheduler, Completion, LocalPlatform, SchedulerSettings, SchedulingPlatform,
    CLEANUP_JOB_ID, REFRESH_JOB_ID,
};
use feedsync::storage::Database;
use feedsync::sync::{AutoSync, ConnectivityMonitor, RefreshOrchestrator};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    db: Database,
    monitor: Arc<ConnectivityMonitor>,
    orchestrator: Arc<RefreshOrchestrator>,
    platform: Arc<LocalPlatform>,
    scheduler: Arc<BackgroundScheduler>,
}

async fn harness(budget: Duration, settings: SchedulerSettings) -> Harness {
    let db = Database::open(":memory:").await.unwrap();
    let monitor = Arc::new(ConnectivityMonitor::new(true));
    let client = FetchClient::new(FetchOptions::default()).unwrap();
    let orchestrator = Arc::new(
        RefreshOrchestrator::new(db.clone(), client, monitor.clone()).with_max_concurrent(2),
    );
    let platform = Arc::new(LocalPlatform::new(budget));
    let scheduler =
        BackgroundScheduler::new(platform.clone(), orchestrator.clone(), db.clone(), settings);
    scheduler.register().unwrap();
    Harness {
        db,
        monitor,
        orchestrator,
        platform,
        scheduler,
    }
}

fn rss(title: &str, count: usize) -> String {
    let items: String = (0..count)
        .map(|i| format!("<item><title>{title} {i}</title><link>https://example.com/{title}/{i}</link></item>"))
        .collect();
    format!(r#"<rss version="2.0"><channel><title>{title}</title>{items}</channel></rss>"#)
}

async fn next_completion(rx: &mut broadcast::Receiver<Completion>) -> Completion {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("job did not finish in time")
        .unwrap()
}

/// One fast feed and one that answers long after any deadline in these tests
async fn fast_and_slow_feeds(server: &MockServer, db: &Database) -> (i64, i64) {
    Mock::given(method("GET"))
        .and(path("/fast.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("fast", 3)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss("slow", 3))
                .set_delay(Duration::from_secs(20)),
        )
        .mount(server)
        .await;

    let fast = db
        .create_feed(&format!("{}/fast.xml", server.uri()), "fast", None)
        .await
        .unwrap();
    let slow = db
        .create_feed(&format!("{}/slow.xml", server.uri()), "slow", None)
        .await
        .unwrap();
    (fast.id, slow.id)
}

// ============================================================================
// Refresh job
// ============================================================================

#[tokio::test]
async fn test_refresh_job_succeeds_and_rearms() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("feed", 2)))
        .mount(&server)
        .await;

    let h = harness(Duration::from_secs(30), SchedulerSettings::default()).await;
    let feed = h
        .db
        .create_feed(&format!("{}/feed.xml", server.uri()), "feed", None)
        .await
        .unwrap();
    let mut rx = h.platform.subscribe_completions();

    h.platform.schedule_next(REFRESH_JOB_ID, Utc::now()).unwrap();

    let completion = next_completion(&mut rx).await;
    assert!(completion.success);
    assert!(!completion.expired);
    assert_eq!(h.db.fetch_articles(feed.id).await.unwrap().len(), 2);
    // Next run is armed even though this one finished
    assert!(h.platform.is_scheduled(REFRESH_JOB_ID));
}

#[tokio::test]
async fn test_refresh_deadline_keeps_committed_imports() {
    let server = MockServer::start().await;
    let settings = SchedulerSettings {
        refresh_deadline: Duration::from_millis(500),
        ..SchedulerSettings::default()
    };
    let h = harness(Duration::from_secs(30), settings).await;
    let (fast, slow) = fast_and_slow_feeds(&server, &h.db).await;
    let mut rx = h.platform.subscribe_completions();

    h.platform.schedule_next(REFRESH_JOB_ID, Utc::now()).unwrap();

    let completion = next_completion(&mut rx).await;
    assert!(!completion.success);
    assert!(!completion.expired);

    assert_eq!(h.db.fetch_articles(fast).await.unwrap().len(), 3);
    assert!(h.db.fetch_articles(slow).await.unwrap().is_empty());
    assert!(!h.orchestrator.status().borrow().is_running);
    assert!(h.platform.is_scheduled(REFRESH_JOB_ID));
}

#[tokio::test]
async fn test_platform_expiration_cancels_refresh() {
    let server = MockServer::start().await;
    let h = harness(Duration::from_millis(500), SchedulerSettings::default()).await;
    let (fast, _) = fast_and_slow_feeds(&server, &h.db).await;
    let mut rx = h.platform.subscribe_completions();

    h.platform.schedule_next(REFRESH_JOB_ID, Utc::now()).unwrap();

    let completion = next_completion(&mut rx).await;
    assert!(!completion.success);
    assert!(completion.expired);
    assert_eq!(h.db.fetch_articles(fast).await.unwrap().len(), 3);
}

// ============================================================================
// Cleanup job
// ============================================================================

#[tokio::test]
async fn test_cleanup_job_removes_old_read_articles() {
    let h = harness(Duration::from_secs(30), SchedulerSettings::default()).await;
    let feed = h
        .db
        .create_feed("https://example.com/rss", "cleanup", None)
        .await
        .unwrap();

    let item = |title: &str, days_ago: i64| Item {
        title: title.to_string(),
        link: Some(format!("https://example.com/{title}")),
        published_at: Some(Utc::now() - chrono::Duration::days(days_ago)),
        ..Item::default()
    };
    h.db.import_articles(
        &feed,
        &[item("old-read", 40), item("old-unread", 40), item("fresh-read", 1)],
    )
    .await
    .unwrap();
    for article in h.db.fetch_articles(feed.id).await.unwrap() {
        if article.title.ends_with("-read") {
            h.db.mark_article_read(article.id).await.unwrap();
        }
    }

    let mut rx = h.platform.subscribe_completions();
    h.platform.schedule_next(CLEANUP_JOB_ID, Utc::now()).unwrap();

    let completion = next_completion(&mut rx).await;
    assert_eq!(completion.job_id, CLEANUP_JOB_ID);
    assert!(completion.success);

    let mut left: Vec<_> = h
        .db
        .fetch_articles(feed.id)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.title)
        .collect();
    left.sort();
    assert_eq!(left, vec!["fresh-read", "old-unread"]);
    assert!(h.platform.is_scheduled(CLEANUP_JOB_ID));
}

#[tokio::test]
async fn test_start_arms_both_jobs() {
    let db = Database::open(":memory:").await.unwrap();
    let monitor = Arc::new(ConnectivityMonitor::new(true));
    let client = FetchClient::new(FetchOptions::default()).unwrap();
    let orchestrator = Arc::new(RefreshOrchestrator::new(db.clone(), client, monitor));
    let platform = Arc::new(LocalPlatform::default());
    let scheduler = BackgroundScheduler::new(
        platform.clone(),
        orchestrator,
        db,
        SchedulerSettings::default(),
    );

    scheduler.start().unwrap();

    assert!(platform.is_scheduled(REFRESH_JOB_ID));
    assert!(platform.is_scheduled(CLEANUP_JOB_ID));
    platform.shutdown();
}

// ============================================================================
// Auto-sync
// ============================================================================

#[tokio::test]
async fn test_reconnect_triggers_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("auto", 1)))
        .mount(&server)
        .await;

    let h = harness(Duration::from_secs(30), SchedulerSettings::default()).await;
    h.db.create_feed(&format!("{}/auto.xml", server.uri()), "auto", None)
        .await
        .unwrap();
    h.monitor.set_connected(false);

    let cancel = CancellationToken::new();
    let task = AutoSync::new(h.orchestrator.clone(), h.monitor.clone())
        .with_quiet_period(Duration::from_secs(300))
        .spawn(cancel.clone());
    tokio::task::yield_now().await;

    let mut status = h.orchestrator.status();
    h.monitor.set_connected(true);
    tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| s.last_result.is_some() && !s.is_running),
    )
    .await
    .unwrap()
    .unwrap();

    // Repeated "connected" and a flap inside the quiet period do nothing
    h.monitor.set_connected(true);
    h.monitor.set_connected(false);
    h.monitor.set_connected(true);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    cancel.cancel();
    task.await.unwrap();
    drop(h.scheduler);
}
