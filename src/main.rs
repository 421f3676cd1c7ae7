use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use feedsync::config::Config;
use feedsync::feed::FetchClient;
use feedsync::schedule::{BackgroundScheduler, LocalPlatform};
use feedsync::storage::{Database, DatabaseError};
use feedsync::sync::{spawn_probe, AutoSync, ConnectivityMonitor, RefreshOrchestrator};
use feedsync::util::validate_url;

/// Get the config directory path (~/.config/feedsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedsync"))
}

#[derive(Parser, Debug)]
#[command(name = "feedsync", about = "Keeps a local store of RSS/Atom feeds in sync")]
struct Args {
    /// Config file (default: ~/.config/feedsync/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (default: ~/.config/feedsync/feeds.db)
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Subscribe to a feed URL before starting (repeatable)
    #[arg(long = "add-feed", value_name = "URL")]
    add_feed: Vec<String>,

    /// Run a single batch refresh and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args
        .database
        .clone()
        .unwrap_or_else(|| config_dir.join("feeds.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another feedsync instance appears to be running. Please close it and try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let client = FetchClient::new(config.fetch_options()).context("Failed to build HTTP client")?;

    for url in &args.add_feed {
        subscribe(&db, &client, url).await?;
    }

    let shutdown = CancellationToken::new();
    let monitor = Arc::new(ConnectivityMonitor::new(true));
    let probe = config
        .connectivity_probe
        .clone()
        .map(|addr| spawn_probe(monitor.clone(), addr, config.probe_interval(), shutdown.clone()));

    let orchestrator = Arc::new(
        RefreshOrchestrator::new(db.clone(), client, monitor.clone())
            .with_max_concurrent(config.max_concurrent_fetches),
    );

    if args.once {
        let outcome = orchestrator.refresh_all(None).await;
        shutdown.cancel();
        return match outcome {
            Ok(batch) => {
                println!(
                    "Refreshed {} feeds, {} new articles",
                    batch.successful_feeds, batch.total_new_articles
                );
                Ok(())
            }
            Err(e) => {
                if let Some(batch) = &e.result {
                    for failed in batch.results.iter().filter(|r| !r.success) {
                        if let Some(error) = &failed.error {
                            eprintln!("  {}: {}", failed.feed_title, error);
                        }
                    }
                }
                if let Some(hint) = e.error.recovery_suggestion() {
                    eprintln!("{}", hint);
                }
                Err(e.into())
            }
        };
    }

    let platform = Arc::new(LocalPlatform::default());
    let scheduler = BackgroundScheduler::new(
        platform.clone(),
        orchestrator.clone(),
        db.clone(),
        config.scheduler_settings(),
    );
    scheduler.start().context("Failed to schedule background jobs")?;

    let auto_sync = AutoSync::new(orchestrator.clone(), monitor.clone())
        .with_quiet_period(config.quiet_period())
        .spawn(shutdown.clone());

    tracing::info!(database = %db_path.display(), "feedsync running, press Ctrl-C to stop");

    // Kick off an initial refresh so a fresh start does not wait a full interval
    let initial = {
        let orchestrator = orchestrator.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.refresh_all_until(&cancel, None).await {
                tracing::warn!(error = %e, "Initial refresh failed");
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    shutdown.cancel();
    platform.shutdown();
    let _ = initial.await;
    let _ = auto_sync.await;
    if let Some(probe) = probe {
        let _ = probe.await;
    }

    Ok(())
}

/// Fetch a feed once to learn its title, then store the subscription.
async fn subscribe(db: &Database, client: &FetchClient, url: &str) -> Result<()> {
    let url = validate_url(url).with_context(|| format!("Invalid feed URL '{}'", url))?;

    let channel = match client.fetch_channel(url.as_str()).await {
        Ok(channel) => channel,
        Err(e) => {
            if let Some(hint) = e.recovery_suggestion() {
                eprintln!("{}", hint);
            }
            return Err(e).with_context(|| format!("Failed to subscribe to {}", url));
        }
    };

    let feed = db
        .create_feed(url.as_str(), &channel.title, channel.icon_url.as_deref())
        .await
        .context("Failed to save feed")?;
    let created = db
        .import_articles(&feed, &channel.items)
        .await
        .context("Failed to import articles")?;

    println!("Subscribed to {} ({} articles)", feed.title, created);
    Ok(())
}
