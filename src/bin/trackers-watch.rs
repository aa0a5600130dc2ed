//! Follow a live event from the terminal.
//!
//! Logs every config, route, value and sequence change of the subscribed
//! topics until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use url::Url;

use trackers_sync::core::constants::RIDERS_POINTS;
use trackers_sync::prelude::*;

/// Watch a tracker event
#[derive(Parser, Debug)]
#[command(name = "trackers-watch")]
#[command(version)]
#[command(about = "Follow a live tracker event and log its updates", long_about = None)]
struct Cli {
    /// Event base URL, e.g. https://host/tour-2024
    #[arg(env = "TRACKERS_BASE_URL")]
    base_url: Url,

    /// Topics to subscribe to (`topic` or `topic.entity`)
    #[arg(short, long = "topic", default_value = RIDERS_POINTS)]
    topics: Vec<String>,

    /// Client build fingerprint compared with the server's
    #[arg(long, env = "TRACKERS_CLIENT_HASH")]
    client_hash: Option<String>,

    /// Snapshot storage key (defaults to the URL path)
    #[arg(long, env = "TRACKERS_STORAGE_KEY")]
    storage_key: Option<String>,

    /// Directory for session snapshots; kept in memory when unset
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Logs what the session reports.
struct LogObserver;

impl SyncObserver for LogObserver {
    fn on_config_replaced(&self, config: &Value) {
        let riders = config
            .get("riders")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        info!(riders, "config");
    }

    fn on_routes_replaced(&self, _routes: &Value) {
        info!("routes");
    }

    fn on_sequence_reconciled(&self, topic: &str, entity: &str, result: &SyncResult) {
        info!(
            topic,
            entity,
            removed = result.old_items.len(),
            added = result.new_items.len(),
            total = result.new_list.len(),
            "sequence"
        );
    }

    fn on_values(&self, topic: &str, entity: &str, values: &Value) {
        info!(topic, entity, %values, "values");
    }

    fn on_connection_status(&self, text: &str) {
        info!(status = %text.replace('\n', " | "), "connection");
    }

    fn on_error(&self, error: &str) {
        warn!(%error, "sync error");
    }

    fn on_client_stale(&self, server_hash: &str) {
        warn!(%server_hash, "server runs a newer client build");
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut builder = ClientConfig::builder(cli.base_url);
    if let Some(hash) = cli.client_hash {
        builder = builder.client_hash(hash);
    }
    if let Some(key) = cli.storage_key {
        builder = builder.storage_key(key);
    }
    let config = builder.build();

    let storage: Arc<dyn SnapshotStorage> = match &cli.state_dir {
        Some(dir) => Arc::new(FileStorage::open(dir)?),
        None => Arc::new(MemoryStorage::new()),
    };

    let client = TrackerClient::launch(config, Arc::new(LogObserver), storage)?;
    for topic in &cli.topics {
        client.subscribe(topic.as_str())?;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "waiting for ctrl-c failed");
    }
    info!("shutting down");
    client.shutdown().await;
    Ok(())
}
