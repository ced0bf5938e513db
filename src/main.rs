//! InsightScope status collector binary

use clap::Parser;
use insightscope_collector::{Config, EndpointKind, HistoryView, Poller, Result};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(version, about = "Polls service health endpoints and keeps rolling status history")]
struct Args {
    /// JSON file listing the services to poll
    #[arg(long, env = "SERVICES_FILE")]
    services_file: Option<PathBuf>,

    /// Service shown by the metrics view
    #[arg(long, env = "SELECTED_SERVICE")]
    selected_service: Option<String>,

    /// Run a single round of every probe and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    let args = Args::parse();
    info!("Starting InsightScope collector v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env();
    if args.services_file.is_some() {
        config.services_file = args.services_file;
    }
    if args.selected_service.is_some() {
        config.selected_service = args.selected_service;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    let poller = match Poller::from_config(config) {
        Ok(poller) => poller,
        Err(e) => {
            error!("Failed to start poller: {}", e);
            std::process::exit(1);
        }
    };

    if args.once {
        run_once(&poller).await;
        return Ok(());
    }

    poller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to wait for shutdown signal: {}", e);
            }
        })
        .await;

    Ok(())
}

async fn run_once(poller: &Poller) {
    poller.refresh_status_views().await;
    let metrics = poller.metrics_tick().await;

    for service in poller.registry().iter() {
        for kind in EndpointKind::STATUS_VIEWS {
            let points = poller.snapshot(HistoryView::Status, &service.name, kind).await;
            if let Some(point) = points.last() {
                info!(
                    "{} {} -> status {} (count {:?})",
                    service.name,
                    kind,
                    point.status.as_u8(),
                    point.count
                );
            }
        }
    }

    info!(
        "{} metrics - requests: {:?}, failure rate: {:?}%, memory: {:?} MB",
        poller.selected_service().name,
        metrics.requests_per_second,
        metrics.failure_rate_percent,
        metrics.memory_mb
    );
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
