//! # zerobase
//!
//! Config-driven pub/sub node: binds the configured publishers, subscribes
//! to the configured topics, logs every received message and optionally
//! publishes heartbeats until Ctrl-C.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a config found in the default locations
//! zerobase
//!
//! # Run with a custom config
//! zerobase --config /path/to/zerobase.toml
//!
//! # Export metrics
//! ZEROBASE_METRICS=true ZEROBASE_METRICS_PORT=9100 zerobase
//! ```

mod app;
mod config;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the node name
    #[arg(short, long)]
    name: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zerobase=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(name) = args.name {
        config.name = name;
    }

    tracing::info!(
        name = %config.name,
        publishers = config.publishers.len(),
        subscribers = config.subscribers.len(),
        "Starting zerobase node"
    );

    if config.metrics.enabled {
        metrics::init_metrics();
        metrics::start_metrics_server(config.metrics.port)?;
    }

    let node = app::build_node(&config);

    let stop = node.stop_handle();
    ctrlc::set_handler(move || stop.request_stop())
        .context("Failed to install Ctrl-C handler")?;

    node.run().context("Node failed")?;

    Ok(())
}
