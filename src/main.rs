//! pgbridge - Main entry point.
//!
//! Connects to PostgreSQL and serves host calls as line-delimited JSON over
//! stdin/stdout. Logs go to stderr.

use clap::Parser;
use pgbridge::bridge::Bridge;
use pgbridge::config::Config;
use pgbridge::db::Database;
use pgbridge::transport::{StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// stdout carries host responses, so every layer writes to stderr.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    let db = Arc::new(Database::from_store(&config));
    info!(
        db = %db.settings().masked_url(),
        "Starting pgbridge v{}",
        env!("CARGO_PKG_VERSION")
    );

    // A failed start is not fatal, but there is no retry: every call
    // answers with its sentinel until the process is restarted.
    if !db.initialize().await {
        warn!("Database unavailable, serving calls in not-ready state");
    }

    let transport = StdioTransport::new(Bridge::new(Arc::clone(&db)));
    info!(transport = transport.name(), "Transport ready");
    let result = transport.run().await;

    db.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Transport error");
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}
