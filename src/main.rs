//! Latency Monitor - periodic ping, HTTP and DNS checks with a SQLite history.

mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use config::{ConfigSource, MonitorConfig, ServerConfig};
use db::Store;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let cfg = ServerConfig::load();
    let monitor = MonitorConfig::load(&cfg.config_path)?;

    // Initialize logging; RUST_LOG wins over the document's logLevel
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(format!(
            "latency_monitor={}",
            monitor.settings.log_level.as_str().to_lowercase()
        )),
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    tracing::info!("Starting latency monitor on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path.display());
    tracing::info!(
        "Loaded {} services from {} ({} rejected)",
        monitor.services.len(),
        cfg.config_path.display(),
        monitor.rejected.len()
    );

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Start scheduler
    let source = Arc::new(ConfigSource::file(cfg.config_path.clone(), monitor));
    let scheduler = Arc::new(Scheduler::new(store.clone(), source));
    let runner = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    // Start web server
    let server = Server::new(&cfg, store);
    let served = server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await;

    scheduler.stop();
    if let Err(e) = runner.await {
        tracing::error!("Scheduler task failed: {}", e);
    }

    served
}
