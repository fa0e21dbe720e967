//! Configuration module for the latency monitor.
//!
//! Server settings come from environment variables with sensible defaults;
//! the probe set and scheduling settings come from a YAML monitor document.

mod monitor;
mod source;

pub use monitor::*;
pub use source::*;

use std::env;
use std::path::PathBuf;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the dashboard API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "data/monitoring.db")
    pub db_path: PathBuf,
    /// Path to the monitor document (default: "config/config.yaml")
    pub config_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: PathBuf::from("data/monitoring.db"),
            config_path: PathBuf::from("config/config.yaml"),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LATENCY_MONITOR_HTTP_PORT`: HTTP port (default: 8080)
    /// - `LATENCY_MONITOR_DB_PATH`: Database file path (default: "data/monitoring.db")
    /// - `LATENCY_MONITOR_CONFIG`: Monitor document path (default: "config/config.yaml")
    pub fn load() -> Self {
        Self::load_from(|key| env::var(key).ok())
    }

    fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = lookup("LATENCY_MONITOR_HTTP_PORT").and_then(|p| p.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("LATENCY_MONITOR_DB_PATH") {
            cfg.db_path = PathBuf::from(db_path);
        }

        if let Some(config_path) = lookup("LATENCY_MONITOR_CONFIG") {
            cfg.config_path = PathBuf::from(config_path);
        }

        cfg
    }
}
