//! Reloadable source of the monitor configuration.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::MonitorConfig;

/// Hands out the configuration for each tick.
///
/// A file-backed source re-reads its document on every call and falls back
/// to the last configuration that loaded cleanly.
pub struct ConfigSource {
    path: Option<PathBuf>,
    last_good: RwLock<Arc<MonitorConfig>>,
}

impl ConfigSource {
    /// A source that always returns `config`.
    pub fn fixed(config: MonitorConfig) -> Self {
        Self {
            path: None,
            last_good: RwLock::new(Arc::new(config)),
        }
    }

    /// A source backed by `path`, seeded with the startup configuration.
    pub fn file(path: impl Into<PathBuf>, initial: MonitorConfig) -> Self {
        Self {
            path: Some(path.into()),
            last_good: RwLock::new(Arc::new(initial)),
        }
    }

    /// The configuration to use right now.
    pub async fn current(&self) -> Arc<MonitorConfig> {
        let Some(path) = &self.path else {
            return self.last_good.read().await.clone();
        };

        let path = path.clone();
        let loaded = tokio::task::spawn_blocking(move || MonitorConfig::load(&path)).await;

        let fresh = match loaded {
            Ok(Ok(cfg)) => cfg,
            Ok(Err(e)) => {
                tracing::warn!("Config reload failed, keeping last good configuration: {}", e);
                return self.last_good.read().await.clone();
            }
            Err(e) => {
                tracing::warn!("Config reload task failed: {}", e);
                return self.last_good.read().await.clone();
            }
        };

        let mut guard = self.last_good.write().await;
        if **guard != fresh {
            tracing::info!(
                "Configuration changed: {} services, interval {:?}",
                fresh.services.len(),
                fresh.settings.interval
            );
            *guard = Arc::new(fresh);
        }
        guard.clone()
    }
}
