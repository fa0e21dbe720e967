//! Probe module for network monitoring.
//!
//! Supports HTTP, DNS, and Ping probes behind one bounded `execute` call.

mod dns;
mod http;
mod ping;

pub use dns::*;
pub use http::*;
pub use ping::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Extra time a protocol gets past its budget before it is abandoned.
const TIMEOUT_GRACE: Duration = Duration::from_millis(250);

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("resolution failed: {0}")]
    Resolve(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

/// Probe protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Ping,
    Http,
    Dns,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Ping => "ping",
            AgentKind::Http => "http",
            AgentKind::Dns => "dns",
        }
    }

    /// Budget used when a service does not set its own timeout.
    pub fn default_timeout(&self) -> Duration {
        match self {
            AgentKind::Ping => Duration::from_secs(1),
            AgentKind::Http => Duration::from_secs(5),
            AgentKind::Dns => Duration::from_secs(5),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown agent kind: {0}")]
pub struct UnknownAgentKind(pub String);

impl FromStr for AgentKind {
    type Err = UnknownAgentKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ping" => Ok(AgentKind::Ping),
            "http" => Ok(AgentKind::Http),
            "dns" => Ok(AgentKind::Dns),
            _ => Err(UnknownAgentKind(s.to_string())),
        }
    }
}

/// A resolved probe: the protocol together with its own parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Ping { host: String },
    Http { url: String },
    /// Resolve `domain`'s A record against the nameserver `server`.
    Dns { server: String, domain: String },
}

impl Probe {
    pub fn kind(&self) -> AgentKind {
        match self {
            Probe::Ping { .. } => AgentKind::Ping,
            Probe::Http { .. } => AgentKind::Http,
            Probe::Dns { .. } => AgentKind::Dns,
        }
    }

    /// The configured target string (host, URL or nameserver).
    pub fn target(&self) -> &str {
        match self {
            Probe::Ping { host } => host,
            Probe::Http { url } => url,
            Probe::Dns { server, .. } => server,
        }
    }

    /// Run the probe once within `timeout`.
    ///
    /// Failures are data: any error is logged and reported as a failed
    /// result without latency.
    pub async fn execute(&self, timeout: Duration) -> ProbeResult {
        let attempt = async {
            match self {
                Probe::Ping { host } => run_ping_probe(host, timeout).await,
                Probe::Http { url } => run_http_probe(url, timeout).await,
                Probe::Dns { server, domain } => run_dns_probe(server, domain, timeout).await,
            }
        };

        let result = match tokio::time::timeout(timeout.saturating_add(TIMEOUT_GRACE), attempt).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        };

        match result {
            Ok(latency) if latency < timeout => ProbeResult::up(latency),
            Ok(_) => {
                tracing::warn!("{} probe of {} exceeded {:?}", self.kind(), self.target(), timeout);
                ProbeResult::down()
            }
            Err(e) => {
                tracing::warn!("{} probe of {} failed: {}", self.kind(), self.target(), e);
                ProbeResult::down()
            }
        }
    }
}

/// Result of one probe execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub success: bool,
    /// Round-trip in milliseconds; only present on success.
    pub latency_ms: Option<f64>,
}

impl ProbeResult {
    pub fn up(latency: Duration) -> Self {
        Self {
            success: true,
            latency_ms: Some(latency.as_secs_f64() * 1000.0),
        }
    }

    pub fn down() -> Self {
        Self {
            success: false,
            latency_ms: None,
        }
    }
}
