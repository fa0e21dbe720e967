//! Monitor document: global settings plus the probe definitions.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::Level;

use crate::probe::{AgentKind, Probe};

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    settings: RawSettings,
    services: Vec<RawService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    interval: u64,
    log_level: String,
}

#[derive(Debug, Deserialize)]
struct RawService {
    name: String,
    agent: String,
    target: String,
    #[serde(default)]
    domain: Option<String>,
    /// Seconds
    #[serde(default)]
    timeout: Option<f64>,
}

/// Global scheduling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub interval: Duration,
    pub log_level: Level,
}

/// One configured probe, with its protocol resolved at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeDefinition {
    pub name: String,
    pub probe: Probe,
    pub timeout: Duration,
}

impl ProbeDefinition {
    pub fn kind(&self) -> AgentKind {
        self.probe.kind()
    }

    pub fn target(&self) -> &str {
        self.probe.target()
    }
}

/// A service entry whose agent kind is not supported.
///
/// Kept out of the probe set; the scheduler reports it every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedDefinition {
    pub name: String,
    pub agent: String,
}

/// Validated monitor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub settings: Settings,
    pub services: Vec<ProbeDefinition>,
    pub rejected: Vec<RejectedDefinition>,
}

impl MonitorConfig {
    /// Read and validate the document at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse and validate a YAML document.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw: RawDocument = serde_yaml::from_str(text)?;

        if raw.settings.interval < 1 {
            return Err(ConfigError::Invalid("settings.interval must be at least 1 second".to_string()));
        }
        let settings = Settings {
            interval: Duration::from_secs(raw.settings.interval),
            log_level: parse_log_level(&raw.settings.log_level)?,
        };

        let mut names = HashSet::new();
        let mut services = Vec::with_capacity(raw.services.len());
        let mut rejected = Vec::new();

        for (i, svc) in raw.services.into_iter().enumerate() {
            let name = svc.name.trim().to_string();
            if name.is_empty() {
                return Err(ConfigError::Invalid(format!("services[{}]: name is empty", i)));
            }
            if !names.insert(name.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate service name {:?}", name)));
            }
            let target = svc.target.trim().to_string();
            if target.is_empty() {
                return Err(ConfigError::Invalid(format!("service {:?}: target is empty", name)));
            }

            let kind = match svc.agent.parse::<AgentKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    rejected.push(RejectedDefinition { name, agent: svc.agent });
                    continue;
                }
            };

            let timeout = match svc.timeout {
                None => kind.default_timeout(),
                Some(secs) => match Duration::try_from_secs_f64(secs) {
                    Ok(timeout) if !timeout.is_zero() => timeout,
                    _ => {
                        return Err(ConfigError::Invalid(format!(
                            "service {:?}: timeout must be a positive number of seconds, got {}",
                            name, secs
                        )))
                    }
                },
            };

            let probe = match kind {
                AgentKind::Ping => Probe::Ping { host: target },
                AgentKind::Http => Probe::Http { url: target },
                AgentKind::Dns => {
                    let domain = svc
                        .domain
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty())
                        .ok_or_else(|| {
                            ConfigError::Invalid(format!("dns service {:?} requires a domain", name))
                        })?;
                    Probe::Dns { server: target, domain }
                }
            };

            services.push(ProbeDefinition { name, probe, timeout });
        }

        Ok(Self {
            settings,
            services,
            rejected,
        })
    }
}

/// Accepts the usual level names, including `warning` and `critical`.
fn parse_log_level(level: &str) -> Result<Level, ConfigError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" | "critical" | "fatal" => Ok(Level::ERROR),
        other => Err(ConfigError::Invalid(format!("unknown log level {:?}", other))),
    }
}
