//! Database model types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::probe::AgentKind;

/// One recorded probe execution. Immutable once written.
///
/// `latestStatus` rows use the same shape: the newest outcome of a service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    /// Surrogate row id; 0 until stored.
    pub id: i64,
    pub service_name: String,
    pub agent_type: AgentKind,
    pub target: String,
    /// Probe completion time
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// Milliseconds; never present on a failed outcome.
    pub response_time: Option<f64>,
}

/// Uptime over a window for one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UptimeStat {
    pub service_name: String,
    pub total_checks: i64,
    pub successful_checks: i64,
    pub uptime_percent: f64,
}

/// Latency distribution of a service's successful probes, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    pub service_name: String,
    pub samples: usize,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
}
