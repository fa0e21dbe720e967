//! Latency statistics over recorded outcomes.
//!
//! Percentiles are estimated with a TDigest built from the samples, so the
//! cost stays bounded for long histories.

use tdigests::TDigest;

use super::models::LatencySummary;

/// Compression used when building a digest from raw samples.
const COMPRESSION: usize = 100;

/// Summarize latency samples (milliseconds).
///
/// Returns `None` when there is nothing to summarize.
pub fn summarize_latencies(service_name: &str, samples: Vec<f64>) -> Option<LatencySummary> {
    let samples: Vec<f64> = samples.into_iter().filter(|v| v.is_finite()).collect();
    if samples.is_empty() {
        return None;
    }

    let count = samples.len();
    let min = samples.iter().copied().fold(f64::MAX, f64::min);
    let max = samples.iter().copied().fold(f64::MIN, f64::max);
    let avg = samples.iter().sum::<f64>() / count as f64;

    let mut td = TDigest::from_values(samples);
    td.compress(COMPRESSION);

    // Estimates can stray outside the observed range on tiny digests.
    let quantile = |q: f64| sanitize_float(td.estimate_quantile(q)).clamp(min, max);

    Some(LatencySummary {
        service_name: service_name.to_string(),
        samples: count,
        min_ms: min,
        avg_ms: avg,
        max_ms: max,
        p50_ms: quantile(0.50),
        p90_ms: quantile(0.90),
        p99_ms: quantile(0.99),
    })
}

fn sanitize_float(f: f64) -> f64 {
    if f.is_nan() || f.is_infinite() {
        0.0
    } else {
        f
    }
}
