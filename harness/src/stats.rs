//! Aggregate statistics over in-memory samples.
//!
//! Percentiles use plain sort-and-index with no interpolation, matching the
//! numbers the team's dashboards have always reported.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Latency statistics for a set of requests, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Value at fraction `p` of an ascending slice.
///
/// Index is `floor(len * p)` clamped to the last element. Empty input yields 0.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
    let index = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Summarize latency samples in milliseconds. Non-finite samples are dropped.
pub fn summarize(samples_ms: &[f64]) -> LatencySummary {
    let mut sorted: Vec<f64> = samples_ms.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return LatencySummary::default();
    }
    sorted.sort_by(f64::total_cmp);

    LatencySummary {
        count: sorted.len() as u64,
        min_ms: sorted[0],
        max_ms: sorted[sorted.len() - 1],
        avg_ms: mean(&sorted),
        p50_ms: percentile(&sorted, 0.50),
        p95_ms: percentile(&sorted, 0.95),
        p99_ms: percentile(&sorted, 0.99),
    }
}

pub fn summarize_durations(samples: &[Duration]) -> LatencySummary {
    let ms: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
    summarize(&ms)
}

/// Fraction of failed operations, 0 when nothing ran
pub fn error_rate(failures: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        failures as f64 / total as f64
    }
}

/// Operations per second, 0 for a zero-length window
pub fn throughput(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}
