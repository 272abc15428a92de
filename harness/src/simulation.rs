//! Optimization impact simulation
//!
//! Produces a projected before/after comparison without touching the backend:
//! baseline measurements are drawn from realistic ranges, optimized values are
//! derived by applying random improvement factors, and the result goes through
//! the same threshold report as real measurements. A fixed seed makes every
//! run reproducible.

use crate::report::{
    Direction, Improvement, MetricReport, ThresholdSet, CACHE_HIT_RATE, ERROR_RATE,
    RESPONSE_TIME_AVG_MS, RESPONSE_TIME_P95_MS, THROUGHPUT_RPS,
};
use crate::stats;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Invalid simulation config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Number of simulated requests per phase
    pub samples: usize,
    /// Bounds of the per-metric improvement factor, as fractions
    pub improvement_range: (f64, f64),
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            samples: 500,
            improvement_range: (0.15, 0.45),
        }
    }
}

impl SimulationConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_improvement_range(mut self, low: f64, high: f64) -> Self {
        self.improvement_range = (low, high);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.samples == 0 {
            return Err("Samples must be greater than 0".to_string());
        }
        let (low, high) = self.improvement_range;
        if !(0.0..1.0).contains(&low) || !(0.0..1.0).contains(&high) || low > high {
            return Err(format!(
                "Improvement range must satisfy 0 <= low <= high < 1, got ({}, {})",
                low, high
            ));
        }
        Ok(())
    }
}

/// Point-in-time values for the tracked metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub response_time_avg_ms: f64,
    pub response_time_p95_ms: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub throughput_rps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationMetrics {
    pub baseline: MetricSnapshot,
    pub optimized: MetricSnapshot,
    pub improvements: Vec<Improvement>,
}

impl SimulationMetrics {
    pub fn overall_improvement(&self) -> f64 {
        crate::report::weighted_improvement(&self.improvements)
    }

    pub fn to_metric_report(&self, config: &SimulationConfig, thresholds: &ThresholdSet) -> MetricReport {
        let mut report = MetricReport::new("Optimization Impact Simulation", "simulation")
            .with_context("seed", config.seed.to_string())
            .with_context("samples", config.samples.to_string());

        let optimized = &self.optimized;
        report.add_from_set(thresholds, RESPONSE_TIME_AVG_MS, optimized.response_time_avg_ms, "ms");
        report.add_from_set(thresholds, RESPONSE_TIME_P95_MS, optimized.response_time_p95_ms, "ms");
        report.add_from_set(thresholds, ERROR_RATE, optimized.error_rate, "ratio");
        report.add_from_set(thresholds, CACHE_HIT_RATE, optimized.cache_hit_rate, "ratio");
        report.add_from_set(thresholds, THROUGHPUT_RPS, optimized.throughput_rps, "req/s");

        for improvement in &self.improvements {
            report.add_improvement(improvement.clone());
        }
        report
    }
}

// Category weights for the overall score
const RESPONSE_TIME_WEIGHT: f64 = 0.4;
const ERROR_RATE_WEIGHT: f64 = 0.2;
const CACHE_WEIGHT: f64 = 0.2;
const THROUGHPUT_WEIGHT: f64 = 0.2;

pub struct Simulator {
    config: SimulationConfig,
    rng: StdRng,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate().map_err(SimulationError::InvalidConfig)?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self { config, rng })
    }

    fn factor(&mut self) -> f64 {
        let (low, high) = self.config.improvement_range;
        self.rng.gen_range(low..=high)
    }

    pub fn run(&mut self) -> SimulationMetrics {
        let baseline_latencies: Vec<f64> = (0..self.config.samples)
            .map(|_| self.rng.gen_range(800.0..2400.0))
            .collect();
        let latency_factor = self.factor();
        let optimized_latencies: Vec<f64> = baseline_latencies
            .iter()
            .map(|ms| {
                // per-request jitter around the overall factor
                let jitter = self.rng.gen_range(-0.05..=0.05);
                ms * (1.0 - (latency_factor + jitter).clamp(0.0, 0.95))
            })
            .collect();

        let baseline_latency = stats::summarize(&baseline_latencies);
        let optimized_latency = stats::summarize(&optimized_latencies);

        let baseline_errors = self.rng.gen_range(0.02..0.08);
        let baseline_cache = self.rng.gen_range(0.35..0.65);
        let baseline_throughput = self.rng.gen_range(5.0..15.0);

        let error_factor = self.factor();
        let cache_factor = self.factor();
        let throughput_factor = self.factor();

        let baseline = MetricSnapshot {
            response_time_avg_ms: baseline_latency.avg_ms,
            response_time_p95_ms: baseline_latency.p95_ms,
            error_rate: baseline_errors,
            cache_hit_rate: baseline_cache,
            throughput_rps: baseline_throughput,
        };
        let optimized = MetricSnapshot {
            response_time_avg_ms: optimized_latency.avg_ms,
            response_time_p95_ms: optimized_latency.p95_ms,
            error_rate: baseline_errors * (1.0 - error_factor),
            // close part of the gap to a perfect hit rate
            cache_hit_rate: (baseline_cache + (1.0 - baseline_cache) * cache_factor).min(1.0),
            throughput_rps: baseline_throughput * (1.0 + throughput_factor),
        };

        let improvements = vec![
            Improvement::new(
                "response_time",
                baseline.response_time_avg_ms,
                optimized.response_time_avg_ms,
                RESPONSE_TIME_WEIGHT,
                Direction::AtMost,
            ),
            Improvement::new(
                "error_rate",
                baseline.error_rate,
                optimized.error_rate,
                ERROR_RATE_WEIGHT,
                Direction::AtMost,
            ),
            Improvement::new(
                "cache_hit_rate",
                baseline.cache_hit_rate,
                optimized.cache_hit_rate,
                CACHE_WEIGHT,
                Direction::AtLeast,
            ),
            Improvement::new(
                "throughput",
                baseline.throughput_rps,
                optimized.throughput_rps,
                THROUGHPUT_WEIGHT,
                Direction::AtLeast,
            ),
        ];

        let metrics = SimulationMetrics {
            baseline,
            optimized,
            improvements,
        };
        info!(
            "📈 Simulated overall improvement: {:+.1}%",
            metrics.overall_improvement()
        );
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_is_reproducible() {
        let config = SimulationConfig::default().with_seed(7).with_samples(100);
        let first = Simulator::new(config.clone()).unwrap().run();
        let second = Simulator::new(config).unwrap().run();
        assert_eq!(first.baseline, second.baseline);
        assert_eq!(first.optimized, second.optimized);
    }

    #[test]
    fn test_different_seeds_differ() {
        let first = Simulator::new(SimulationConfig::default().with_seed(1))
            .unwrap()
            .run();
        let second = Simulator::new(SimulationConfig::default().with_seed(2))
            .unwrap()
            .run();
        assert_ne!(first.baseline, second.baseline);
    }

    #[test]
    fn test_every_category_improves() {
        let metrics = Simulator::new(SimulationConfig::default()).unwrap().run();
        assert_eq!(metrics.improvements.len(), 4);
        for improvement in &metrics.improvements {
            assert!(
                improvement.percent() > 0.0,
                "{} did not improve",
                improvement.category
            );
        }
        let overall = metrics.overall_improvement();
        assert!(overall > 0.0 && overall < 100.0);
        assert!(metrics.optimized.cache_hit_rate <= 1.0);
    }

    #[test]
    fn test_zero_range_changes_nothing_but_latency_jitter() {
        let config = SimulationConfig::default().with_improvement_range(0.0, 0.0);
        let metrics = Simulator::new(config).unwrap().run();
        assert_eq!(metrics.baseline.error_rate, metrics.optimized.error_rate);
        assert_eq!(metrics.baseline.throughput_rps, metrics.optimized.throughput_rps);
    }

    #[test]
    fn test_invalid_config() {
        let err = Simulator::new(SimulationConfig::default().with_samples(0))
            .err()
            .unwrap();
        assert!(matches!(err, SimulationError::InvalidConfig(_)));
        assert!(err.to_string().contains("Samples must be greater than 0"));
        assert!(
            Simulator::new(SimulationConfig::default().with_improvement_range(0.5, 0.2)).is_err()
        );
        assert!(
            Simulator::new(SimulationConfig::default().with_improvement_range(0.1, 1.0)).is_err()
        );
    }

    #[test]
    fn test_report_contains_improvements() {
        let config = SimulationConfig::default();
        let metrics = Simulator::new(config.clone()).unwrap().run();
        let report = metrics.to_metric_report(&config, &ThresholdSet::default());

        assert_eq!(report.kind, "simulation");
        assert_eq!(report.improvements.len(), 4);
        assert_eq!(report.entries.len(), 5);
        let overall = report.overall_improvement.unwrap();
        assert!((overall - metrics.overall_improvement()).abs() < 1e-9);
        assert_eq!(report.context["seed"], "42");
    }
}
