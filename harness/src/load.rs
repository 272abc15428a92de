//! Native load generator
//!
//! Spawns `concurrency` workers that cycle through a probe mix until a shared
//! stop flag is raised by a timer task or the request cap is reached. Requests
//! are never retried while under load; every attempt is one sample.

use crate::probe::Probe;
use crate::report::{
    MetricReport, Threshold, ThresholdSet, CACHE_HIT_RATE, ERROR_RATE, RESPONSE_TIME_AVG_MS,
    RESPONSE_TIME_P95_MS, RESPONSE_TIME_P99_MS, THROUGHPUT_RPS,
};
use crate::stats::{self, LatencySummary};
use api_client::BackendProvider;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum LoadTestError {
    #[error("Invalid load test configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestConfig {
    pub concurrency: usize,
    pub duration: Duration,
    /// Pause between requests of the same worker
    pub think_time: Duration,
    /// Request mix; workers start at different offsets
    pub probes: Vec<Probe>,
    /// Optional cap on total requests across workers
    pub max_requests: Option<u64>,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            duration: Duration::from_secs(30),
            think_time: Duration::from_millis(100),
            probes: vec![Probe::Health, Probe::ListPrompts, Probe::sample_execute()],
            max_requests: None,
        }
    }
}

impl LoadTestConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn with_probes(mut self, probes: Vec<Probe>) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_max_requests(mut self, max_requests: u64) -> Self {
        self.max_requests = Some(max_requests);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("Concurrency must be at least 1".to_string());
        }
        if self.duration.is_zero() {
            return Err("Duration must be greater than 0".to_string());
        }
        if self.probes.is_empty() {
            return Err("At least one probe is required".to_string());
        }
        if self.max_requests == Some(0) {
            return Err("max_requests must be greater than 0 when set".to_string());
        }
        Ok(())
    }
}

/// One request made under load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSample {
    pub worker: usize,
    pub probe: String,
    pub latency_ms: f64,
    pub success: bool,
    pub error_kind: Option<String>,
    pub cached: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeStats {
    pub requests: u64,
    pub failures: u64,
    pub latency: LatencySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestReport {
    pub concurrency: usize,
    pub elapsed: Duration,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub error_rate: f64,
    pub throughput_rps: f64,
    pub latency: LatencySummary,
    /// Share of cache hits among responses that report caching, if any did
    pub cache_hit_rate: Option<f64>,
    pub per_probe: BTreeMap<String, ProbeStats>,
    pub errors_by_kind: BTreeMap<String, u64>,
}

impl LoadTestReport {
    pub fn from_samples(samples: &[RequestSample], concurrency: usize, elapsed: Duration) -> Self {
        let total_requests = samples.len() as u64;
        let successes = samples.iter().filter(|s| s.success).count() as u64;
        let failures = total_requests - successes;

        // Latency covers successful requests only
        let ok_latencies: Vec<f64> = samples
            .iter()
            .filter(|s| s.success)
            .map(|s| s.latency_ms)
            .collect();

        let mut per_probe_samples: BTreeMap<String, Vec<&RequestSample>> = BTreeMap::new();
        for sample in samples {
            per_probe_samples
                .entry(sample.probe.clone())
                .or_default()
                .push(sample);
        }
        let per_probe = per_probe_samples
            .into_iter()
            .map(|(probe, group)| {
                let latencies: Vec<f64> = group
                    .iter()
                    .filter(|s| s.success)
                    .map(|s| s.latency_ms)
                    .collect();
                let probe_stats = ProbeStats {
                    requests: group.len() as u64,
                    failures: group.iter().filter(|s| !s.success).count() as u64,
                    latency: stats::summarize(&latencies),
                };
                (probe, probe_stats)
            })
            .collect();

        let mut errors_by_kind = BTreeMap::new();
        for kind in samples.iter().filter_map(|s| s.error_kind.as_ref()) {
            *errors_by_kind.entry(kind.clone()).or_insert(0) += 1;
        }

        let cache_flags: Vec<bool> = samples.iter().filter_map(|s| s.cached).collect();
        let cache_hit_rate = (!cache_flags.is_empty()).then(|| {
            cache_flags.iter().filter(|c| **c).count() as f64 / cache_flags.len() as f64
        });

        Self {
            concurrency,
            elapsed,
            total_requests,
            successes,
            failures,
            error_rate: stats::error_rate(failures, total_requests),
            throughput_rps: stats::throughput(total_requests, elapsed),
            latency: stats::summarize(&ok_latencies),
            cache_hit_rate,
            per_probe,
            errors_by_kind,
        }
    }

    /// Classify the run against `thresholds`. Metrics without a threshold are skipped.
    pub fn to_metric_report(&self, thresholds: &ThresholdSet) -> MetricReport {
        let mut report = MetricReport::new("Load Test Report", "load")
            .with_context("concurrency", self.concurrency.to_string())
            .with_context("duration", format!("{:.1}s", self.elapsed.as_secs_f64()))
            .with_context("requests", self.total_requests.to_string());

        report.add_from_set(thresholds, RESPONSE_TIME_AVG_MS, self.latency.avg_ms, "ms");
        report.add_from_set(thresholds, RESPONSE_TIME_P95_MS, self.latency.p95_ms, "ms");
        report.add_from_set(thresholds, RESPONSE_TIME_P99_MS, self.latency.p99_ms, "ms");
        report.add_from_set(thresholds, ERROR_RATE, self.error_rate, "ratio");
        report.add_from_set(thresholds, THROUGHPUT_RPS, self.throughput_rps, "req/s");
        if let Some(rate) = self.cache_hit_rate {
            report.add_from_set(thresholds, CACHE_HIT_RATE, rate, "ratio");
        }

        if self.total_requests == 0 {
            report.add(
                "requests_completed",
                0.0,
                "requests",
                Threshold::at_least(1.0).with_tolerance(0.0),
            );
        }
        report
    }
}

pub struct LoadTester {
    backend: Arc<dyn BackendProvider>,
    config: LoadTestConfig,
}

impl LoadTester {
    pub fn new(
        backend: Arc<dyn BackendProvider>,
        config: LoadTestConfig,
    ) -> Result<Self, LoadTestError> {
        config.validate().map_err(LoadTestError::InvalidConfig)?;
        Ok(Self { backend, config })
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    pub async fn run(&self) -> LoadTestReport {
        info!(
            "🚀 Starting load test: {} workers for {:?}",
            self.config.concurrency, self.config.duration
        );

        let stop = Arc::new(AtomicBool::new(false));
        let issued = Arc::new(AtomicU64::new(0));
        let probes = Arc::new(self.config.probes.clone());
        let start = Instant::now();

        let timer = {
            let stop = Arc::clone(&stop);
            let duration = self.config.duration;
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                stop.store(true, Ordering::SeqCst);
            })
        };

        let handles: Vec<_> = (0..self.config.concurrency)
            .map(|worker| {
                let ctx = WorkerContext {
                    id: worker,
                    backend: Arc::clone(&self.backend),
                    probes: Arc::clone(&probes),
                    stop: Arc::clone(&stop),
                    issued: Arc::clone(&issued),
                    max_requests: self.config.max_requests,
                    think_time: self.config.think_time,
                };
                tokio::spawn(ctx.run())
            })
            .collect();

        let mut samples = Vec::new();
        for joined in join_all(handles).await {
            match joined {
                Ok(worker_samples) => samples.extend(worker_samples),
                Err(e) => warn!("Load worker panicked: {}", e),
            }
        }
        timer.abort();

        let report = LoadTestReport::from_samples(&samples, self.config.concurrency, start.elapsed());
        info!(
            "Load test finished: {} requests, {:.1} req/s, error rate {:.2}%",
            report.total_requests,
            report.throughput_rps,
            report.error_rate * 100.0
        );
        report
    }
}

struct WorkerContext {
    id: usize,
    backend: Arc<dyn BackendProvider>,
    probes: Arc<Vec<Probe>>,
    stop: Arc<AtomicBool>,
    issued: Arc<AtomicU64>,
    max_requests: Option<u64>,
    think_time: Duration,
}

impl WorkerContext {
    async fn run(self) -> Vec<RequestSample> {
        let mut samples = Vec::new();
        let mut cursor = self.id;

        while !self.stop.load(Ordering::SeqCst) {
            if let Some(max) = self.max_requests {
                if self.issued.fetch_add(1, Ordering::SeqCst) >= max {
                    self.stop.store(true, Ordering::SeqCst);
                    break;
                }
            }

            let probe = &self.probes[cursor % self.probes.len()];
            cursor += 1;

            let outcome = probe.run(self.backend.as_ref()).await;
            let (success, error_kind, cached) = match &outcome.result {
                Ok(response) => (
                    response.problem().is_none(),
                    response.problem().map(|_| "content".to_string()),
                    response.cached(),
                ),
                Err(e) => (false, Some(e.kind().to_string()), None),
            };
            samples.push(RequestSample {
                worker: self.id,
                probe: probe.name().to_string(),
                latency_ms: outcome.latency_ms(),
                success,
                error_kind,
                cached,
            });

            if !self.think_time.is_zero() {
                tokio::time::sleep(self.think_time).await;
            }
        }

        debug!("Worker {} done after {} requests", self.id, samples.len());
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::{Behaviour, FakeBackend};
    use crate::report::Verdict;

    fn sample(probe: &str, latency_ms: f64, success: bool) -> RequestSample {
        RequestSample {
            worker: 0,
            probe: probe.to_string(),
            latency_ms,
            success,
            error_kind: (!success).then(|| "network".to_string()),
            cached: None,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(LoadTestConfig::default().validate().is_ok());
        assert!(LoadTestConfig::default().with_concurrency(0).validate().is_err());
        assert!(LoadTestConfig::default()
            .with_duration(Duration::ZERO)
            .validate()
            .is_err());
        assert!(LoadTestConfig::default().with_probes(vec![]).validate().is_err());
        assert!(LoadTestConfig::default().with_max_requests(0).validate().is_err());
    }

    #[test]
    fn test_report_from_samples() {
        let samples = vec![
            sample("health", 100.0, true),
            sample("health", 300.0, true),
            sample("list_prompts", 200.0, true),
            sample("list_prompts", 5000.0, false),
        ];
        let report = LoadTestReport::from_samples(&samples, 2, Duration::from_secs(2));

        assert_eq!(report.total_requests, 4);
        assert_eq!(report.failures, 1);
        assert_eq!(report.error_rate, 0.25);
        assert_eq!(report.throughput_rps, 2.0);
        // failed request latency excluded
        assert_eq!(report.latency.max_ms, 300.0);
        assert_eq!(report.per_probe["list_prompts"].failures, 1);
        assert_eq!(report.errors_by_kind["network"], 1);
        assert_eq!(report.cache_hit_rate, None);
    }

    #[test]
    fn test_empty_run_fails_report() {
        let report = LoadTestReport::from_samples(&[], 4, Duration::from_secs(1));
        assert_eq!(report.error_rate, 0.0);

        let metric_report = report.to_metric_report(&ThresholdSet::default());
        assert_eq!(metric_report.verdict, Verdict::Fail);
    }

    #[tokio::test]
    async fn test_max_requests_caps_run() {
        let backend: Arc<dyn BackendProvider> = Arc::new(FakeBackend::default());
        let config = LoadTestConfig::default()
            .with_concurrency(4)
            .with_duration(Duration::from_secs(30))
            .with_think_time(Duration::ZERO)
            .with_max_requests(25);

        let report = LoadTester::new(backend, config).unwrap().run().await;
        assert_eq!(report.total_requests, 25);
        assert_eq!(report.failures, 0);
        assert_eq!(report.cache_hit_rate, Some(0.0));
    }

    #[tokio::test]
    async fn test_timer_stops_workers() {
        let backend: Arc<dyn BackendProvider> = Arc::new(FakeBackend {
            delay: Duration::from_millis(5),
            ..Default::default()
        });
        let config = LoadTestConfig::default()
            .with_concurrency(2)
            .with_duration(Duration::from_millis(100))
            .with_think_time(Duration::ZERO)
            .with_probes(vec![Probe::Health]);

        let started = Instant::now();
        let report = LoadTester::new(backend, config).unwrap().run().await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(report.total_requests > 0);
        assert!(report.per_probe.contains_key("health"));
    }

    #[tokio::test]
    async fn test_errors_are_counted_not_retried() {
        let fake = Arc::new(FakeBackend::all(Behaviour::Status(503)));
        let backend: Arc<dyn BackendProvider> = fake.clone();
        let config = LoadTestConfig::default()
            .with_concurrency(1)
            .with_think_time(Duration::ZERO)
            .with_max_requests(10);

        let report = LoadTester::new(backend, config).unwrap().run().await;
        assert_eq!(report.failures, 10);
        assert_eq!(report.errors_by_kind["status"], 10);
        assert_eq!(fake.call_count(), 10);

        let metric_report = report.to_metric_report(&ThresholdSet::default());
        assert_eq!(metric_report.verdict, Verdict::Fail);
    }
}
