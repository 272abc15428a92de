//! Monitoring for the deployed backend and the deployment toolchain
//!
//! Repeated health sweeps probe the backend endpoints and check that the
//! deployment CLIs are installed. Latencies and errors flow into a metrics
//! collector, and any metric that classifies as warn or fail against the
//! configured thresholds raises an alert.
//!
//! # Examples
//!
//! ```rust
//! use harness::monitoring::{
//!     AlertManager, AlertSeverity, DefaultAlertManager, DefaultMetricsCollector,
//!     MetricsCollector, MetricsFormat,
//! };
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut collector = DefaultMetricsCollector::new();
//! collector.record_request("health", Duration::from_millis(150)).await;
//! collector.record_cache(true).await;
//!
//! let prometheus = collector.export_metrics(MetricsFormat::Prometheus).await?;
//! assert!(prometheus.contains("rag_request_latency_ms"));
//!
//! let alerts = DefaultAlertManager::new();
//! let id = alerts
//!     .send_alert("Backend slow", "p95 above target", AlertSeverity::Warning, "backend")
//!     .await?;
//! alerts.acknowledge_alert(&id).await?;
//! # Ok(())
//! # }
//! ```

use crate::probe::Probe;
use crate::report::{
    MetricReport, Threshold, ThresholdSet, Verdict, CACHE_HIT_RATE, ERROR_RATE, RESPONSE_TIME_AVG_MS,
    RESPONSE_TIME_P95_MS, RESPONSE_TIME_P99_MS,
};
use crate::stats::{self, LatencySummary};
use api_client::BackendProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deploy::{is_tool_available, CliTool, CommandRunner};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum MonitoringError {
    #[error("Health check failed for {component}: {reason}")]
    HealthCheckFailed { component: String, reason: String },

    #[error("Alert {id} not found")]
    AlertNotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-endpoint request statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub requests_per_second: f64,
    pub latency: LatencySummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub endpoint: String,
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(
        endpoint: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            kind: kind.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub total_errors: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub error_rate: f64,
    pub recent_errors: Vec<ErrorEvent>,
}

/// Everything the collector knows at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub endpoints: BTreeMap<String, EndpointMetrics>,
    /// Latency across all endpoints
    pub overall_latency: LatencySummary,
    pub cache: CacheMetrics,
    pub errors: ErrorMetrics,
}

impl MetricsSnapshot {
    /// Classify the snapshot against `thresholds`
    pub fn to_metric_report(&self, thresholds: &ThresholdSet) -> MetricReport {
        let mut report = MetricReport::new("Monitoring Snapshot", "monitoring")
            .with_context("endpoints", self.endpoints.len().to_string());

        if self.overall_latency.count > 0 {
            let latency = &self.overall_latency;
            report.add_from_set(thresholds, RESPONSE_TIME_AVG_MS, latency.avg_ms, "ms");
            report.add_from_set(thresholds, RESPONSE_TIME_P95_MS, latency.p95_ms, "ms");
            report.add_from_set(thresholds, RESPONSE_TIME_P99_MS, latency.p99_ms, "ms");
        }
        report.add_from_set(thresholds, ERROR_RATE, self.errors.error_rate, "ratio");
        if self.cache.hits + self.cache.misses > 0 {
            report.add_from_set(thresholds, CACHE_HIT_RATE, self.cache.hit_rate, "ratio");
        }
        report
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    /// Working but slow
    Degraded,
    Unhealthy,
    /// Nothing could be checked
    Unknown,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "✅",
            HealthStatus::Degraded => "⚠️",
            HealthStatus::Unhealthy => "❌",
            HealthStatus::Unknown => "❔",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub check_duration: Duration,
    pub details: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl From<Verdict> for AlertSeverity {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => AlertSeverity::Info,
            Verdict::Warn => AlertSeverity::Warning,
            Verdict::Fail => AlertSeverity::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: AlertSeverity,
    pub component: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricsFormat {
    Json,
    Prometheus,
    Csv,
}

impl std::str::FromStr for MetricsFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(MetricsFormat::Json),
            "prometheus" | "prom" => Ok(MetricsFormat::Prometheus),
            "csv" => Ok(MetricsFormat::Csv),
            other => Err(format!("Unknown metrics format: {}", other)),
        }
    }
}

#[async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Record one successful or failed request's latency
    async fn record_request(&mut self, endpoint: &str, latency: Duration);

    async fn record_cache(&mut self, hit: bool);

    async fn record_error(&mut self, error: ErrorEvent);

    async fn get_current_metrics(&self) -> Result<MetricsSnapshot, MonitoringError>;

    async fn export_metrics(&self, format: MetricsFormat) -> Result<String, MonitoringError>;

    async fn reset_metrics(&mut self);
}

#[async_trait]
pub trait HealthMonitor: Send + Sync {
    /// Send `probe` once and classify the response
    async fn check_endpoint(&self, probe: &Probe) -> Result<HealthCheckResult, MonitoringError>;

    /// Check that a deployment CLI is installed
    async fn check_tool(&self, tool: CliTool) -> Result<HealthCheckResult, MonitoringError>;

    async fn comprehensive_health_check(&self) -> Result<Vec<HealthCheckResult>, MonitoringError>;

    fn set_check_interval(&mut self, interval: Duration);

    fn check_interval(&self) -> Duration;
}

#[async_trait]
pub trait AlertManager: Send + Sync {
    async fn send_alert(
        &self,
        title: &str,
        description: &str,
        severity: AlertSeverity,
        component: &str,
    ) -> Result<String, MonitoringError>;

    async fn acknowledge_alert(&self, alert_id: &str) -> Result<(), MonitoringError>;

    async fn get_active_alerts(&self) -> Result<Vec<Alert>, MonitoringError>;

    /// Most recent first
    async fn get_alert_history(&self, limit: usize) -> Result<Vec<Alert>, MonitoringError>;

    async fn configure_thresholds(&mut self, thresholds: ThresholdSet);

    /// Raise one alert per metric that does not pass. Returns the new alert ids.
    async fn evaluate_metrics(
        &self,
        snapshot: &MetricsSnapshot,
    ) -> Result<Vec<String>, MonitoringError>;
}

pub struct DefaultMetricsCollector {
    metrics: Arc<Mutex<InternalMetrics>>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct InternalMetrics {
    request_latencies: BTreeMap<String, Vec<Duration>>,
    endpoint_errors: BTreeMap<String, u64>,
    cache_hits: u64,
    cache_misses: u64,
    errors: Vec<ErrorEvent>,
}

impl Default for DefaultMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultMetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(Mutex::new(InternalMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn snapshot(&self, metrics: &InternalMetrics) -> MetricsSnapshot {
        let elapsed = self.start_time.elapsed();

        let endpoints: BTreeMap<String, EndpointMetrics> = metrics
            .request_latencies
            .iter()
            .map(|(endpoint, latencies)| {
                let endpoint_metrics = EndpointMetrics {
                    request_count: latencies.len() as u64,
                    error_count: metrics.endpoint_errors.get(endpoint).copied().unwrap_or(0),
                    requests_per_second: stats::throughput(latencies.len() as u64, elapsed),
                    latency: stats::summarize_durations(latencies),
                };
                (endpoint.clone(), endpoint_metrics)
            })
            .collect();

        let all_latencies: Vec<Duration> = metrics
            .request_latencies
            .values()
            .flatten()
            .copied()
            .collect();
        let total_requests = all_latencies.len() as u64;

        let cache_total = metrics.cache_hits + metrics.cache_misses;
        let cache = CacheMetrics {
            hits: metrics.cache_hits,
            misses: metrics.cache_misses,
            hit_rate: if cache_total > 0 {
                metrics.cache_hits as f64 / cache_total as f64
            } else {
                0.0
            },
        };

        let mut errors_by_kind = BTreeMap::new();
        for event in &metrics.errors {
            *errors_by_kind.entry(event.kind.clone()).or_insert(0) += 1;
        }
        let total_errors = metrics.errors.len() as u64;

        MetricsSnapshot {
            timestamp: Utc::now(),
            endpoints,
            overall_latency: stats::summarize_durations(&all_latencies),
            cache,
            errors: ErrorMetrics {
                total_errors,
                errors_by_kind,
                error_rate: stats::error_rate(total_errors, total_requests).min(1.0),
                recent_errors: metrics.errors.iter().rev().take(10).cloned().collect(),
            },
        }
    }
}

/// Prometheus label values may not contain raw quotes or backslashes
fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl MetricsCollector for DefaultMetricsCollector {
    async fn record_request(&mut self, endpoint: &str, latency: Duration) {
        let mut metrics = lock(&self.metrics);
        metrics
            .request_latencies
            .entry(endpoint.to_string())
            .or_default()
            .push(latency);
        debug!("Recorded latency for {}: {:?}", endpoint, latency);
    }

    async fn record_cache(&mut self, hit: bool) {
        let mut metrics = lock(&self.metrics);
        if hit {
            metrics.cache_hits += 1;
        } else {
            metrics.cache_misses += 1;
        }
    }

    async fn record_error(&mut self, event: ErrorEvent) {
        let mut metrics = lock(&self.metrics);
        error!("Error recorded: {} on {} - {}", event.kind, event.endpoint, event.message);
        *metrics.endpoint_errors.entry(event.endpoint.clone()).or_insert(0) += 1;
        metrics.errors.push(event);
    }

    async fn get_current_metrics(&self) -> Result<MetricsSnapshot, MonitoringError> {
        let metrics = lock(&self.metrics);
        Ok(self.snapshot(&metrics))
    }

    async fn export_metrics(&self, format: MetricsFormat) -> Result<String, MonitoringError> {
        let snapshot = self.get_current_metrics().await?;

        match format {
            MetricsFormat::Json => Ok(serde_json::to_string_pretty(&snapshot)?),
            MetricsFormat::Prometheus => {
                let mut output = String::new();
                let _ = writeln!(output, "# HELP rag_request_latency_ms Request latency by endpoint");
                let _ = writeln!(output, "# TYPE rag_request_latency_ms gauge");
                for (endpoint, metrics) in &snapshot.endpoints {
                    let label = escape_label(endpoint);
                    for (quantile, value) in [
                        ("avg", metrics.latency.avg_ms),
                        ("p95", metrics.latency.p95_ms),
                        ("p99", metrics.latency.p99_ms),
                    ] {
                        let _ = writeln!(
                            output,
                            "rag_request_latency_ms{{endpoint=\"{}\",stat=\"{}\"}} {}",
                            label, quantile, value
                        );
                    }
                }

                let _ = writeln!(output, "# HELP rag_requests_total Requests by endpoint");
                let _ = writeln!(output, "# TYPE rag_requests_total counter");
                for (endpoint, metrics) in &snapshot.endpoints {
                    let _ = writeln!(
                        output,
                        "rag_requests_total{{endpoint=\"{}\"}} {}",
                        escape_label(endpoint),
                        metrics.request_count
                    );
                }

                let _ = writeln!(output, "# HELP rag_errors_total Recorded errors");
                let _ = writeln!(output, "# TYPE rag_errors_total counter");
                let _ = writeln!(output, "rag_errors_total {}", snapshot.errors.total_errors);

                let _ = writeln!(output, "# HELP rag_cache_hit_rate Cache hit rate");
                let _ = writeln!(output, "# TYPE rag_cache_hit_rate gauge");
                let _ = writeln!(output, "rag_cache_hit_rate {}", snapshot.cache.hit_rate);
                Ok(output)
            }
            MetricsFormat::Csv => {
                let timestamp = snapshot.timestamp.to_rfc3339();
                let mut output = String::from("timestamp,metric_type,endpoint,value\n");
                for (endpoint, metrics) in &snapshot.endpoints {
                    let _ = writeln!(
                        output,
                        "{},latency_avg,{},{}",
                        timestamp, endpoint, metrics.latency.avg_ms
                    );
                    let _ = writeln!(
                        output,
                        "{},latency_p95,{},{}",
                        timestamp, endpoint, metrics.latency.p95_ms
                    );
                    let _ = writeln!(
                        output,
                        "{},request_count,{},{}",
                        timestamp, endpoint, metrics.request_count
                    );
                    let _ = writeln!(
                        output,
                        "{},error_count,{},{}",
                        timestamp, endpoint, metrics.error_count
                    );
                }
                let _ = writeln!(
                    output,
                    "{},cache_hit_rate,all,{}",
                    timestamp, snapshot.cache.hit_rate
                );
                Ok(output)
            }
        }
    }

    async fn reset_metrics(&mut self) {
        *lock(&self.metrics) = InternalMetrics::default();
        self.start_time = Instant::now();
        info!("Metrics reset successfully");
    }
}

pub struct DefaultHealthMonitor {
    backend: Arc<dyn BackendProvider>,
    runner: Arc<dyn CommandRunner>,
    probes: Vec<Probe>,
    tools: Vec<CliTool>,
    /// Successful responses slower than this are `Degraded`
    degraded_after: Duration,
    check_interval: Duration,
}

impl DefaultHealthMonitor {
    pub fn new(backend: Arc<dyn BackendProvider>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            backend,
            runner,
            probes: vec![Probe::Health, Probe::ListPrompts],
            tools: CliTool::ALL.to_vec(),
            degraded_after: Duration::from_secs(2),
            check_interval: Duration::from_secs(60),
        }
    }

    pub fn with_probes(mut self, probes: Vec<Probe>) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_tools(mut self, tools: Vec<CliTool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_degraded_after(mut self, threshold: Duration) -> Self {
        self.degraded_after = threshold;
        self
    }
}

/// Component name used for endpoint checks, e.g. `endpoint:health`
pub fn endpoint_component(probe: &Probe) -> String {
    format!("endpoint:{}", probe.name())
}

#[async_trait]
impl HealthMonitor for DefaultHealthMonitor {
    async fn check_endpoint(&self, probe: &Probe) -> Result<HealthCheckResult, MonitoringError> {
        let outcome = probe.run(self.backend.as_ref()).await;

        let mut details = HashMap::new();
        details.insert("endpoint".to_string(), probe.endpoint().to_string());
        details.insert("latency_ms".to_string(), format!("{:.1}", outcome.latency_ms()));

        let (status, message) = match &outcome.result {
            Err(e) => {
                details.insert("error_kind".to_string(), e.kind().to_string());
                (HealthStatus::Unhealthy, e.to_string())
            }
            Ok(response) => match response.problem() {
                Some(problem) => (HealthStatus::Unhealthy, problem),
                None if outcome.latency > self.degraded_after => (
                    HealthStatus::Degraded,
                    format!("Slow response ({:.0} ms)", outcome.latency_ms()),
                ),
                None => (HealthStatus::Healthy, "Responding normally".to_string()),
            },
        };
        if let Some(cached) = outcome.result.as_ref().ok().and_then(|r| r.cached()) {
            details.insert("cached".to_string(), cached.to_string());
        }

        Ok(HealthCheckResult {
            component: endpoint_component(probe),
            status,
            message,
            timestamp: Utc::now(),
            check_duration: outcome.latency,
            details,
        })
    }

    async fn check_tool(&self, tool: CliTool) -> Result<HealthCheckResult, MonitoringError> {
        let start_time = Instant::now();
        let runner = Arc::clone(&self.runner);
        let available = tokio::task::spawn_blocking(move || is_tool_available(runner.as_ref(), tool))
            .await
            .map_err(|e| MonitoringError::HealthCheckFailed {
                component: format!("tool:{}", tool),
                reason: e.to_string(),
            })?;

        let (status, message) = if available {
            (HealthStatus::Healthy, format!("{} is installed", tool))
        } else {
            (HealthStatus::Unhealthy, tool.install_hint().to_string())
        };

        let mut details = HashMap::new();
        details.insert("command".to_string(), tool.command().to_string());

        Ok(HealthCheckResult {
            component: format!("tool:{}", tool),
            status,
            message,
            timestamp: Utc::now(),
            check_duration: start_time.elapsed(),
            details,
        })
    }

    async fn comprehensive_health_check(&self) -> Result<Vec<HealthCheckResult>, MonitoringError> {
        let mut results = Vec::new();

        for probe in &self.probes {
            match self.check_endpoint(probe).await {
                Ok(result) => results.push(result),
                Err(e) => warn!("Failed to check {}: {}", probe.name(), e),
            }
        }
        for tool in &self.tools {
            match self.check_tool(*tool).await {
                Ok(result) => results.push(result),
                Err(e) => warn!("Failed to check tool {}: {}", tool, e),
            }
        }

        Ok(results)
    }

    fn set_check_interval(&mut self, interval: Duration) {
        self.check_interval = interval;
        info!("Health check interval set to {:?}", interval);
    }

    fn check_interval(&self) -> Duration {
        self.check_interval
    }
}

pub struct DefaultAlertManager {
    alerts: Arc<Mutex<Vec<Alert>>>,
    thresholds: ThresholdSet,
    alert_counter: Arc<Mutex<u64>>,
}

impl Default for DefaultAlertManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultAlertManager {
    pub fn new() -> Self {
        Self {
            alerts: Arc::new(Mutex::new(Vec::new())),
            thresholds: ThresholdSet::default(),
            alert_counter: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdSet) -> Self {
        self.thresholds = thresholds;
        self
    }

    fn generate_alert_id(&self) -> String {
        let mut counter = lock(&self.alert_counter);
        *counter += 1;
        format!("alert_{}", *counter)
    }
}

#[async_trait]
impl AlertManager for DefaultAlertManager {
    async fn send_alert(
        &self,
        title: &str,
        description: &str,
        severity: AlertSeverity,
        component: &str,
    ) -> Result<String, MonitoringError> {
        let alert = Alert {
            id: self.generate_alert_id(),
            title: title.to_string(),
            description: description.to_string(),
            severity,
            component: component.to_string(),
            timestamp: Utc::now(),
            acknowledged: false,
        };
        let alert_id = alert.id.clone();
        lock(&self.alerts).push(alert);

        match severity {
            AlertSeverity::Critical => error!("🚨 CRITICAL ALERT: {} - {}", title, description),
            AlertSeverity::Warning => warn!("⚠️  WARNING ALERT: {} - {}", title, description),
            AlertSeverity::Info => info!("INFO ALERT: {} - {}", title, description),
        }

        Ok(alert_id)
    }

    async fn acknowledge_alert(&self, alert_id: &str) -> Result<(), MonitoringError> {
        let mut alerts = lock(&self.alerts);
        match alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                info!("Alert {} acknowledged", alert_id);
                Ok(())
            }
            None => Err(MonitoringError::AlertNotFound {
                id: alert_id.to_string(),
            }),
        }
    }

    async fn get_active_alerts(&self) -> Result<Vec<Alert>, MonitoringError> {
        Ok(lock(&self.alerts)
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect())
    }

    async fn get_alert_history(&self, limit: usize) -> Result<Vec<Alert>, MonitoringError> {
        Ok(lock(&self.alerts).iter().rev().take(limit).cloned().collect())
    }

    async fn configure_thresholds(&mut self, thresholds: ThresholdSet) {
        self.thresholds = thresholds;
        info!("Alert thresholds updated");
    }

    async fn evaluate_metrics(
        &self,
        snapshot: &MetricsSnapshot,
    ) -> Result<Vec<String>, MonitoringError> {
        let report = snapshot.to_metric_report(&self.thresholds);
        let mut raised = Vec::new();

        for entry in report.entries.iter().filter(|e| e.verdict != Verdict::Pass) {
            let id = self
                .send_alert(
                    &format!("{} {}", entry.name, entry.verdict),
                    &format!(
                        "{} is {} {} (target {} {})",
                        entry.name, entry.value, entry.unit, entry.threshold.target, entry.unit
                    ),
                    entry.verdict.into(),
                    "metrics",
                )
                .await?;
            raised.push(id);
        }
        Ok(raised)
    }
}

/// Complete system status after a monitoring run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub overall_health: HealthStatus,
    pub cycles: usize,
    pub metrics: MetricsSnapshot,
    /// Checks from the last cycle
    pub health_checks: Vec<HealthCheckResult>,
    pub active_alerts: Vec<Alert>,
    pub timestamp: DateTime<Utc>,
}

impl SystemStatus {
    /// Snapshot metrics plus a health entry: unhealthy fails, degraded or
    /// unknown warns.
    pub fn to_metric_report(&self, thresholds: &ThresholdSet) -> MetricReport {
        let mut report = self
            .metrics
            .to_metric_report(thresholds)
            .with_context("cycles", self.cycles.to_string())
            .with_context("overall_health", format!("{:?}", self.overall_health))
            .with_context("active_alerts", self.active_alerts.len().to_string());
        report.title = "Monitoring Report".to_string();

        let score = match self.overall_health {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded | HealthStatus::Unknown => 0.5,
            HealthStatus::Unhealthy => 0.0,
        };
        report.add(
            "health_score",
            score,
            "score",
            Threshold::at_least(1.0).with_tolerance(0.5),
        );
        report
    }
}

/// Worst status among the checks; `Unknown` when nothing was checked
pub fn overall_health(checks: &[HealthCheckResult]) -> HealthStatus {
    if checks.is_empty() {
        return HealthStatus::Unknown;
    }
    if checks.iter().any(|c| c.status == HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else if checks.iter().any(|c| c.status != HealthStatus::Healthy) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

pub struct MonitoringSystem {
    pub metrics_collector: Box<dyn MetricsCollector>,
    pub health_monitor: Box<dyn HealthMonitor>,
    pub alert_manager: Box<dyn AlertManager>,
}

impl MonitoringSystem {
    pub fn new(health_monitor: Box<dyn HealthMonitor>) -> Self {
        Self {
            metrics_collector: Box::new(DefaultMetricsCollector::new()),
            health_monitor,
            alert_manager: Box::new(DefaultAlertManager::new()),
        }
    }

    pub fn with_alert_manager(mut self, alert_manager: Box<dyn AlertManager>) -> Self {
        self.alert_manager = alert_manager;
        self
    }

    /// Run `cycles` health sweeps spaced by the monitor's check interval
    pub async fn run_cycles(&mut self, cycles: usize) -> Result<SystemStatus, MonitoringError> {
        info!("Starting monitoring: {} cycles", cycles);
        let mut ticker = interval(
            self.health_monitor
                .check_interval()
                .max(Duration::from_millis(1)),
        );
        let mut last_checks = Vec::new();

        for cycle in 1..=cycles {
            ticker.tick().await;
            let checks = self.health_monitor.comprehensive_health_check().await?;
            self.record_cycle(&checks).await;

            debug!(
                "Cycle {}/{}: {}",
                cycle,
                cycles,
                overall_health(&checks).symbol()
            );
            last_checks = checks;
        }

        for check in last_checks.iter().filter(|c| c.status == HealthStatus::Unhealthy) {
            self.alert_manager
                .send_alert(
                    &format!("{} unhealthy", check.component),
                    &check.message,
                    AlertSeverity::Critical,
                    &check.component,
                )
                .await?;
        }

        let metrics = self.metrics_collector.get_current_metrics().await?;
        self.alert_manager.evaluate_metrics(&metrics).await?;

        Ok(SystemStatus {
            overall_health: overall_health(&last_checks),
            cycles,
            metrics,
            health_checks: last_checks,
            active_alerts: self.alert_manager.get_active_alerts().await?,
            timestamp: Utc::now(),
        })
    }

    async fn record_cycle(&mut self, checks: &[HealthCheckResult]) {
        for check in checks {
            let Some(endpoint) = check.component.strip_prefix("endpoint:") else {
                continue;
            };
            self.metrics_collector
                .record_request(endpoint, check.check_duration)
                .await;
            if let Some(cached) = check.details.get("cached") {
                self.metrics_collector.record_cache(cached == "true").await;
            }
            if check.status == HealthStatus::Unhealthy {
                let kind = check
                    .details
                    .get("error_kind")
                    .cloned()
                    .unwrap_or_else(|| "content".to_string());
                self.metrics_collector
                    .record_error(ErrorEvent::new(endpoint, kind, check.message.clone()))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::{Behaviour, FakeBackend};
    use deploy::{CommandOutput, CommandSpec};

    struct ToolRunner {
        installed: Vec<&'static str>,
    }

    impl CommandRunner for ToolRunner {
        fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
            if self.installed.contains(&spec.program.as_str()) {
                Ok(CommandOutput::ok("1.0.0"))
            } else {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "not found"))
            }
        }
    }

    fn monitor(backend: FakeBackend, installed: Vec<&'static str>) -> DefaultHealthMonitor {
        let mut monitor =
            DefaultHealthMonitor::new(Arc::new(backend), Arc::new(ToolRunner { installed }));
        monitor.set_check_interval(Duration::from_millis(1));
        monitor
    }

    #[tokio::test]
    async fn test_metrics_collector() {
        let mut collector = DefaultMetricsCollector::new();
        collector.record_request("health", Duration::from_millis(150)).await;
        collector.record_request("health", Duration::from_millis(250)).await;
        collector.record_cache(true).await;
        collector.record_cache(false).await;
        collector
            .record_error(ErrorEvent::new("health", "network", "refused"))
            .await;

        let snapshot = collector.get_current_metrics().await.unwrap();
        assert_eq!(snapshot.endpoints["health"].request_count, 2);
        assert_eq!(snapshot.endpoints["health"].error_count, 1);
        assert_eq!(snapshot.overall_latency.avg_ms, 200.0);
        assert_eq!(snapshot.cache.hit_rate, 0.5);
        assert_eq!(snapshot.errors.error_rate, 0.5);
        assert_eq!(snapshot.errors.errors_by_kind["network"], 1);

        collector.reset_metrics().await;
        let snapshot = collector.get_current_metrics().await.unwrap();
        assert!(snapshot.endpoints.is_empty());
        assert_eq!(snapshot.errors.error_rate, 0.0);
    }

    #[tokio::test]
    async fn test_metrics_export() {
        let mut collector = DefaultMetricsCollector::new();
        collector.record_request("list_prompts", Duration::from_millis(100)).await;

        let json = collector.export_metrics(MetricsFormat::Json).await.unwrap();
        assert!(json.contains("overall_latency"));

        let prometheus = collector.export_metrics(MetricsFormat::Prometheus).await.unwrap();
        assert!(prometheus
            .contains("rag_request_latency_ms{endpoint=\"list_prompts\",stat=\"avg\"} 100"));
        assert!(prometheus.contains("rag_requests_total{endpoint=\"list_prompts\"} 1"));

        let csv = collector.export_metrics(MetricsFormat::Csv).await.unwrap();
        assert!(csv.starts_with("timestamp,metric_type,endpoint,value\n"));
        assert!(csv.contains(",request_count,list_prompts,1"));

        assert_eq!("PROM".parse::<MetricsFormat>().unwrap(), MetricsFormat::Prometheus);
        assert!("xml".parse::<MetricsFormat>().is_err());
    }

    #[tokio::test]
    async fn test_health_monitor_endpoints_and_tools() {
        let monitor = monitor(FakeBackend::default(), vec!["firebase", "npm"]);
        let checks = monitor.comprehensive_health_check().await.unwrap();

        // two endpoints plus four tools
        assert_eq!(checks.len(), 6);
        assert_eq!(checks[0].component, "endpoint:health");
        assert_eq!(checks[0].status, HealthStatus::Healthy);

        let gcloud = checks.iter().find(|c| c.component == "tool:gcloud").unwrap();
        assert_eq!(gcloud.status, HealthStatus::Unhealthy);
        assert_eq!(overall_health(&checks), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_slow_endpoint_is_degraded() {
        let backend = FakeBackend {
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let monitor = monitor(backend, vec![]).with_degraded_after(Duration::from_millis(1));
        let check = monitor.check_endpoint(&Probe::Health).await.unwrap();
        assert_eq!(check.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_alert_manager() {
        let manager = DefaultAlertManager::new();
        let alert_id = manager
            .send_alert("Test", "A test alert", AlertSeverity::Warning, "test")
            .await
            .unwrap();

        assert_eq!(manager.get_active_alerts().await.unwrap().len(), 1);
        manager.acknowledge_alert(&alert_id).await.unwrap();
        assert!(manager.get_active_alerts().await.unwrap().is_empty());
        assert_eq!(manager.get_alert_history(10).await.unwrap().len(), 1);

        let err = manager.acknowledge_alert("alert_99").await.unwrap_err();
        assert!(matches!(err, MonitoringError::AlertNotFound { .. }));
    }

    #[tokio::test]
    async fn test_alerts_raised_for_failing_metrics() {
        let mut collector = DefaultMetricsCollector::new();
        collector.record_request("health", Duration::from_millis(100)).await;
        collector
            .record_error(ErrorEvent::new("health", "status", "500"))
            .await;
        let snapshot = collector.get_current_metrics().await.unwrap();

        let manager = DefaultAlertManager::new();
        let raised = manager.evaluate_metrics(&snapshot).await.unwrap();
        // error rate 1.0 fails; latency passes; no cache data
        assert_eq!(raised.len(), 1);
        let alerts = manager.get_active_alerts().await.unwrap();
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert!(alerts[0].title.starts_with("error_rate"));
    }

    #[tokio::test]
    async fn test_monitoring_system_cycles() {
        let backend = FakeBackend {
            prompts: Behaviour::Status(503),
            ..Default::default()
        };
        let monitor = monitor(backend, vec!["firebase", "gcloud", "npm", "gsutil"]);
        let mut system = MonitoringSystem::new(Box::new(monitor));

        let status = system.run_cycles(3).await.unwrap();
        assert_eq!(status.cycles, 3);
        assert_eq!(status.overall_health, HealthStatus::Unhealthy);
        assert_eq!(status.metrics.endpoints["health"].request_count, 3);
        assert_eq!(status.metrics.endpoints["list_prompts"].error_count, 3);
        // one unhealthy component plus the failing error rate
        assert_eq!(status.active_alerts.len(), 2);

        let report = status.to_metric_report(&ThresholdSet::default());
        assert_eq!(report.kind, "monitoring");
        assert_eq!(report.verdict, Verdict::Fail);
    }

    #[tokio::test]
    async fn test_degraded_system_warns() {
        let backend = FakeBackend {
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let monitor = monitor(backend, vec!["firebase", "gcloud", "npm", "gsutil"])
            .with_degraded_after(Duration::from_millis(1));
        let mut system = MonitoringSystem::new(Box::new(monitor));

        let status = system.run_cycles(1).await.unwrap();
        assert_eq!(status.overall_health, HealthStatus::Degraded);

        let mut thresholds = ThresholdSet::empty();
        thresholds.insert(ERROR_RATE, Threshold::at_most(0.05));
        let report = status.to_metric_report(&thresholds);
        assert_eq!(report.verdict, Verdict::Warn);
        assert_eq!(report.verdict.exit_code(true), 2);
    }

    #[tokio::test]
    async fn test_healthy_system_has_no_alerts() {
        let monitor = monitor(
            FakeBackend::default(),
            vec!["firebase", "gcloud", "npm", "gsutil"],
        );
        let mut system = MonitoringSystem::new(Box::new(monitor));

        let status = system.run_cycles(1).await.unwrap();
        assert_eq!(status.overall_health, HealthStatus::Healthy);
        assert!(status.active_alerts.is_empty());

        let mut thresholds = ThresholdSet::empty();
        thresholds.insert(ERROR_RATE, Threshold::at_most(0.05));
        assert_eq!(status.to_metric_report(&thresholds).verdict, Verdict::Pass);
    }
}
