//! Post-deployment smoke tests
//!
//! Each check sends one probe and decides pass/fail from the response and its
//! latency. Network failures are reported separately as `Unreachable` so a
//! backend that is not deployed yet is distinguishable from one that is broken.

use crate::probe::Probe;
use crate::report::{MetricReport, Threshold};
use crate::stats;
use api_client::BackendProvider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// A single smoke check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeCheck {
    pub name: String,
    pub probe: Probe,
    /// Latency budget; slower responses fail the check
    pub max_latency: Duration,
}

impl SmokeCheck {
    pub fn new(name: impl Into<String>, probe: Probe, max_latency: Duration) -> Self {
        Self {
            name: name.into(),
            probe,
            max_latency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    /// The backend could not be reached at all
    Unreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub endpoint: String,
    pub status: TestStatus,
    pub latency_ms: f64,
    pub message: String,
}

/// Flat pass/fail accumulator for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestResults {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub unreachable: usize,
    pub tests: Vec<TestOutcome>,
}

impl TestResults {
    pub fn record(&mut self, outcome: TestOutcome) {
        self.total += 1;
        match outcome.status {
            TestStatus::Passed => {
                self.passed += 1;
                info!("✅ {} ({:.0} ms)", outcome.name, outcome.latency_ms);
            }
            TestStatus::Failed => {
                self.failed += 1;
                warn!("❌ {}: {}", outcome.name, outcome.message);
            }
            TestStatus::Unreachable => {
                self.unreachable += 1;
                warn!("⚠️  {} unreachable: {}", outcome.name, outcome.message);
            }
        }
        self.tests.push(outcome);
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.unreachable == 0
    }

    /// Passing share in percent, 0 when nothing ran
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64 * 100.0
        }
    }

    pub fn latencies_ms(&self) -> Vec<f64> {
        self.tests.iter().map(|t| t.latency_ms).collect()
    }
}

/// Ordered list of smoke checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeSuite {
    pub name: String,
    pub checks: Vec<SmokeCheck>,
}

impl SmokeSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checks: Vec::new(),
        }
    }

    pub fn with_check(mut self, check: SmokeCheck) -> Self {
        self.checks.push(check);
        self
    }

    /// Default suite run after every deployment
    pub fn post_deploy() -> Self {
        Self::new("post-deploy")
            .with_check(SmokeCheck::new(
                "health endpoint responds",
                Probe::Health,
                Duration::from_secs(5),
            ))
            .with_check(SmokeCheck::new(
                "prompt listing works",
                Probe::ListPrompts,
                Duration::from_secs(5),
            ))
            .with_check(SmokeCheck::new(
                "prompt generation works",
                Probe::sample_generate(),
                Duration::from_secs(30),
            ))
            .with_check(SmokeCheck::new(
                "prompt execution works",
                Probe::sample_execute(),
                Duration::from_secs(60),
            ))
    }

    /// Only the cheap read-only checks
    pub fn quick() -> Self {
        let mut suite = Self::post_deploy();
        suite.name = "quick".to_string();
        suite
            .checks
            .retain(|c| matches!(c.probe, Probe::Health | Probe::ListPrompts));
        suite
    }

    /// Run every check in order
    pub async fn run(&self, backend: &dyn BackendProvider) -> SmokeRun {
        info!("🔍 Running smoke suite '{}' ({} checks)", self.name, self.checks.len());
        let started_at = Utc::now();
        let mut results = TestResults::default();

        for check in &self.checks {
            results.record(run_check(check, backend).await);
        }

        SmokeRun {
            suite: self.name.clone(),
            started_at,
            finished_at: Utc::now(),
            results,
        }
    }
}

/// Results of one suite execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeRun {
    pub suite: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: TestResults,
}

impl SmokeRun {
    /// Smoke verdict: any failed or unreachable check fails the run.
    ///
    /// Latency is already judged per check against its own budget, so the
    /// aggregate percentiles are recorded as context only.
    pub fn to_metric_report(&self) -> MetricReport {
        let results = &self.results;
        let latency = stats::summarize(&results.latencies_ms());
        let mut report = MetricReport::new("Smoke Test Report", "smoke")
            .with_context("suite", self.suite.clone())
            .with_context("checks", results.total.to_string())
            .with_context("success_rate", format!("{:.1}%", results.success_rate()))
            .with_context("latency_p95_ms", format!("{:.0}", latency.p95_ms))
            .with_context("latency_max_ms", format!("{:.0}", latency.max_ms));
        report.add(
            "checks_not_passed",
            (results.failed + results.unreachable) as f64,
            "checks",
            Threshold::at_most(0.0).with_tolerance(0.0),
        );
        report
    }
}

async fn run_check(check: &SmokeCheck, backend: &dyn BackendProvider) -> TestOutcome {
    let outcome = check.probe.run(backend).await;
    let latency_ms = outcome.latency_ms();

    let (status, message) = match &outcome.result {
        Err(e) if e.is_unreachable() => (TestStatus::Unreachable, e.to_string()),
        Err(e) => (TestStatus::Failed, e.to_string()),
        Ok(response) => match response.problem() {
            Some(problem) => (TestStatus::Failed, problem),
            None if outcome.latency > check.max_latency => (
                TestStatus::Failed,
                format!(
                    "took {:.0} ms, budget {} ms",
                    latency_ms,
                    check.max_latency.as_millis()
                ),
            ),
            None => (TestStatus::Passed, "ok".to_string()),
        },
    };

    TestOutcome {
        name: check.name.clone(),
        endpoint: check.probe.endpoint().to_string(),
        status,
        latency_ms,
        message,
    }
}
