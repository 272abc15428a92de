//! RAG pipeline validation
//!
//! Scenario-based checks that go beyond "the endpoint answered": each scenario
//! sends a probe and checks the response content against a set of
//! expectations (length, keywords, retrieved sources, a regex pattern and a
//! latency budget).
//!
//! # Example
//!
//! ```rust,no_run
//! use api_client::{ApiConfig, HttpBackend};
//! use harness::validation::{PipelineValidator, ValidationConfig, ValidationScenario};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!
//! let backend = HttpBackend::new(ApiConfig::default())?;
//! let validator = PipelineValidator::new(&backend, ValidationConfig::default());
//!
//! let result = validator.evaluate(&ValidationScenario::rag_execution()).await?;
//! assert!(result.success, "{:?}", result.failures);
//! # Ok(())
//! # }
//! ```

use crate::probe::{Probe, ProbeResponse};
use crate::report::{MetricReport, Threshold};
use api_client::BackendProvider;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid output pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Hard limit per scenario, independent of the latency expectation
    pub timeout: Duration,
    /// Stop the batch at the first failing scenario
    pub fail_fast: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            fail_fast: false,
        }
    }
}

impl ValidationConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioCategory {
    Health,
    Catalog,
    Generation,
    Retrieval,
    Custom(String),
}

/// What a response has to look like to pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expectations {
    /// Exceeding this is a warning, not a failure
    pub max_latency: Option<Duration>,
    pub min_output_length: usize,
    /// Case-insensitive
    pub required_keywords: Vec<String>,
    /// Case-insensitive
    pub forbidden_keywords: Vec<String>,
    pub require_sources: bool,
    /// Regex the main payload must match
    pub output_pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationScenario {
    pub id: String,
    pub name: String,
    pub category: ScenarioCategory,
    pub probe: Probe,
    pub expectations: Expectations,
}

impl ValidationScenario {
    pub fn health() -> Self {
        Self {
            id: "health".to_string(),
            name: "Backend health".to_string(),
            category: ScenarioCategory::Health,
            probe: Probe::Health,
            expectations: Expectations {
                max_latency: Some(Duration::from_secs(2)),
                ..Default::default()
            },
        }
    }

    pub fn prompt_listing() -> Self {
        Self {
            id: "prompt_listing".to_string(),
            name: "Prompt catalog listing".to_string(),
            category: ScenarioCategory::Catalog,
            probe: Probe::ListPrompts,
            expectations: Expectations {
                max_latency: Some(Duration::from_secs(3)),
                ..Default::default()
            },
        }
    }

    pub fn prompt_generation() -> Self {
        Self {
            id: "prompt_generation".to_string(),
            name: "Prompt generation".to_string(),
            category: ScenarioCategory::Generation,
            probe: Probe::sample_generate(),
            expectations: Expectations {
                max_latency: Some(Duration::from_secs(20)),
                min_output_length: 50,
                forbidden_keywords: vec!["error".to_string(), "undefined".to_string()],
                // Generated prompts must keep the declared input variable
                output_pattern: Some(r"\{\{\s*ticket_text\s*\}\}".to_string()),
                ..Default::default()
            },
        }
    }

    pub fn rag_execution() -> Self {
        Self {
            id: "rag_execution".to_string(),
            name: "Prompt execution with document retrieval".to_string(),
            category: ScenarioCategory::Retrieval,
            probe: Probe::sample_execute(),
            expectations: Expectations {
                max_latency: Some(Duration::from_secs(30)),
                min_output_length: 20,
                required_keywords: vec!["prompt".to_string()],
                forbidden_keywords: vec!["I don't know".to_string(), "I cannot".to_string()],
                require_sources: true,
                output_pattern: None,
            },
        }
    }

    /// The default end-to-end scenario set
    pub fn standard_suite() -> Vec<Self> {
        vec![
            Self::health(),
            Self::prompt_listing(),
            Self::prompt_generation(),
            Self::rag_execution(),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub success: bool,
    pub latency_ms: f64,
    pub output_length: usize,
    pub source_count: usize,
    pub failures: Vec<String>,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchValidationResult {
    pub total_scenarios: usize,
    pub passed: usize,
    pub failed: usize,
    pub total_time: Duration,
    pub results: Vec<ScenarioResult>,
}

impl BatchValidationResult {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Failed scenarios fail the report; slow ones only warn.
    pub fn to_metric_report(&self) -> MetricReport {
        let mut report = MetricReport::new("RAG Pipeline Validation Report", "validation")
            .with_context("scenarios", self.total_scenarios.to_string())
            .with_context("total_time", format!("{:.1}s", self.total_time.as_secs_f64()));
        for result in &self.results {
            report = report.with_context(
                format!("{}_latency_ms", result.scenario_id),
                format!("{:.0}", result.latency_ms),
            );
        }

        report.add(
            "scenarios_failed",
            self.failed as f64,
            "scenarios",
            Threshold::at_most(0.0).with_tolerance(0.0),
        );

        let slow = self.results.iter().filter(|r| !r.warnings.is_empty()).count();
        let within_budget = if self.results.is_empty() {
            100.0
        } else {
            (self.results.len() - slow) as f64 / self.results.len() as f64 * 100.0
        };
        // Full tolerance: being slow never escalates past Warn
        report.add(
            "scenarios_within_latency",
            within_budget,
            "%",
            Threshold::at_least(100.0).with_tolerance(1.0),
        );
        report
    }
}

pub struct PipelineValidator<'a> {
    backend: &'a dyn BackendProvider,
    config: ValidationConfig,
}

impl<'a> PipelineValidator<'a> {
    pub fn new(backend: &'a dyn BackendProvider, config: ValidationConfig) -> Self {
        Self { backend, config }
    }

    pub async fn evaluate(&self, scenario: &ValidationScenario) -> ValidationResult<ScenarioResult> {
        info!("Starting validation: {} ({})", scenario.name, scenario.id);

        // Compile before sending anything so a bad pattern is a setup error
        let pattern = scenario
            .expectations
            .output_pattern
            .as_deref()
            .map(|p| {
                Regex::new(p).map_err(|source| ValidationError::InvalidPattern {
                    pattern: p.to_string(),
                    source,
                })
            })
            .transpose()?;

        let start = Instant::now();
        let mut failures = Vec::new();
        let mut warnings = Vec::new();

        let response =
            match tokio::time::timeout(self.config.timeout, scenario.probe.run(self.backend)).await
            {
                Ok(outcome) => match outcome.result {
                    Ok(response) => Some(response),
                    Err(e) => {
                        failures.push(format!("Request failed: {}", e));
                        None
                    }
                },
                Err(_) => {
                    failures.push(format!("Timed out after {:?}", self.config.timeout));
                    None
                }
            };
        let elapsed = start.elapsed();

        let (output_length, source_count) = match &response {
            Some(response) => {
                check_response(
                    response,
                    &scenario.expectations,
                    pattern.as_ref(),
                    &mut failures,
                );
                (response.text().chars().count(), response.sources().len())
            }
            None => (0, 0),
        };

        if let Some(max_latency) = scenario.expectations.max_latency {
            if elapsed > max_latency {
                warnings.push(format!(
                    "Slow response: {} ms > {} ms",
                    elapsed.as_millis(),
                    max_latency.as_millis()
                ));
            }
        }

        let success = failures.is_empty();
        if success {
            info!("✅ Validation passed: {}", scenario.name);
        } else {
            warn!("❌ Validation failed: {}", scenario.name);
            for failure in &failures {
                warn!("  - {}", failure);
            }
        }

        Ok(ScenarioResult {
            scenario_id: scenario.id.clone(),
            success,
            latency_ms: elapsed.as_secs_f64() * 1000.0,
            output_length,
            source_count,
            failures,
            warnings,
            timestamp: Utc::now(),
        })
    }

    pub async fn evaluate_batch(
        &self,
        scenarios: &[ValidationScenario],
    ) -> ValidationResult<BatchValidationResult> {
        let start_time = Instant::now();
        let mut results = Vec::new();

        for scenario in scenarios {
            let result = self.evaluate(scenario).await?;
            let stop = self.config.fail_fast && !result.success;
            results.push(result);
            if stop {
                warn!("Stopping after first failure ({})", scenario.id);
                break;
            }
        }

        let passed = results.iter().filter(|r| r.success).count();
        Ok(BatchValidationResult {
            total_scenarios: results.len(),
            passed,
            failed: results.len() - passed,
            total_time: start_time.elapsed(),
            results,
        })
    }
}

fn check_response(
    response: &ProbeResponse,
    expected: &Expectations,
    pattern: Option<&Regex>,
    failures: &mut Vec<String>,
) {
    if let Some(problem) = response.problem() {
        failures.push(problem);
    }

    let text = response.text();
    let length = text.chars().count();
    if length < expected.min_output_length {
        failures.push(format!(
            "Output too short: {} < {} characters",
            length, expected.min_output_length
        ));
    }

    let lowered = text.to_lowercase();
    for keyword in &expected.required_keywords {
        if !lowered.contains(&keyword.to_lowercase()) {
            failures.push(format!("Missing required keyword '{}'", keyword));
        }
    }
    for keyword in &expected.forbidden_keywords {
        if lowered.contains(&keyword.to_lowercase()) {
            failures.push(format!("Contains forbidden keyword '{}'", keyword));
        }
    }

    if expected.require_sources && response.sources().is_empty() {
        failures.push("No retrieved sources in response".to_string());
    }

    if let Some(pattern) = pattern {
        if !pattern.is_match(&text) {
            failures.push(format!("Output does not match /{}/", pattern.as_str()));
        }
    }
}
