//! Verification, load testing and reporting for the RAG Prompt Library
//!
//! The `rag-ops` binary is a thin clap layer over these modules; everything it
//! does is available as a library for integration tests and other tooling.

pub mod bundle;
pub mod config;
pub mod load;
pub mod monitoring;
pub mod probe;
pub mod report;
pub mod scaffold;
pub mod simulation;
pub mod smoke;
pub mod stats;
pub mod validation;

use thiserror::Error;

pub use bundle::{AssetKind, BundleAnalysis, BundleBudget, BundleError};
pub use config::{ConfigError, OpsConfig};
pub use load::{LoadTestConfig, LoadTestError, LoadTestReport, LoadTester, RequestSample};
pub use monitoring::{
    AlertManager, AlertSeverity, DefaultAlertManager, DefaultHealthMonitor,
    DefaultMetricsCollector, HealthMonitor, HealthStatus, MetricsCollector, MetricsFormat,
    MonitoringError, MonitoringSystem, SystemStatus,
};
pub use probe::{Probe, ProbeOutcome, ProbeResponse};
pub use report::{
    classify, Direction, Improvement, MetricReport, ReportError, ReportWriter, Threshold,
    ThresholdSet, Verdict,
};
pub use scaffold::{ErrorTrackingConfig, ScaffoldError};
pub use simulation::{SimulationConfig, SimulationError, SimulationMetrics, Simulator};
pub use smoke::{SmokeCheck, SmokeSuite, TestResults, TestStatus};
pub use stats::LatencySummary;
pub use validation::{
    BatchValidationResult, PipelineValidator, ValidationConfig, ValidationError,
    ValidationScenario,
};

/// Any error that aborts a `rag-ops` command
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] api_client::ApiError),

    #[error(transparent)]
    Deploy(#[from] deploy::DeployError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    LoadTest(#[from] LoadTestError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Monitoring(#[from] MonitoringError),

    #[error(transparent)]
    Scaffold(#[from] ScaffoldError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
