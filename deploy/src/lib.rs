//! Deployment drivers for the RAG Prompt Library
//!
//! Wraps the `firebase`, `gcloud`, `npm` and `gsutil` CLIs with preflight
//! checks and a step-by-step deploy that stops on the first failure.

pub mod cli;
pub mod deployer;

use thiserror::Error;

pub use cli::{
    detect_tools, is_tool_available, CliTool, CommandOutput, CommandRunner, CommandSpec,
    SystemRunner,
};
pub use deployer::{
    validate_project_id, ArtifactUpload, BuildConfig, DeployConfig, DeployReport, DeployTarget,
    Deployer, PreflightCheck, PreflightReport, StepResult,
};

/// Errors related to deployment
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Preflight checks failed: {}", .failures.join("; "))]
    PreflightFailed { failures: Vec<String> },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DeployResult<T> = Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DeployError::PreflightFailed {
            failures: vec!["tool:npm: missing".to_string(), "secret:KEY: missing".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "Preflight checks failed: tool:npm: missing; secret:KEY: missing"
        );

        let error = DeployError::InvalidConfig("At least one deploy target is required".into());
        assert!(error.to_string().starts_with("Invalid configuration"));
    }
}
