//! `rag-ops` configuration
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! environment variables. Command-line flags are applied last by the binary.

use crate::bundle::BundleBudget;
use crate::load::LoadTestConfig;
use crate::report::ThresholdSet;
use api_client::{ApiConfig, RetryPolicy};
use deploy::{ArtifactUpload, BuildConfig, DeployConfig, DeployTarget};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const ENV_API_BASE_URL: &str = "API_BASE_URL";
pub const ENV_AUTH_TOKEN: &str = "AUTH_TOKEN";
pub const ENV_PROJECT_ID: &str = "PROJECT_ID";
pub const ENV_REPORTS_DIR: &str = "REPORTS_DIR";
pub const ENV_DASHBOARDS_DIR: &str = "DASHBOARDS_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001".to_string(),
            auth_token: None,
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadSection {
    pub concurrency: usize,
    pub duration_secs: u64,
    pub think_time_ms: u64,
    pub max_requests: Option<u64>,
}

impl Default for LoadSection {
    fn default() -> Self {
        Self {
            concurrency: 10,
            duration_secs: 30,
            think_time_ms: 100,
            max_requests: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSection {
    pub dir: PathBuf,
    pub top_n: usize,
    pub budget: BundleBudget,
}

impl Default for BundleSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("frontend/dist"),
            top_n: 10,
            budget: BundleBudget::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySection {
    pub project_id: Option<String>,
    pub targets: Vec<DeployTarget>,
    pub frontend_dir: PathBuf,
    pub build_script: String,
    pub required_secrets: Vec<String>,
    /// Copy build output to a bucket after the Firebase deploy
    pub artifact_upload: Option<ArtifactUpload>,
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            project_id: None,
            targets: vec![DeployTarget::Hosting, DeployTarget::Functions],
            frontend_dir: PathBuf::from("frontend"),
            build_script: "build".to_string(),
            required_secrets: Vec::new(),
            artifact_upload: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSection {
    pub interval_secs: u64,
    pub cycles: usize,
    pub degraded_after_ms: u64,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            cycles: 1,
            degraded_after_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub api: ApiSection,
    pub reports_dir: PathBuf,
    pub dashboards_dir: PathBuf,
    /// Overrides on top of the built-in thresholds
    pub thresholds: ThresholdSet,
    pub load: LoadSection,
    pub bundle: BundleSection,
    pub deploy: DeploySection,
    pub monitoring: MonitoringSection,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            api: ApiSection::default(),
            reports_dir: PathBuf::from("reports"),
            dashboards_dir: PathBuf::from("dashboards"),
            thresholds: ThresholdSet::empty(),
            load: LoadSection::default(),
            bundle: BundleSection::default(),
            deploy: DeploySection::default(),
            monitoring: MonitoringSection::default(),
        }
    }
}

impl OpsConfig {
    /// Defaults, then `path` if given, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply environment overrides read through `lookup`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_API_BASE_URL) {
            debug!("{} overrides api.base_url", ENV_API_BASE_URL);
            self.api.base_url = url;
        }
        if let Some(token) = get(ENV_AUTH_TOKEN) {
            self.api.auth_token = Some(token);
        }
        if let Some(project) = get(ENV_PROJECT_ID) {
            self.deploy.project_id = Some(project);
        }
        if let Some(dir) = get(ENV_REPORTS_DIR) {
            self.reports_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get(ENV_DASHBOARDS_DIR) {
            self.dashboards_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.api_config().validate()?;
        if self.api.timeout_secs == 0 {
            return Err("api.timeout_secs must be greater than 0".to_string());
        }
        if self.monitoring.interval_secs == 0 {
            return Err("monitoring.interval_secs must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Built-in thresholds with this config's overrides applied
    pub fn thresholds(&self) -> ThresholdSet {
        let mut thresholds = ThresholdSet::default();
        thresholds.merge(&self.thresholds);
        thresholds
    }

    pub fn api_config(&self) -> ApiConfig {
        let retry = if self.api.max_retries == 0 {
            RetryPolicy::none()
        } else {
            RetryPolicy {
                max_retries: self.api.max_retries,
                ..RetryPolicy::default()
            }
        };
        let config = ApiConfig::new()
            .with_base_url(self.api.base_url.clone())
            .with_timeout(Duration::from_secs(self.api.timeout_secs))
            .with_retry(retry);
        match &self.api.auth_token {
            Some(token) => config.with_auth_token(token.clone()),
            None => config,
        }
    }

    pub fn load_test_config(&self) -> LoadTestConfig {
        let config = LoadTestConfig::default()
            .with_concurrency(self.load.concurrency)
            .with_duration(Duration::from_secs(self.load.duration_secs))
            .with_think_time(Duration::from_millis(self.load.think_time_ms));
        match self.load.max_requests {
            Some(max) => config.with_max_requests(max),
            None => config,
        }
    }

    /// Deployment settings; fails when no project id is configured
    pub fn deploy_config(&self) -> Result<DeployConfig, ConfigError> {
        let project_id = self.deploy.project_id.clone().ok_or_else(|| {
            ConfigError::Invalid(format!(
                "No project id: set deploy.project_id or {}",
                ENV_PROJECT_ID
            ))
        })?;

        let mut config = DeployConfig::new(project_id).with_targets(self.deploy.targets.clone());
        if self.deploy.targets.contains(&DeployTarget::Hosting) {
            config = config.with_build(BuildConfig {
                dir: self.deploy.frontend_dir.clone(),
                install: true,
                script: self.deploy.build_script.clone(),
            });
        }
        for secret in &self.deploy.required_secrets {
            config = config.with_secret(secret.clone());
        }
        if let Some(upload) = &self.deploy.artifact_upload {
            if upload.bucket.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "deploy.artifact_upload.bucket must not be empty".to_string(),
                ));
            }
            config = config.with_artifact_upload(upload.clone());
        }
        Ok(config)
    }
}
