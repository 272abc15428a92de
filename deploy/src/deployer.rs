//! Firebase deployment driver.
//!
//! Runs the same sequence the hand-written deploy scripts did: preflight
//! checks, frontend build, `firebase deploy`, optional artifact upload.
//! Any failing step stops the run.

use crate::cli::{is_tool_available, CliTool, CommandRunner, CommandSpec};
use crate::{DeployError, DeployResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Firebase deploy targets (`--only` values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployTarget {
    Hosting,
    Functions,
    /// Firestore rules and indexes
    Firestore,
    /// Cloud Storage security rules
    Storage,
}

impl DeployTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployTarget::Hosting => "hosting",
            DeployTarget::Functions => "functions",
            DeployTarget::Firestore => "firestore",
            DeployTarget::Storage => "storage",
        }
    }
}

impl std::str::FromStr for DeployTarget {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hosting" => Ok(DeployTarget::Hosting),
            "functions" => Ok(DeployTarget::Functions),
            "firestore" => Ok(DeployTarget::Firestore),
            "storage" => Ok(DeployTarget::Storage),
            other => Err(DeployError::InvalidConfig(format!(
                "Unknown deploy target '{}'",
                other
            ))),
        }
    }
}

/// Frontend build performed before deploying hosting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Directory containing `package.json`
    pub dir: PathBuf,
    /// Run `npm ci` before building
    pub install: bool,
    /// npm script to run
    pub script: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("frontend"),
            install: true,
            script: "build".to_string(),
        }
    }
}

/// Copy of build artifacts to a Cloud Storage bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactUpload {
    pub source: PathBuf,
    /// Destination, with or without the `gs://` prefix
    pub bucket: String,
}

/// Configuration for one deployment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub project_id: String,
    pub targets: Vec<DeployTarget>,
    pub build: Option<BuildConfig>,
    pub working_dir: PathBuf,
    /// Record commands without running them
    pub dry_run: bool,
    /// Secret Manager secrets that must exist before deploying functions
    pub required_secrets: Vec<String>,
    pub artifact_upload: Option<ArtifactUpload>,
    /// Message attached to the Firebase release
    pub message: Option<String>,
}

impl DeployConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            targets: vec![DeployTarget::Hosting],
            build: None,
            working_dir: PathBuf::from("."),
            dry_run: false,
            required_secrets: Vec::new(),
            artifact_upload: None,
            message: None,
        }
    }

    pub fn with_targets(mut self, targets: Vec<DeployTarget>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_build(mut self, build: BuildConfig) -> Self {
        self.build = Some(build);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_secret(mut self, name: impl Into<String>) -> Self {
        self.required_secrets.push(name.into());
        self
    }

    pub fn with_artifact_upload(mut self, upload: ArtifactUpload) -> Self {
        self.artifact_upload = Some(upload);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Tools this configuration will invoke
    pub fn required_tools(&self) -> Vec<CliTool> {
        let mut tools = vec![CliTool::Firebase];
        if self.build.is_some() {
            tools.push(CliTool::Npm);
        }
        if !self.required_secrets.is_empty() {
            tools.push(CliTool::Gcloud);
        }
        if self.artifact_upload.is_some() {
            tools.push(CliTool::Gsutil);
        }
        tools
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_project_id(&self.project_id)?;
        if self.targets.is_empty() {
            return Err("At least one deploy target is required".to_string());
        }
        if let Some(build) = &self.build {
            if build.script.trim().is_empty() {
                return Err("Build script name cannot be empty".to_string());
            }
        }
        Ok(())
    }
}

/// GCP project ids: 6-30 chars, lowercase letters, digits and hyphens,
/// starting with a letter and not ending with a hyphen.
pub fn validate_project_id(project_id: &str) -> Result<(), String> {
    let len = project_id.len();
    if !(6..=30).contains(&len) {
        return Err(format!(
            "Project id '{}' must be 6-30 characters long",
            project_id
        ));
    }
    if !project_id.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(format!("Project id '{}' must start with a letter", project_id));
    }
    if project_id.ends_with('-') {
        return Err(format!("Project id '{}' cannot end with '-'", project_id));
    }
    if !project_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "Project id '{}' may only contain lowercase letters, digits and '-'",
            project_id
        ));
    }
    Ok(())
}

/// One preflight check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreflightReport {
    pub checks: Vec<PreflightCheck>,
}

impl PreflightReport {
    fn record(&mut self, name: impl Into<String>, passed: bool, message: impl Into<String>) {
        let check = PreflightCheck {
            name: name.into(),
            passed,
            message: message.into(),
        };
        if check.passed {
            debug!("Preflight ok: {}", check.name);
        } else {
            warn!("Preflight failed: {} - {}", check.name, check.message);
        }
        self.checks.push(check);
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.name, c.message))
            .collect()
    }
}

/// Outcome of one executed (or dry-run) step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub command: String,
    pub executed: bool,
    pub success: bool,
    pub duration: Duration,
    pub stderr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReport {
    pub project_id: String,
    pub targets: Vec<DeployTarget>,
    pub dry_run: bool,
    pub success: bool,
    pub steps: Vec<StepResult>,
    pub total_duration: Duration,
}

impl DeployReport {
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| !s.success)
    }
}

/// Drives a Firebase deployment through a `CommandRunner`
pub struct Deployer {
    config: DeployConfig,
    runner: Box<dyn CommandRunner>,
}

impl Deployer {
    pub fn new(config: DeployConfig, runner: Box<dyn CommandRunner>) -> DeployResult<Self> {
        config.validate().map_err(DeployError::InvalidConfig)?;
        Ok(Self { config, runner })
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Check tools, credentials, secrets and build inputs before deploying
    pub fn preflight(&self) -> PreflightReport {
        let mut report = PreflightReport::default();

        for tool in self.config.required_tools() {
            let available = is_tool_available(self.runner.as_ref(), tool);
            report.record(
                format!("tool:{}", tool),
                available,
                if available {
                    format!("{} is installed", tool)
                } else {
                    format!("{} not found. Install with: {}", tool, tool.install_hint())
                },
            );
        }

        let auth = self.runner.run(
            &CommandSpec::tool(CliTool::Firebase)
                .args(["projects:list", "--json"])
                .current_dir(&self.config.working_dir),
        );
        match auth {
            Ok(output) if output.success => {
                let listed = output.stdout.contains(&self.config.project_id);
                report.record(
                    "firebase:project",
                    listed,
                    if listed {
                        format!("Project {} is accessible", self.config.project_id)
                    } else {
                        format!(
                            "Project {} not visible to the logged-in account",
                            self.config.project_id
                        )
                    },
                );
            }
            Ok(output) => report.record(
                "firebase:auth",
                false,
                format!("Not logged in: {}", output.stderr.trim()),
            ),
            Err(e) => report.record("firebase:auth", false, e.to_string()),
        }

        for secret in &self.config.required_secrets {
            let result = self.runner.run(
                &CommandSpec::tool(CliTool::Gcloud)
                    .args(["secrets", "describe", secret.as_str()])
                    .arg("--project")
                    .arg(self.config.project_id.as_str()),
            );
            let exists = result.is_ok_and(|o| o.success);
            report.record(
                format!("secret:{}", secret),
                exists,
                if exists {
                    "Secret exists".to_string()
                } else {
                    format!("Secret {} missing in Secret Manager", secret)
                },
            );
        }

        if let Some(build) = &self.config.build {
            let manifest = self.config.working_dir.join(&build.dir).join("package.json");
            let exists = manifest.is_file();
            report.record(
                "build:package.json",
                exists,
                if exists {
                    format!("Found {}", manifest.display())
                } else {
                    format!("Missing {}", manifest.display())
                },
            );
        }

        if let Some(upload) = &self.config.artifact_upload {
            let source = self.config.working_dir.join(&upload.source);
            // Artifacts are produced by the build, so only check when nothing builds them.
            let ok = self.config.build.is_some() || source.exists();
            report.record(
                "upload:source",
                ok,
                format!("Artifact source {}", source.display()),
            );
        }

        report
    }

    /// Planned steps in execution order
    pub fn plan(&self) -> Vec<(String, CommandSpec)> {
        let mut steps = Vec::new();

        if let Some(build) = &self.config.build {
            let dir = self.config.working_dir.join(&build.dir);
            if build.install {
                steps.push((
                    "install dependencies".to_string(),
                    CommandSpec::tool(CliTool::Npm).arg("ci").current_dir(&dir),
                ));
            }
            steps.push((
                format!("npm run {}", build.script),
                CommandSpec::tool(CliTool::Npm)
                    .args(["run", build.script.as_str()])
                    .current_dir(&dir),
            ));
        }

        let only = self
            .config
            .targets
            .iter()
            .map(DeployTarget::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let mut deploy = CommandSpec::tool(CliTool::Firebase)
            .args(["deploy", "--only", only.as_str()])
            .args(["--project", self.config.project_id.as_str()])
            .arg("--non-interactive")
            .current_dir(&self.config.working_dir);
        if let Some(message) = &self.config.message {
            deploy = deploy.args(["--message", message.as_str()]);
        }
        steps.push(("firebase deploy".to_string(), deploy));

        if let Some(upload) = &self.config.artifact_upload {
            let bucket = if upload.bucket.starts_with("gs://") {
                upload.bucket.clone()
            } else {
                format!("gs://{}", upload.bucket)
            };
            steps.push((
                "upload artifacts".to_string(),
                CommandSpec::tool(CliTool::Gsutil)
                    .args(["-m", "cp", "-r"])
                    .arg(upload.source.display().to_string())
                    .arg(bucket)
                    .current_dir(&self.config.working_dir),
            ));
        }

        steps
    }

    /// Run preflight, then every planned step, stopping at the first failure
    pub fn deploy(&self) -> DeployResult<DeployReport> {
        let preflight = self.preflight();
        if !preflight.passed() && !self.config.dry_run {
            return Err(DeployError::PreflightFailed {
                failures: preflight.failures(),
            });
        }

        let start = Instant::now();
        let mut steps = Vec::new();
        let mut success = true;

        info!(
            "🚀 Deploying {:?} to {}{}",
            self.config.targets,
            self.config.project_id,
            if self.config.dry_run { " (dry run)" } else { "" }
        );

        for (name, spec) in self.plan() {
            if self.config.dry_run {
                info!("[dry-run] {}", spec.display());
                steps.push(StepResult {
                    name,
                    command: spec.display(),
                    executed: false,
                    success: true,
                    duration: Duration::ZERO,
                    stderr: String::new(),
                });
                continue;
            }

            info!("▶ {}", spec.display());
            let step = match self.runner.run(&spec) {
                Ok(output) => StepResult {
                    name,
                    command: spec.display(),
                    executed: true,
                    success: output.success,
                    duration: output.duration,
                    stderr: output.stderr,
                },
                Err(e) => StepResult {
                    name,
                    command: spec.display(),
                    executed: false,
                    success: false,
                    duration: Duration::ZERO,
                    stderr: e.to_string(),
                },
            };

            let failed = !step.success;
            if failed {
                error!("Step '{}' failed: {}", step.name, step.stderr.trim());
            }
            steps.push(step);
            if failed {
                success = false;
                break;
            }
        }

        Ok(DeployReport {
            project_id: self.config.project_id.clone(),
            targets: self.config.targets.clone(),
            dry_run: self.config.dry_run,
            success,
            steps,
            total_duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CommandOutput;
    use std::sync::{Arc, Mutex};

    /// Records every command and fails any whose rendering contains `fail_on`
    #[derive(Clone, Default)]
    struct RecordingRunner {
        calls: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
        projects_json: String,
    }

    impl RecordingRunner {
        fn new() -> Self {
            Self {
                projects_json: r#"[{"projectId":"rag-prompt-library"}]"#.to_string(),
                ..Default::default()
            }
        }

        fn failing_on(mut self, needle: &str) -> Self {
            self.fail_on = Some(needle.to_string());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
            let line = spec.display();
            self.calls.lock().unwrap().push(line.clone());
            if let Some(needle) = &self.fail_on {
                if line.contains(needle.as_str()) {
                    return Ok(CommandOutput::failed(1, format!("{} failed", needle)));
                }
            }
            if line.contains("projects:list") {
                return Ok(CommandOutput::ok(self.projects_json.clone()));
            }
            Ok(CommandOutput::ok(""))
        }
    }

    #[test]
    fn test_project_id_validation() {
        assert!(validate_project_id("rag-prompt-library").is_ok());
        assert!(validate_project_id("short").is_err());
        assert!(validate_project_id("Rag-Prompt-Library").is_err());
        assert!(validate_project_id("1rag-prompt").is_err());
        assert!(validate_project_id("rag-prompt-").is_err());
        assert!(validate_project_id("rag_prompt_library").is_err());
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!(
            "Hosting".parse::<DeployTarget>().unwrap(),
            DeployTarget::Hosting
        );
        assert!("database".parse::<DeployTarget>().is_err());
    }

    #[test]
    fn test_plan_order_and_flags() {
        let config = DeployConfig::new("rag-prompt-library")
            .with_targets(vec![DeployTarget::Hosting, DeployTarget::Functions])
            .with_build(BuildConfig::default())
            .with_message("release 42");
        let deployer = Deployer::new(config, Box::new(RecordingRunner::new())).unwrap();

        let plan: Vec<String> = deployer.plan().iter().map(|(_, s)| s.display()).collect();
        assert_eq!(
            plan,
            vec![
                "npm ci".to_string(),
                "npm run build".to_string(),
                "firebase deploy --only hosting,functions --project rag-prompt-library --non-interactive --message release 42".to_string(),
            ]
        );
    }

    #[test]
    fn test_dry_run_executes_nothing() {
        let runner = RecordingRunner::new();
        let config = DeployConfig::new("rag-prompt-library").with_dry_run(true);
        let deployer = Deployer::new(config, Box::new(runner.clone())).unwrap();

        let report = deployer.deploy().unwrap();
        assert!(report.success);
        assert!(report.steps.iter().all(|s| !s.executed));
        assert!(!runner.calls().iter().any(|c| c.starts_with("firebase deploy")));
    }

    #[test]
    fn test_deploy_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("frontend")).unwrap();
        std::fs::write(dir.path().join("frontend/package.json"), "{}").unwrap();

        let runner = RecordingRunner::new().failing_on("npm run build");
        let config = DeployConfig::new("rag-prompt-library")
            .with_working_dir(dir.path())
            .with_build(BuildConfig::default());
        let deployer = Deployer::new(config, Box::new(runner.clone())).unwrap();

        let report = deployer.deploy().unwrap();
        assert!(!report.success);
        assert_eq!(report.failed_step().unwrap().name, "npm run build");
        assert!(!runner.calls().iter().any(|c| c.starts_with("firebase deploy")));
    }

    #[test]
    fn test_preflight_reports_missing_secret() {
        let runner = RecordingRunner::new().failing_on("secrets describe OPENROUTER_API_KEY");
        let config = DeployConfig::new("rag-prompt-library")
            .with_targets(vec![DeployTarget::Functions])
            .with_secret("OPENROUTER_API_KEY");
        let deployer = Deployer::new(config, Box::new(runner)).unwrap();

        let report = deployer.preflight();
        assert!(!report.passed());
        assert_eq!(report.failures().len(), 1);
        assert!(report.failures()[0].contains("OPENROUTER_API_KEY"));

        let err = deployer.deploy().unwrap_err();
        assert!(matches!(err, DeployError::PreflightFailed { .. }));
    }

    #[test]
    fn test_preflight_project_not_visible() {
        let mut runner = RecordingRunner::new();
        runner.projects_json = "[]".to_string();
        let deployer = Deployer::new(
            DeployConfig::new("rag-prompt-library"),
            Box::new(runner),
        )
        .unwrap();

        let report = deployer.preflight();
        assert!(!report.passed());
        assert!(report
            .checks
            .iter()
            .any(|c| c.name == "firebase:project" && !c.passed));
    }

    #[test]
    fn test_artifact_upload_prefixes_bucket() {
        let config = DeployConfig::new("rag-prompt-library").with_artifact_upload(ArtifactUpload {
            source: PathBuf::from("frontend/dist"),
            bucket: "rag-artifacts/releases".to_string(),
        });
        let deployer = Deployer::new(config, Box::new(RecordingRunner::new())).unwrap();

        let (_, upload) = deployer.plan().pop().unwrap();
        assert_eq!(
            upload.display(),
            "gsutil -m cp -r frontend/dist gs://rag-artifacts/releases"
        );
    }
}
