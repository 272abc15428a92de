//! Thin layer over the external CLIs the deployment drivers shell out to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// External command-line tools used during deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CliTool {
    /// Firebase CLI (hosting, functions, rules)
    Firebase,
    /// Google Cloud SDK
    Gcloud,
    /// Node package manager, used for the frontend build
    Npm,
    /// Cloud Storage CLI
    Gsutil,
}

impl CliTool {
    pub const ALL: [CliTool; 4] = [
        CliTool::Firebase,
        CliTool::Gcloud,
        CliTool::Npm,
        CliTool::Gsutil,
    ];

    /// Get the executable name for this tool
    pub fn command(&self) -> &'static str {
        match self {
            CliTool::Firebase => "firebase",
            CliTool::Gcloud => "gcloud",
            CliTool::Npm => "npm",
            CliTool::Gsutil => "gsutil",
        }
    }

    /// Hint printed when the tool is missing
    pub fn install_hint(&self) -> &'static str {
        match self {
            CliTool::Firebase => "npm install -g firebase-tools",
            CliTool::Gcloud | CliTool::Gsutil => "https://cloud.google.com/sdk/docs/install",
            CliTool::Npm => "https://nodejs.org/",
        }
    }
}

impl std::fmt::Display for CliTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command())
    }
}

/// Captured result of one external command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }
}

/// A command line to execute, program plus arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn tool(tool: CliTool) -> Self {
        Self::new(tool.command())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Shell-style rendering for logs and dry runs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Executes commands. Abstracted so drivers can be exercised without the real CLIs.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput>;
}

/// Runs commands on the host via `std::process::Command`
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        let start = Instant::now();
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).stdin(Stdio::null());
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        })
    }
}

/// Check whether a tool is installed by running `<tool> --version`
pub fn is_tool_available(runner: &dyn CommandRunner, tool: CliTool) -> bool {
    runner
        .run(&CommandSpec::tool(tool).arg("--version"))
        .is_ok_and(|output| output.success)
}

/// Availability of every known tool
pub fn detect_tools(runner: &dyn CommandRunner) -> BTreeMap<CliTool, bool> {
    CliTool::ALL
        .iter()
        .map(|tool| (*tool, is_tool_available(runner, *tool)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OnlyFirebase;

    impl CommandRunner for OnlyFirebase {
        fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
            match spec.program.as_str() {
                "firebase" => Ok(CommandOutput::ok("13.0.0")),
                "npm" => Ok(CommandOutput::failed(127, "broken install")),
                _ => Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing")),
            }
        }
    }

    #[test]
    fn test_tool_commands() {
        assert_eq!(CliTool::Firebase.command(), "firebase");
        assert_eq!(CliTool::Gcloud.command(), "gcloud");
        assert_eq!(CliTool::Npm.command(), "npm");
        assert_eq!(CliTool::Gsutil.command(), "gsutil");
        assert_eq!(CliTool::Gsutil.to_string(), "gsutil");
    }

    #[test]
    fn test_command_spec_display() {
        let spec = CommandSpec::tool(CliTool::Firebase)
            .args(["deploy", "--only", "hosting"])
            .arg("--project")
            .arg("demo");
        assert_eq!(spec.display(), "firebase deploy --only hosting --project demo");
    }

    #[test]
    fn test_detect_tools() {
        let tools = detect_tools(&OnlyFirebase);
        assert_eq!(tools.len(), 4);
        assert!(tools[&CliTool::Firebase]);
        assert!(!tools[&CliTool::Npm]);
        assert!(!tools[&CliTool::Gcloud]);
    }

    #[test]
    fn test_system_runner_missing_program() {
        let result = SystemRunner.run(&CommandSpec::new("definitely-not-a-real-binary-4821"));
        assert!(result.is_err());
    }
}
