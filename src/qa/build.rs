//! Build stage runner
//!
//! Invokes the project's type-check/compile command and parses
//! diagnostic lines into structured errors. A non-zero exit is a
//! failing result, not an error; only infrastructure faults (blocked
//! command, spawn failure) propagate.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use regex::Regex;
use tracing::debug;

use crate::process::{ProcessError, ProcessOptions, ProcessRunner};

use super::runner::StageRunner;
use super::stage::{NormalizedError, StageKind, StageResult};

/// `file:line[:col]: severity[code]: message` - gcc/rustc short format
static DIAGNOSTIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<file>[^\s:][^:\n]*):(?P<line>\d+)(?::\d+)?:\s*(?P<sev>error|warning)(?:\[[^\]]*\])?:?\s*(?P<msg>.+)$")
        .expect("diagnostic regex")
});

/// Bare `error: message` lines without a location
static BARE_ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^error(?:\[[^\]]*\])?:\s*(?P<msg>.+)$").expect("bare error regex"));

/// Runs the configured compile/type-check command
pub struct BuildRunner {
    command: String,
    timeout: Duration,
    runner: ProcessRunner,
}

impl BuildRunner {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            runner: ProcessRunner::new(),
        }
    }

    /// Extract structured diagnostics from compiler output
    fn parse_diagnostics(output: &str) -> (Vec<NormalizedError>, Vec<NormalizedError>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for caps in DIAGNOSTIC_RE.captures_iter(output) {
            let diag = NormalizedError::new("compile", caps["msg"].trim()).at(
                caps["file"].to_string(),
                caps["line"].parse::<u32>().ok(),
            );
            if &caps["sev"] == "error" {
                errors.push(diag);
            } else {
                warnings.push(diag);
            }
        }

        // Location-less errors (link failures, top-level cargo errors)
        for caps in BARE_ERROR_RE.captures_iter(output) {
            let msg = caps["msg"].trim();
            if !errors.iter().any(|e| e.message == msg) {
                errors.push(NormalizedError::new("compile", msg));
            }
        }

        (errors, warnings)
    }
}

#[async_trait]
impl StageRunner for BuildRunner {
    fn kind(&self) -> StageKind {
        StageKind::Build
    }

    async fn run(&self, workdir: &Path, _selector: Option<&str>) -> Result<StageResult> {
        debug!(command = %self.command, workdir = %workdir.display(), "BuildRunner::run");
        let options = ProcessOptions::in_dir(workdir).with_shell().with_timeout(self.timeout);
        let start = std::time::Instant::now();

        match self.runner.run(&self.command, options).await {
            Ok(result) => {
                let (_, warnings) = Self::parse_diagnostics(&format!("{}\n{}", result.stdout, result.stderr));
                Ok(StageResult::pass(StageKind::Build, result.duration).with_warnings(warnings))
            }
            Err(ProcessError::Failed {
                stdout,
                stderr,
                exit_code,
                ..
            }) => {
                let combined = format!("{}\n{}", stdout, stderr);
                let (mut errors, warnings) = Self::parse_diagnostics(&combined);
                if errors.is_empty() {
                    // Unparseable output still fails with one catch-all error
                    errors.push(NormalizedError::new(
                        "compile",
                        format!("build command exited with code {}", exit_code),
                    ));
                }
                Ok(StageResult::fail(StageKind::Build, errors, start.elapsed()).with_warnings(warnings))
            }
            Err(ProcessError::Timeout { .. }) => Ok(StageResult::timed_out(StageKind::Build, self.timeout)),
            Err(infra) => Err(infra.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_rustc_diagnostics() {
        let output = "\
src/lib.rs:12:9: error[E0308]: mismatched types
src/lib.rs:20:1: warning: unused variable: `x`
error: aborting due to 1 previous error
";
        let (errors, warnings) = BuildRunner::parse_diagnostics(output);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].file.as_deref(), Some("src/lib.rs"));
        assert_eq!(errors[0].line, Some(12));
        assert!(errors[0].message.contains("mismatched types"));
        assert_eq!(errors[1].message, "aborting due to 1 previous error");

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].line, Some(20));
    }

    #[test]
    fn test_parse_clean_output() {
        let (errors, warnings) = BuildRunner::parse_diagnostics("Compiling nexus v0.1.0\nFinished dev profile\n");
        assert!(errors.is_empty());
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_run_passing_command() {
        let dir = tempdir().unwrap();
        let runner = BuildRunner::new("true", Duration::from_secs(5));

        let result = runner.run(dir.path(), None).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.stage, StageKind::Build);
    }

    #[tokio::test]
    async fn test_run_failing_command_returns_result_not_error() {
        let dir = tempdir().unwrap();
        let runner = BuildRunner::new(
            "echo 'src/lib.rs:3:1: error: expected semicolon' >&2; exit 1",
            Duration::from_secs(5),
        );

        let result = runner.run(dir.path(), None).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].file.as_deref(), Some("src/lib.rs"));
        assert_eq!(result.errors[0].line, Some(3));
    }

    #[tokio::test]
    async fn test_run_timeout_returns_synthetic_error() {
        let dir = tempdir().unwrap();
        let runner = BuildRunner::new("sleep 10", Duration::from_millis(200));

        let result = runner.run(dir.path(), None).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, "timeout");
    }

    #[tokio::test]
    async fn test_unparseable_failure_gets_catch_all() {
        let dir = tempdir().unwrap();
        let runner = BuildRunner::new("exit 2", Duration::from_secs(5));

        let result = runner.run(dir.path(), None).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("exited with code 2"));
    }
}
