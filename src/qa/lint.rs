//! Lint stage runner
//!
//! Invokes the configured linter in a machine-readable (JSON-lines)
//! mode. Warnings are reported but never fail the stage; errors do.
//! A `--fix` pass can be requested as a best-effort side effect.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use serde_json::Value;
use tracing::{debug, warn};

use crate::process::{ProcessError, ProcessOptions, ProcessRunner};

use super::runner::StageRunner;
use super::stage::{NormalizedError, StageKind, StageResult};

/// Runs the configured linter
pub struct LintRunner {
    command: String,
    timeout: Duration,
    runner: ProcessRunner,
}

impl LintRunner {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            runner: ProcessRunner::new(),
        }
    }

    /// Best-effort auto-fix pass
    ///
    /// Failures are logged and swallowed; the contract is the attempt,
    /// not the outcome. The following `run` decides whether the tree is
    /// clean.
    pub async fn run_fix(&self, workdir: &Path) {
        let command = format!("{} --fix", self.command);
        debug!(%command, "LintRunner::run_fix");
        let options = ProcessOptions::in_dir(workdir).with_shell().with_timeout(self.timeout);
        if let Err(e) = self.runner.run(&command, options).await {
            warn!(error = %e, "Lint auto-fix did not complete");
        }
    }

    /// Parse one JSON diagnostic line
    ///
    /// Accepts both the flat shape (`{"level", "message", "file",
    /// "line"}`) and the cargo wrapper shape
    /// (`{"reason": "compiler-message", "message": {...}}`).
    fn parse_line(line: &str) -> Option<(String, NormalizedError)> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;

        let message_obj = if value.get("reason").and_then(Value::as_str) == Some("compiler-message") {
            value.get("message")?.clone()
        } else {
            value
        };

        let level = message_obj
            .get("level")
            .or_else(|| message_obj.get("severity"))
            .and_then(Value::as_str)?
            .to_lowercase();

        let text = message_obj.get("message").and_then(Value::as_str)?.to_string();

        let mut diag = NormalizedError::new("lint", text);

        // Flat location or the first primary span
        if let Some(file) = message_obj.get("file").and_then(Value::as_str) {
            let line_no = message_obj.get("line").and_then(Value::as_u64).map(|l| l as u32);
            diag = diag.at(file, line_no);
        } else if let Some(spans) = message_obj.get("spans").and_then(Value::as_array)
            && let Some(span) = spans
                .iter()
                .find(|s| s.get("is_primary").and_then(Value::as_bool).unwrap_or(false))
                .or_else(|| spans.first())
        {
            let file = span.get("file_name").and_then(Value::as_str).unwrap_or("");
            let line_no = span.get("line_start").and_then(Value::as_u64).map(|l| l as u32);
            if !file.is_empty() {
                diag = diag.at(file, line_no);
            }
        }

        Some((level, diag))
    }

    /// Split the JSON stream into failing errors and non-failing warnings
    fn parse_output(output: &str) -> (Vec<NormalizedError>, Vec<NormalizedError>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for line in output.lines() {
            if let Some((level, diag)) = Self::parse_line(line) {
                match level.as_str() {
                    "error" => errors.push(diag),
                    "warning" | "warn" => warnings.push(diag),
                    // "note"/"help" and cargo bookkeeping lines are dropped
                    _ => {}
                }
            }
        }

        (errors, warnings)
    }
}

#[async_trait]
impl StageRunner for LintRunner {
    fn kind(&self) -> StageKind {
        StageKind::Lint
    }

    async fn run(&self, workdir: &Path, _selector: Option<&str>) -> Result<StageResult> {
        debug!(command = %self.command, workdir = %workdir.display(), "LintRunner::run");
        let options = ProcessOptions::in_dir(workdir).with_shell().with_timeout(self.timeout);
        let start = std::time::Instant::now();

        match self.runner.run(&self.command, options).await {
            Ok(result) => {
                let (errors, warnings) = Self::parse_output(&format!("{}\n{}", result.stdout, result.stderr));
                // A zero exit with error-level diagnostics still fails
                if errors.is_empty() {
                    Ok(StageResult::pass(StageKind::Lint, result.duration).with_warnings(warnings))
                } else {
                    Ok(StageResult::fail(StageKind::Lint, errors, result.duration).with_warnings(warnings))
                }
            }
            Err(ProcessError::Failed {
                stdout,
                stderr,
                exit_code,
                ..
            }) => {
                let (mut errors, warnings) = Self::parse_output(&format!("{}\n{}", stdout, stderr));
                if errors.is_empty() {
                    errors.push(NormalizedError::new(
                        "lint",
                        format!("lint command exited with code {}", exit_code),
                    ));
                }
                Ok(StageResult::fail(StageKind::Lint, errors, start.elapsed()).with_warnings(warnings))
            }
            Err(ProcessError::Timeout { .. }) => Ok(StageResult::timed_out(StageKind::Lint, self.timeout)),
            Err(infra) => Err(infra.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_flat_diagnostics() {
        let output = r#"{"level": "warning", "message": "trailing semicolon", "file": "src/main.rs", "line": 3}
{"level": "error", "message": "use of moved value", "file": "src/lib.rs", "line": 10}"#;

        let (errors, warnings) = LintRunner::parse_output(output);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].file.as_deref(), Some("src/lib.rs"));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].line, Some(3));
    }

    #[test]
    fn test_parse_cargo_wrapper_shape() {
        let output = r#"{"reason":"compiler-message","message":{"level":"warning","message":"unused import","spans":[{"file_name":"src/qa/mod.rs","line_start":2,"is_primary":true}]}}
{"reason":"build-finished","success":true}"#;

        let (errors, warnings) = LintRunner::parse_output(output);
        assert!(errors.is_empty());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].file.as_deref(), Some("src/qa/mod.rs"));
        assert_eq!(warnings[0].line, Some(2));
    }

    #[test]
    fn test_non_json_lines_ignored() {
        let output = "Checking nexus v0.1.0\nFinished dev profile\n";
        let (errors, warnings) = LintRunner::parse_output(output);
        assert!(errors.is_empty());
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_warnings_do_not_fail_stage() {
        let dir = tempdir().unwrap();
        let runner = LintRunner::new(
            r#"echo '{"level": "warning", "message": "style nit", "file": "a.rs", "line": 1}'"#,
            Duration::from_secs(5),
        );

        let result = runner.run(dir.path(), None).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_errors_fail_stage() {
        let dir = tempdir().unwrap();
        let runner = LintRunner::new(
            r#"echo '{"level": "error", "message": "broken", "file": "a.rs", "line": 1}'; exit 1"#,
            Duration::from_secs(5),
        );

        let result = runner.run(dir.path(), None).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].message, "broken");
    }

    #[tokio::test]
    async fn test_timeout_returns_synthetic_error() {
        let dir = tempdir().unwrap();
        let runner = LintRunner::new("sleep 10", Duration::from_millis(200));

        let result = runner.run(dir.path(), None).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.errors[0].kind, "timeout");
    }
}
