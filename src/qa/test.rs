//! Test stage runner
//!
//! Invokes the configured test command in a machine-readable mode
//! (libtest-style JSON events) and produces pass/fail/skip counts plus
//! one normalized record per failing test.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use serde_json::Value;
use tracing::debug;

use crate::process::{ProcessError, ProcessOptions, ProcessRunner};

use super::runner::StageRunner;
use super::stage::{NormalizedError, StageKind, StageResult, TestCounts};

/// Runs the configured test command
pub struct TestRunner {
    command: String,
    timeout: Duration,
    runner: ProcessRunner,
}

impl TestRunner {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            runner: ProcessRunner::new(),
        }
    }

    fn command_with_selector(&self, selector: Option<&str>) -> String {
        match selector {
            Some(selector) if !selector.is_empty() => format!("{} {}", self.command, selector),
            _ => self.command.clone(),
        }
    }

    /// Parse a libtest JSON event stream
    fn parse_output(output: &str) -> (TestCounts, Vec<NormalizedError>) {
        let mut counts = TestCounts::default();
        let mut failures = Vec::new();

        for line in output.lines() {
            let Ok(value) = serde_json::from_str::<Value>(line.trim()) else {
                continue;
            };
            if value.get("type").and_then(Value::as_str) != Some("test") {
                continue;
            }

            let name = value.get("name").and_then(Value::as_str).unwrap_or("<unnamed>");
            match value.get("event").and_then(Value::as_str) {
                Some("ok") => counts.passed += 1,
                Some("ignored") => counts.skipped += 1,
                Some("failed") => {
                    counts.failed += 1;
                    let detail = value
                        .get("stdout")
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .unwrap_or("test failed");
                    failures.push(NormalizedError::new(
                        "test-failure",
                        format!("{}: {}", name, detail),
                    ));
                }
                _ => {}
            }
        }

        (counts, failures)
    }
}

#[async_trait]
impl StageRunner for TestRunner {
    fn kind(&self) -> StageKind {
        StageKind::Test
    }

    async fn run(&self, workdir: &Path, selector: Option<&str>) -> Result<StageResult> {
        let command = self.command_with_selector(selector);
        debug!(%command, workdir = %workdir.display(), "TestRunner::run");
        let options = ProcessOptions::in_dir(workdir).with_shell().with_timeout(self.timeout);
        let start = std::time::Instant::now();

        match self.runner.run(&command, options).await {
            Ok(result) => {
                let (counts, failures) = Self::parse_output(&format!("{}\n{}", result.stdout, result.stderr));
                if failures.is_empty() {
                    Ok(StageResult::pass(StageKind::Test, result.duration).with_tests(counts))
                } else {
                    Ok(StageResult::fail(StageKind::Test, failures, result.duration).with_tests(counts))
                }
            }
            Err(ProcessError::Failed {
                stdout,
                stderr,
                exit_code,
                ..
            }) => {
                let (counts, mut failures) = Self::parse_output(&format!("{}\n{}", stdout, stderr));
                if failures.is_empty() {
                    // Harness died before reporting: one catch-all record
                    failures.push(NormalizedError::new(
                        "test-failure",
                        format!("test command exited with code {}", exit_code),
                    ));
                }
                Ok(StageResult::fail(StageKind::Test, failures, start.elapsed()).with_tests(counts))
            }
            Err(ProcessError::Timeout { .. }) => Ok(StageResult::timed_out(StageKind::Test, self.timeout)),
            Err(infra) => Err(infra.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_libtest_events() {
        let output = r#"{"type":"suite","event":"started","test_count":3}
{"type":"test","event":"ok","name":"tests::adds"}
{"type":"test","event":"failed","name":"tests::greets","stdout":"assertion failed: expected 'hello'"}
{"type":"test","event":"ignored","name":"tests::slow"}
{"type":"suite","event":"failed","passed":1,"failed":1,"ignored":1}"#;

        let (counts, failures) = TestRunner::parse_output(output);
        assert_eq!(counts, TestCounts { passed: 1, failed: 1, skipped: 1 });
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("tests::greets"));
        assert!(failures[0].message.contains("assertion failed"));
    }

    #[test]
    fn test_parse_empty_output() {
        let (counts, failures) = TestRunner::parse_output("");
        assert_eq!(counts, TestCounts::default());
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn test_passing_suite() {
        let dir = tempdir().unwrap();
        let runner = TestRunner::new(
            r#"echo '{"type":"test","event":"ok","name":"a"}'"#,
            Duration::from_secs(5),
        );

        let result = runner.run(dir.path(), None).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.tests.unwrap().passed, 1);
    }

    #[tokio::test]
    async fn test_failing_suite_returns_failure_records() {
        let dir = tempdir().unwrap();
        let runner = TestRunner::new(
            r#"echo '{"type":"test","event":"failed","name":"t1","stdout":"boom"}'; exit 101"#,
            Duration::from_secs(5),
        );

        let result = runner.run(dir.path(), None).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.tests.unwrap().failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("t1"));
    }

    #[tokio::test]
    async fn test_selector_appended_to_command() {
        let dir = tempdir().unwrap();
        // The selector becomes an argument to echo, visible in the JSON name
        let runner = TestRunner::new("echo", Duration::from_secs(5));
        let result = runner
            .run(dir.path(), Some(r#"'{"type":"test","event":"ok","name":"picked"}'"#))
            .await
            .unwrap();

        assert!(result.passed);
        assert_eq!(result.tests.unwrap().passed, 1);
    }

    #[tokio::test]
    async fn test_timeout_returns_synthetic_error() {
        let dir = tempdir().unwrap();
        let runner = TestRunner::new("sleep 10", Duration::from_millis(200));

        let result = runner.run(dir.path(), None).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.errors[0].kind, "timeout");
    }
}
