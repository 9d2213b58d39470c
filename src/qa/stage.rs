//! Stage model for the QA pipeline
//!
//! Every runner produces a `StageResult` with normalized errors; the
//! loop engine and the repair path only ever see this shape, never raw
//! tool output.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The four QA stages, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Build,
    Lint,
    Test,
    Review,
}

impl StageKind {
    /// Pipeline order
    pub const ORDER: [StageKind; 4] = [Self::Build, Self::Lint, Self::Test, Self::Review];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Lint => "lint",
            Self::Test => "test",
            Self::Review => "review",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One normalized diagnostic from a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedError {
    /// Error family ("compile", "lint", "test-failure", "review", "timeout")
    pub kind: String,

    /// File the diagnostic points at, if known
    pub file: Option<String>,

    /// 1-based line, if known
    pub line: Option<u32>,

    /// Human-readable message
    pub message: String,
}

impl NormalizedError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            file: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    /// Render for the repair prompt
    pub fn render(&self) -> String {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("{}:{}: {}", file, line, self.message),
            (Some(file), None) => format!("{}: {}", file, self.message),
            _ => self.message.clone(),
        }
    }
}

/// Test stage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// Review issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Suggestion,
}

/// One issue raised by the reviewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: Severity,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    pub message: String,
}

/// Structured verdict from the reviewer agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    /// The reviewer's self-reported approval
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
}

/// Blocking rule: ≥ 1 critical, or > 2 major issues
///
/// Minor issues and suggestions never block.
pub fn has_blocking_issues(issues: &[ReviewIssue]) -> bool {
    let criticals = issues.iter().filter(|i| i.severity == Severity::Critical).count();
    let majors = issues.iter().filter(|i| i.severity == Severity::Major).count();
    criticals >= 1 || majors > 2
}

/// Normalized output of one stage run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub passed: bool,
    pub duration_ms: u64,

    /// Failing diagnostics; non-empty when `passed` is false
    #[serde(default)]
    pub errors: Vec<NormalizedError>,

    /// Non-failing diagnostics
    #[serde(default)]
    pub warnings: Vec<NormalizedError>,

    /// Present for the test stage
    #[serde(default)]
    pub tests: Option<TestCounts>,

    /// Present for the review stage, with the normalized approved flag
    #[serde(default)]
    pub review: Option<ReviewVerdict>,
}

impl StageResult {
    pub fn pass(stage: StageKind, duration: Duration) -> Self {
        Self {
            stage,
            passed: true,
            duration_ms: duration.as_millis() as u64,
            errors: Vec::new(),
            warnings: Vec::new(),
            tests: None,
            review: None,
        }
    }

    pub fn fail(stage: StageKind, errors: Vec<NormalizedError>, duration: Duration) -> Self {
        Self {
            stage,
            passed: false,
            duration_ms: duration.as_millis() as u64,
            errors,
            warnings: Vec::new(),
            tests: None,
            review: None,
        }
    }

    /// A stage that exceeded its budget: one synthetic timeout error
    pub fn timed_out(stage: StageKind, budget: Duration) -> Self {
        Self::fail(
            stage,
            vec![NormalizedError::new(
                "timeout",
                format!("{} stage exceeded its budget of {:?}", stage, budget),
            )],
            budget,
        )
    }

    pub fn with_warnings(mut self, warnings: Vec<NormalizedError>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_tests(mut self, counts: TestCounts) -> Self {
        self.tests = Some(counts);
        self
    }

    pub fn with_review(mut self, verdict: ReviewVerdict) -> Self {
        self.review = Some(verdict);
        self
    }
}
