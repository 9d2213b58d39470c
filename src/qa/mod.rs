//! QA pipeline: stage model, runners, and the self-healing loop engine

pub mod build;
pub mod engine;
pub mod lint;
pub mod review;
pub mod runner;
pub mod stage;
pub mod test;

pub use build::BuildRunner;
pub use engine::{IssueFixer, QaLoopEngine, QaOutcome, QaResult};
pub use lint::LintRunner;
pub use review::{CodeReviewer, ReviewRunner};
pub use runner::StageRunner;
pub use stage::{
    NormalizedError, ReviewIssue, ReviewVerdict, Severity, StageKind, StageResult, TestCounts, has_blocking_issues,
};
pub use test::TestRunner;
