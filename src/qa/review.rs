//! Review stage runner
//!
//! Diffs the worktree against the integration branch and asks the
//! reviewer agent for a structured verdict. The runner owns the
//! blocking rule: at least one critical issue, or more than two major
//! issues, fails the stage regardless of what the reviewer claims.
//! A non-blocking verdict with `approved = false` is honored as-is.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use tracing::{debug, warn};

use crate::vcs::GitAdapter;

use super::runner::StageRunner;
use super::stage::{NormalizedError, ReviewVerdict, Severity, StageKind, StageResult, has_blocking_issues};

/// Produces a structured review verdict for a diff
#[async_trait]
pub trait CodeReviewer: Send + Sync {
    async fn review(&self, diff: &str) -> Result<ReviewVerdict>;
}

/// Runs the review stage through a `CodeReviewer`
pub struct ReviewRunner {
    git: GitAdapter,
    base_branch: String,
    reviewer: Arc<dyn CodeReviewer>,
    timeout: Duration,
}

impl ReviewRunner {
    pub fn new(git: GitAdapter, base_branch: impl Into<String>, reviewer: Arc<dyn CodeReviewer>, timeout: Duration) -> Self {
        Self {
            git,
            base_branch: base_branch.into(),
            reviewer,
            timeout,
        }
    }

    /// Apply the blocking rule to the reviewer's verdict
    ///
    /// Blocking issues always force `approved = false`. An unblocked
    /// `false` from the reviewer stands - the model may know something
    /// the rule does not.
    pub fn normalize(mut verdict: ReviewVerdict) -> ReviewVerdict {
        if has_blocking_issues(&verdict.issues) {
            if verdict.approved {
                warn!("Reviewer self-reported approval despite blocking issues; overriding");
            }
            verdict.approved = false;
        }
        verdict
    }

    fn blocking_errors(verdict: &ReviewVerdict) -> Vec<NormalizedError> {
        verdict
            .issues
            .iter()
            .filter(|i| matches!(i.severity, Severity::Critical | Severity::Major))
            .map(|i| {
                let mut err = NormalizedError::new("review", format!("[{:?}] {}", i.severity, i.message));
                if let Some(file) = &i.file {
                    err = err.at(file.clone(), i.line);
                }
                err
            })
            .collect()
    }
}

#[async_trait]
impl StageRunner for ReviewRunner {
    fn kind(&self) -> StageKind {
        StageKind::Review
    }

    async fn run(&self, workdir: &Path, _selector: Option<&str>) -> Result<StageResult> {
        debug!(workdir = %workdir.display(), base = %self.base_branch, "ReviewRunner::run");
        let start = std::time::Instant::now();

        let diff = self.git.diff(workdir, &self.base_branch).await?;
        if diff.trim().is_empty() {
            // Nothing changed; nothing to review
            return Ok(StageResult::pass(StageKind::Review, start.elapsed()).with_review(ReviewVerdict {
                approved: true,
                issues: Vec::new(),
            }));
        }

        let verdict = match tokio::time::timeout(self.timeout, self.reviewer.review(&diff)).await {
            Ok(verdict) => verdict?,
            Err(_elapsed) => return Ok(StageResult::timed_out(StageKind::Review, self.timeout)),
        };

        let verdict = Self::normalize(verdict);
        let duration = start.elapsed();

        if verdict.approved {
            Ok(StageResult::pass(StageKind::Review, duration).with_review(verdict))
        } else {
            let mut errors = Self::blocking_errors(&verdict);
            if errors.is_empty() {
                // Honored reviewer rejection without blocking issues
                errors.push(NormalizedError::new("review", "reviewer withheld approval"));
            }
            Ok(StageResult::fail(StageKind::Review, errors, duration).with_review(verdict))
        }
    }
}
