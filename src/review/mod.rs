//! Human review service
//!
//! Durable queue of items that need out-of-band approval: QA
//! exhaustion, merge conflicts, or manual requests. State transitions
//! are pending → approved | rejected, exactly once per review. Storage
//! is behind a narrow trait; the in-memory implementation ships here,
//! durable engines live outside the core.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::{generate_id, now_ms};
use crate::events::{Event, EventBus};
use crate::qa::NormalizedError;

/// Why a task landed in the review queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    QaExhausted,
    MergeConflict,
    Manual,
}

impl std::fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QaExhausted => write!(f, "qa_exhausted"),
            Self::MergeConflict => write!(f, "merge_conflict"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Review lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// Snapshot handed to the human reviewer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewContext {
    /// QA iterations consumed before escalation
    pub qa_iterations: u32,

    /// Last-seen normalized errors
    #[serde(default)]
    pub errors: Vec<NormalizedError>,

    /// Suggested next step, if the escalating component has one
    #[serde(default)]
    pub suggested_action: Option<String>,

    /// Conflicting paths for merge-conflict reviews
    #[serde(default)]
    pub conflict_files: Vec<String>,
}

/// One queued review item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub id: String,
    pub task_id: String,
    pub reason: ReviewReason,
    pub context: ReviewContext,
    pub status: ReviewStatus,

    /// Required feedback on rejection
    #[serde(default)]
    pub feedback: Option<String>,

    /// Optional note on approval
    #[serde(default)]
    pub resolution: Option<String>,

    pub created_at: i64,
}

/// Error types for review operations
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("Review not found: {0}")]
    NotFound(String),

    #[error("Review already resolved: {0}")]
    AlreadyResolved(String),

    #[error("Rejection requires feedback")]
    FeedbackRequired,

    #[error("Store error: {0}")]
    Store(String),
}

/// Narrow persistence interface for review records
#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn put(&self, request: ReviewRequest) -> Result<(), ReviewError>;
    async fn get(&self, id: &str) -> Result<Option<ReviewRequest>, ReviewError>;
    async fn list(&self) -> Result<Vec<ReviewRequest>, ReviewError>;
}

/// In-memory review store
#[derive(Default)]
pub struct MemoryReviewStore {
    records: Mutex<HashMap<String, ReviewRequest>>,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReviewStore for MemoryReviewStore {
    async fn put(&self, request: ReviewRequest) -> Result<(), ReviewError> {
        self.records.lock().await.insert(request.id.clone(), request);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ReviewRequest>, ReviewError> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<ReviewRequest>, ReviewError> {
        let records = self.records.lock().await;
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        Ok(all)
    }
}

/// Queue of escalated tasks awaiting human approval
pub struct HumanReviewService {
    store: Arc<dyn ReviewStore>,
    bus: Arc<EventBus>,
    // Serializes state transitions so each review has a single writer
    transition: Mutex<()>,
}

impl HumanReviewService {
    pub fn new(store: Arc<dyn ReviewStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            transition: Mutex::new(()),
        }
    }

    /// Create an in-memory service (tests and single-process runs)
    pub fn in_memory(bus: Arc<EventBus>) -> Self {
        Self::new(Arc::new(MemoryReviewStore::new()), bus)
    }

    /// Queue a task for review; returns the review ID
    pub async fn request(
        &self,
        task_id: &str,
        reason: ReviewReason,
        context: ReviewContext,
    ) -> eyre::Result<String> {
        let request = ReviewRequest {
            id: generate_id("review", task_id),
            task_id: task_id.to_string(),
            reason,
            context,
            status: ReviewStatus::Pending,
            feedback: None,
            resolution: None,
            created_at: now_ms(),
        };
        let review_id = request.id.clone();
        let qa_iterations = request.context.qa_iterations;

        info!(%task_id, %review_id, %reason, "Review requested");
        self.store.put(request).await?;
        self.bus
            .emit(Event::review_requested(task_id, &review_id, reason, qa_iterations));

        Ok(review_id)
    }

    /// Approve a pending review
    pub async fn approve(&self, review_id: &str, resolution: Option<String>) -> Result<ReviewRequest, ReviewError> {
        let _guard = self.transition.lock().await;
        let mut request = self.pending_record(review_id).await?;

        request.status = ReviewStatus::Approved;
        request.resolution = resolution;
        self.store.put(request.clone()).await?;

        debug!(%review_id, "Review approved");
        self.bus
            .emit(Event::review_resolved(&request.task_id, review_id, true, None));
        Ok(request)
    }

    /// Reject a pending review; feedback is mandatory
    pub async fn reject(&self, review_id: &str, feedback: &str) -> Result<ReviewRequest, ReviewError> {
        if feedback.trim().is_empty() {
            return Err(ReviewError::FeedbackRequired);
        }

        let _guard = self.transition.lock().await;
        let mut request = self.pending_record(review_id).await?;

        request.status = ReviewStatus::Rejected;
        request.feedback = Some(feedback.to_string());
        self.store.put(request.clone()).await?;

        debug!(%review_id, "Review rejected");
        self.bus.emit(Event::review_resolved(
            &request.task_id,
            review_id,
            false,
            Some(feedback.to_string()),
        ));
        Ok(request)
    }

    /// Fetch one review record
    pub async fn get(&self, review_id: &str) -> Result<Option<ReviewRequest>, ReviewError> {
        self.store.get(review_id).await
    }

    /// Pending reviews in creation order
    pub async fn pending(&self) -> Result<Vec<ReviewRequest>, ReviewError> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|r| r.status == ReviewStatus::Pending)
            .collect())
    }

    async fn pending_record(&self, review_id: &str) -> Result<ReviewRequest, ReviewError> {
        let request = self
            .store
            .get(review_id)
            .await?
            .ok_or_else(|| ReviewError::NotFound(review_id.to_string()))?;

        if request.status != ReviewStatus::Pending {
            return Err(ReviewError::AlreadyResolved(review_id.to_string()));
        }
        Ok(request)
    }
}
