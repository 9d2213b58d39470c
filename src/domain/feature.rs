//! Feature domain type
//!
//! A Feature is the high-level input unit: a natural-language description
//! of what to build, optionally tagged with a MoSCoW priority and
//! acceptance criteria. Immutable once submitted.

use serde::{Deserialize, Serialize};

use super::id::generate_id;
use super::priority::FeaturePriority;

/// A feature submitted to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    /// Unique identifier (e.g., "019f3a-feature-user-login")
    pub id: String,

    /// Short human-readable title
    pub title: String,

    /// Natural-language description of the work
    pub description: String,

    /// MoSCoW priority tag
    #[serde(default)]
    pub priority: FeaturePriority,

    /// Optional acceptance criteria, one per entry
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl Feature {
    /// Create a new feature with a generated ID
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: generate_id("feature", &title),
            title,
            description: description.into(),
            priority: FeaturePriority::default(),
            acceptance_criteria: Vec::new(),
        }
    }

    /// Set the MoSCoW priority tag
    pub fn with_priority(mut self, priority: FeaturePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add an acceptance criterion
    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }
}
