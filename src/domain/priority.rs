//! Priority levels for features and tasks

use serde::{Deserialize, Serialize};

/// Scheduling priority for tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// MoSCoW tag attached to a submitted feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeaturePriority {
    Must,
    #[default]
    Should,
    Could,
    Wont,
}

impl FeaturePriority {
    /// Map the feature tag onto a task scheduling priority
    pub fn as_task_priority(self) -> Priority {
        match self {
            Self::Must => Priority::High,
            Self::Should => Priority::Normal,
            Self::Could => Priority::Low,
            Self::Wont => Priority::Low,
        }
    }
}

impl std::fmt::Display for FeaturePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Must => write!(f, "must"),
            Self::Should => write!(f, "should"),
            Self::Could => write!(f, "could"),
            Self::Wont => write!(f, "wont"),
        }
    }
}
