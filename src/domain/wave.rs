//! Wave types produced by the dependency resolver
//!
//! A wave is a set of mutually-independent tasks; waves execute in order,
//! and every prerequisite of a task in wave k lives in waves 0..k.

use serde::{Deserialize, Serialize};

/// One wave: task IDs in stable scheduling order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    pub tasks: Vec<String>,
}

impl Wave {
    pub fn new(tasks: Vec<String>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.iter().any(|t| t == task_id)
    }
}

/// Ordered wave plan for one feature
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WavePlan {
    pub waves: Vec<Wave>,
}

impl WavePlan {
    pub fn new(waves: Vec<Wave>) -> Self {
        Self { waves }
    }

    /// Total number of tasks across all waves
    pub fn task_count(&self) -> usize {
        self.waves.iter().map(Wave::len).sum()
    }

    /// Index of the wave containing a task, if any
    pub fn wave_of(&self, task_id: &str) -> Option<usize> {
        self.waves.iter().position(|w| w.contains(task_id))
    }
}
