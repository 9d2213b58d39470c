//! Dependency resolver
//!
//! Kahn's algorithm over the task DAG, producing waves of
//! mutually-independent tasks. Residual nodes after the sort mean a
//! cycle; the resolver reports it and the coordinator refuses to
//! schedule. Output is deterministic: within a wave, tasks are ordered
//! by priority descending, then by insertion order.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::domain::{Task, Wave, WavePlan};

/// Error types for wave resolution
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Dependency cycle among tasks: {}", remaining.join(", "))]
    Cycle { remaining: Vec<String> },
}

/// Form waves from a task set
///
/// Prerequisites referencing tasks outside the set are treated as
/// already satisfied (the coordinator only submits whole waves, so
/// anything external is done by construction).
pub fn resolve_waves(tasks: &[Task]) -> Result<WavePlan, ResolveError> {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let index_of: HashMap<&str, usize> = tasks.iter().enumerate().map(|(i, t)| (t.id.as_str(), i)).collect();

    // In-degree restricted to edges inside the set
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks {
        let mut degree = 0;
        for dep in &task.deps {
            if ids.contains(dep.as_str()) {
                degree += 1;
                dependents.entry(dep.as_str()).or_default().push(task.id.as_str());
            } else {
                warn!(task_id = %task.id, dep = %dep, "Prerequisite outside the task set, assuming satisfied");
            }
        }
        indegree.insert(task.id.as_str(), degree);
    }

    let mut waves = Vec::new();
    let mut placed = 0usize;

    // Current frontier: every task with no unsatisfied prerequisite
    let mut ready: Vec<&str> = tasks
        .iter()
        .filter(|t| indegree[t.id.as_str()] == 0)
        .map(|t| t.id.as_str())
        .collect();

    while !ready.is_empty() {
        // Stable order: priority descending, then insertion order
        ready.sort_by(|a, b| {
            let ta = &tasks[index_of[a]];
            let tb = &tasks[index_of[b]];
            tb.priority.cmp(&ta.priority).then(index_of[a].cmp(&index_of[b]))
        });

        placed += ready.len();
        let wave_ids: Vec<String> = ready.iter().map(|id| id.to_string()).collect();

        // Next frontier: dependents whose last in-set prerequisite was just placed
        let mut next = Vec::new();
        for id in &ready {
            if let Some(children) = dependents.get(*id) {
                for child in children {
                    if let Some(degree) = indegree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*child);
                        }
                    }
                }
            }
        }

        waves.push(Wave::new(wave_ids));
        ready = next;
    }

    if placed < tasks.len() {
        let remaining: Vec<String> = tasks
            .iter()
            .filter(|t| indegree[t.id.as_str()] > 0)
            .map(|t| t.id.clone())
            .collect();
        warn!(?remaining, "Cycle detected during wave resolution");
        return Err(ResolveError::Cycle { remaining });
    }

    debug!(waves = waves.len(), tasks = tasks.len(), "Waves resolved");
    Ok(WavePlan::new(waves))
}

/// Check a task set for prerequisite cycles
pub fn validate_dag(tasks: &[Task]) -> Result<(), ResolveError> {
    resolve_waves(tasks).map(|_| ())
}
