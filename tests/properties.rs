//! Quantified properties checked with generators
//!
//! Covers the resolver's wave invariants, the replanner's idempotence
//! and boundary behavior, the review blocking rule, the estimator's
//! calibration clamp, and the process guard.

use proptest::prelude::*;

use nexus::config::ReplanConfig;
use nexus::domain::{Priority, Task};
use nexus::events::EventBus;
use nexus::planning::{TimeEstimator, resolve_waves};
use nexus::process::guard;
use nexus::qa::{ReviewIssue, Severity, has_blocking_issues};
use nexus::replan::{ExecutionContext, Replanner};
use std::sync::Arc;

/// Random DAG: each task may depend on any strictly-earlier task
fn arb_dag(max_tasks: usize) -> impl Strategy<Value = Vec<Task>> {
    (1..=max_tasks).prop_flat_map(|n| {
        let deps = proptest::collection::vec(proptest::collection::vec(0..n, 0..=n.min(4)), n);
        let priorities = proptest::collection::vec(0u8..4, n);
        (deps, priorities).prop_map(|(deps, priorities)| {
            (0..deps.len())
                .map(|i| {
                    let mut task = Task::with_id(format!("task-{}", i), format!("Task {}", i));
                    task.priority = match priorities[i] {
                        0 => Priority::Low,
                        1 => Priority::Normal,
                        2 => Priority::High,
                        _ => Priority::Critical,
                    };
                    for &dep in &deps[i] {
                        if dep < i {
                            task.add_dep(format!("task-{}", dep));
                        }
                    }
                    task
                })
                .collect()
        })
    })
}

proptest! {
    /// Every prerequisite of a task in wave k lives in a wave < k
    #[test]
    fn resolver_waves_respect_the_dag(tasks in arb_dag(12)) {
        let plan = resolve_waves(&tasks).unwrap();

        prop_assert_eq!(plan.task_count(), tasks.len());
        for (k, wave) in plan.waves.iter().enumerate() {
            for id in &wave.tasks {
                let task = tasks.iter().find(|t| &t.id == id).unwrap();
                for dep in &task.deps {
                    let dep_wave = plan.wave_of(dep).unwrap();
                    prop_assert!(dep_wave < k);
                }
            }
        }
    }

    /// Wave formation is deterministic for a given input
    #[test]
    fn resolver_is_deterministic(tasks in arb_dag(10)) {
        let first = resolve_waves(&tasks).unwrap();
        let second = resolve_waves(&tasks).unwrap();
        prop_assert_eq!(first.waves, second.waves);
    }

    /// Tasks within one wave never depend on each other
    #[test]
    fn wave_members_are_mutually_independent(tasks in arb_dag(10)) {
        let plan = resolve_waves(&tasks).unwrap();
        for wave in &plan.waves {
            for id in &wave.tasks {
                let task = tasks.iter().find(|t| &t.id == id).unwrap();
                for dep in &task.deps {
                    prop_assert!(!wave.contains(dep));
                }
            }
        }
    }

    /// Re-evaluating the same context yields the same decision
    #[test]
    fn replanner_evaluation_is_idempotent(
        estimated in 1u32..120,
        elapsed in 0.0f64..300.0,
        iteration in 0u32..60,
        failures in 0u32..12,
        extra_files in 0usize..8,
    ) {
        let replanner = Replanner::new(ReplanConfig::default(), Arc::new(EventBus::new()));
        let ctx = ExecutionContext {
            task_id: "task-1".to_string(),
            estimated_minutes: estimated,
            elapsed_minutes: elapsed,
            iteration,
            max_iterations: 50,
            expected_files: vec!["src/expected.rs".to_string()],
            modified_files: (0..extra_files).map(|i| format!("src/extra{}.rs", i)).collect(),
            recent_errors: Vec::new(),
            consecutive_failures: failures,
            agent_feedback: None,
        };

        let first = replanner.evaluate(&ctx);
        let second = replanner.evaluate(&ctx);

        prop_assert_eq!(first.should_replan, second.should_replan);
        prop_assert_eq!(first.suggested_action, second.suggested_action);
        prop_assert_eq!(first.confidence, second.confidence);
        prop_assert_eq!(first.reason, second.reason);
    }

    /// Confidence is always within [0, 0.95]
    #[test]
    fn replanner_confidence_is_clamped(
        estimated in 1u32..120,
        elapsed in 0.0f64..10_000.0,
        iteration in 0u32..60,
        failures in 0u32..50,
    ) {
        let replanner = Replanner::new(ReplanConfig::default(), Arc::new(EventBus::new()));
        let ctx = ExecutionContext {
            task_id: "task-1".to_string(),
            estimated_minutes: estimated,
            elapsed_minutes: elapsed,
            iteration,
            max_iterations: 50,
            consecutive_failures: failures,
            recent_errors: vec!["needs a refactor and a migration".to_string()],
            ..Default::default()
        };

        let decision = replanner.evaluate(&ctx);
        prop_assert!(decision.confidence >= 0.0);
        prop_assert!(decision.confidence <= 0.95);
    }

    /// The time trigger fires strictly above the ratio, never at it
    #[test]
    fn time_trigger_boundary_is_strict(estimated in 1u32..100) {
        let replanner = Replanner::new(ReplanConfig::default(), Arc::new(EventBus::new()));
        let at_threshold = ExecutionContext {
            task_id: "task-1".to_string(),
            estimated_minutes: estimated,
            elapsed_minutes: estimated as f64 * 1.5,
            iteration: 1,
            max_iterations: 50,
            ..Default::default()
        };
        prop_assert!(!replanner.evaluate(&at_threshold).should_replan);

        let above = ExecutionContext {
            elapsed_minutes: estimated as f64 * 1.5 + 0.01,
            ..at_threshold
        };
        prop_assert!(replanner.evaluate(&above).should_replan);
    }

    /// Blocking rule closed form: >=1 critical or >2 major
    #[test]
    fn review_blocking_rule(criticals in 0usize..3, majors in 0usize..6, minors in 0usize..10, suggestions in 0usize..10) {
        let issue = |severity| ReviewIssue {
            severity,
            file: None,
            line: None,
            message: "issue".to_string(),
        };

        let mut issues = Vec::new();
        issues.extend((0..criticals).map(|_| issue(Severity::Critical)));
        issues.extend((0..majors).map(|_| issue(Severity::Major)));
        issues.extend((0..minors).map(|_| issue(Severity::Minor)));
        issues.extend((0..suggestions).map(|_| issue(Severity::Suggestion)));

        let expected = criticals >= 1 || majors > 2;
        prop_assert_eq!(has_blocking_issues(&issues), expected);
    }

    /// Calibration stays within its clamp under any outcome sequence
    #[test]
    fn estimator_calibration_is_clamped(outcomes in proptest::collection::vec((1u32..200, 0.1f64..500.0), 0..40)) {
        let estimator = TimeEstimator::new();
        for (estimated, actual) in outcomes {
            estimator.record_outcome(estimated, actual);
            let calibration = estimator.calibration();
            prop_assert!((0.25..=4.0).contains(&calibration));
        }
    }

    /// Screening is pure: same command, same verdict
    #[test]
    fn guard_screening_is_deterministic(cmd in "[a-z /.-]{0,40}") {
        prop_assert_eq!(guard::screen(&cmd).is_ok(), guard::screen(&cmd).is_ok());
    }
}

#[test]
fn cyclic_task_sets_are_rejected_not_partially_scheduled() {
    let mut a = Task::with_id("a", "A");
    a.add_dep("b");
    let mut b = Task::with_id("b", "B");
    b.add_dep("a");

    assert!(resolve_waves(&[a, b]).is_err());
}
