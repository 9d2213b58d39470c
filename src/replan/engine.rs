//! Replan trigger evaluation and aggregation
//!
//! Each trigger returns a confidence in [0, 1]; the aggregator takes
//! the maximum with a small boost per additional concurrent trigger,
//! clamped to 0.95. Evaluation is pure: the same context always yields
//! the same decision. The replanner publishes decisions and never
//! mutates the plan - that is the coordinator's job.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ReplanConfig;
use crate::events::{Event, EventBus};

use super::context::ExecutionContext;

/// Confidence ceiling after aggregation
const CONFIDENCE_CLAMP: f64 = 0.95;

/// Boost per additional concurrent trigger
const MULTI_TRIGGER_BOOST: f64 = 0.05;

/// What the coordinator should do with the task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplanAction {
    #[default]
    Continue,
    Split,
    ReEstimate,
    Escalate,
    Abort,
}

impl std::fmt::Display for ReplanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Continue => "continue",
            Self::Split => "split",
            Self::ReEstimate => "re_estimate",
            Self::Escalate => "escalate",
            Self::Abort => "abort",
        };
        write!(f, "{}", s)
    }
}

impl ReplanAction {
    /// Parse an agent's free-text suggestion
    pub fn from_suggestion(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "continue" => Some(Self::Continue),
            "split" => Some(Self::Split),
            "re_estimate" | "reestimate" => Some(Self::ReEstimate),
            "escalate" => Some(Self::Escalate),
            "abort" => Some(Self::Abort),
            _ => None,
        }
    }
}

/// Which condition fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplanTrigger {
    TimeExceeded,
    IterationsHigh,
    ScopeCreep,
    ConsecutiveFailures,
    Complexity,
    AgentRequest,
}

impl std::fmt::Display for ReplanTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TimeExceeded => "time_exceeded",
            Self::IterationsHigh => "iterations_high",
            Self::ScopeCreep => "scope_creep",
            Self::ConsecutiveFailures => "consecutive_failures",
            Self::Complexity => "complexity",
            Self::AgentRequest => "agent_request",
        };
        write!(f, "{}", s)
    }
}

/// One fired trigger before aggregation
#[derive(Debug, Clone)]
struct TriggerHit {
    trigger: ReplanTrigger,
    confidence: f64,
    reason: String,
    action: ReplanAction,
}

/// Aggregated decision for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanDecision {
    pub task_id: String,
    pub should_replan: bool,
    pub suggested_action: ReplanAction,
    pub confidence: f64,
    pub reason: String,

    /// Names of the triggers that fired
    #[serde(default)]
    pub triggers: Vec<ReplanTrigger>,
}

impl ReplanDecision {
    fn keep_going(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            should_replan: false,
            suggested_action: ReplanAction::Continue,
            confidence: 0.0,
            reason: "no trigger fired".to_string(),
            triggers: Vec::new(),
        }
    }
}

/// Arguments of the `request_replan` agent tool
#[derive(Debug, Clone, Deserialize)]
pub struct AgentReplanRequest {
    pub reason: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub complexity_details: Option<String>,
    #[serde(default)]
    pub affected_files: Vec<String>,
}

/// Watches in-flight tasks and decides when the plan should be revised
pub struct Replanner {
    config: ReplanConfig,
    bus: Arc<EventBus>,
    monitored: Mutex<HashSet<String>>,
}

impl Replanner {
    pub fn new(config: ReplanConfig, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            bus,
            monitored: Mutex::new(HashSet::new()),
        }
    }

    /// Start watching a task
    pub async fn monitor(&self, task_id: &str) {
        self.monitored.lock().await.insert(task_id.to_string());
    }

    /// Stop watching a task
    pub async fn unmonitor(&self, task_id: &str) {
        self.monitored.lock().await.remove(task_id);
    }

    pub async fn is_monitored(&self, task_id: &str) -> bool {
        self.monitored.lock().await.contains(task_id)
    }

    /// Evaluate all triggers against a context
    ///
    /// Pure and idempotent: no state is read or written, so re-running
    /// the same context yields the same decision.
    pub fn evaluate(&self, ctx: &ExecutionContext) -> ReplanDecision {
        let mut hits = Vec::new();

        if let Some(hit) = self.check_time_exceeded(ctx) {
            hits.push(hit);
        }
        if let Some(hit) = self.check_iterations_high(ctx) {
            hits.push(hit);
        }
        if let Some(hit) = self.check_scope_creep(ctx) {
            hits.push(hit);
        }
        if let Some(hit) = self.check_consecutive_failures(ctx) {
            hits.push(hit);
        }
        if let Some(hit) = self.check_complexity(ctx) {
            hits.push(hit);
        }

        self.aggregate(&ctx.task_id, hits)
    }

    /// Evaluate and publish the decision on the bus when it calls for a replan
    pub async fn evaluate_and_publish(&self, ctx: &ExecutionContext) -> ReplanDecision {
        let decision = self.evaluate(ctx);
        if decision.should_replan {
            info!(
                task_id = %decision.task_id,
                action = %decision.suggested_action,
                confidence = decision.confidence,
                "Replan decision"
            );
            self.bus.emit(Event::replan_decision(
                &decision.task_id,
                decision.suggested_action,
                decision.confidence,
                decision.reason.clone(),
            ));
        }
        decision
    }

    /// Handle an explicit `request_replan` call from a running agent
    ///
    /// The task must be under monitoring; anything else is a stale or
    /// confused agent and is rejected.
    pub async fn handle_agent_request(
        &self,
        task_id: &str,
        request: AgentReplanRequest,
    ) -> eyre::Result<ReplanDecision> {
        if !self.is_monitored(task_id).await {
            warn!(%task_id, "request_replan for a task not under monitoring");
            eyre::bail!("task {} is not monitored by the replanner", task_id);
        }

        self.bus
            .emit(Event::replan_requested(task_id, ReplanTrigger::AgentRequest.to_string(), request.reason.clone()));

        let action = request
            .suggestion
            .as_deref()
            .and_then(ReplanAction::from_suggestion)
            .unwrap_or(ReplanAction::Split);

        let mut reason = format!("agent requested replan: {}", request.reason);
        if !request.blockers.is_empty() {
            reason.push_str(&format!(" (blockers: {})", request.blockers.join(", ")));
        }
        if let Some(details) = &request.complexity_details {
            reason.push_str(&format!(" ({})", details));
        }

        let decision = ReplanDecision {
            task_id: task_id.to_string(),
            should_replan: true,
            suggested_action: action,
            confidence: 0.9,
            reason,
            triggers: vec![ReplanTrigger::AgentRequest],
        };

        self.bus.emit(Event::replan_decision(
            task_id,
            decision.suggested_action,
            decision.confidence,
            decision.reason.clone(),
        ));

        Ok(decision)
    }

    // === Trigger evaluators ===

    fn check_time_exceeded(&self, ctx: &ExecutionContext) -> Option<TriggerHit> {
        let ratio = ctx.time_ratio()?;
        // Strictly greater: exactly at the threshold does not fire
        if ratio <= self.config.time_exceeded_ratio {
            return None;
        }

        let overshoot = ratio - self.config.time_exceeded_ratio;
        Some(TriggerHit {
            trigger: ReplanTrigger::TimeExceeded,
            confidence: (0.6 + overshoot * 0.2).min(0.9),
            reason: format!(
                "elapsed {:.1}m is {:.2}x the {}m estimate",
                ctx.elapsed_minutes, ratio, ctx.estimated_minutes
            ),
            action: ReplanAction::ReEstimate,
        })
    }

    fn check_iterations_high(&self, ctx: &ExecutionContext) -> Option<TriggerHit> {
        let ratio = ctx.iteration_ratio()?;
        if ratio <= self.config.iterations_high_ratio {
            return None;
        }

        Some(TriggerHit {
            trigger: ReplanTrigger::IterationsHigh,
            confidence: (0.5 + ratio * 0.4).min(0.9),
            reason: format!(
                "iteration {} of {} ({:.0}% of the budget)",
                ctx.iteration,
                ctx.max_iterations,
                ratio * 100.0
            ),
            action: ReplanAction::Split,
        })
    }

    fn check_scope_creep(&self, ctx: &ExecutionContext) -> Option<TriggerHit> {
        let out_of_scope = ctx.out_of_scope_files();
        if out_of_scope.len() <= self.config.scope_creep_files {
            return None;
        }

        Some(TriggerHit {
            trigger: ReplanTrigger::ScopeCreep,
            confidence: 0.7,
            reason: format!(
                "{} files modified outside the declared set (threshold {})",
                out_of_scope.len(),
                self.config.scope_creep_files
            ),
            action: ReplanAction::Split,
        })
    }

    fn check_consecutive_failures(&self, ctx: &ExecutionContext) -> Option<TriggerHit> {
        if ctx.consecutive_failures <= self.config.consecutive_failures {
            return None;
        }

        Some(TriggerHit {
            trigger: ReplanTrigger::ConsecutiveFailures,
            confidence: 0.8,
            reason: format!("{} consecutive failing iterations", ctx.consecutive_failures),
            action: ReplanAction::Escalate,
        })
    }

    fn check_complexity(&self, ctx: &ExecutionContext) -> Option<TriggerHit> {
        let haystacks: Vec<String> = ctx
            .recent_errors
            .iter()
            .cloned()
            .chain(ctx.agent_feedback.clone())
            .map(|s| s.to_lowercase())
            .collect();

        let matched: Vec<&str> = self
            .config
            .complexity_keywords
            .iter()
            .filter(|kw| {
                let kw = kw.to_lowercase();
                haystacks.iter().any(|h| h.contains(&kw))
            })
            .map(String::as_str)
            .collect();

        if matched.is_empty() {
            return None;
        }

        Some(TriggerHit {
            trigger: ReplanTrigger::Complexity,
            confidence: 0.6,
            reason: format!("complexity keywords present: {}", matched.join(", ")),
            action: ReplanAction::Split,
        })
    }

    /// Combine fired triggers into one decision
    fn aggregate(&self, task_id: &str, hits: Vec<TriggerHit>) -> ReplanDecision {
        if hits.is_empty() {
            return ReplanDecision::keep_going(task_id);
        }

        let strongest = hits
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .cloned()
            .unwrap_or_else(|| hits[0].clone());

        let confidence =
            (strongest.confidence + MULTI_TRIGGER_BOOST * (hits.len() as f64 - 1.0)).min(CONFIDENCE_CLAMP);
        let reason = hits.iter().map(|h| h.reason.as_str()).collect::<Vec<_>>().join("; ");
        let triggers = hits.iter().map(|h| h.trigger).collect();

        debug!(%task_id, ?triggers, confidence, "Replan triggers fired");

        ReplanDecision {
            task_id: task_id.to_string(),
            should_replan: true,
            suggested_action: strongest.action,
            confidence,
            reason,
            triggers,
        }
    }
}
