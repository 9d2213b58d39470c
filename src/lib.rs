//! Nexus - autonomous software-construction orchestrator
//!
//! Nexus takes a feature description, decomposes it into fine-grained
//! tasks, schedules them across a pool of LLM-driven agents that each
//! work inside an isolated git worktree, drives a self-healing quality
//! pipeline (build → lint → test → review) over every result, and
//! merges completed work back to the mainline.
//!
//! # Core Concepts
//!
//! - **Isolation**: every running task owns a disjoint worktree on its
//!   own branch; conflicts surface at merge time, never during work
//! - **Bounded effort**: agent loops and the QA loop carry hard
//!   iteration caps; exhaustion escalates to human review instead of
//!   spinning
//! - **Typed events**: all lifecycle traffic flows over an in-process
//!   bus with a closed event taxonomy
//! - **Policy/mechanism split**: the replanner only decides; the
//!   coordinator mutates the plan
//!
//! # Modules
//!
//! - [`coordinator`] - top-level façade (submit, status, cancel, shutdown)
//! - [`planning`] - decomposer, wave resolver, time estimator
//! - [`pool`] - bounded-concurrency agent pool
//! - [`qa`] - stage runners and the self-healing QA loop
//! - [`agents`] - coder, tester, reviewer, merger over the bounded loop
//! - [`replan`] - trigger evaluation and decisions
//! - [`process`] - guarded subprocess execution with tree kill
//! - [`llm`] - provider-agnostic chat client with retry and accounting

pub mod agents;
pub mod bridge;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod events;
pub mod llm;
pub mod planning;
pub mod pool;
pub mod process;
pub mod qa;
pub mod replan;
pub mod review;
pub mod store;
pub mod tools;
pub mod vcs;
pub mod worktree;

// Re-export the types most callers need
pub use cancel::CancelToken;
pub use config::Config;
pub use coordinator::{NexusCoordinator, PlanState, PlanStatus};
pub use domain::{AgentRole, Feature, FeaturePriority, Priority, Task, TaskStatus, Wave, WavePlan};
pub use events::{Event, EventBus, EventPayload};
pub use llm::{AnthropicClient, ChatRequest, ChatResponse, LlmClient, LlmError, LlmService, RetryPolicy};
pub use pool::{AgentPool, PoolMetrics, TaskOutcome, TaskWorker};
pub use process::{ProcessError, ProcessOptions, ProcessResult, ProcessRunner};
pub use qa::{QaLoopEngine, QaOutcome, QaResult, StageKind, StageResult};
pub use replan::{ExecutionContext, ReplanAction, ReplanDecision, Replanner};
pub use review::{HumanReviewService, ReviewReason, ReviewRequest, ReviewStatus};
pub use worktree::{WorktreeInfo, WorktreeManager};
