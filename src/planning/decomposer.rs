//! Task decomposer
//!
//! LLM-driven decomposition of a feature into tasks that fit the
//! single-focused-change budget, followed by a deterministic post-pass
//! that enforces the invariants: budget compliance (splitting oversized
//! tasks along file groups), deduplicated prerequisites, no
//! self-references, and an acyclic prerequisite graph. Malformed LLM
//! output degrades to a single-task decomposition; decomposition never
//! crashes the plan.

use std::collections::HashMap;
use std::sync::Arc;

use eyre::Result;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::domain::{Feature, Task};
use crate::llm::{ChatRequest, ChatResponse, LlmClient, RetryPolicy, Message, ToolDefinition};

use super::estimator::TimeEstimator;
use super::resolver::validate_dag;

/// LLM output schema for one candidate task
#[derive(Debug, Clone, Deserialize)]
struct TaskOutput {
    title: String,
    description: String,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    estimated_minutes: Option<u32>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    test_selector: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DecompositionOutput {
    tasks: Vec<TaskOutput>,
}

/// Breaks features into budget-sized tasks
pub struct TaskDecomposer {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    estimator: Arc<TimeEstimator>,
    budget_minutes: u32,
}

impl TaskDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>, retry: RetryPolicy, estimator: Arc<TimeEstimator>, budget_minutes: u32) -> Self {
        Self {
            llm,
            retry,
            estimator,
            budget_minutes,
        }
    }

    /// Decompose a feature into tasks
    ///
    /// Post-conditions: non-empty titles and descriptions, every
    /// estimate within the budget, prerequisites deduplicated and
    /// acyclic.
    pub async fn decompose(&self, feature: &Feature) -> Result<Vec<Task>> {
        info!(feature_id = %feature.id, "Decomposing feature");

        let output = match self.get_decomposition(feature).await {
            Ok(output) => output,
            Err(e) => {
                // Never crash on a confused model: one task wrapping the feature
                warn!(feature_id = %feature.id, error = %e, "Decomposition failed, falling back to a single task");
                return Ok(vec![self.fallback_task(feature)]);
            }
        };

        let mut tasks = self.build_tasks(feature, output);
        tasks = self.enforce_budget(tasks);
        self.break_cycles(&mut tasks);

        info!(feature_id = %feature.id, task_count = tasks.len(), "Feature decomposed");
        Ok(tasks)
    }

    async fn get_decomposition(&self, feature: &Feature) -> Result<DecompositionOutput> {
        let mut prompt = format!(
            "Decompose this feature into tasks:\n\nTitle: {}\n\n{}\n",
            feature.title, feature.description
        );
        if !feature.acceptance_criteria.is_empty() {
            prompt.push_str("\nAcceptance criteria:\n");
            for criterion in &feature.acceptance_criteria {
                prompt.push_str(&format!("- {}\n", criterion));
            }
        }

        let request = ChatRequest {
            system_prompt: self.system_prompt(),
            messages: vec![Message::user(prompt)],
            tools: vec![self.submit_tool()],
            max_tokens: 8192,
        };

        let response = self.retry.execute(|| self.llm.chat(request.clone())).await?;
        self.parse_response(response)
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a software architect decomposing a feature into executable tasks.\n\
             \n\
             Guidelines:\n\
             - Each task is one focused change an engineer finishes in at most {} minutes.\n\
             - Give every task a short title, a concrete description, and the files it \
               should touch.\n\
             - Declare dependencies between tasks by title; they must form a DAG.\n\
             - Tasks touching the same files usually depend on each other.\n\
             \n\
             Call submit_tasks exactly once with the full list.",
            self.budget_minutes
        )
    }

    fn submit_tool(&self) -> ToolDefinition {
        ToolDefinition::new(
            "submit_tasks",
            "Submit the decomposition. Call once with all tasks.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "tasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "title": { "type": "string" },
                                "description": { "type": "string" },
                                "files": {
                                    "type": "array",
                                    "items": { "type": "string" }
                                },
                                "estimated_minutes": { "type": "integer" },
                                "depends_on": {
                                    "type": "array",
                                    "items": { "type": "string" },
                                    "description": "Titles of tasks this depends on"
                                },
                                "test_selector": { "type": "string" }
                            },
                            "required": ["title", "description"]
                        }
                    }
                },
                "required": ["tasks"]
            }),
        )
    }

    fn parse_response(&self, response: ChatResponse) -> Result<DecompositionOutput> {
        for tool_call in &response.tool_calls {
            if tool_call.name == "submit_tasks" {
                let output: DecompositionOutput = serde_json::from_value(tool_call.input.clone())?;
                if output.tasks.is_empty() {
                    eyre::bail!("decomposition produced zero tasks");
                }
                if output.tasks.iter().any(|t| t.title.trim().is_empty() || t.description.trim().is_empty()) {
                    eyre::bail!("decomposition produced a task with an empty title or description");
                }
                return Ok(output);
            }
        }

        // Fallback: content as bare JSON
        if let Some(content) = &response.content
            && let Ok(output) = serde_json::from_str::<DecompositionOutput>(content)
            && !output.tasks.is_empty()
        {
            return Ok(output);
        }

        eyre::bail!("LLM did not produce a valid decomposition")
    }

    fn fallback_task(&self, feature: &Feature) -> Task {
        let mut task = Task::new(&feature.id, &feature.title, &feature.description);
        task.priority = feature.priority.as_task_priority();
        task.estimated_minutes = self.estimator.estimate(&task).min(self.budget_minutes);
        task
    }

    /// Convert LLM output to tasks, resolving title references to IDs
    fn build_tasks(&self, feature: &Feature, output: DecompositionOutput) -> Vec<Task> {
        let mut tasks = Vec::with_capacity(output.tasks.len());
        let mut title_to_id: HashMap<String, String> = HashMap::new();

        for out in &output.tasks {
            let mut task = Task::new(&feature.id, out.title.trim(), out.description.trim());
            task.files = out.files.clone();
            task.test_selector = out.test_selector.clone();
            task.priority = feature.priority.as_task_priority();
            task.estimated_minutes = out.estimated_minutes.unwrap_or_else(|| self.estimator.estimate(&task));

            title_to_id.insert(out.title.trim().to_string(), task.id.clone());
            tasks.push(task);
        }

        // Second pass: title references become ID edges; add_dep dedupes
        // and drops self-references
        for (task, out) in tasks.iter_mut().zip(&output.tasks) {
            for dep_title in &out.depends_on {
                if let Some(dep_id) = title_to_id.get(dep_title.trim()) {
                    task.add_dep(dep_id.clone());
                } else {
                    warn!(task = %out.title, dep = %dep_title, "Dependency on unknown task, dropping");
                }
            }
        }

        tasks
    }

    /// Split every task whose estimate exceeds the budget
    fn enforce_budget(&self, tasks: Vec<Task>) -> Vec<Task> {
        let mut result: Vec<Task> = Vec::with_capacity(tasks.len());
        // Oversized task ID -> ID of its final part, for dependent remapping
        let mut tail_of: HashMap<String, String> = HashMap::new();

        for task in tasks {
            if task.estimated_minutes <= self.budget_minutes {
                result.push(task);
                continue;
            }

            let parts = self.split_task(task);
            if let (Some(first), Some(last)) = (parts.first(), parts.last()) {
                debug!(original = %first.title, parts = parts.len(), "Split oversized task");
                tail_of.insert(first.id.clone(), last.id.clone());
            }
            result.extend(parts);
        }

        // Dependents of a split task wait for its final part
        for task in &mut result {
            for dep in &mut task.deps {
                if let Some(tail) = tail_of.get(dep) {
                    *dep = tail.clone();
                }
            }
        }

        result
    }

    /// Subdivide one oversized task into a prerequisite chain
    ///
    /// Splits along declared file groups when there are enough files,
    /// otherwise into sequential steps. The first part keeps the
    /// original task's ID so inbound edges stay valid until remapping.
    fn split_task(&self, task: Task) -> Vec<Task> {
        let desired = (task.estimated_minutes.div_ceil(self.budget_minutes) as usize).max(2);

        let file_groups: Vec<Vec<String>> = if task.files.len() >= desired {
            let chunk = task.files.len().div_ceil(desired);
            task.files.chunks(chunk).map(<[String]>::to_vec).collect()
        } else {
            // Too few files to partition: sequential steps over the same set
            vec![task.files.clone(); desired]
        };

        let parts = file_groups.len();
        let per_part_minutes = task.estimated_minutes.div_ceil(parts as u32).min(self.budget_minutes);

        let mut out = Vec::with_capacity(parts);
        let mut prev_id: Option<String> = None;

        for (i, files) in file_groups.iter().enumerate() {
            let title = format!("{} ({}/{})", task.title, i + 1, parts);
            let mut part = Task::new(&task.feature_id, &title, &task.description);
            if i == 0 {
                // Keep inbound edges valid
                part.id = task.id.clone();
                part.deps = task.deps.clone();
            }
            part.files = files.clone();
            part.test_selector = task.test_selector.clone();
            part.priority = task.priority;
            part.estimated_minutes = per_part_minutes;

            if let Some(prev) = &prev_id {
                part.add_dep(prev.clone());
            }
            prev_id = Some(part.id.clone());
            out.push(part);
        }

        out
    }

    /// Last-resort cycle breaking
    ///
    /// A model that produced a prerequisite cycle gets its cyclic edges
    /// dropped rather than crashing the plan.
    fn break_cycles(&self, tasks: &mut [Task]) {
        while let Err(super::resolver::ResolveError::Cycle { remaining }) = validate_dag(tasks) {
            let Some(victim) = remaining.first().cloned() else {
                break;
            };
            warn!(task_id = %victim, "Dropping prerequisites to break a decomposition cycle");
            if let Some(task) = tasks.iter_mut().find(|t| t.id == victim) {
                task.deps.clear();
            }
        }
    }
}
