//! Nexus configuration types and loading
//!
//! Configuration is YAML with kebab-case keys. Load order: explicit
//! path, then `.nexus.yml` in the working directory, then
//! `~/.config/nexus/nexus.yml`, then built-in defaults.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::AgentRole;

/// Main Nexus configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Worker pool limits
    pub workers: WorkersConfig,

    /// QA pipeline settings
    pub qa: QaConfig,

    /// Planner budgets
    pub planner: PlannerConfig,

    /// Process runner defaults
    pub process: ProcessConfig,

    /// Replanner trigger thresholds
    pub replan: ReplanConfig,

    /// Worktree layout
    pub worktree: WorktreeConfig,

    /// LLM provider settings
    pub llm: LlmConfig,
}

impl Config {
    /// Load configuration with the fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".nexus.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("nexus").join("nexus.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Worker pool limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkersConfig {
    /// Maximum concurrent workers (defaults to CPU count, min 1)
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: usize,

    /// Optional per-role concurrency caps
    #[serde(rename = "role-caps")]
    pub role_caps: HashMap<AgentRole, usize>,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_concurrent: num_cpus::get().max(1),
            role_caps: HashMap::new(),
        }
    }
}

/// QA pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QaConfig {
    /// Hard ceiling on repair iterations per task
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Type-check / compile command
    #[serde(rename = "build-command")]
    pub build_command: String,

    /// Linter command (machine-readable output expected)
    #[serde(rename = "lint-command")]
    pub lint_command: String,

    /// Test command (machine-readable output expected)
    #[serde(rename = "test-command")]
    pub test_command: String,

    /// Per-stage timeout in milliseconds
    #[serde(rename = "stage-timeout-ms")]
    pub stage_timeout_ms: u64,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            build_command: "cargo check --message-format short".to_string(),
            lint_command: "cargo clippy --message-format json".to_string(),
            test_command: "cargo test -- -Z unstable-options --format json".to_string(),
            stage_timeout_ms: 300_000,
        }
    }
}

impl QaConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}

/// Planner budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
    /// Target size of a single task in minutes
    #[serde(rename = "task-max-minutes")]
    pub task_max_minutes: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { task_max_minutes: 30 }
    }
}

/// Process runner defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessConfig {
    /// Default timeout for external commands in milliseconds
    #[serde(rename = "default-timeout-ms")]
    pub default_timeout_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }
}

impl ProcessConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Replanner trigger thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplanConfig {
    /// elapsed / estimated ratio above which time-exceeded fires
    #[serde(rename = "time-exceeded-ratio")]
    pub time_exceeded_ratio: f64,

    /// iteration / max-iteration ratio above which iterations-high fires
    #[serde(rename = "iterations-high-ratio")]
    pub iterations_high_ratio: f64,

    /// Modified files outside the expected set above which scope-creep fires
    #[serde(rename = "scope-creep-files")]
    pub scope_creep_files: usize,

    /// Consecutive failing iterations above which the trigger fires
    #[serde(rename = "consecutive-failures")]
    pub consecutive_failures: u32,

    /// Keywords that mark a task as more complex than planned
    #[serde(rename = "complexity-keywords")]
    pub complexity_keywords: Vec<String>,
}

impl Default for ReplanConfig {
    fn default() -> Self {
        Self {
            time_exceeded_ratio: 1.5,
            iterations_high_ratio: 0.4,
            scope_creep_files: 3,
            consecutive_failures: 5,
            complexity_keywords: vec![
                "refactor".to_string(),
                "architecture".to_string(),
                "circular dependency".to_string(),
                "breaking change".to_string(),
                "migration".to_string(),
            ],
        }
    }
}

/// Worktree layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorktreeConfig {
    /// Base directory for worktrees
    #[serde(rename = "base-dir")]
    pub base_dir: PathBuf,

    /// Branch prefix for task branches
    #[serde(rename = "branch-prefix")]
    pub branch_prefix: String,

    /// Remove the worktree on release (detach when false)
    #[serde(rename = "cleanup-on-release")]
    pub cleanup_on_release: bool,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/tmp/nexus/worktrees"),
            branch_prefix: "nexus".to_string(),
            cleanup_on_release: false,
        }
    }
}

/// LLM provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Provider name (currently only "anthropic")
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Retry policy for transient failures
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum attempts (first try included)
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Initial backoff in milliseconds
    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    /// Ceiling on any single backoff in milliseconds
    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 500,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Build the runtime retry policy
    pub fn policy(&self) -> crate::llm::RetryPolicy {
        crate::llm::RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.workers.max_concurrent >= 1);
        assert_eq!(config.qa.max_iterations, 50);
        assert_eq!(config.planner.task_max_minutes, 30);
        assert_eq!(config.process.default_timeout_ms, 30_000);
        assert_eq!(config.replan.time_exceeded_ratio, 1.5);
        assert!(!config.worktree.cleanup_on_release);
    }

    #[test]
    fn test_parse_yaml_overrides() {
        let yaml = r#"
workers:
  max-concurrent: 2
  role-caps:
    coder: 2
    merger: 1
qa:
  max-iterations: 3
planner:
  task-max-minutes: 15
replan:
  time-exceeded-ratio: 2.0
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.workers.max_concurrent, 2);
        assert_eq!(config.workers.role_caps[&AgentRole::Coder], 2);
        assert_eq!(config.qa.max_iterations, 3);
        assert_eq!(config.planner.task_max_minutes, 15);
        assert_eq!(config.replan.time_exceeded_ratio, 2.0);
        // Untouched sections keep defaults
        assert_eq!(config.process.default_timeout_ms, 30_000);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let yaml = r#"
workers:
  max-concurrent: 2
  not-a-real-option: true
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.qa.max_iterations, 50);
    }

    #[test]
    fn test_retry_config_builds_policy() {
        let retry = RetryConfig {
            max_attempts: 7,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        let policy = retry.policy();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
    }
}
