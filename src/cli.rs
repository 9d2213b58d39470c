//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::FeaturePriority;

/// Autonomous software-construction orchestrator
#[derive(Debug, Parser)]
#[command(name = "nexus", version, about)]
pub struct Cli {
    /// Path to a config file (default: .nexus.yml, then user config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Repository to operate on
    #[arg(long, global = true, default_value = ".")]
    pub repo: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit a feature and drive it to completion
    Submit {
        /// Feature title
        #[arg(long)]
        title: String,

        /// Feature description (inline, or @path to read a file)
        #[arg(long)]
        description: String,

        /// MoSCoW priority tag
        #[arg(long, value_enum, default_value = "should")]
        priority: PriorityArg,

        /// Acceptance criteria (repeatable)
        #[arg(long = "criterion")]
        criteria: Vec<String>,
    },

    /// Show effective configuration
    Config,

    /// List active worktrees
    Worktrees,
}

/// Clap-friendly MoSCoW values
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum PriorityArg {
    Must,
    Should,
    Could,
    Wont,
}

impl From<PriorityArg> for FeaturePriority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Must => FeaturePriority::Must,
            PriorityArg::Should => FeaturePriority::Should,
            PriorityArg::Could => FeaturePriority::Could,
            PriorityArg::Wont => FeaturePriority::Wont,
        }
    }
}

/// Resolve `@path` descriptions to file contents
pub fn resolve_description(raw: &str) -> eyre::Result<String> {
    if let Some(path) = raw.strip_prefix('@') {
        Ok(std::fs::read_to_string(path)?)
    } else {
        Ok(raw.to_string())
    }
}
