//! Nexus binary entry point

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::Result;
use tracing_subscriber::EnvFilter;

use nexus::cli::{Cli, Command, resolve_description};
use nexus::config::Config;
use nexus::coordinator;
use nexus::domain::Feature;
use nexus::llm::AnthropicClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref())?;

    match cli.command {
        Command::Config => {
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }

        Command::Worktrees => {
            let git = nexus::vcs::GitAdapter::new(&cli.repo);
            let manager = nexus::worktree::WorktreeManager::new(config.worktree.clone(), git);
            for info in manager.list().await {
                println!("{}\t{}\t{}", info.task_id, info.branch, info.path.display());
            }
            Ok(())
        }

        Command::Submit {
            title,
            description,
            priority,
            criteria,
        } => {
            let client = Arc::new(AnthropicClient::from_config(&config.llm)?);
            let coordinator = coordinator::build(&config, &cli.repo, client);
            coordinator.start().await;

            let mut feature = Feature::new(title, resolve_description(&description)?).with_priority(priority.into());
            for criterion in criteria {
                feature = feature.with_criterion(criterion);
            }

            let plan_id = coordinator.submit_feature(feature).await?;
            println!("plan: {}", plan_id);

            // Poll until the plan reaches a terminal state
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                let status = coordinator.status(&plan_id).await?;
                tracing::info!(
                    waves = format!("{}/{}", status.waves_completed, status.waves_total),
                    completed = status.completed.len(),
                    failed = status.failed.len(),
                    awaiting_review = status.awaiting_review.len(),
                    "Plan progress"
                );
                if status.is_done() {
                    println!("state: {:?}", status.state);
                    println!("completed: {}", status.completed.len());
                    if !status.failed.is_empty() {
                        println!("failed: {}", status.failed.join(", "));
                    }
                    if !status.awaiting_review.is_empty() {
                        println!("awaiting review: {}", status.awaiting_review.join(", "));
                    }
                    break;
                }
            }

            coordinator.shutdown(Duration::from_secs(30)).await?;
            Ok(())
        }
    }
}
