//! Role-specialized agents over the bounded agent loop

pub mod agent_loop;
pub mod coder;
pub mod merger;
pub mod reviewer;
pub mod tester;

pub use agent_loop::{AgentLoop, AgentLoopConfig, AgentOutcome, StopCause};
pub use coder::{CoderAgent, CoderResult};
pub use merger::{MergeReport, MergerAgent};
pub use reviewer::ReviewerAgent;
pub use tester::{TesterAgent, TesterResult};
