//! Agent roles

use serde::{Deserialize, Serialize};

/// Role of an agent instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Coder,
    Tester,
    Reviewer,
    Merger,
}

impl AgentRole {
    pub const ALL: [AgentRole; 4] = [Self::Coder, Self::Tester, Self::Reviewer, Self::Merger];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coder => "coder",
            Self::Tester => "tester",
            Self::Reviewer => "reviewer",
            Self::Merger => "merger",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "coder" => Ok(Self::Coder),
            "tester" => Ok(Self::Tester),
            "reviewer" => Ok(Self::Reviewer),
            "merger" => Ok(Self::Merger),
            _ => Err(format!("Unknown agent role: {}", s)),
        }
    }
}
