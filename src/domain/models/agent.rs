//! Known downstream agent types.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Closed set of agent types the relay can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Free-form conversational agent.
    #[default]
    Chat,
    /// Agent that answers by querying the knowledge graph.
    Graph,
}

impl AgentKind {
    pub const ALL: [Self; 2] = [Self::Chat, Self::Graph];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Graph => "graph",
        }
    }

    /// Instruction prepended to every prompt sent to this kind of agent.
    pub fn preamble(&self) -> &'static str {
        match self {
            Self::Chat => "You are a helpful conversational assistant.",
            Self::Graph => {
                "You answer questions by querying the knowledge graph. \
                 Cite the entities and relationships you used."
            }
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "graph" => Ok(Self::Graph),
            other => Err(format!(
                "Unknown agent type '{other}'. Expected one of: chat, graph"
            )),
        }
    }
}
