//! Agent roles and message classification.
//!
//! Classification is keyword based: no model is consulted to decide whether
//! a message needs orchestration or which roles it calls for.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OrchestrationError;

/// Logical capability used to route work to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Gathers information.
    Researcher,
    /// Evaluates findings.
    Analyzer,
    /// Writes the combined report.
    Synthesizer,
    /// Checks the report.
    Validator,
    /// Generic fallback role.
    General,
}

impl AgentRole {
    /// Returns the role name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::Analyzer => "analyzer",
            Self::Synthesizer => "synthesizer",
            Self::Validator => "validator",
            Self::General => "general",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "researcher" => Ok(Self::Researcher),
            "analyzer" => Ok(Self::Analyzer),
            "synthesizer" => Ok(Self::Synthesizer),
            "validator" => Ok(Self::Validator),
            "general" => Ok(Self::General),
            _ => Err(OrchestrationError::UnknownRole { role: s.to_string() }),
        }
    }
}

/// Keyword groups tested by [`identify_required_roles`], in output order.
const ROLE_KEYWORDS: &[(AgentRole, &[&str])] = &[
    (
        AgentRole::Researcher,
        &["research", "investigate", "find information", "look up", "search", "explore", "gather"],
    ),
    (
        AgentRole::Analyzer,
        &["analyze", "analyse", "analysis", "evaluate", "examine", "compare", "assess"],
    ),
    (
        AgentRole::Synthesizer,
        &["synthesize", "summarize", "report", "write", "compile", "combine"],
    ),
    (
        AgentRole::Validator,
        &["verify", "validate", "fact-check", "check accuracy", "confirm"],
    ),
];

/// Returns whether `message` contains any of `phrases`, ignoring case.
pub fn detect_orchestration_need<S: AsRef<str>>(message: &str, phrases: &[S]) -> bool {
    let message = message.to_lowercase();
    phrases.iter().any(|phrase| message.contains(&phrase.as_ref().to_lowercase()))
}

/// Returns every role whose keyword group matches `message`.
///
/// Falls back to `[General]` when nothing matches.
pub fn identify_required_roles(message: &str) -> Vec<AgentRole> {
    let message = message.to_lowercase();
    let roles: Vec<AgentRole> = ROLE_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| message.contains(kw)))
        .map(|(role, _)| *role)
        .collect();

    if roles.is_empty() { vec![AgentRole::General] } else { roles }
}
