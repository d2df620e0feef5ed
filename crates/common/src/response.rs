//! Routing plans and per-agent results.

use crate::profile::AgentProfile;
use serde::{Deserialize, Serialize};

/// Output text used when a completed turn produced no text.
pub const EMPTY_OUTPUT_PLACEHOLDER: &str = "Request processed";

/// Framing an agent is given for its turn in a collaboration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaborationRole {
    /// Make an initial concrete proposal
    Propose,
    /// Evaluate the prior proposal and surface gaps
    Critique,
    /// Final feasibility and risk assessment
    Evaluate,
    /// Answer directly, no collaboration framing
    #[default]
    Respond,
}

impl CollaborationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Propose => "propose",
            Self::Critique => "critique",
            Self::Evaluate => "evaluate",
            Self::Respond => "respond",
        }
    }

    /// Parse a role name; unknown names fall back to `Respond`.
    pub fn parse_or_respond(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "propose" => Self::Propose,
            "critique" => Self::Critique,
            "evaluate" => Self::Evaluate,
            _ => Self::Respond,
        }
    }

    /// Behavioural guidance injected as a transient system note for one turn.
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::Propose => {
                "Your role this turn: PROPOSE. Make an initial, concrete proposal that the \
                 next team members can build on. Commit to specifics."
            }
            Self::Critique => {
                "Your role this turn: CRITIQUE. Evaluate the proposal made before you, \
                 surface gaps, risks and missing pieces, and suggest concrete fixes."
            }
            Self::Evaluate => {
                "Your role this turn: EVALUATE. Give a final assessment of feasibility and \
                 risk for what the team has proposed so far, and close with a clear verdict."
            }
            Self::Respond => "Your role this turn: RESPOND. Answer the user directly.",
        }
    }
}

impl std::fmt::Display for CollaborationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned responder for an orchestration pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderSpec {
    pub agent_key: String,
    pub role: CollaborationRole,
}

impl ResponderSpec {
    pub fn new(agent_key: impl Into<String>, role: CollaborationRole) -> Self {
        Self {
            agent_key: agent_key.into(),
            role,
        }
    }

    pub fn respond(agent_key: impl Into<String>) -> Self {
        Self::new(agent_key, CollaborationRole::Respond)
    }
}

/// Outcome of one agent turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Complete,
    Failed,
}

/// Structured result of one completed (or failed) turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_key: String,

    /// `Name (Role Title)`
    pub label: String,

    pub output: String,

    /// `max(1, chars / 4)` for non-empty text, otherwise 0
    pub estimated_tokens: usize,

    pub collaboration_role: CollaborationRole,

    /// 1-based position of this turn in the plan
    pub turn_index: usize,

    pub status: ResponseStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl AgentResponse {
    pub fn complete(
        profile: &AgentProfile,
        text: &str,
        role: CollaborationRole,
        turn_index: usize,
    ) -> Self {
        let output = if text.is_empty() {
            EMPTY_OUTPUT_PLACEHOLDER.to_string()
        } else {
            text.to_string()
        };

        Self {
            agent_key: profile.key.clone(),
            label: profile.label(),
            output,
            estimated_tokens: estimate_tokens(text),
            collaboration_role: role,
            turn_index,
            status: ResponseStatus::Complete,
            avatar_url: profile.avatar_url.clone(),
        }
    }

    pub fn failed(profile: &AgentProfile, role: CollaborationRole, turn_index: usize) -> Self {
        Self {
            agent_key: profile.key.clone(),
            label: profile.label(),
            output: format!("{} could not respond right now.", profile.name),
            estimated_tokens: 0,
            collaboration_role: role,
            turn_index,
            status: ResponseStatus::Failed,
            avatar_url: profile.avatar_url.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ResponseStatus::Complete
    }
}

/// Rough token estimate: one token per four characters, at least one for non-empty text.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        (text.chars().count() / 4).max(1)
    }
}

/// Whether an agent output is the literal decline sentinel `PASS`.
pub fn is_decline(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("pass")
}
