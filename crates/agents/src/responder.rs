//! Per-agent "should I respond" predicates.
//!
//! Each [`AgentKind`] gets one [`Responder`] implementation; the volunteer
//! orchestration mode asks every responder in roster order and runs the first
//! one that volunteers.

use roundtable_common::{AgentKind, AgentProfile, ConversationMessage, last_user_index};

use crate::mention::mentions_name;
use crate::registry::AgentRegistry;

pub trait Responder: Send + Sync {
    fn profile(&self) -> &AgentProfile;

    /// Whether this agent volunteers to answer the current transcript.
    fn decide(&self, transcript: &[ConversationMessage]) -> bool;

    fn key(&self) -> &str {
        &self.profile().key
    }
}

/// Messages from the latest user message onward, or the whole transcript if
/// there is no user message.
pub fn active_window(transcript: &[ConversationMessage]) -> &[ConversationMessage] {
    match last_user_index(transcript) {
        Some(idx) => &transcript[idx..],
        None => transcript,
    }
}

fn window_mentions(transcript: &[ConversationMessage], name: &str) -> bool {
    active_window(transcript)
        .iter()
        .any(|m| mentions_name(&m.text, name))
}

/// Acts only when mentioned by name.
pub struct SpecialistResponder {
    profile: AgentProfile,
}

impl SpecialistResponder {
    pub fn new(profile: AgentProfile) -> Self {
        Self { profile }
    }
}

impl Responder for SpecialistResponder {
    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn decide(&self, transcript: &[ConversationMessage]) -> bool {
        window_mentions(transcript, &self.profile.name)
    }
}

/// Acts by default, unless a specialist has been mentioned.
pub struct GeneralistResponder {
    profile: AgentProfile,
    specialist_names: Vec<String>,
}

impl GeneralistResponder {
    pub fn new(profile: AgentProfile, specialist_names: Vec<String>) -> Self {
        Self {
            profile,
            specialist_names,
        }
    }
}

impl Responder for GeneralistResponder {
    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn decide(&self, transcript: &[ConversationMessage]) -> bool {
        !self
            .specialist_names
            .iter()
            .any(|name| window_mentions(transcript, name))
    }
}

/// The router classifies; it never answers.
pub struct RouterResponder {
    profile: AgentProfile,
}

impl RouterResponder {
    pub fn new(profile: AgentProfile) -> Self {
        Self { profile }
    }
}

impl Responder for RouterResponder {
    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn decide(&self, _transcript: &[ConversationMessage]) -> bool {
        false
    }
}

/// One responder per registered agent, in registration order.
pub fn build_responders(registry: &AgentRegistry) -> Vec<Box<dyn Responder>> {
    let specialist_names: Vec<String> = registry
        .roster()
        .filter(|p| p.is_specialist())
        .map(|p| p.name.clone())
        .collect();

    registry
        .all()
        .iter()
        .map(|profile| -> Box<dyn Responder> {
            match profile.kind {
                AgentKind::Specialist => Box::new(SpecialistResponder::new(profile.clone())),
                AgentKind::Generalist => Box::new(GeneralistResponder::new(
                    profile.clone(),
                    specialist_names.clone(),
                )),
                AgentKind::Router => Box::new(RouterResponder::new(profile.clone())),
            }
        })
        .collect()
}
