//! Agent profiles.
//!
//! Profiles are loaded once at startup and never mutated. They live in
//! `roundtable-common` so that the completion adapter, the registry and the
//! coordinator can all reference them without circular dependencies.

use serde::{Deserialize, Serialize};

/// How an agent participates in a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Responds by default when no specialist is targeted.
    Generalist,
    /// Only responds when explicitly targeted by mention or routing.
    #[default]
    Specialist,
    /// Meta agent that classifies conversations; never responds itself.
    Router,
}

/// Static description of one agent in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique, stable identifier (e.g. `architect`)
    pub key: String,

    /// Display name used in `@Name` mentions (e.g. `Marc`)
    pub name: String,

    /// Role title (e.g. `Technical Architect`)
    pub role_title: String,

    /// Ordered focus areas
    #[serde(default)]
    pub focus_areas: Vec<String>,

    #[serde(default)]
    pub kind: AgentKind,

    /// Persona sentence appended after "You are <name>, "
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role_description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub personality: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    /// Model override; the default completion client is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Names of the tools this agent may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
}

impl AgentProfile {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        role_title: impl Into<String>,
        kind: AgentKind,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            role_title: role_title.into(),
            focus_areas: Vec::new(),
            kind,
            role_description: String::new(),
            personality: String::new(),
            avatar_url: None,
            model: None,
            tools: Vec::new(),
        }
    }

    pub fn with_focus_areas<I, S>(mut self, areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.focus_areas = areas.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.role_description = description.into();
        self
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = personality.into();
        self
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_specialist(&self) -> bool {
        self.kind == AgentKind::Specialist
    }

    pub fn is_router(&self) -> bool {
        self.kind == AgentKind::Router
    }

    /// Display label, e.g. `Marc (Technical Architect)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.role_title)
    }

    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|t| t == tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_defaults_to_specialist() {
        let toml_like = r#"{"key":"architect","name":"Marc","role_title":"Technical Architect"}"#;
        let profile: AgentProfile = serde_json::from_str(toml_like).unwrap();
        assert_eq!(profile.kind, AgentKind::Specialist);
        assert!(profile.is_specialist());
        assert!(profile.focus_areas.is_empty());
        assert!(profile.tools.is_empty());
    }

    #[test]
    fn label_combines_name_and_role() {
        let profile = AgentProfile::new("strategy", "Claire", "Strategy Lead", AgentKind::Specialist);
        assert_eq!(profile.label(), "Claire (Strategy Lead)");
    }

    #[test]
    fn builder_methods() {
        let profile = AgentProfile::new("assistant", "Emma", "Executive Assistant", AgentKind::Generalist)
            .with_focus_areas(["General questions", "Coordination"])
            .with_tools(["fetch_url"])
            .with_avatar("https://example.com/emma.png");

        assert!(!profile.is_specialist());
        assert!(!profile.is_router());
        assert_eq!(profile.focus_areas.len(), 2);
        assert!(profile.has_tool("fetch_url"));
        assert!(!profile.has_tool("web_search"));
        assert_eq!(profile.avatar_url.as_deref(), Some("https://example.com/emma.png"));
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&AgentKind::Generalist).unwrap(), "\"generalist\"");
        assert_eq!(serde_json::to_string(&AgentKind::Router).unwrap(), "\"router\"");
    }
}
