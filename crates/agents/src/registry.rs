//! Static catalog of agent profiles.
//!
//! The registry is built once at startup (from the built-in roster, a TOML
//! roster file, or inline config) and is read-only afterwards, so it can be
//! shared behind an `Arc` without locking.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use roundtable_common::{AgentKind, AgentProfile, Result, RoundtableError};
use serde::Deserialize;
use tracing::info;

/// Key of the built-in routing agent.
pub const ROUTER_KEY: &str = "router";

const ROUTER_INSTRUCTIONS: &str = "You are an intelligent message router that analyzes \
     conversations and determines which team members should respond. You are precise, \
     analytical and objective. Return ONLY valid JSON, no other text.";

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    agents: Vec<AgentProfile>,
}

#[derive(Debug, Clone)]
pub struct AgentRegistry {
    profiles: Vec<AgentProfile>,
    by_key: HashMap<String, usize>,
}

impl AgentRegistry {
    /// Validates and indexes a roster.
    ///
    /// Keys must be non-empty and unique, display names unique
    /// (case-insensitive), and at most one router may be present.
    pub fn new(profiles: Vec<AgentProfile>) -> Result<Self> {
        if profiles.iter().all(|p| p.is_router()) {
            return Err(RoundtableError::Registry(
                "roster must contain at least one responding agent".to_string(),
            ));
        }

        let mut by_key = HashMap::new();
        let mut names = HashSet::new();
        let mut routers = 0;

        for (idx, profile) in profiles.iter().enumerate() {
            if profile.key.trim().is_empty() {
                return Err(RoundtableError::Registry(format!(
                    "agent at position {idx} has an empty key"
                )));
            }
            if profile.name.trim().is_empty() {
                return Err(RoundtableError::Registry(format!(
                    "agent '{}' has an empty name",
                    profile.key
                )));
            }
            if by_key.insert(profile.key.clone(), idx).is_some() {
                return Err(RoundtableError::Registry(format!(
                    "duplicate agent key '{}'",
                    profile.key
                )));
            }
            if !names.insert(profile.name.to_lowercase()) {
                return Err(RoundtableError::Registry(format!(
                    "duplicate agent name '{}'",
                    profile.name
                )));
            }
            if profile.is_router() {
                routers += 1;
            }
        }

        if routers > 1 {
            return Err(RoundtableError::Registry(
                "roster may contain at most one router".to_string(),
            ));
        }

        Ok(Self { profiles, by_key })
    }

    /// The default team: one generalist, five specialists and the router.
    pub fn builtin() -> Self {
        let profiles = default_roster();
        let by_key = profiles
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.key.clone(), idx))
            .collect();
        Self { profiles, by_key }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RosterFile = toml::from_str(content)
            .map_err(|e| RoundtableError::Registry(format!("invalid roster: {e}")))?;
        Self::new(file.agents)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let registry = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            agents = registry.len(),
            "Loaded agent roster"
        );
        Ok(registry)
    }

    pub fn get(&self, key: &str) -> Option<&AgentProfile> {
        self.by_key.get(key).map(|&idx| &self.profiles[idx])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Whether `key` names an agent that may appear in a routing plan.
    pub fn is_responder(&self, key: &str) -> bool {
        self.get(key).is_some_and(|p| !p.is_router())
    }

    /// Every profile, including the router, in registration order.
    pub fn all(&self) -> &[AgentProfile] {
        &self.profiles
    }

    /// Responding agents in registration order (router excluded).
    pub fn roster(&self) -> impl Iterator<Item = &AgentProfile> {
        self.profiles.iter().filter(|p| !p.is_router())
    }

    pub fn router(&self) -> Option<&AgentProfile> {
        self.profiles.iter().find(|p| p.is_router())
    }

    /// First generalist in registration order.
    pub fn generalist(&self) -> Option<&AgentProfile> {
        self.profiles
            .iter()
            .find(|p| p.kind == AgentKind::Generalist)
    }

    /// Case-insensitive lookup by display name, router excluded.
    pub fn find_by_name(&self, name: &str) -> Option<&AgentProfile> {
        let name = name.to_lowercase();
        self.roster().find(|p| p.name.to_lowercase() == name)
    }

    /// One line per responding agent: `- key (Name): Role Title - focus, focus`.
    pub fn describe_roster(&self) -> String {
        self.roster()
            .map(|p| {
                let focus = if p.focus_areas.is_empty() {
                    "General support".to_string()
                } else {
                    p.focus_areas
                        .iter()
                        .map(|area| condense(area))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                format!("- {} ({}): {} - {}", p.key, p.name, p.role_title, focus)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// First line of a focus area, used in roster descriptions.
fn condense(area: &str) -> &str {
    area.lines().next().unwrap_or_default().trim()
}

pub fn default_roster() -> Vec<AgentProfile> {
    vec![
        AgentProfile::new("assistant", "Emma", "Executive Assistant", AgentKind::Generalist)
            .with_description(
                "a bright and supportive executive assistant who helps with absolutely anything \
                 and knows when to bring in a specialist.",
            )
            .with_personality(
                "Warm, encouraging and patient. You treat every question with care and never \
                 dismiss anything as too simple.",
            )
            .with_focus_areas([
                "General questions, greetings and small talk",
                "Brainstorming and creative thinking",
                "Coordination and communication support",
                "Involving specialists by mention: @Claire (Strategy), @Marc (Technical), \
                 @Sophie (Product), @Hugo (Engineering), @Nina (Quality)",
            ])
            .with_avatar("https://i.pravatar.cc/64?img=5"),
        AgentProfile::new("strategy", "Claire", "Strategy Lead", AgentKind::Specialist)
            .with_description(
                "a visionary business strategist with deep expertise in markets and emerging \
                 platform opportunities.",
            )
            .with_personality(
                "Optimistic big-picture thinker. Confident, bold with predictions but grounded \
                 in logic.",
            )
            .with_focus_areas([
                "Market gaps and opportunities",
                "Competitive analysis and differentiation",
                "Target customer segments",
                "Monetization models",
                "Regulatory challenges and risk mitigation",
            ])
            .with_avatar("https://i.pravatar.cc/64?img=47")
            .with_tools(["web_search", "fetch_url", "wikipedia_lookup"]),
        AgentProfile::new("architect", "Marc", "Technical Architect", AgentKind::Specialist)
            .with_description(
                "a pragmatic, battle-tested software architect with 20+ years of experience \
                 building systems at scale.",
            )
            .with_personality(
                "Direct, methodical and slightly skeptical of hype. Prefers proven solutions and \
                 always offers an alternative when pushing back.",
            )
            .with_focus_areas([
                "Core API design",
                "System architecture (backend, database, job queue)",
                "Technology stack recommendations",
                "Scalability and reliability strategies",
            ])
            .with_avatar("https://i.pravatar.cc/64?img=12")
            .with_tools(["list_backlog", "get_backlog_item"]),
        AgentProfile::new("analyst", "Sophie", "Business Analyst", AgentKind::Specialist)
            .with_description(
                "a meticulous product manager and business analyst who turns strategy and \
                 architecture into concrete product requirements.",
            )
            .with_personality(
                "Structured and collaborative. Loves timelines and metrics, asks good clarifying \
                 questions.",
            )
            .with_focus_areas([
                "Features and implementation phases",
                "MVP definition",
                "Product roadmap",
                "Success metrics and KPIs",
                "User stories and acceptance criteria",
            ])
            .with_avatar("https://i.pravatar.cc/64?img=48")
            .with_tools([
                "web_search",
                "fetch_url",
                "create_backlog_item",
                "list_backlog",
                "update_backlog_item",
                "get_backlog_item",
            ]),
        AgentProfile::new("builder", "Hugo", "Lead Engineer", AgentKind::Specialist)
            .with_description(
                "a hands-on full-stack engineer who turns designs into working code.",
            )
            .with_personality(
                "Pragmatic and solution-focused. Cares about quality and testing, likes showing \
                 working code.",
            )
            .with_focus_areas([
                "Code samples for key components",
                "Implementation guidance for complex features",
                "Library and framework recommendations",
                "Deployment strategies",
                "Security and performance considerations",
            ])
            .with_avatar("https://i.pravatar.cc/64?img=13"),
        AgentProfile::new("reviewer", "Nina", "Quality Reviewer", AgentKind::Specialist)
            .with_description(
                "a sharp critical thinker and quality specialist who reviews the team's work \
                 and identifies gaps.",
            )
            .with_personality(
                "Balanced and fair. Gives constructive feedback with specific suggestions and \
                 frames it as \"we\".",
            )
            .with_focus_areas([
                "Inconsistencies across strategy, architecture and implementation",
                "Improvements and optimizations",
                "Validating assumptions and fact-checking",
                "Executive summaries",
            ])
            .with_avatar("https://i.pravatar.cc/64?img=49"),
        AgentProfile::new(ROUTER_KEY, "Router", "Message Router", AgentKind::Router)
            .with_description(ROUTER_INSTRUCTIONS),
    ]
}
