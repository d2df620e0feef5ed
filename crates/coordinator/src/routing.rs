//! Routing decisions: who answers this turn, in what order, in which role.
//!
//! Explicit `@Name` mentions win and never touch the completion service.
//! Otherwise the router agent classifies the recent transcript; anything
//! unusable falls back to the configured default responder.

use std::sync::Arc;

use roundtable_agents::{AgentRegistry, ROUTER_KEY, extract_mentions};
use roundtable_common::{
    AgentKind, AgentProfile, CollaborationRole, ConversationMessage, ResponderSpec,
    last_user_text,
};
use roundtable_llm::CompletionService;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::RoutingConfig;

/// Collaboration depth ceiling for one pass.
pub const MAX_RESPONDERS: usize = 3;

/// Longest transcript entry copied into the classification prompt.
const MAX_CONTEXT_CHARS: usize = 2000;

/// How a plan was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Mentions,
    Classifier,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePlan {
    pub responders: Vec<ResponderSpec>,
    pub source: RouteSource,
}

pub struct RoutingEngine {
    registry: Arc<AgentRegistry>,
    completion: Arc<dyn CompletionService>,
    config: RoutingConfig,
    router_profile: AgentProfile,
}

impl RoutingEngine {
    pub fn new(
        registry: Arc<AgentRegistry>,
        completion: Arc<dyn CompletionService>,
        config: RoutingConfig,
    ) -> Self {
        let router_profile = registry.router().cloned().unwrap_or_else(|| {
            AgentProfile::new(ROUTER_KEY, "Router", "Message Router", AgentKind::Router)
                .with_description("Return ONLY valid JSON, no other text.")
        });
        Self {
            registry,
            completion,
            config,
            router_profile,
        }
    }

    /// Never empty, at most [`MAX_RESPONDERS`] entries, every key a roster responder.
    pub async fn route(&self, history: &[ConversationMessage]) -> Vec<ResponderSpec> {
        self.plan(history).await.responders
    }

    pub async fn plan(&self, history: &[ConversationMessage]) -> RoutePlan {
        if let Some(text) = last_user_text(history) {
            let mentioned = extract_mentions(text, &self.registry);
            if !mentioned.is_empty() {
                let responders: Vec<ResponderSpec> = mentioned
                    .into_iter()
                    .take(MAX_RESPONDERS)
                    .map(ResponderSpec::respond)
                    .collect();
                info!(
                    responders = ?keys(&responders),
                    "Routing by explicit mention"
                );
                return RoutePlan {
                    responders,
                    source: RouteSource::Mentions,
                };
            }
        }

        let prompt = self.build_prompt(history);
        let classification = self
            .completion
            .complete(&self.router_profile, &[ConversationMessage::user(prompt)])
            .await;

        match classification {
            Ok(reply) => {
                debug!(reply = %reply, "Router reply");
                let responders = parse_plan(&reply, &self.registry);
                if !responders.is_empty() {
                    info!(responders = ?keys(&responders), "Routing by classification");
                    return RoutePlan {
                        responders,
                        source: RouteSource::Classifier,
                    };
                }
                debug!("Classification named no valid responders");
            }
            Err(e) => {
                warn!(error = %e, "Routing classification failed, using default responder");
            }
        }

        info!(agent = %self.config.default_agent, "Routing to default responder");
        RoutePlan {
            responders: vec![ResponderSpec::respond(self.config.default_agent.clone())],
            source: RouteSource::Fallback,
        }
    }

    /// Classification prompt: roster description plus the last N transcript entries.
    pub fn build_prompt(&self, history: &[ConversationMessage]) -> String {
        let start = history.len().saturating_sub(self.config.context_messages);
        let context = history[start..]
            .iter()
            .map(|m| {
                let rendered = m.render();
                match rendered.char_indices().nth(MAX_CONTEXT_CHARS) {
                    Some((idx, _)) => format!("{}...", &rendered[..idx]),
                    None => rendered,
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"Analyze the following conversation and determine which team members should respond, in order.

Team Members and Their Expertise:
{roster}

Recent Conversation:
{context}

Return ONLY a JSON object with this exact format:
{{"agents": [{{"agent": "key1", "role": "propose"}}, {{"agent": "key2", "role": "critique"}}], "reasoning": "brief explanation"}}

Roles: "propose" (initial concrete proposal), "critique" (evaluate the prior proposal), "evaluate" (final feasibility and risk assessment), "respond" (answer directly).
Pick at most {max} team members. For a single responder use role "respond".
If no specialist is needed, return {{"agents": [], "reasoning": "general conversation"}}.

Return ONLY valid JSON, no other text."#,
            roster = self.registry.describe_roster(),
            max = MAX_RESPONDERS,
        )
    }
}

fn keys(responders: &[ResponderSpec]) -> Vec<&str> {
    responders.iter().map(|r| r.agent_key.as_str()).collect()
}

/// Parses the first JSON object carrying an `agents` (or `responders`) list.
///
/// Entries are either plain keys (role `respond`) or objects keyed
/// `agent`/`key`/`agentKey` with an optional `role`. Unknown keys, the router
/// and duplicates are dropped; the result is capped at [`MAX_RESPONDERS`].
pub fn parse_plan(reply: &str, registry: &AgentRegistry) -> Vec<ResponderSpec> {
    let Some(entries) = json_objects(reply).find_map(|obj| {
        obj.get("agents")
            .or_else(|| obj.get("responders"))
            .and_then(Value::as_array)
            .cloned()
    }) else {
        return Vec::new();
    };

    let mut plan: Vec<ResponderSpec> = Vec::new();
    for entry in &entries {
        let Some(spec) = parse_entry(entry) else {
            continue;
        };
        if !registry.is_responder(&spec.agent_key) {
            debug!(agent = %spec.agent_key, "Dropping unknown responder");
            continue;
        }
        if plan.iter().any(|p| p.agent_key == spec.agent_key) {
            continue;
        }
        plan.push(spec);
        if plan.len() == MAX_RESPONDERS {
            break;
        }
    }
    plan
}

fn parse_entry(entry: &Value) -> Option<ResponderSpec> {
    match entry {
        Value::String(key) => Some(ResponderSpec::respond(key.trim())),
        Value::Object(map) => {
            let key = ["agent", "key", "agentKey"]
                .iter()
                .find_map(|field| map.get(*field).and_then(Value::as_str))?;
            let role = map
                .get("role")
                .and_then(Value::as_str)
                .map(CollaborationRole::parse_or_respond)
                .unwrap_or_default();
            Some(ResponderSpec::new(key.trim(), role))
        }
        _ => None,
    }
}

/// Every balanced, parseable JSON object in `text`, in order of its opening brace.
fn json_objects(text: &str) -> impl Iterator<Item = serde_json::Map<String, Value>> + '_ {
    text.char_indices()
        .filter(|&(_, c)| c == '{')
        .filter_map(move |(start, _)| extract_json_object(&text[start..]))
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .filter_map(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
}

/// Balanced `{...}` prefix of `s`, which must start with `{`. Braces inside
/// string literals are ignored.
fn extract_json_object(s: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AgentRegistry {
        AgentRegistry::builtin()
    }

    #[test]
    fn extract_json_object_simple() {
        let input = r#"{"agents":["strategy"]}"#;
        assert_eq!(extract_json_object(input), Some(input));
    }

    #[test]
    fn extract_json_object_nested_and_braces_in_strings() {
        let input = r#"{"agents":[{"agent":"architect"}],"reasoning":"use } carefully"} trailing"#;
        assert_eq!(
            extract_json_object(input),
            Some(r#"{"agents":[{"agent":"architect"}],"reasoning":"use } carefully"}"#)
        );
    }

    #[test]
    fn extract_json_object_unbalanced() {
        assert_eq!(extract_json_object(r#"{"agents": ["#), None);
    }

    #[test]
    fn flat_key_list() {
        let plan = parse_plan(r#"{"agents":["strategy"]}"#, &registry());
        assert_eq!(plan, vec![ResponderSpec::respond("strategy")]);
    }

    #[test]
    fn role_objects_with_surrounding_text() {
        let reply = r#"Sure! Here you go:
```json
{"agents": [{"agent": "strategy", "role": "propose"}, {"key": "architect", "role": "critique"}, {"agentKey": "reviewer", "role": "EVALUATE"}], "reasoning": "growth plan"}
```"#;
        let plan = parse_plan(reply, &registry());
        assert_eq!(
            plan,
            vec![
                ResponderSpec::new("strategy", CollaborationRole::Propose),
                ResponderSpec::new("architect", CollaborationRole::Critique),
                ResponderSpec::new("reviewer", CollaborationRole::Evaluate),
            ]
        );
    }

    #[test]
    fn invalid_duplicate_and_router_entries_are_dropped() {
        let reply = r#"{"responders": ["ghost", "router", "builder", {"agent": "builder", "role": "critique"}, {"role": "propose"}, 7, {"agent": "analyst", "role": "judge"}]}"#;
        let plan = parse_plan(reply, &registry());
        assert_eq!(
            plan,
            vec![
                ResponderSpec::respond("builder"),
                ResponderSpec::respond("analyst"),
            ]
        );
    }

    #[test]
    fn plan_is_capped() {
        let reply = r#"{"agents": ["strategy", "architect", "analyst", "builder", "reviewer"]}"#;
        let plan = parse_plan(reply, &registry());
        assert_eq!(plan.len(), MAX_RESPONDERS);
        assert_eq!(plan[2].agent_key, "analyst");
    }

    #[test]
    fn garbage_yields_empty_plan() {
        assert!(parse_plan("I think Marc should answer.", &registry()).is_empty());
        assert!(parse_plan(r#"{"agents": []}"#, &registry()).is_empty());
        assert!(parse_plan(r#"{"agents": "strategy"}"#, &registry()).is_empty());
        assert!(parse_plan("", &registry()).is_empty());
    }

    #[test]
    fn later_object_is_used_when_first_has_no_agents() {
        let reply = r#"{"note": "thinking"} then {"agents": ["reviewer"]}"#;
        assert_eq!(parse_plan(reply, &registry()), vec![ResponderSpec::respond("reviewer")]);
    }
}
