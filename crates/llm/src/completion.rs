//! Completion service: turns an agent identity plus a transcript into reply text.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use roundtable_common::{AgentProfile, ConversationMessage, Result};
use tracing::debug;

use crate::client::{ChatMessage, LlmClient, LlmRequest};

/// The single collaborator the orchestration core consumes.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        agent: &AgentProfile,
        transcript: &[ConversationMessage],
    ) -> Result<String>;
}

#[async_trait]
impl<T: CompletionService + ?Sized> CompletionService for Arc<T> {
    async fn complete(
        &self,
        agent: &AgentProfile,
        transcript: &[ConversationMessage],
    ) -> Result<String> {
        (**self).complete(agent, transcript).await
    }
}

const BREVITY_RULE: &str =
    "Keep responses short and high-signal (3-6 bullets or 1-2 short paragraphs).";

const PASS_RULE: &str = "Only answer when the user addresses you by name or the team routed the \
     question to you. If you have nothing to add, reply with exactly PASS and nothing else.";

const TOOL_CALL_FORMAT: &str = "To call a tool, reply with only a JSON object of the form \
     {\"tool\": \"<name>\", \"arguments\": {...}}. Before calling any tool, ask the user for \
     approval and wait for explicit confirmation.";

/// Builds the system prompt for an agent.
pub fn build_instructions(
    profile: &AgentProfile,
    team_mission: &str,
    tool_descriptions: &HashMap<String, String>,
) -> String {
    if profile.is_router() {
        return profile.role_description.clone();
    }

    let mut instructions = String::new();
    if !team_mission.trim().is_empty() {
        instructions.push_str(team_mission.trim());
        instructions.push_str("\n\n");
    }

    instructions.push_str(&format!("You are {}, {}\n", profile.name, profile.role_description));

    if !profile.personality.is_empty() {
        instructions.push_str(&format!("\nPERSONALITY: {}\n", profile.personality));
    }

    if !profile.focus_areas.is_empty() {
        instructions.push_str("\nFOCUS AREAS:\n");
        for (i, area) in profile.focus_areas.iter().enumerate() {
            instructions.push_str(&format!("{}. {area}\n", i + 1));
        }
    }

    if !profile.tools.is_empty() {
        instructions.push_str("\nYou have access to the following tools:\n");
        for tool in &profile.tools {
            match tool_descriptions.get(tool) {
                Some(desc) => instructions.push_str(&format!("- {tool}: {desc}\n")),
                None => instructions.push_str(&format!("- {tool}\n")),
            }
        }
        instructions.push('\n');
        instructions.push_str(TOOL_CALL_FORMAT);
        instructions.push('\n');
    }

    instructions.push('\n');
    instructions.push_str(BREVITY_RULE);

    if profile.is_specialist() {
        instructions.push_str("\n\n");
        instructions.push_str(PASS_RULE);
    }

    instructions
}

/// `CompletionService` backed by [`LlmClient`]s, with optional per-agent model overrides.
pub struct LlmCompletionService {
    default_client: Arc<dyn LlmClient>,
    agent_clients: HashMap<String, Arc<dyn LlmClient>>,
    team_mission: String,
    tool_descriptions: HashMap<String, String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LlmCompletionService {
    pub fn new(default_client: Arc<dyn LlmClient>) -> Self {
        Self {
            default_client,
            agent_clients: HashMap::new(),
            team_mission: String::new(),
            tool_descriptions: HashMap::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_team_mission(mut self, mission: impl Into<String>) -> Self {
        self.team_mission = mission.into();
        self
    }

    pub fn with_agent_client(mut self, agent_key: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        self.agent_clients.insert(agent_key.into(), client);
        self
    }

    pub fn with_tool_descriptions(
        mut self,
        descriptions: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.tool_descriptions.extend(descriptions);
        self
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn client_for(&self, agent_key: &str) -> &Arc<dyn LlmClient> {
        self.agent_clients
            .get(agent_key)
            .unwrap_or(&self.default_client)
    }

    pub fn instructions_for(&self, profile: &AgentProfile) -> String {
        build_instructions(profile, &self.team_mission, &self.tool_descriptions)
    }
}

#[async_trait]
impl CompletionService for LlmCompletionService {
    async fn complete(
        &self,
        agent: &AgentProfile,
        transcript: &[ConversationMessage],
    ) -> Result<String> {
        let client = self.client_for(&agent.key);
        let request = LlmRequest {
            system_prompt: Some(self.instructions_for(agent)),
            messages: transcript.iter().map(ChatMessage::from).collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = client.complete(request).await?;

        debug!(
            agent = %agent.key,
            model = %response.model,
            finish_reason = ?response.finish_reason,
            chars = response.content.len(),
            "Completion received"
        );

        Ok(response.content.trim().to_string())
    }
}
