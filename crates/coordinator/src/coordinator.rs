//! Coordinator facade: approval interception plus orchestration.

use std::sync::Arc;

use roundtable_agents::{AgentRegistry, DecisionAction, ToolApprovalGate, ToolBox};
use roundtable_common::{AgentProfile, AgentResponse, ConversationMessage, Result, last_user_text};
use roundtable_llm::{CompletionService, LlmCompletionService, build_llm_client};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::config::CoordinatorConfig;
use crate::orchestrator::{PassResult, TurnOrchestrator};
use crate::routing::RoutingEngine;

/// Entry point for callers: one `orchestrate` per inbound message.
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<AgentRegistry>,
    tools: Arc<ToolBox>,
    orchestrator: Arc<TurnOrchestrator>,
}

impl Coordinator {
    /// Builds provider clients from `config.llm`, one extra client per agent
    /// that overrides the model.
    pub fn from_config(config: CoordinatorConfig) -> Result<Self> {
        let registry = config.build_registry()?;
        let tools = ToolBox::builtin(Arc::new(ToolApprovalGate::new()));

        let mut service = LlmCompletionService::new(build_llm_client(&config.llm)?)
            .with_team_mission(config.team_mission.clone())
            .with_tool_descriptions(tools.descriptions())
            .with_sampling(config.llm.temperature, config.llm.max_tokens);

        for profile in registry.all() {
            if let Some(model) = &profile.model {
                info!(agent = %profile.key, model = %model, "Using per-agent model");
                service = service
                    .with_agent_client(profile.key.clone(), build_llm_client(&config.llm.with_model(model))?);
            }
        }

        info!(
            provider = %config.llm.provider,
            model = %config.llm.model,
            mode = ?config.orchestration.mode,
            "Coordinator initialized"
        );
        Self::with_parts(config, registry, Arc::new(service), tools)
    }

    /// Built-in tools, registry from `config`, caller-supplied completion service.
    pub fn new(config: CoordinatorConfig, completion: Arc<dyn CompletionService>) -> Result<Self> {
        let registry = config.build_registry()?;
        let tools = ToolBox::builtin(Arc::new(ToolApprovalGate::new()));
        Self::with_parts(config, registry, completion, tools)
    }

    pub fn with_parts(
        config: CoordinatorConfig,
        registry: AgentRegistry,
        completion: Arc<dyn CompletionService>,
        tools: ToolBox,
    ) -> Result<Self> {
        config.validate_against(&registry)?;
        let registry = Arc::new(registry);
        let tools = Arc::new(tools);

        let routing = RoutingEngine::new(
            Arc::clone(&registry),
            Arc::clone(&completion),
            config.routing.clone(),
        );
        let orchestrator = TurnOrchestrator::new(
            Arc::clone(&registry),
            completion,
            routing,
            config.orchestration.clone(),
        )
        .with_tools(Arc::clone(&tools));

        Ok(Self {
            config,
            registry,
            tools,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &Arc<ToolApprovalGate> {
        self.tools.gate()
    }

    /// Agents that can answer, in roster order.
    pub fn agents(&self) -> impl Iterator<Item = &AgentProfile> {
        self.registry.roster()
    }

    /// Applies an `approve`/`deny` in the latest user message to the gate and
    /// returns the transcript with the outcome noted for the agents.
    pub fn intercept_approval(&self, messages: &[ConversationMessage]) -> Vec<ConversationMessage> {
        let mut transcript = messages.to_vec();
        let Some(decision) = last_user_text(messages).and_then(|text| self.gate().register_decision(text))
        else {
            return transcript;
        };

        let note = match decision.action {
            DecisionAction::Approve => format!(
                "User approved tool request {}. Proceed with the tool call.",
                decision.request_id
            ),
            DecisionAction::Deny => format!(
                "User denied tool request {}. Do not call that tool unless a new approval is requested.",
                decision.request_id
            ),
        };
        transcript.push(ConversationMessage::system(note));
        transcript
    }

    pub async fn orchestrate(&self, messages: &[ConversationMessage]) -> Vec<AgentResponse> {
        self.orchestrate_pass(messages).await.responses
    }

    pub async fn orchestrate_pass(&self, messages: &[ConversationMessage]) -> PassResult {
        let transcript = self.intercept_approval(messages);
        self.orchestrator.run_pass(&transcript).await
    }

    /// Streaming form of [`Coordinator::orchestrate`].
    pub fn orchestrate_stream(&self, messages: &[ConversationMessage]) -> ReceiverStream<AgentResponse> {
        let transcript = self.intercept_approval(messages);
        self.orchestrator.run_streaming(transcript)
    }
}
