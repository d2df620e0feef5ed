//! Turn orchestration.
//!
//! One pass takes an inbound transcript, obtains a plan, runs each planned
//! agent's completion and returns the ordered [`AgentResponse`] list.
//!
//! ```text
//! transcript ─► RoutingEngine::route ─► plan (≤ 3)
//!                                         │
//!        ┌────────────────────────────────┘
//!        ▼
//!   for each turn: transcript + guidance note ─► CompletionService
//!        │   PASS      → dropped, transcript untouched
//!        │   tool call → ToolBox (approval gate)
//!        │   text      → AgentResponse, "[Name (role)]: text" appended
//!        ▼
//!   Vec<AgentResponse>
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use roundtable_agents::{AgentRegistry, Responder, ToolBox, build_responders};
use roundtable_common::{
    AgentProfile, AgentResponse, CollaborationRole, ConversationMessage, ResponderSpec,
    RoundtableError, is_decline,
};
use roundtable_llm::CompletionService;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::config::{FailurePolicy, OrchestrationConfig, OrchestrationMode};
use crate::routing::{MAX_RESPONDERS, RoutingEngine};

/// Responses of one pass plus the transcript as later agents saw it.
#[derive(Debug, Clone, Default)]
pub struct PassResult {
    pub responses: Vec<AgentResponse>,
    pub transcript: Vec<ConversationMessage>,
}

enum TurnOutcome {
    Declined,
    Completed(AgentResponse),
    Failed(AgentResponse),
}

/// Pushes responses to a streaming caller, pacing between turns.
struct Emitter<'a> {
    sink: Option<&'a mpsc::Sender<AgentResponse>>,
    pacing: Duration,
    emitted: usize,
}

impl Emitter<'_> {
    async fn emit(&mut self, response: &AgentResponse) {
        let Some(tx) = self.sink else {
            return;
        };
        if self.emitted > 0 && !self.pacing.is_zero() {
            tokio::time::sleep(self.pacing).await;
        }
        if tx.send(response.clone()).await.is_err() {
            debug!("Stream receiver dropped");
        }
        self.emitted += 1;
    }
}

/// `[Name (role)]: text`, the form agent turns take in the shared transcript.
pub fn tag_output(profile: &AgentProfile, role: CollaborationRole, text: &str) -> String {
    format!("[{} ({})]: {}", profile.name, role, text)
}

/// `Claire (propose) -> Marc (critique)`
pub fn sequence_note(registry: &AgentRegistry, plan: &[ResponderSpec]) -> String {
    let sequence = plan
        .iter()
        .map(|spec| {
            let name = registry
                .get(&spec.agent_key)
                .map(|p| p.name.as_str())
                .unwrap_or(spec.agent_key.as_str());
            format!("{name} ({})", spec.role)
        })
        .collect::<Vec<_>>()
        .join(" -> ");
    format!(
        "Collaboration sequence for this request: {sequence}. Build on what the previous \
         team members said and leave room for those after you."
    )
}

pub struct TurnOrchestrator {
    registry: Arc<AgentRegistry>,
    completion: Arc<dyn CompletionService>,
    routing: RoutingEngine,
    responders: Vec<Box<dyn Responder>>,
    tools: Option<Arc<ToolBox>>,
    config: OrchestrationConfig,
}

impl TurnOrchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        completion: Arc<dyn CompletionService>,
        routing: RoutingEngine,
        config: OrchestrationConfig,
    ) -> Self {
        let responders = build_responders(&registry);
        Self {
            registry,
            completion,
            routing,
            responders,
            tools: None,
            config,
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolBox>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    /// Batch pass in the configured mode.
    pub async fn run(&self, messages: &[ConversationMessage]) -> Vec<AgentResponse> {
        self.run_pass(messages).await.responses
    }

    pub async fn run_pass(&self, messages: &[ConversationMessage]) -> PassResult {
        self.execute(messages, None).await
    }

    /// Same pass, yielding each response as soon as it is produced.
    pub fn run_streaming(
        self: &Arc<Self>,
        messages: Vec<ConversationMessage>,
    ) -> ReceiverStream<AgentResponse> {
        let (tx, rx) = mpsc::channel(MAX_RESPONDERS);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.execute(&messages, Some(&tx)).await;
        });
        ReceiverStream::new(rx)
    }

    async fn execute(
        &self,
        messages: &[ConversationMessage],
        sink: Option<&mpsc::Sender<AgentResponse>>,
    ) -> PassResult {
        let mut emitter = Emitter {
            sink,
            pacing: Duration::from_millis(self.config.pacing_ms),
            emitted: 0,
        };

        match self.config.mode {
            OrchestrationMode::Chained => {
                let plan = self.routing.route(messages).await;
                self.run_chained(messages, &plan, &mut emitter).await
            }
            OrchestrationMode::FanOut => {
                let plan = self.routing.route(messages).await;
                self.run_fan_out(messages, &plan, &mut emitter).await
            }
            OrchestrationMode::Volunteer => self.run_volunteers(messages, &mut emitter).await,
        }
    }

    /// Executes `plan` in order; each agent sees the outputs of those before it.
    async fn run_chained(
        &self,
        messages: &[ConversationMessage],
        plan: &[ResponderSpec],
        emitter: &mut Emitter<'_>,
    ) -> PassResult {
        let plan = &plan[..plan.len().min(MAX_RESPONDERS)];
        let mut transcript = messages.to_vec();
        let mut responses = Vec::new();

        if plan.len() > 1 {
            transcript.push(ConversationMessage::system(sequence_note(&self.registry, plan)));
        }

        for (idx, spec) in plan.iter().enumerate() {
            let turn_index = idx + 1;
            let Some(profile) = self.registry.get(&spec.agent_key) else {
                warn!(agent = %spec.agent_key, "Planned agent is not registered, skipping");
                continue;
            };

            match self.execute_turn(profile, spec.role, turn_index, &transcript).await {
                TurnOutcome::Declined => {}
                TurnOutcome::Completed(response) => {
                    transcript.push(ConversationMessage::assistant(tag_output(
                        profile,
                        spec.role,
                        &response.output,
                    )));
                    emitter.emit(&response).await;
                    responses.push(response);
                }
                TurnOutcome::Failed(response) => {
                    emitter.emit(&response).await;
                    responses.push(response);
                    if self.config.failure_policy == FailurePolicy::Abort {
                        warn!(agent = %profile.key, turn = turn_index, "Aborting pass after failed turn");
                        break;
                    }
                }
            }
        }

        info!(
            planned = plan.len(),
            responded = responses.len(),
            "Pass complete"
        );
        PassResult {
            responses,
            transcript,
        }
    }

    /// Runs every planned agent concurrently against the same base transcript.
    /// Results are reported in plan order.
    async fn run_fan_out(
        &self,
        messages: &[ConversationMessage],
        plan: &[ResponderSpec],
        emitter: &mut Emitter<'_>,
    ) -> PassResult {
        let plan = &plan[..plan.len().min(MAX_RESPONDERS)];
        let base = messages.to_vec();

        let outcomes: Vec<Option<(&AgentProfile, CollaborationRole, TurnOutcome)>> =
            futures::stream::iter(
                plan.iter()
                    .enumerate()
                    .map(|(idx, spec)| {
                        let base = &base;
                        async move {
                            let profile = self.registry.get(&spec.agent_key)?;
                            let outcome = self.execute_turn(profile, spec.role, idx + 1, base).await;
                            Some((profile, spec.role, outcome))
                        }
                    })
                    .collect::<Vec<_>>(),
            )
                .buffered(self.config.fan_out_concurrency.max(1))
                .collect()
                .await;

        let mut transcript = base.clone();
        let mut responses = Vec::new();
        for (profile, role, outcome) in outcomes.into_iter().flatten() {
            match outcome {
                TurnOutcome::Declined => {}
                TurnOutcome::Completed(response) => {
                    transcript.push(ConversationMessage::assistant(tag_output(
                        profile,
                        role,
                        &response.output,
                    )));
                    emitter.emit(&response).await;
                    responses.push(response);
                }
                TurnOutcome::Failed(response) => {
                    emitter.emit(&response).await;
                    responses.push(response);
                    if self.config.failure_policy == FailurePolicy::Abort {
                        break;
                    }
                }
            }
        }

        info!(
            planned = plan.len(),
            responded = responses.len(),
            "Fan-out pass complete"
        );
        PassResult {
            responses,
            transcript,
        }
    }

    /// Repeatedly runs the first agent that volunteers and has not acted yet,
    /// until nobody volunteers. Each agent acts at most once per pass.
    async fn run_volunteers(
        &self,
        messages: &[ConversationMessage],
        emitter: &mut Emitter<'_>,
    ) -> PassResult {
        let mut transcript = messages.to_vec();
        let mut responses = Vec::new();
        let mut used: HashSet<String> = HashSet::new();
        let mut turn_index = 0;

        loop {
            let Some(responder) = self
                .responders
                .iter()
                .find(|r| !used.contains(r.key()) && r.decide(&transcript))
            else {
                break;
            };

            used.insert(responder.key().to_string());
            turn_index += 1;
            let profile = responder.profile();
            debug!(agent = %profile.key, turn = turn_index, "Agent volunteered");

            match self
                .execute_turn(profile, CollaborationRole::Respond, turn_index, &transcript)
                .await
            {
                TurnOutcome::Declined => {}
                TurnOutcome::Completed(response) => {
                    transcript.push(ConversationMessage::assistant(tag_output(
                        profile,
                        CollaborationRole::Respond,
                        &response.output,
                    )));
                    emitter.emit(&response).await;
                    responses.push(response);
                }
                TurnOutcome::Failed(response) => {
                    emitter.emit(&response).await;
                    responses.push(response);
                    if self.config.failure_policy == FailurePolicy::Abort {
                        break;
                    }
                }
            }
        }

        info!(
            turns = turn_index,
            responded = responses.len(),
            "Volunteer pass complete"
        );
        PassResult {
            responses,
            transcript,
        }
    }

    /// One completion call with a transient guidance note.
    async fn execute_turn(
        &self,
        profile: &AgentProfile,
        role: CollaborationRole,
        turn_index: usize,
        transcript: &[ConversationMessage],
    ) -> TurnOutcome {
        let mut call_transcript = Vec::with_capacity(transcript.len() + 1);
        call_transcript.extend_from_slice(transcript);
        call_transcript.push(ConversationMessage::system(role.guidance()));

        debug!(agent = %profile.key, turn = turn_index, role = %role, "Running turn");

        let result = match self.config.turn_timeout_ms {
            Some(ms) => tokio::time::timeout(
                Duration::from_millis(ms),
                self.completion.complete(profile, &call_transcript),
            )
            .await
            .unwrap_or(Err(RoundtableError::Timeout(ms))),
            None => self.completion.complete(profile, &call_transcript).await,
        };

        let text = match result {
            Ok(text) => text,
            Err(e) => {
                error!(agent = %profile.key, turn = turn_index, error = %e, "Turn failed");
                return TurnOutcome::Failed(AgentResponse::failed(profile, role, turn_index));
            }
        };

        if is_decline(&text) {
            debug!(agent = %profile.key, turn = turn_index, "Agent passed");
            return TurnOutcome::Declined;
        }

        let output = match &self.tools {
            Some(tools) => tools.dispatch(profile, &text).await.unwrap_or(text),
            None => text,
        };

        debug!(
            agent = %profile.key,
            turn = turn_index,
            chars = output.len(),
            "Turn complete"
        );
        TurnOutcome::Completed(AgentResponse::complete(profile, &output, role, turn_index))
    }
}
