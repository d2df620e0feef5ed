//! Integration tests for routing, orchestration passes and approval interception.
//!
//! A scripted completion service stands in for the model provider so every
//! pass is deterministic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{Router, routing::get};
use futures::StreamExt;
use roundtable_agents::AgentRegistry;
use roundtable_common::{
    AgentProfile, CollaborationRole, ConversationMessage, MessageRole, ResponderSpec,
    ResponseStatus, Result, RoundtableError,
};
use roundtable_coordinator::{
    Coordinator, CoordinatorConfig, FailurePolicy, OrchestrationMode, RouteSource, RoutingEngine,
};
use roundtable_llm::CompletionService;

/// Replies from per-agent queues and records every call it receives.
#[derive(Default)]
struct ScriptedCompletion {
    replies: Mutex<HashMap<String, VecDeque<Result<String>>>>,
    slow: HashSet<String>,
    calls: Mutex<Vec<(String, Vec<ConversationMessage>)>>,
}

impl ScriptedCompletion {
    fn new() -> Self {
        Self::default()
    }

    fn reply(self, agent: &str, text: &str) -> Self {
        self.push(agent, Ok(text.to_string()))
    }

    fn fail(self, agent: &str) -> Self {
        self.push(agent, Err(RoundtableError::Completion("503 Service Unavailable".into())))
    }

    fn slow(mut self, agent: &str) -> Self {
        self.slow.insert(agent.to_string());
        self
    }

    fn push(self, agent: &str, reply: Result<String>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(agent.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    fn calls_for(&self, agent: &str) -> Vec<Vec<ConversationMessage>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key == agent)
            .map(|(_, transcript)| transcript.clone())
            .collect()
    }

    fn agent_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .filter(|key| key != "router")
            .collect()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(
        &self,
        agent: &AgentProfile,
        transcript: &[ConversationMessage],
    ) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((agent.key.clone(), transcript.to_vec()));

        if self.slow.contains(&agent.key) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let next = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&agent.key)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(format!("{} has no script.", agent.name)))
    }
}

fn test_config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.orchestration.pacing_ms = 0;
    config
}

fn coordinator(config: CoordinatorConfig, completion: &Arc<ScriptedCompletion>) -> Coordinator {
    Coordinator::new(config, completion.clone()).unwrap()
}

fn user(text: &str) -> Vec<ConversationMessage> {
    vec![ConversationMessage::user(text)]
}

fn keys(responses: &[roundtable_common::AgentResponse]) -> Vec<&str> {
    responses.iter().map(|r| r.agent_key.as_str()).collect()
}

fn request_id(prompt: &str) -> String {
    prompt.rsplit(' ').next().unwrap().to_string()
}

// ============================================================================
// Routing
// ============================================================================

fn routing_engine(completion: &Arc<ScriptedCompletion>) -> RoutingEngine {
    RoutingEngine::new(
        Arc::new(AgentRegistry::builtin()),
        completion.clone(),
        CoordinatorConfig::default().routing,
    )
}

#[tokio::test]
async fn mention_routes_without_completion_call() {
    let completion = Arc::new(ScriptedCompletion::new());
    let plan = routing_engine(&completion)
        .plan(&user("@Marc is C# obsolete?"))
        .await;

    assert_eq!(plan.source, RouteSource::Mentions);
    assert_eq!(plan.responders, vec![ResponderSpec::respond("architect")]);
    assert_eq!(completion.total_calls(), 0);
}

#[tokio::test]
async fn classifier_reply_becomes_plan() {
    let completion = Arc::new(ScriptedCompletion::new().reply("router", r#"{"agents":["strategy"]}"#));
    let plan = routing_engine(&completion)
        .plan(&user("what's our growth plan?"))
        .await;

    assert_eq!(plan.source, RouteSource::Classifier);
    assert_eq!(plan.responders, vec![ResponderSpec::respond("strategy")]);

    let router_calls = completion.calls_for("router");
    assert_eq!(router_calls.len(), 1);
    let prompt = &router_calls[0][0].text;
    assert!(prompt.contains("- strategy (Claire)"));
    assert!(prompt.contains("user: what's our growth plan?"));
    assert!(!prompt.contains("- router"));
}

#[tokio::test]
async fn classifier_prompt_keeps_recent_context_only() {
    let completion = Arc::new(ScriptedCompletion::new().reply("router", "{}"));
    let history: Vec<ConversationMessage> = (1..=7)
        .map(|i| ConversationMessage::user(format!("message number {i}")))
        .collect();
    routing_engine(&completion).plan(&history).await;

    let prompt = completion.calls_for("router")[0][0].text.clone();
    assert!(!prompt.contains("message number 2"));
    assert!(prompt.contains("message number 3"));
    assert!(prompt.contains("message number 7"));
}

#[tokio::test]
async fn unusable_classification_falls_back_to_default_responder() {
    for reply in [
        Ok("Marc should take this one.".to_string()),
        Ok(r#"{"agents": ["ghost", "router"]}"#.to_string()),
        Err(RoundtableError::Completion("connection reset".into())),
    ] {
        let completion = Arc::new(ScriptedCompletion::new().push("router", reply));
        let plan = routing_engine(&completion).plan(&user("hello team")).await;
        assert_eq!(plan.source, RouteSource::Fallback);
        assert_eq!(plan.responders, vec![ResponderSpec::respond("assistant")]);
    }
}

// ============================================================================
// Chained passes
// ============================================================================

#[tokio::test]
async fn chained_pass_feeds_each_agent_the_previous_outputs() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply(
                "router",
                r#"{"agents": [{"agent": "strategy", "role": "propose"}, {"agent": "architect", "role": "critique"}, {"agent": "reviewer", "role": "evaluate"}], "reasoning": "launch plan"}"#,
            )
            .reply("strategy", "Launch in Q3 with a freemium tier.")
            .reply("architect", "Freemium needs usage metering first.")
            .reply("reviewer", "Feasible if metering ships by June."),
    );
    let coordinator = coordinator(test_config(), &completion);

    let pass = coordinator.orchestrate_pass(&user("How should we launch?")).await;

    assert_eq!(keys(&pass.responses), vec!["strategy", "architect", "reviewer"]);
    assert_eq!(
        pass.responses.iter().map(|r| r.turn_index).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(pass.responses[1].collaboration_role, CollaborationRole::Critique);
    assert_eq!(pass.responses[0].label, "Claire (Strategy Lead)");
    assert!(pass.responses.iter().all(|r| r.is_complete()));

    // user + sequence note + three tagged outputs
    assert_eq!(pass.transcript.len(), 5);
    assert_eq!(pass.transcript[1].role, MessageRole::System);
    assert!(pass.transcript[1]
        .text
        .contains("Claire (propose) -> Marc (critique) -> Nina (evaluate)"));
    assert_eq!(
        pass.transcript[3].text,
        "[Marc (critique)]: Freemium needs usage metering first."
    );

    let architect_call = &completion.calls_for("architect")[0];
    assert!(architect_call
        .iter()
        .any(|m| m.text == "[Claire (propose)]: Launch in Q3 with a freemium tier."));
    let guidance = architect_call.last().unwrap();
    assert_eq!(guidance.role, MessageRole::System);
    assert!(guidance.text.contains("CRITIQUE"));
    assert!(!pass.transcript.iter().any(|m| m.text.contains("Your role this turn")));
}

#[tokio::test]
async fn declined_turn_leaves_no_trace() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply("router", r#"{"agents":["builder"]}"#)
            .reply("builder", "PASS"),
    );
    let coordinator = coordinator(test_config(), &completion);
    let inbound = user("anything to build here?");

    let pass = coordinator.orchestrate_pass(&inbound).await;

    assert!(pass.responses.is_empty());
    assert_eq!(pass.transcript, inbound);
}

#[tokio::test]
async fn one_call_per_planned_turn_even_when_agents_decline() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply("strategy", "Focus on retention.")
            .reply("architect", " pass ")
            .reply("analyst", "Churn is 4% monthly."),
    );
    let coordinator = coordinator(test_config(), &completion);

    let responses = coordinator
        .orchestrate(&user("@Claire @Marc @Sophie how do we grow?"))
        .await;

    assert_eq!(completion.agent_calls(), vec!["strategy", "architect", "analyst"]);
    assert_eq!(keys(&responses), vec!["strategy", "analyst"]);
    assert_eq!(responses[1].turn_index, 3);
    assert_eq!(
        responses.iter().map(|r| r.estimated_tokens).sum::<usize>(),
        "Focus on retention.".len() / 4 + "Churn is 4% monthly.".len() / 4
    );
}

#[tokio::test]
async fn mentions_beyond_three_are_truncated() {
    let completion = Arc::new(ScriptedCompletion::new());
    let coordinator = coordinator(test_config(), &completion);

    let responses = coordinator
        .orchestrate(&user("@Nina @Hugo @Sophie @Marc @Claire thoughts?"))
        .await;

    assert_eq!(keys(&responses), vec!["reviewer", "builder", "analyst"]);
    assert_eq!(completion.total_calls(), 3);
}

#[tokio::test]
async fn failed_turn_is_recorded_and_pass_continues() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .fail("strategy")
            .reply("architect", "Use a queue."),
    );
    let coordinator = coordinator(test_config(), &completion);

    let pass = coordinator.orchestrate_pass(&user("@Claire @Marc ideas?")).await;

    assert_eq!(keys(&pass.responses), vec!["strategy", "architect"]);
    assert_eq!(pass.responses[0].status, ResponseStatus::Failed);
    assert_eq!(pass.responses[0].output, "Claire could not respond right now.");
    assert!(!pass.responses[0].output.contains("503"));
    assert!(pass.responses[1].is_complete());
    assert!(!pass.transcript.iter().any(|m| m.text.starts_with("[Claire")));
}

#[tokio::test]
async fn abort_policy_stops_after_failure() {
    let completion = Arc::new(ScriptedCompletion::new().fail("strategy"));
    let mut config = test_config();
    config.orchestration.failure_policy = FailurePolicy::Abort;
    let coordinator = coordinator(config, &completion);

    let responses = coordinator.orchestrate(&user("@Claire @Marc ideas?")).await;

    assert_eq!(keys(&responses), vec!["strategy"]);
    assert_eq!(completion.agent_calls(), vec!["strategy"]);
}

#[tokio::test]
async fn slow_turn_times_out() {
    let completion = Arc::new(ScriptedCompletion::new().slow("architect"));
    let mut config = test_config();
    config.orchestration.turn_timeout_ms = Some(20);
    let coordinator = coordinator(config, &completion);

    let responses = coordinator.orchestrate(&user("@Marc @Hugo status?")).await;

    assert_eq!(responses[0].status, ResponseStatus::Failed);
    assert!(responses[1].is_complete());
}

#[tokio::test]
async fn empty_output_uses_placeholder() {
    let completion = Arc::new(ScriptedCompletion::new().reply("builder", ""));
    let coordinator = coordinator(test_config(), &completion);

    let responses = coordinator.orchestrate(&user("@Hugo go")).await;

    assert_eq!(responses[0].output, "Request processed");
    assert_eq!(responses[0].estimated_tokens, 0);
}

// ============================================================================
// Fan-out and volunteer modes
// ============================================================================

#[tokio::test]
async fn fan_out_reports_in_plan_order_from_a_shared_base() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .slow("strategy")
            .reply("strategy", "Slow but first.")
            .reply("architect", "Quick second.")
            .reply("builder", "PASS"),
    );
    let mut config = test_config();
    config.orchestration.mode = OrchestrationMode::FanOut;
    let coordinator = coordinator(config, &completion);

    let responses = coordinator.orchestrate(&user("@Claire @Marc @Hugo go")).await;

    assert_eq!(keys(&responses), vec!["strategy", "architect"]);
    assert_eq!(completion.agent_calls().len(), 3);
    for agent in ["strategy", "architect", "builder"] {
        let call = &completion.calls_for(agent)[0];
        assert_eq!(call.len(), 2, "{agent} should see only the user message and its guidance");
    }
}

#[tokio::test]
async fn volunteers_hand_off_by_mention() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply("strategy", "Let's ask @Hugo whether the build is ready.")
            .reply("builder", "Build is green."),
    );
    let mut config = test_config();
    config.orchestration.mode = OrchestrationMode::Volunteer;
    let coordinator = coordinator(config, &completion);

    let pass = coordinator
        .orchestrate_pass(&user("@Claire can we ship this week?"))
        .await;

    assert_eq!(keys(&pass.responses), vec!["strategy", "builder"]);
    assert_eq!(pass.responses[1].turn_index, 2);
    assert!(completion.calls_for("router").is_empty());
    assert_eq!(
        pass.transcript.last().unwrap().text,
        "[Hugo (respond)]: Build is green."
    );
}

#[tokio::test]
async fn generalist_volunteers_when_nobody_is_mentioned() {
    let completion = Arc::new(ScriptedCompletion::new().reply("assistant", "Hi! How can we help?"));
    let mut config = test_config();
    config.orchestration.mode = OrchestrationMode::Volunteer;
    let coordinator = coordinator(config, &completion);

    let responses = coordinator.orchestrate(&user("hello")).await;

    assert_eq!(keys(&responses), vec!["assistant"]);
    assert_eq!(completion.total_calls(), 1);
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn stream_yields_same_responses_in_order() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply("strategy", "One.")
            .reply("architect", "PASS")
            .reply("reviewer", "Three."),
    );
    let mut config = test_config();
    config.orchestration.pacing_ms = 5;
    let coordinator = coordinator(config, &completion);

    let streamed: Vec<_> = coordinator
        .orchestrate_stream(&user("@Claire @Marc @Nina review"))
        .collect()
        .await;

    assert_eq!(keys(&streamed), vec!["strategy", "reviewer"]);
    assert_eq!(streamed[1].output, "Three.");
}

// ============================================================================
// Tool approval
// ============================================================================

#[tokio::test]
async fn tool_call_waits_for_approval_across_passes() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let app = Router::new().route("/report", get(|| async { "quarterly numbers" }));
        axum::serve(listener, app).await.unwrap();
    });

    let tool_call = format!(r#"{{"tool": "fetch_url", "arguments": {{"url": "{base}/report"}}}}"#);
    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply("analyst", &tool_call)
            .reply("router", r#"{"agents": ["analyst"]}"#)
            .reply("analyst", &tool_call),
    );
    let coordinator = coordinator(test_config(), &completion);

    let first = coordinator
        .orchestrate(&user("@Sophie pull the quarterly report"))
        .await;
    assert_eq!(first.len(), 1);
    assert!(first[0].output.starts_with("Approval required before using a tool."));
    let id = request_id(&first[0].output);
    assert_eq!(coordinator.gate().pending().unwrap().request_id, id);

    let second = coordinator.orchestrate(&user(&format!("approve {id}"))).await;
    assert_eq!(keys(&second), vec!["analyst"]);
    assert_eq!(second[0].output, "quarterly numbers");
    assert!(coordinator.gate().pending().is_none());

    let analyst_call = completion.calls_for("analyst").pop().unwrap();
    assert!(analyst_call.iter().any(|m| m.role == MessageRole::System
        && m.text == format!("User approved tool request {id}. Proceed with the tool call.")));
}

#[tokio::test]
async fn deny_clears_pending_request_and_notes_it() {
    let completion = Arc::new(ScriptedCompletion::new());
    let coordinator = coordinator(test_config(), &completion);
    let (approved, prompt) =
        coordinator
            .gate()
            .ensure_approval("fetch_url", "Fetch URL: https://example.com", &serde_json::json!({}));
    assert!(!approved);
    let id = request_id(&prompt);

    let transcript = coordinator.intercept_approval(&user(&format!("deny {id}")));

    assert_eq!(transcript.len(), 2);
    assert_eq!(
        transcript[1].text,
        format!("User denied tool request {id}. Do not call that tool unless a new approval is requested.")
    );
    assert!(coordinator.gate().pending().is_none());
}

#[tokio::test]
async fn ordinary_messages_pass_through_interception() {
    let completion = Arc::new(ScriptedCompletion::new());
    let coordinator = coordinator(test_config(), &completion);

    let inbound = user("approve the budget please");
    assert_eq!(coordinator.intercept_approval(&inbound), inbound);
    assert_eq!(coordinator.agents().count(), 6);
}
