//! HTTP route handlers for the API.

use crate::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::stream::{self, Stream, StreamExt};
use roundtable_common::{AgentResponse, ConversationMessage, MessageRole};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub agent_count: usize,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        agent_count: state.coordinator.agents().count(),
    })
}

#[derive(Debug, Serialize)]
pub struct AgentSummary {
    pub key: String,
    pub name: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    pub agents: Vec<AgentSummary>,
}

/// Lists the agents a user can address.
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<AgentsResponse> {
    let agents = state
        .coordinator
        .agents()
        .map(|p| AgentSummary {
            key: p.key.clone(),
            name: p.name.clone(),
            role: p.role_title.clone(),
            avatar: p.avatar_url.clone(),
        })
        .collect();
    Json(AgentsResponse { agents })
}

/// One transcript entry as sent by clients.
#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(alias = "content")]
    pub text: String,
}

fn default_role() -> String {
    "user".to_string()
}

/// Chat request body: a transcript, a single new message, or both.
#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ChatRequest {
    /// `messages` in order, then `message` as the newest user turn.
    pub fn into_transcript(self) -> Vec<ConversationMessage> {
        let mut transcript: Vec<ConversationMessage> = self
            .messages
            .into_iter()
            .map(|m| ConversationMessage::new(MessageRole::parse_lenient(&m.role), m.text))
            .collect();
        if let Some(text) = self.message
            && !text.trim().is_empty()
        {
            transcript.push(ConversationMessage::user(text));
        }
        transcript
    }
}

/// A single response is returned as-is; anything else gets an envelope.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ChatResponse {
    Single(AgentResponse),
    Envelope {
        responses: Vec<AgentResponse>,
        status: &'static str,
        agent_count: usize,
    },
}

impl From<Vec<AgentResponse>> for ChatResponse {
    fn from(mut responses: Vec<AgentResponse>) -> Self {
        if responses.len() == 1
            && let Some(response) = responses.pop()
        {
            return Self::Single(response);
        }
        Self::Envelope {
            agent_count: responses.len(),
            responses,
            status: "complete",
        }
    }
}

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip)]
    pub status: StatusCode,
}

impl ErrorResponse {
    fn bad_request(error: impl Into<String>, code: &'static str) -> Self {
        Self {
            error: error.into(),
            code,
            status: StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

fn transcript_from(request: ChatRequest) -> Result<Vec<ConversationMessage>, ErrorResponse> {
    let transcript = request.into_transcript();
    if !transcript.iter().any(|m| m.role == MessageRole::User) {
        return Err(ErrorResponse::bad_request(
            "Request must contain at least one user message",
            "EMPTY_CONVERSATION",
        ));
    }
    Ok(transcript)
}

/// Run one orchestration pass and return its responses.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ErrorResponse> {
    let transcript = transcript_from(request)?;
    info!(messages = transcript.len(), "Received chat request");

    let responses = state.coordinator.orchestrate(&transcript).await;
    debug!(responses = responses.len(), "Chat pass finished");

    Ok(Json(ChatResponse::from(responses)))
}

fn response_event(response: &AgentResponse) -> Event {
    match serde_json::to_string(response) {
        Ok(data) => Event::default().event("agent_response").data(data),
        Err(e) => {
            error!(error = %e, agent = %response.agent_key, "Failed to serialize response");
            Event::default()
                .event("error")
                .data(r#"{"error":"serialization failed","code":"SERIALIZATION_ERROR"}"#)
        }
    }
}

/// Streams one `agent_response` event per turn, then `done`.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ErrorResponse> {
    let transcript = transcript_from(request)?;
    info!(messages = transcript.len(), "Received streaming chat request");

    let responses = state
        .coordinator
        .orchestrate_stream(&transcript)
        .map(|response| Ok::<_, Infallible>(response_event(&response)));
    let done = stream::once(async {
        Ok(Event::default()
            .event("done")
            .data(r#"{"status":"complete"}"#))
    });

    Ok(Sse::new(responses.chain(done)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}
