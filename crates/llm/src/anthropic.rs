use async_trait::async_trait;
use roundtable_common::Result;
use roundtable_common::RoundtableError;
use serde::{Deserialize, Serialize};

use crate::client::{LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContent>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    usage: Option<AnthropicUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

pub struct AnthropicClient {
    model: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(model: String, api_key: String) -> Self {
        Self {
            model,
            api_key,
            http_client: reqwest::Client::new(),
        }
    }

    /// Messages API only accepts alternating user/assistant turns. Transcript
    /// system notes are folded into user turns, and consecutive turns with the
    /// same role are merged.
    fn build_messages(request: &LlmRequest) -> Vec<AnthropicMessage> {
        let mut messages: Vec<AnthropicMessage> = Vec::new();

        for msg in &request.messages {
            let (role, text) = match msg.role {
                Role::Assistant => ("assistant", msg.content.clone()),
                Role::User => ("user", msg.content.clone()),
                Role::System => ("user", format!("[System note] {}", msg.content)),
            };

            match messages.last_mut() {
                Some(last) if last.role == role => {
                    last.content.push(AnthropicContent {
                        content_type: "text".to_string(),
                        text,
                    });
                }
                _ => messages.push(AnthropicMessage {
                    role: role.to_string(),
                    content: vec![AnthropicContent {
                        content_type: "text".to_string(),
                        text,
                    }],
                }),
            }
        }

        messages
    }

    fn build_request_body(&self, request: &LlmRequest) -> AnthropicRequest {
        AnthropicRequest {
            model: self.model.clone(),
            messages: Self::build_messages(request),
            system: request.system_prompt.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let body = self.build_request_body(&request);

        let response = self
            .http_client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| RoundtableError::Completion(format!("Anthropic request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RoundtableError::Completion(format!(
                "Anthropic API error {status}: {body_text}"
            )));
        }

        let anthropic_response: AnthropicResponse = response.json().await.map_err(|e| {
            RoundtableError::Completion(format!("Failed to parse Anthropic response: {e}"))
        })?;

        let content = anthropic_response
            .content
            .into_iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            content,
            model: anthropic_response.model,
            usage: anthropic_response.usage.map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
            }),
            finish_reason: anthropic_response.stop_reason,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
