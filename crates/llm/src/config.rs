use std::sync::Arc;

use async_trait::async_trait;
use roundtable_common::{Result, RoundtableError};
use serde::{Deserialize, Serialize};

use crate::anthropic::AnthropicClient;
use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::openai::OpenAiClient;
use crate::retry::{RetryConfig, RetryingClient};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// `github`, `openai` or `anthropic`
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Falls back to the provider's environment variable when unset.
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider() -> String {
    "github".to_string()
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_max_concurrent() -> usize {
    3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            api_url: None,
            temperature: None,
            max_tokens: None,
            max_concurrent_requests: default_max_concurrent(),
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Same provider settings with a different model, used for per-agent overrides.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }

    fn key_env_var(&self) -> Option<&'static str> {
        match self.provider.as_str() {
            "github" => Some("GITHUB_TOKEN"),
            "openai" => Some("OPENAI_API_KEY"),
            "anthropic" => Some("ANTHROPIC_API_KEY"),
            _ => None,
        }
    }

    /// Configured key, else the provider's environment variable. Blank values count as unset.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .or_else(|| {
                let var = self.key_env_var()?;
                std::env::var(var)
                    .ok()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
    }
}

/// Caps the number of in-flight requests to the wrapped client.
pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| RoundtableError::Completion(format!("Semaphore acquire failed: {e}")))?;
        self.inner.complete(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Builds the provider client wrapped in retry and concurrency layers.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let api_key = config.resolved_api_key();

    let base_client: Box<dyn LlmClient> = match config.provider.as_str() {
        "github" => {
            let token = api_key.ok_or_else(|| {
                RoundtableError::Config(
                    "GitHub Models requires a token; set llm.api_key or GITHUB_TOKEN".to_string(),
                )
            })?;
            Box::new(OpenAiClient::new(
                config.api_url.clone(),
                config.model.clone(),
                Some(token),
            ))
        }
        "openai" => Box::new(OpenAiClient::new(
            Some(
                config
                    .api_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            ),
            config.model.clone(),
            api_key,
        )),
        "anthropic" => {
            let api_key = api_key.ok_or_else(|| {
                RoundtableError::Config(
                    "Anthropic requires an API key; set llm.api_key or ANTHROPIC_API_KEY"
                        .to_string(),
                )
            })?;
            Box::new(AnthropicClient::new(config.model.clone(), api_key))
        }
        other => {
            return Err(RoundtableError::Config(format!(
                "Unknown LLM provider: {other}"
            )));
        }
    };

    let retrying: Box<dyn LlmClient> =
        Box::new(RetryingClient::new(base_client, config.retry.clone()));

    let semaphored = SemaphoredClient::new(Arc::from(retrying), config.max_concurrent_requests);

    Ok(Arc::new(semaphored))
}
