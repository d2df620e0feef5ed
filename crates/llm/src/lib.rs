pub mod anthropic;
pub mod client;
pub mod completion;
pub mod config;
pub mod openai;
pub mod retry;

pub use anthropic::AnthropicClient;
pub use client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
pub use completion::{CompletionService, LlmCompletionService, build_instructions};
pub use config::{LlmConfig, SemaphoredClient, build_llm_client};
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient};
