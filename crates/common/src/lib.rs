//! Common types shared across Roundtable crates.
//!
//! This crate provides the foundational data model: transcript messages,
//! agent profiles, routing plans and per-agent results.

pub mod error;
pub mod message;
pub mod profile;
pub mod response;

pub use error::{Result, RoundtableError};
pub use message::{ConversationMessage, MessageRole, last_user_index, last_user_text};
pub use profile::{AgentKind, AgentProfile};
pub use response::{
    AgentResponse, CollaborationRole, EMPTY_OUTPUT_PLACEHOLDER, ResponderSpec, ResponseStatus,
    estimate_tokens, is_decline,
};
