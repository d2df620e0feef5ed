//! Error types for Roundtable.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoundtableError {
    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RoundtableError>;
