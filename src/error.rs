//! Error types for Svar.

use thiserror::Error;

/// Library-level error type for Svar operations.
#[derive(Error, Debug)]
pub enum SvarError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed knowledge base: {0}")]
    MalformedKnowledgeBase(String),

    #[error("Embedding row count mismatch: knowledge base has {expected} documents, got {text_rows} text rows and {about_rows} about rows")]
    EmbeddingSizeMismatch {
        expected: usize,
        text_rows: usize,
        about_rows: usize,
    },

    #[error("Embedding cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Completion failed: {0}")]
    Completion(String),

    #[error("Downstream consumer disconnected")]
    ConsumerDisconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),
}

/// Result type alias for Svar operations.
pub type Result<T> = std::result::Result<T, SvarError>;
