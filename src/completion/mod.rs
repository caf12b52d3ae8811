//! Streaming completion service abstraction.
//!
//! The engine only needs "messages in, lazy token sequence out"; the trait
//! keeps answer generation independent of the concrete LLM backend.

mod openai;

pub use openai::OpenAiCompletion;

use crate::error::Result;
use crate::rag::Turn;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Lazy sequence of incremental answer fragments.
///
/// The stream ends when the service signals completion; a transport-level
/// failure can surface as an `Err` item at any point mid-stream.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Ordered message list, system prompt first.
    pub messages: Vec<Turn>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

/// Trait for streaming chat completion backends.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Start a streaming completion for the given messages.
    async fn stream_chat(&self, request: CompletionRequest) -> Result<TokenStream>;
}
