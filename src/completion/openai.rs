//! OpenAI chat completion implementation.

use super::{CompletionRequest, CompletionService, TokenStream};
use crate::error::{Result, SvarError};
use crate::openai::create_client_with_timeout;
use crate::rag::{Role, Turn};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, instrument};

/// OpenAI-backed streaming completion service.
pub struct OpenAiCompletion {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
}

impl OpenAiCompletion {
    /// Create a new completion service for the given model.
    pub fn new(model: &str, timeout: Duration) -> Self {
        Self {
            client: create_client_with_timeout(timeout),
            model: model.to_string(),
        }
    }
}

fn to_request_message(turn: &Turn) -> Result<ChatCompletionRequestMessage> {
    let message = match turn.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(turn.content.clone())
            .build()
            .map_err(|e| SvarError::Completion(e.to_string()))?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(turn.content.clone())
            .build()
            .map_err(|e| SvarError::Completion(e.to_string()))?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(turn.content.clone())
            .build()
            .map_err(|e| SvarError::Completion(e.to_string()))?
            .into(),
    };
    Ok(message)
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    #[instrument(skip(self, request), fields(messages = request.messages.len()))]
    async fn stream_chat(&self, request: CompletionRequest) -> Result<TokenStream> {
        let messages: Vec<ChatCompletionRequestMessage> = request
            .messages
            .iter()
            .map(to_request_message)
            .collect::<Result<_>>()?;

        let openai_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .build()
            .map_err(|e| SvarError::Completion(e.to_string()))?;

        debug!("Starting chat completion stream");

        let stream = self
            .client
            .chat()
            .create_stream(openai_request)
            .await
            .map_err(|e| SvarError::OpenAI(format!("Chat API error: {}", e)))?;

        let tokens = stream.filter_map(|chunk| {
            let item = match chunk {
                Ok(response) => response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(SvarError::OpenAI(format!("Stream error: {}", e)))),
            };
            futures::future::ready(item)
        });

        Ok(Box::pin(tokens))
    }
}
