//! Streaming answer generation.
//!
//! A query flows retrieve -> prompt -> stream -> finalize: supporting documents
//! are folded into one system message together with today's date, tokens from
//! the completion service are emitted to the caller as they arrive, and the
//! finished turn (plus citations, when any document carries a docs path) is
//! recorded in the caller's conversation context.

use crate::completion::{CompletionRequest, CompletionService};
use crate::config::{GenerationSettings, Prompts};
use crate::error::{Result, SvarError};
use crate::rag::context::{ConversationContext, Turn};
use crate::retriever::Retriever;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Fallback emitted when the completion service fails mid-answer.
const GENERATION_FAILED: &str = "An error occurred while generating the response.";

/// Receives answer tokens as they arrive.
///
/// An `Err` from `emit` means the downstream consumer stopped accepting output;
/// the engine reacts by ending the stream early, it never surfaces the error.
#[async_trait]
pub trait TokenSink: Send {
    /// Deliver one token to the consumer.
    async fn emit(&mut self, token: &str) -> Result<()>;
}

/// Sink that writes tokens to stdout, flushing after each.
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenSink for StdoutSink {
    async fn emit(&mut self, token: &str) -> Result<()> {
        let mut stdout = std::io::stdout();
        stdout
            .write_all(token.as_bytes())
            .and_then(|_| stdout.flush())
            .map_err(|_| SvarError::ConsumerDisconnected)
    }
}

/// Sink that forwards tokens over a tokio channel.
pub struct ChannelSink {
    sender: tokio::sync::mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<String>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl TokenSink for ChannelSink {
    async fn emit(&mut self, token: &str) -> Result<()> {
        self.sender
            .send(token.to_string())
            .map_err(|_| SvarError::ConsumerDisconnected)
    }
}

/// Streaming answer engine.
pub struct AnswerEngine {
    retriever: Retriever,
    completion: Arc<dyn CompletionService>,
    prompts: Prompts,
    settings: GenerationSettings,
}

impl AnswerEngine {
    /// Create a new answer engine.
    pub fn new(
        retriever: Retriever,
        completion: Arc<dyn CompletionService>,
        prompts: Prompts,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            retriever,
            completion,
            prompts,
            settings,
        }
    }

    /// The retriever backing this engine.
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer a query, streaming tokens into `sink`.
    ///
    /// Returns the full emitted text. Completion-service failures never bubble
    /// out of a query: they are logged and surfaced to the consumer as a single
    /// fallback token, and the conversation context is still finalized with
    /// whatever was collected. A disconnected consumer silently ends the
    /// stream. Errors before prompt assembly (knowledge base, cache) are
    /// reported the same way so one bad query cannot crash a serving engine.
    #[instrument(skip(self, context, sink), fields(query = %query))]
    pub async fn answer(
        &self,
        query: &str,
        context: &mut ConversationContext,
        sink: &mut dyn TokenSink,
    ) -> Result<String> {
        info!("Processing question: {}", query);

        let retrieved = match self.retriever.retrieve(query).await {
            Ok(docs) => docs,
            Err(e) => {
                error!("Retrieval failed: {}", e);
                let _ = sink.emit(GENERATION_FAILED).await;
                context.append_user(query);
                context.append_assistant(GENERATION_FAILED);
                return Ok(GENERATION_FAILED.to_string());
            }
        };

        let doc_context = retrieved
            .iter()
            .map(|doc| doc.context_text())
            .collect::<Vec<_>>()
            .join("\n\n");
        let citations = Retriever::citations(&retrieved, &self.settings.docs_base_url);

        let system = self.render_system_prompt(&doc_context);
        context.append_user(query);

        let mut messages = vec![Turn::system(system)];
        messages.extend(context.window().iter().cloned());

        let request = CompletionRequest {
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let mut collected = String::new();
        let mut emitted = String::new();
        let mut disconnected = false;
        let mut failed = false;

        match self.completion.stream_chat(request).await {
            Ok(mut stream) => {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(token) => {
                            collected.push_str(&token);
                            if sink.emit(&token).await.is_err() {
                                debug!("Consumer disconnected, ending stream early");
                                disconnected = true;
                                break;
                            }
                            emitted.push_str(&token);
                        }
                        Err(e) => {
                            error!("Completion stream failed: {}", e);
                            failed = true;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Completion request failed: {}", e);
                failed = true;
            }
        }

        if failed && !disconnected && sink.emit(GENERATION_FAILED).await.is_ok() {
            emitted.push_str(GENERATION_FAILED);
        }

        // Clean stream end gets the citations as one trailing block
        if !failed && !disconnected && !citations.is_empty() {
            let block = format!("\n\n{}", citations.join("\n"));
            if sink.emit(&block).await.is_ok() {
                emitted.push_str(&block);
            }
        }

        let answer = collected.trim().to_string();
        let recorded = if answer.is_empty() && failed {
            GENERATION_FAILED.to_string()
        } else {
            answer
        };
        context.append_assistant(recorded);

        if disconnected {
            warn!("Answer finalized after consumer disconnect ({} chars)", collected.len());
        }

        Ok(emitted)
    }

    fn render_system_prompt(&self, doc_context: &str) -> String {
        let mut vars = HashMap::new();
        vars.insert(
            "date".to_string(),
            chrono::Local::now().format("%B %d, %Y").to_string(),
        );
        vars.insert("context".to_string(), doc_context.to_string());
        self.prompts
            .render_with_custom(&self.prompts.answer.system, &vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EmbeddingCache;
    use crate::completion::TokenStream;
    use crate::config::RetrievalSettings;
    use crate::embedding::testing::MockEmbedder;
    use crate::knowledge_base::KnowledgeBaseStore;
    use crate::rag::Role;
    use std::io::Write as _;
    use std::sync::Mutex;

    const KB_JSON: &str = r#"[
        {"id": 1, "about": "Pricing", "text": "Defang is free for small teams.", "path": "/pricing"}
    ]"#;

    /// Completion service that replays a fixed script and records the request.
    struct ScriptedCompletion {
        script: Vec<std::result::Result<String, String>>,
        seen: Mutex<Option<CompletionRequest>>,
        fail_upfront: bool,
    }

    impl ScriptedCompletion {
        fn new(script: Vec<std::result::Result<String, String>>) -> Self {
            Self {
                script,
                seen: Mutex::new(None),
                fail_upfront: false,
            }
        }

        fn failing_upfront() -> Self {
            Self {
                script: Vec::new(),
                seen: Mutex::new(None),
                fail_upfront: true,
            }
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedCompletion {
        async fn stream_chat(&self, request: CompletionRequest) -> Result<TokenStream> {
            *self.seen.lock().unwrap() = Some(request);
            if self.fail_upfront {
                return Err(SvarError::Completion("service unavailable".to_string()));
            }
            let items: Vec<Result<String>> = self
                .script
                .clone()
                .into_iter()
                .map(|item| item.map_err(SvarError::Completion))
                .collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    /// Sink collecting every emitted token, optionally failing after a count.
    struct RecordingSink {
        tokens: Vec<String>,
        accept: Option<usize>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                tokens: Vec::new(),
                accept: None,
            }
        }

        fn accepting(count: usize) -> Self {
            Self {
                tokens: Vec::new(),
                accept: Some(count),
            }
        }

        fn text(&self) -> String {
            self.tokens.concat()
        }
    }

    #[async_trait]
    impl TokenSink for RecordingSink {
        async fn emit(&mut self, token: &str) -> Result<()> {
            if let Some(limit) = self.accept {
                if self.tokens.len() >= limit {
                    return Err(SvarError::ConsumerDisconnected);
                }
            }
            self.tokens.push(token.to_string());
            Ok(())
        }
    }

    async fn engine_over(
        kb_json: &str,
        completion: Arc<ScriptedCompletion>,
    ) -> (tempfile::TempDir, AnswerEngine) {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("knowledge_base.json")).unwrap();
        file.write_all(kb_json.as_bytes()).unwrap();

        let embedder = Arc::new(MockEmbedder::new());
        let cache = EmbeddingCache::open(
            KnowledgeBaseStore::new(dir.path().join("knowledge_base.json")),
            embedder.clone(),
            dir.path().join("doc_embeddings.bin"),
            dir.path().join("doc_about_embeddings.bin"),
        )
        .await
        .unwrap();

        let retriever = Retriever::new(Arc::new(cache), embedder, RetrievalSettings::default());
        let engine = AnswerEngine::new(
            retriever,
            completion,
            Prompts::default(),
            GenerationSettings::default(),
        );
        (dir, engine)
    }

    #[tokio::test]
    async fn test_answer_streams_tokens_and_citations() {
        let completion = Arc::new(ScriptedCompletion::new(vec![
            Ok("Defang ".to_string()),
            Ok("is free.".to_string()),
        ]));
        let (_dir, engine) = engine_over(KB_JSON, completion.clone()).await;

        let mut context = ConversationContext::new(20);
        let mut sink = RecordingSink::new();
        let emitted = engine
            .answer("Is Defang free?", &mut context, &mut sink)
            .await
            .unwrap();

        assert_eq!(
            emitted,
            "Defang is free.\n\n * [Pricing](https://docs.defang.io/pricing)"
        );
        assert_eq!(sink.text(), emitted);
        // Tokens were delivered one by one, in arrival order
        assert_eq!(sink.tokens[0], "Defang ");
        assert_eq!(sink.tokens[1], "is free.");

        // History finalized: user turn plus assistant turn without the citations
        assert_eq!(context.len(), 2);
        assert_eq!(context.turns()[0], Turn::user("Is Defang free?"));
        assert_eq!(context.turns()[1], Turn::assistant("Defang is free."));
    }

    #[tokio::test]
    async fn test_system_prompt_carries_date_and_context() {
        let completion = Arc::new(ScriptedCompletion::new(vec![Ok("ok".to_string())]));
        let (_dir, engine) = engine_over(KB_JSON, completion.clone()).await;

        let mut context = ConversationContext::new(20);
        context.append_user("earlier question");
        context.append_assistant("earlier answer");

        let mut sink = RecordingSink::new();
        engine
            .answer("Is Defang free?", &mut context, &mut sink)
            .await
            .unwrap();

        let request = completion.seen.lock().unwrap().clone().unwrap();
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0]
            .content
            .contains("Pricing. Defang is free for small teams."));
        assert!(request.messages[0]
            .content
            .contains(&chrono::Local::now().format("%B %d, %Y").to_string()));

        // Prior turns and the new user turn follow the system message
        assert_eq!(request.messages[1], Turn::user("earlier question"));
        assert_eq!(request.messages[2], Turn::assistant("earlier answer"));
        assert_eq!(request.messages[3], Turn::user("Is Defang free?"));

        assert_eq!(request.temperature, 0.5);
        assert_eq!(request.max_tokens, 2048);
    }

    #[tokio::test]
    async fn test_history_window_bounds_prompt() {
        let completion = Arc::new(ScriptedCompletion::new(vec![Ok("ok".to_string())]));
        let (_dir, engine) = engine_over(KB_JSON, completion.clone()).await;

        let mut context = ConversationContext::new(2);
        for i in 0..6 {
            context.append_user(format!("old question {}", i));
        }

        let mut sink = RecordingSink::new();
        engine
            .answer("Is Defang free?", &mut context, &mut sink)
            .await
            .unwrap();

        let request = completion.seen.lock().unwrap().clone().unwrap();
        // System message plus the two-turn window, which ends with the new query
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1], Turn::user("old question 5"));
        assert_eq!(request.messages[2], Turn::user("Is Defang free?"));
    }

    #[tokio::test]
    async fn test_upfront_completion_failure_emits_fallback() {
        let completion = Arc::new(ScriptedCompletion::failing_upfront());
        let (_dir, engine) = engine_over(KB_JSON, completion).await;

        let mut context = ConversationContext::new(20);
        let mut sink = RecordingSink::new();
        let emitted = engine
            .answer("Is Defang free?", &mut context, &mut sink)
            .await
            .unwrap();

        assert_eq!(emitted, GENERATION_FAILED);
        assert_eq!(sink.tokens, vec![GENERATION_FAILED]);
        // The turn is still recorded, with the placeholder standing in
        assert_eq!(context.turns()[1], Turn::assistant(GENERATION_FAILED));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_partial_answer() {
        let completion = Arc::new(ScriptedCompletion::new(vec![
            Ok("Partial ".to_string()),
            Err("connection reset".to_string()),
            Ok("never delivered".to_string()),
        ]));
        let (_dir, engine) = engine_over(KB_JSON, completion).await;

        let mut context = ConversationContext::new(20);
        let mut sink = RecordingSink::new();
        let emitted = engine
            .answer("Is Defang free?", &mut context, &mut sink)
            .await
            .unwrap();

        assert_eq!(emitted, format!("Partial {}", GENERATION_FAILED));
        // No citations after a failed stream
        assert!(!emitted.contains("docs.defang.io"));
        // History keeps what was collected before the failure
        assert_eq!(context.turns()[1], Turn::assistant("Partial"));
    }

    #[tokio::test]
    async fn test_consumer_disconnect_ends_stream_silently() {
        let completion = Arc::new(ScriptedCompletion::new(vec![
            Ok("one ".to_string()),
            Ok("two ".to_string()),
            Ok("three".to_string()),
        ]));
        let (_dir, engine) = engine_over(KB_JSON, completion).await;

        let mut context = ConversationContext::new(20);
        let mut sink = RecordingSink::accepting(1);
        let result = engine.answer("Is Defang free?", &mut context, &mut sink).await;

        // No error surfaced, no fallback token, no citations
        let emitted = result.unwrap();
        assert_eq!(emitted, "one ");
        assert_eq!(sink.tokens, vec!["one "]);

        // History still finalized with the partial content
        assert_eq!(context.len(), 2);
        assert_eq!(context.turns()[1], Turn::assistant("one two"));
    }
}
