//! Svar - Product Q&A with Retrieval
//!
//! A retrieval-augmented answer engine for product documentation.
//!
//! The name "Svar" comes from the Norwegian/Scandinavian word for "answer."
//!
//! # Overview
//!
//! Svar allows you to:
//! - Answer natural-language questions from a static JSON knowledge base
//! - Keep a durable on-disk embedding cache consistent with the knowledge base
//! - Rank documents with a hybrid text/topic relevance score
//! - Stream answers token by token, with Markdown citations appended
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration and prompt templates
//! - `knowledge_base` - Knowledge base loading
//! - `embedding` - Embedding generation
//! - `cache` - Durable embedding cache with staleness detection
//! - `retriever` - Hybrid relevance scoring and document selection
//! - `completion` - Streaming completion service abstraction
//! - `rag` - Conversation context and streaming answer generation
//!
//! # Example
//!
//! ```rust,no_run
//! use svar::config::Settings;
//! use svar::rag::{ConversationContext, StdoutSink};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let engine = svar::build_engine(&settings).await?;
//!
//!     let mut context = ConversationContext::new(settings.generation.max_history_turns);
//!     let mut sink = StdoutSink::new();
//!     let answer = engine.answer("Is Defang free?", &mut context, &mut sink).await?;
//!     println!("\n\nFull answer: {} chars", answer.len());
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge_base;
pub mod openai;
pub mod rag;
pub mod retriever;

pub use error::{Result, SvarError};

use crate::cache::EmbeddingCache;
use crate::completion::OpenAiCompletion;
use crate::config::{Prompts, Settings};
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::knowledge_base::KnowledgeBaseStore;
use crate::rag::AnswerEngine;
use crate::retriever::Retriever;
use std::sync::Arc;

fn build_embedder(settings: &Settings) -> Arc<dyn Embedder> {
    Arc::new(OpenAIEmbedder::with_config(
        &settings.embedding.model,
        settings.embedding.dimensions as usize,
        settings.request_timeout(),
    ))
}

/// Build a ready-to-use answer engine from settings.
///
/// Loads the knowledge base, opens (or rebuilds) the embedding cache, and wires
/// the retriever to the OpenAI completion service.
pub async fn build_engine(settings: &Settings) -> Result<AnswerEngine> {
    let embedder = build_embedder(settings);
    let store = KnowledgeBaseStore::new(settings.knowledge_base_path());
    let cache = EmbeddingCache::open(
        store,
        embedder.clone(),
        settings.text_cache_path(),
        settings.about_cache_path(),
    )
    .await?;
    let retriever = Retriever::new(Arc::new(cache), embedder, settings.retrieval.clone());
    let completion = Arc::new(OpenAiCompletion::new(
        &settings.generation.model,
        settings.request_timeout(),
    ));
    let prompts = Prompts::load(
        settings.prompts.custom_dir.as_deref(),
        Some(&settings.prompts.variables),
    )?;

    Ok(AnswerEngine::new(
        retriever,
        completion,
        prompts,
        settings.generation.clone(),
    ))
}

/// Open the embedding cache described by the settings.
///
/// Fast path when both cache files exist and align with the knowledge base;
/// performs a full rebuild otherwise.
pub async fn open_cache(settings: &Settings) -> Result<Arc<EmbeddingCache>> {
    let store = KnowledgeBaseStore::new(settings.knowledge_base_path());
    let cache = EmbeddingCache::open(
        store,
        build_embedder(settings),
        settings.text_cache_path(),
        settings.about_cache_path(),
    )
    .await?;
    Ok(Arc::new(cache))
}
