//! Search command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::embedding::OpenAIEmbedder;
use crate::error::Result;
use crate::retriever::Retriever;
use std::sync::Arc;

/// Run the search command: show what a query would retrieve.
pub async fn run_search(
    query: &str,
    limit: Option<usize>,
    min_score: Option<f32>,
    mut settings: Settings,
) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Search, &settings) {
        Output::error(&format!("{}", e));
        return Err(e);
    }

    if let Some(limit) = limit {
        settings.retrieval.max_docs = limit;
    }
    if let Some(min_score) = min_score {
        settings.retrieval.similarity_threshold = min_score;
    }

    let cache = crate::open_cache(&settings).await?;
    let embedder = Arc::new(OpenAIEmbedder::with_config(
        &settings.embedding.model,
        settings.embedding.dimensions as usize,
        settings.request_timeout(),
    ));
    let retriever = Retriever::new(cache, embedder, settings.retrieval.clone());

    let results = retriever.retrieve(query).await?;

    Output::info(&format!("Results for: {}", query));
    for doc in &results {
        let url = doc
            .path
            .as_ref()
            .map(|p| format!("{}{}", settings.generation.docs_base_url, p));
        Output::search_result(
            &doc.about,
            doc.relevance_score,
            doc.text_similarity,
            doc.about_similarity,
            &doc.text,
            url.as_deref(),
        );
    }

    Ok(())
}
