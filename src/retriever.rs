//! Hybrid relevance scoring and document selection.
//!
//! Each query is scored against every document twice: once against the
//! full-text embedding and once against the "about" embedding. Text similarity
//! is the primary signal, the topical "about" similarity a boost; a very strong
//! hit on either side takes the whole score.

use crate::cache::{EmbeddingCache, EmbeddingMatrix};
use crate::config::RetrievalSettings;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::knowledge_base::Document;
use std::sync::Arc;
use tracing::{debug, instrument};

/// The `about` label of the synthetic document returned when nothing matches.
pub const FALLBACK_ABOUT: &str = "No Relevant Information Found";

const FALLBACK_TEXT: &str = "I'm sorry, but I couldn't find any relevant information in the \
    knowledge base to answer your question. Please try rephrasing, or ask something else.";

/// A knowledge base document scored against one query.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    /// Row index into the knowledge base at the time of scoring.
    pub index: usize,
    /// Topical label.
    pub about: String,
    /// Document body.
    pub text: String,
    /// Docs site path, when the document carries one.
    pub path: Option<String>,
    /// Cosine similarity against the full-text embedding.
    pub text_similarity: f32,
    /// Cosine similarity against the "about" embedding.
    pub about_similarity: f32,
    /// Combined score used for ranking.
    pub relevance_score: f32,
}

impl ScoredDocument {
    /// Text contributed to the generation context for this document.
    pub fn context_text(&self) -> String {
        format!("{}. {}", self.about, self.text)
    }
}

/// Selects supporting documents for a query.
pub struct Retriever {
    cache: Arc<EmbeddingCache>,
    embedder: Arc<dyn Embedder>,
    settings: RetrievalSettings,
}

impl Retriever {
    /// Create a new retriever over the given cache.
    pub fn new(
        cache: Arc<EmbeddingCache>,
        embedder: Arc<dyn Embedder>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            cache,
            embedder,
            settings,
        }
    }

    /// Retrieve the documents supporting a query, best first.
    ///
    /// Never returns an empty sequence: when no document clears the similarity
    /// threshold, a single synthetic fallback document stands in.
    #[instrument(skip(self), fields(query = %query))]
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredDocument>> {
        self.cache.ensure_fresh().await?;
        let snapshot = self.cache.snapshot();

        let normalized = normalize_query(query);
        let query_embedding = self.embedder.embed(&normalized).await?;

        let scored = score_documents(
            &query_embedding,
            &snapshot.documents,
            &snapshot.text,
            &snapshot.about,
            self.settings.high_match_threshold,
        );
        let top = top_documents(
            scored,
            self.settings.similarity_threshold,
            self.settings.max_docs,
        );

        if top.is_empty() {
            debug!("No document cleared the similarity threshold, using fallback");
            return Ok(vec![fallback_document()]);
        }

        debug!("Retrieved {} documents", top.len());
        Ok(top)
    }

    /// Markdown citation bullets for the results that carry a docs path.
    pub fn citations(results: &[ScoredDocument], docs_base_url: &str) -> Vec<String> {
        results
            .iter()
            .filter_map(|doc| {
                doc.path
                    .as_ref()
                    .map(|path| format!(" * [{}]({}{})", doc.about, docs_base_url, path))
            })
            .collect()
    }
}

/// Normalize a query before embedding.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Score every document against the query embedding.
fn score_documents(
    query_embedding: &[f32],
    documents: &[Document],
    text_matrix: &EmbeddingMatrix,
    about_matrix: &EmbeddingMatrix,
    high_match_threshold: f32,
) -> Vec<ScoredDocument> {
    documents
        .iter()
        .enumerate()
        .map(|(index, doc)| {
            let text_similarity = cosine_similarity(query_embedding, text_matrix.row(index));
            let about_similarity = cosine_similarity(query_embedding, about_matrix.row(index));

            let relevance_score =
                if text_similarity >= high_match_threshold || about_similarity >= high_match_threshold {
                    text_similarity.max(about_similarity)
                } else {
                    0.3 * about_similarity + 0.7 * text_similarity
                };

            ScoredDocument {
                index,
                about: doc.about.clone(),
                text: doc.text.clone(),
                path: doc.path.clone(),
                text_similarity,
                about_similarity,
                relevance_score,
            }
        })
        .collect()
}

/// Keep at most `max_docs` documents at or above the threshold, best first.
fn top_documents(
    mut scored: Vec<ScoredDocument>,
    similarity_threshold: f32,
    max_docs: usize,
) -> Vec<ScoredDocument> {
    scored.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.retain(|doc| doc.relevance_score >= similarity_threshold);
    scored.truncate(max_docs);
    scored
}

fn fallback_document() -> ScoredDocument {
    ScoredDocument {
        index: 0,
        about: FALLBACK_ABOUT.to_string(),
        text: FALLBACK_TEXT.to_string(),
        path: None,
        text_similarity: 0.0,
        about_similarity: 0.0,
        relevance_score: 0.0,
    }
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
