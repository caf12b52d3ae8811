//! Knowledge base loading.
//!
//! The knowledge base is a JSON array of documents produced by the docs
//! ingestion pipeline. It is loaded whole; a single invalid record invalidates
//! the entire load so the engine never serves a partially valid base.

use crate::error::{Result, SvarError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A document eligible for retrieval.
///
/// Documents form an ordered sequence; their order carries no meaning beyond
/// alignment with the embedding matrix rows built from the same load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Knowledge base entry ID.
    pub id: i64,
    /// Short topical label for the document.
    pub about: String,
    /// Document body.
    pub text: String,
    /// Docs site path used to build a citation URL, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Document {
    /// The text embedded for full-text similarity.
    pub fn embedding_text(&self) -> String {
        format!("{}. {}", self.about, self.text)
    }
}

/// Loads the ordered document sequence from a JSON source file.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseStore {
    path: PathBuf,
}

impl KnowledgeBaseStore {
    /// Create a store reading from the given JSON file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path to the source file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full document sequence.
    ///
    /// Fails with `MalformedKnowledgeBase` if the JSON does not parse or any
    /// entry is missing (or carries an empty) `about` or `text`.
    pub fn load(&self) -> Result<Vec<Document>> {
        let content = std::fs::read_to_string(&self.path)?;
        let documents: Vec<Document> = serde_json::from_str(&content)
            .map_err(|e| SvarError::MalformedKnowledgeBase(e.to_string()))?;

        for (i, doc) in documents.iter().enumerate() {
            if doc.about.trim().is_empty() {
                return Err(SvarError::MalformedKnowledgeBase(format!(
                    "entry {} (id {}) has an empty 'about'",
                    i, doc.id
                )));
            }
            if doc.text.trim().is_empty() {
                return Err(SvarError::MalformedKnowledgeBase(format!(
                    "entry {} (id {}) has an empty 'text'",
                    i, doc.id
                )));
            }
        }

        Ok(documents)
    }
}
