//! Configuration settings for Svar.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub knowledge_base: KnowledgeBaseSettings,
    pub embedding: EmbeddingSettings,
    pub cache: CacheSettings,
    pub retrieval: RetrievalSettings,
    pub generation: GenerationSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Timeout in seconds for embedding and completion API requests.
    pub request_timeout_seconds: u64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.svar".to_string(),
            log_level: "info".to_string(),
            request_timeout_seconds: 120,
        }
    }
}

/// Knowledge base source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseSettings {
    /// Path to the knowledge base JSON file.
    pub path: String,
}

impl Default for KnowledgeBaseSettings {
    fn default() -> Self {
        Self {
            path: "~/.svar/knowledge_base.json".to_string(),
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding provider (openai).
    pub provider: String,
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions.
    pub dimensions: u32,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

/// Durable embedding cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Path to the full-text embedding matrix file.
    pub text_path: String,
    /// Path to the "about" embedding matrix file.
    pub about_path: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            text_path: "~/.svar/doc_embeddings.bin".to_string(),
            about_path: "~/.svar/doc_about_embeddings.bin".to_string(),
        }
    }
}

/// Retrieval and scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Minimum combined score for a document to qualify.
    pub similarity_threshold: f32,
    /// Either similarity signal at or above this takes the max instead of the blend.
    pub high_match_threshold: f32,
    /// Maximum number of documents returned per query.
    pub max_docs: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.4,
            high_match_threshold: 0.8,
            max_docs: 5,
        }
    }
}

/// Answer generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// LLM model for response generation.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Base URL for citation links (document paths are appended verbatim).
    pub docs_base_url: String,
    /// Number of recent conversation turns threaded into each prompt.
    pub max_history_turns: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4-turbo".to_string(),
            temperature: 0.5,
            max_tokens: 2048,
            docs_base_url: "https://docs.defang.io".to_string(),
            max_history_turns: 20,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SvarError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("svar")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded knowledge base path.
    pub fn knowledge_base_path(&self) -> PathBuf {
        Self::expand_path(&self.knowledge_base.path)
    }

    /// Get the expanded text embedding cache path.
    pub fn text_cache_path(&self) -> PathBuf {
        Self::expand_path(&self.cache.text_path)
    }

    /// Get the expanded about embedding cache path.
    pub fn about_cache_path(&self) -> PathBuf {
        Self::expand_path(&self.cache.about_path)
    }

    /// Get the API request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.general.request_timeout_seconds)
    }
}
