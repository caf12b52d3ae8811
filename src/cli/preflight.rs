//! Pre-flight checks before expensive operations.
//!
//! Validates that required configuration is available before starting
//! operations that would otherwise fail midway.

use crate::config::Settings;
use crate::error::{Result, SvarError};
use std::path::Path;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Asking questions requires the API key and a knowledge base.
    Ask,
    /// Search embeds the query, so it requires the API key too.
    Search,
    /// Rebuilding requires the API key and a readable knowledge base.
    Rebuild,
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    check_api_key()?;
    match operation {
        Operation::Ask | Operation::Search | Operation::Rebuild => {
            check_knowledge_base(&settings.knowledge_base_path())?;
        }
    }
    Ok(())
}

/// Check if OpenAI API key is configured.
fn check_api_key() -> Result<()> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(()),
        Ok(_) => Err(SvarError::Config(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        Err(_) => Err(SvarError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

/// Check that the knowledge base file exists.
fn check_knowledge_base(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(SvarError::Config(format!(
            "Knowledge base not found at {}. Set knowledge_base.path in the config file.",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_knowledge_base() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge_base.json");

        assert!(check_knowledge_base(&path).is_err());

        std::fs::write(&path, "[]").unwrap();
        assert!(check_knowledge_base(&path).is_ok());
    }
}
