//! Rebuild command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::Result;

/// Run the rebuild command: re-read the knowledge base and re-embed it.
pub async fn run_rebuild(settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Rebuild, &settings) {
        Output::error(&format!("{}", e));
        return Err(e);
    }

    let cache = crate::open_cache(&settings).await?;

    let spinner = Output::spinner("Rebuilding embeddings for the knowledge base...");
    let result = cache.rebuild().await;
    spinner.finish_and_clear();

    match result {
        Ok(()) => {
            let snapshot = cache.snapshot();
            Output::success(&format!(
                "Embeddings rebuilt for {} documents.",
                snapshot.documents.len()
            ));
            Ok(())
        }
        Err(e) => {
            Output::error(&format!("Rebuild failed, previous cache kept: {}", e));
            Err(e)
        }
    }
}
