//! Ask command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::Result;
use crate::rag::{ConversationContext, StdoutSink};

/// Run the ask command: stream one answer to stdout.
pub async fn run_ask(question: &str, model: Option<String>, mut settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Ask, &settings) {
        Output::error(&format!("{}", e));
        return Err(e);
    }

    if let Some(model) = model {
        settings.generation.model = model;
    }

    let engine = crate::build_engine(&settings).await?;

    let mut context = ConversationContext::new(settings.generation.max_history_turns);
    let mut sink = StdoutSink::new();
    engine.answer(question, &mut context, &mut sink).await?;
    println!();

    Ok(())
}
