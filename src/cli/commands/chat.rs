//! Interactive chat command.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::Result;
use crate::rag::{ConversationContext, StdoutSink};
use console::style;
use std::io::{self, BufRead, Write};

/// Run the interactive chat command.
pub async fn run_chat(model: Option<String>, mut settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Ask, &settings) {
        Output::error(&format!("{}", e));
        return Err(e);
    }

    if let Some(model) = model {
        settings.generation.model = model;
    }

    let engine = crate::build_engine(&settings).await?;

    // One conversation context per interactive session
    let mut context = ConversationContext::new(settings.generation.max_history_turns);

    println!("\n{}", style("Svar Chat").bold().cyan());
    println!(
        "{}\n",
        style("Type your questions, or 'exit' to quit. Use 'clear' to reset conversation.").dim()
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", style("You:").green().bold());
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            Output::info("Goodbye!");
            break;
        }

        if input.eq_ignore_ascii_case("clear") {
            context.clear();
            Output::info("Conversation history cleared.");
            continue;
        }

        print!("\n{} ", style("Svar:").cyan().bold());
        stdout.flush()?;

        let mut sink = StdoutSink::new();
        match engine.answer(input, &mut context, &mut sink).await {
            Ok(_) => println!("\n"),
            Err(e) => Output::error(&format!("Error: {}", e)),
        }
    }

    Ok(())
}
