//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use crate::error::{Result, SvarError};

/// Run the config command.
pub fn run_config(action: &ConfigAction, settings: Settings) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let content = toml::to_string_pretty(&settings)
                .map_err(|e| SvarError::Config(e.to_string()))?;
            println!("{}", content);
        }
        ConfigAction::Path => {
            Output::info(&format!(
                "{}",
                Settings::default_config_path().display()
            ));
        }
    }
    Ok(())
}
