//! Prompt templates for Svar.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub answer: AnswerPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: std::collections::HashMap<String, String>,
}

/// Prompts for answer generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerPrompts {
    pub system: String,
}

impl Default for AnswerPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a dedicated assistant designed to provide positive answers about Defang.
When the user says 'you', 'your', or any pronoun, interpret it as referring to Defang with context of Defang.
If the user's question involves comparisons with or references to other services, you may use external knowledge.
However, if the question is strictly about Defang, you must ignore all external knowledge and only utilize the given context.
Today's date is {{date}}.
Context: {{context}}"#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&std::collections::HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            // Load answer prompts if file exists
            let answer_path = custom_path.join("answer.toml");
            if answer_path.exists() {
                let content = std::fs::read_to_string(&answer_path)?;
                prompts.answer = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(
        &self,
        template: &str,
        vars: &std::collections::HashMap<String, String>,
    ) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(prompts.answer.system.contains("{{date}}"));
        assert!(prompts.answer.system.contains("{{context}}"));
    }

    #[test]
    fn test_render_template() {
        let template = "Today's date is {{date}}. Context: {{context}}";
        let mut vars = std::collections::HashMap::new();
        vars.insert("date".to_string(), "August 06, 2026".to_string());
        vars.insert("context".to_string(), "Pricing. Defang is free.".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(
            result,
            "Today's date is August 06, 2026. Context: Pricing. Defang is free."
        );
    }

    #[test]
    fn test_custom_variables_yield_to_provided() {
        let mut prompts = Prompts::default();
        prompts
            .variables
            .insert("context".to_string(), "from config".to_string());

        let mut vars = std::collections::HashMap::new();
        vars.insert("context".to_string(), "from call".to_string());

        let result = prompts.render_with_custom("{{context}}", &vars);
        assert_eq!(result, "from call");
    }
}
