//! Terminal prompts backed by dialoguer

use async_trait::async_trait;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};

use crate::errors::ZephyrError;
use crate::prompt::{Confirmation, Prompter};

/// Interactive prompter for a TTY.
///
/// dialoguer blocks on stdin, so each prompt runs on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractivePrompter;

#[async_trait]
impl Prompter for InteractivePrompter {
    async fn commit_message(&self) -> Result<String, ZephyrError> {
        let message = tokio::task::spawn_blocking(|| {
            Input::<String>::with_theme(&ColorfulTheme::default())
                .with_prompt("Commit message for pending changes")
                .validate_with(|input: &String| -> Result<(), &str> {
                    if input.trim().is_empty() {
                        Err("Commit message cannot be empty")
                    } else {
                        Ok(())
                    }
                })
                .interact_text()
        })
        .await
        .map_err(|e| ZephyrError::Internal(format!("prompt task failed: {e}")))??;

        Ok(message.trim().to_string())
    }

    async fn confirm(&self, confirmation: &Confirmation) -> Result<bool, ZephyrError> {
        let message = confirmation.message.clone();
        let default = confirmation.default;

        let answer = tokio::task::spawn_blocking(move || {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(message)
                .default(default)
                .interact()
        })
        .await
        .map_err(|e| ZephyrError::Internal(format!("prompt task failed: {e}")))??;

        Ok(answer)
    }
}
