//! Operator decision points.
//!
//! The engine never reads stdin itself. Every question goes through an
//! injected [`Prompter`], so runs can be driven interactively, with defaults
//! only, or from a script in tests.

pub mod interactive;

use async_trait::async_trait;

use crate::errors::ZephyrError;

/// What a confirmation is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmKind {
    /// Remove a lock left behind by an earlier run from this machine
    StaleLock,

    /// Resume a pending plan left behind by an interrupted run
    ResumeSnapshot,
}

/// A yes/no question with a default answer
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub kind: ConfirmKind,
    pub message: String,
    pub default: bool,
}

/// Outcome of a decision point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Abort,
    Resume,
}

/// Prompt capability
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Ask for a commit message for staged changes
    async fn commit_message(&self) -> Result<String, ZephyrError>;

    /// Ask a yes/no question
    async fn confirm(&self, confirmation: &Confirmation) -> Result<bool, ZephyrError>;
}

/// Answers every confirmation with its default.
///
/// Commits only happen when a message was supplied up front.
#[derive(Debug, Clone, Default)]
pub struct NonInteractivePrompter {
    commit_message: Option<String>,
}

impl NonInteractivePrompter {
    pub fn new(commit_message: Option<String>) -> Self {
        Self { commit_message }
    }
}

#[async_trait]
impl Prompter for NonInteractivePrompter {
    async fn commit_message(&self) -> Result<String, ZephyrError> {
        self.commit_message.clone().ok_or_else(|| {
            ZephyrError::Precondition(
                "Staged changes need a commit message; pass --commit-message when running non-interactively"
                    .to_string(),
            )
        })
    }

    async fn confirm(&self, confirmation: &Confirmation) -> Result<bool, ZephyrError> {
        tracing::info!(
            "Non-interactive: answering {:?} with default ({})",
            confirmation.kind,
            confirmation.default
        );
        Ok(confirmation.default)
    }
}
