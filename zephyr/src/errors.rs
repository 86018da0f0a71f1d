//! Error types for zephyr

use thiserror::Error;

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum ZephyrError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Prompt error: {0}")]
    PromptError(#[from] dialoguer::Error),

    /// Local repository is not in a deployable state
    #[error("{0}")]
    Precondition(String),

    /// Local subprocess could not be spawned or failed
    #[error("Command error: {0}")]
    CommandError(String),

    /// Another deployment holds the remote lock
    #[error(
        "Another deployment is in progress on the server (started by {user}@{hostname}, pid {pid}, at {started_at}). \
         Remove the remote lock file if you are sure it is stale."
    )]
    LockConflict {
        user: String,
        hostname: String,
        pid: u32,
        started_at: String,
    },

    /// Remote command exited non-zero
    #[error("{label} failed: `{command}` exited with code {exit_code}{}", hint_suffix(.stderr, .hint))]
    RemoteCommand {
        label: String,
        command: String,
        exit_code: i32,
        stderr: String,
        hint: Option<String>,
    },

    #[error("Connection error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Snapshot error: {0}")]
    SnapshotError(String),

    /// A failure anywhere in the pipeline, wrapped once at the top
    #[error("Deployment failed: {cause}")]
    DeploymentFailed { cause: Box<ZephyrError> },

    #[error("Internal error: {0}")]
    Internal(String),
}

fn hint_suffix(stderr: &str, hint: &Option<String>) -> String {
    let mut suffix = String::new();
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        suffix.push_str(": ");
        suffix.push_str(stderr);
    }
    if let Some(hint) = hint {
        suffix.push_str(" (");
        suffix.push_str(hint);
        suffix.push(')');
    }
    suffix
}

impl ZephyrError {
    /// Wrap an error as a deployment failure, unless it already is one
    pub fn into_deployment_failure(self) -> Self {
        match self {
            ZephyrError::DeploymentFailed { .. } => self,
            other => ZephyrError::DeploymentFailed {
                cause: Box::new(other),
            },
        }
    }
}

impl From<anyhow::Error> for ZephyrError {
    fn from(err: anyhow::Error) -> Self {
        ZephyrError::Internal(err.to_string())
    }
}
