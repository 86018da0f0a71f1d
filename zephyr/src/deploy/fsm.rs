//! Finite State Machine for one deployment run

use serde::{Deserialize, Serialize};

use crate::errors::ZephyrError;

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployState {
    /// Local repository reconciliation and local checks
    Precheck,

    /// Opening the remote session
    Connecting,

    /// Acquiring the deployment lock
    Locking,

    /// Loading a snapshot or computing a fresh plan
    Planning,

    /// Persisting the plan
    Snapshotting,

    /// Running the planned steps
    Executing,

    /// Releasing the lock and closing the run
    Cleanup,

    /// Finished successfully
    Done,

    /// Finished with an error
    Failed,
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeployEvent {
    PrecheckPassed,
    Connected,
    LockAcquired,

    /// Plan is ready; `persist` routes through snapshotting
    Planned { persist: bool },

    SnapshotSaved,
    StepsCompleted,
    CleanupFinished,

    /// Unrecovered error in the current state
    Fail(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeployState,
    error: Option<String>,
    history: Vec<DeployState>,
}

impl DeploymentFsm {
    /// Create a new FSM in precheck state
    pub fn new() -> Self {
        Self {
            state: DeployState::Precheck,
            error: None,
            history: vec![DeployState::Precheck],
        }
    }

    /// Get current state
    pub fn state(&self) -> DeployState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[DeployState] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, DeployState::Done | DeployState::Failed)
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeployEvent) -> Result<DeployState, ZephyrError> {
        let new_state = match (self.state, &event) {
            (DeployState::Precheck, DeployEvent::PrecheckPassed) => DeployState::Connecting,
            (DeployState::Connecting, DeployEvent::Connected) => DeployState::Locking,
            (DeployState::Locking, DeployEvent::LockAcquired) => DeployState::Planning,
            (DeployState::Planning, DeployEvent::Planned { persist: true }) => {
                DeployState::Snapshotting
            }
            (DeployState::Planning, DeployEvent::Planned { persist: false }) => {
                DeployState::Executing
            }
            (DeployState::Snapshotting, DeployEvent::SnapshotSaved) => DeployState::Executing,
            (DeployState::Executing, DeployEvent::StepsCompleted) => DeployState::Cleanup,

            (DeployState::Cleanup, DeployEvent::CleanupFinished) => {
                if self.error.is_some() {
                    DeployState::Failed
                } else {
                    DeployState::Done
                }
            }

            // Nothing is held yet during precheck
            (DeployState::Precheck, DeployEvent::Fail(err)) => {
                self.error = Some(err.clone());
                DeployState::Failed
            }

            // Everything after precheck fails through cleanup
            (
                DeployState::Connecting
                | DeployState::Locking
                | DeployState::Planning
                | DeployState::Snapshotting
                | DeployState::Executing,
                DeployEvent::Fail(err),
            ) => {
                self.error = Some(err.clone());
                DeployState::Cleanup
            }

            // Invalid transitions
            (state, event) => {
                return Err(ZephyrError::Internal(format!(
                    "Invalid transition: {:?} -> {:?}",
                    state, event
                )));
            }
        };

        self.state = new_state;
        self.history.push(new_state);
        Ok(new_state)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
