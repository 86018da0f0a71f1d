//! Deployment target model

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identifies one deployment: where to connect and what to deploy.
///
/// Read-only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    /// Display name of the server
    pub server_name: String,

    /// Hostname or IP used for the SSH connection
    pub server_host: String,

    /// Project directory on the server, `~/` shorthand allowed
    pub project_path: String,

    /// Branch to deploy
    pub branch: String,

    /// SSH login
    pub ssh_user: String,

    /// Private key used for authentication
    pub ssh_key_path: PathBuf,
}

impl DeploymentTarget {
    /// `user@host` destination string
    pub fn destination(&self) -> String {
        format!("{}@{}", self.ssh_user, self.server_host)
    }
}
