//! Remote session capability.
//!
//! The engine only needs "run a shell command over there" and "fetch a file
//! from there". Transport and authentication live behind these traits; the
//! shipped implementation drives the system OpenSSH client.

pub mod openssh;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::ZephyrError;

/// Result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Connection parameters for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub user: String,
    pub private_key: PathBuf,
}

/// Opens sessions
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn RemoteSession>, ZephyrError>;
}

/// An authenticated channel to one host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a shell command, optionally from a working directory
    async fn exec(&self, command: &str, cwd: Option<&str>) -> Result<RemoteOutput, ZephyrError>;

    /// Download a remote file
    async fn get_file(&self, remote_path: &str, local_path: &Path) -> Result<(), ZephyrError>;

    /// Close the channel
    async fn dispose(&self) -> Result<(), ZephyrError>;
}
