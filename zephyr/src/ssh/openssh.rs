//! Session capability on top of the system `ssh` and `scp` binaries.
//!
//! One multiplexed master connection is opened on connect and reused by every
//! command of the run, then closed on dispose.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::ZephyrError;
use crate::ssh::{ConnectParams, RemoteOutput, RemoteSession, SessionConnector};
use crate::utils::shell_quote;

/// Connector that spawns OpenSSH processes
#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    /// Seconds before a connection attempt is abandoned
    pub connect_timeout_secs: u32,
}

impl Default for OpenSshConnector {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
        }
    }
}

#[async_trait]
impl SessionConnector for OpenSshConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn RemoteSession>, ZephyrError> {
        let session = OpenSshSession {
            destination: format!("{}@{}", params.user, params.host),
            private_key: params.private_key.clone(),
            control_path: std::env::temp_dir().join("zephyr-ssh-%C"),
            connect_timeout_secs: self.connect_timeout_secs,
        };

        debug!("Opening SSH master connection to {}", session.destination);
        let output = session
            .ssh_command()
            .args([
                "-o",
                "ControlMaster=auto",
                "-o",
                "ControlPersist=120",
            ])
            .arg(&session.destination)
            .arg("true")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ZephyrError::Transport(format!("failed to run ssh: {}", e)))?;

        if !output.status.success() {
            return Err(ZephyrError::Transport(format!(
                "could not connect to {}: {}",
                session.destination,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(Box::new(session))
    }
}

/// A session multiplexed over an OpenSSH control socket
#[derive(Debug, Clone)]
pub struct OpenSshSession {
    destination: String,
    private_key: PathBuf,
    control_path: PathBuf,
    connect_timeout_secs: u32,
}

impl OpenSshSession {
    fn common_options(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.private_key.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ]
    }

    fn ssh_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_options());
        cmd
    }
}

/// Prefix `command` with a `cd` that aborts the whole script when it fails
fn in_directory(command: &str, cwd: Option<&str>) -> String {
    match cwd {
        Some(dir) => format!("cd {} || exit 1; {}", shell_quote(dir), command),
        None => command.to_string(),
    }
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    async fn exec(&self, command: &str, cwd: Option<&str>) -> Result<RemoteOutput, ZephyrError> {
        let remote_command = in_directory(command, cwd);

        let output = self
            .ssh_command()
            .arg(&self.destination)
            .arg(&remote_command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ZephyrError::Transport(format!("failed to run ssh: {}", e)))?;

        Ok(RemoteOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn get_file(&self, remote_path: &str, local_path: &Path) -> Result<(), ZephyrError> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let output = Command::new("scp")
            .arg("-q")
            .args(self.common_options())
            .arg(format!("{}:{}", self.destination, remote_path))
            .arg(local_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ZephyrError::Transport(format!("failed to run scp: {}", e)))?;

        if !output.status.success() {
            return Err(ZephyrError::Transport(format!(
                "failed to download {}: {}",
                remote_path,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn dispose(&self) -> Result<(), ZephyrError> {
        let status = self
            .ssh_command()
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if !status.success() {
            warn!("SSH master connection to {} was already closed", self.destination);
        }
        Ok(())
    }
}
