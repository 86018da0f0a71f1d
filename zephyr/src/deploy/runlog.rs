//! Per-run deployment log.
//!
//! One log file per orchestrator run, owned by that run and handed to each
//! component that needs to write to it. Every remote command lands here with
//! its full output, whether it succeeded or not.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::AsyncWriteExt;

use crate::errors::ZephyrError;
use crate::filesys::file::File;
use crate::ssh::RemoteOutput;

/// Append-only log context for one run
pub struct RunLog {
    path: PathBuf,
    handle: Option<tokio::fs::File>,
}

impl RunLog {
    /// Open (create or append to) the log file
    pub async fn open(file: File) -> Result<Self, ZephyrError> {
        let handle = file.open_append().await?;
        let mut log = Self {
            path: file.path().to_path_buf(),
            handle: Some(handle),
        };
        log.write(&format!("# zephyr deployment log, started {}\n", Utc::now().to_rfc3339()))
            .await?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one remote command and everything it printed
    pub async fn append_command(
        &mut self,
        label: &str,
        command: &str,
        output: &RemoteOutput,
    ) -> Result<(), ZephyrError> {
        let mut entry = format!(
            "\n== {} ({}) ==\n$ {}\nexit: {}\n",
            label,
            Utc::now().format("%H:%M:%S"),
            command,
            output.exit_code
        );
        if !output.stdout.is_empty() {
            entry.push_str("--- stdout ---\n");
            entry.push_str(&output.stdout);
            if !output.stdout.ends_with('\n') {
                entry.push('\n');
            }
        }
        if !output.stderr.is_empty() {
            entry.push_str("--- stderr ---\n");
            entry.push_str(&output.stderr);
            if !output.stderr.ends_with('\n') {
                entry.push('\n');
            }
        }
        self.write(&entry).await
    }

    /// Free-form line
    pub async fn note(&mut self, message: &str) -> Result<(), ZephyrError> {
        self.write(&format!("# {}\n", message)).await
    }

    /// Flush and close; further writes are errors
    pub async fn close(&mut self) -> Result<(), ZephyrError> {
        if let Some(mut handle) = self.handle.take() {
            handle.flush().await?;
            handle.sync_all().await?;
        }
        Ok(())
    }

    async fn write(&mut self, text: &str) -> Result<(), ZephyrError> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| ZephyrError::Internal(format!("run log {} is closed", self.path.display())))?;
        handle.write_all(text.as_bytes()).await?;
        Ok(())
    }
}
