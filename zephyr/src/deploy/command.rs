//! Local subprocess runner

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::ZephyrError;

/// A local command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Capture stdout/stderr instead of inheriting the terminal
    pub capture: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            capture: false,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// `sh -c <script>` in the given directory
    pub fn shell(script: &str, cwd: impl AsRef<Path>) -> Self {
        Self::new("sh", cwd).args(["-c", script])
    }

    /// Human readable rendering for messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of a local command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Local subprocess capability
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ZephyrError>;
}

/// Runs commands with tokio::process
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ZephyrError> {
        debug!("Running `{}` in {}", spec.display(), spec.cwd.display());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null());

        if spec.capture {
            let output = cmd
                .output()
                .await
                .map_err(|e| ZephyrError::CommandError(format!("failed to run {}: {}", spec.program, e)))?;
            Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        } else {
            let status = cmd
                .status()
                .await
                .map_err(|e| ZephyrError::CommandError(format!("failed to run {}: {}", spec.program, e)))?;
            Ok(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                ..Default::default()
            })
        }
    }
}

/// Run a command and fail on a non-zero exit
pub async fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<CommandOutput, ZephyrError> {
    let output = runner.run(spec).await?;
    if !output.success() {
        let stderr = output.stderr.trim();
        return Err(ZephyrError::CommandError(if stderr.is_empty() {
            format!("`{}` exited with code {}", spec.display(), output.exit_code)
        } else {
            format!(
                "`{}` exited with code {}: {}",
                spec.display(),
                output.exit_code,
                stderr
            )
        }));
    }
    Ok(output)
}
