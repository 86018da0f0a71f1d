//! Remote command executor.
//!
//! Non-interactive SSH shells rarely load the PATH an operator sees after
//! logging in, so commands can be prefixed with a best-effort environment
//! bootstrap. Every invocation is written to the run log; failures are
//! classified so "command not found" points at PATH instead of the command.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::console;
use crate::deploy::runlog::RunLog;
use crate::errors::ZephyrError;
use crate::ssh::{RemoteOutput, RemoteSession};
use crate::utils::shell_quote;

/// Sourced before bootstrapped commands: login profiles, Node version
/// managers, then common install locations appended to PATH
const BOOTSTRAP_PROFILE: &str = concat!(
    "for f in \"$HOME/.profile\" \"$HOME/.bash_profile\" \"$HOME/.bashrc\" \"$HOME/.zprofile\"; do ",
    "[ -f \"$f\" ] && . \"$f\" >/dev/null 2>&1; done; ",
    "export NVM_DIR=\"${NVM_DIR:-$HOME/.nvm}\"; ",
    "[ -s \"$NVM_DIR/nvm.sh\" ] && . \"$NVM_DIR/nvm.sh\" >/dev/null 2>&1; ",
    "command -v fnm >/dev/null 2>&1 && eval \"$(fnm env 2>/dev/null)\"; ",
    "[ -d \"$HOME/.volta/bin\" ] && export VOLTA_HOME=\"$HOME/.volta\" && export PATH=\"$VOLTA_HOME/bin:$PATH\"; ",
    "export PATH=\"$PATH:/usr/local/bin:/opt/homebrew/bin:$HOME/.composer/vendor/bin:",
    "$HOME/.config/composer/vendor/bin:$HOME/.local/bin\"; ",
);

static NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)command not found|:\s*not found\b|executable file not found")
        .expect("static regex")
});

static ENV_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

const PATH_HINT: &str = "the executable was not found on the server; the non-interactive SSH shell may not load \
     the same PATH as a login shell, check the shell profile or use absolute paths";

/// Per-command execution options
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Working directory on the server
    pub cwd: Option<String>,

    /// Log and ignore a non-zero exit
    pub allow_failure: bool,

    /// Source profiles and version managers first
    pub bootstrap_env: bool,

    /// Variables exported before the command
    pub env: BTreeMap<String, String>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            allow_failure: false,
            bootstrap_env: true,
            env: BTreeMap::new(),
        }
    }
}

impl ExecOptions {
    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }
}

/// Whether a failed command looks like a missing executable
pub fn is_missing_executable(output: &RemoteOutput) -> bool {
    output.exit_code == 127 || NOT_FOUND.is_match(&output.stderr)
}

/// Runs labeled commands on the server
pub struct RemoteExecutor<'a> {
    session: &'a dyn RemoteSession,
    defaults: ExecOptions,
}

impl<'a> RemoteExecutor<'a> {
    /// `defaults` are the options used by [`RemoteExecutor::options`]
    pub fn new(session: &'a dyn RemoteSession, defaults: ExecOptions) -> Self {
        Self { session, defaults }
    }

    /// A copy of the default options, to adjust per call
    pub fn options(&self) -> ExecOptions {
        self.defaults.clone()
    }

    /// Build the shell text actually sent to the server
    pub fn build_command(&self, command: &str, options: &ExecOptions) -> Result<String, ZephyrError> {
        let mut script = String::new();

        if options.bootstrap_env {
            script.push_str(BOOTSTRAP_PROFILE);
        }

        for (name, value) in &options.env {
            if !ENV_NAME.is_match(name) {
                return Err(ZephyrError::ConfigError(format!(
                    "invalid environment variable name '{}'",
                    name
                )));
            }
            script.push_str(&format!("export {}={}; ", name, shell_quote(value)));
        }

        if options.bootstrap_env {
            if let Some(cwd) = &options.cwd {
                script.push_str(&format!("cd {} || exit 1; ", shell_quote(cwd)));
            }
        }

        script.push_str(command);
        Ok(script)
    }

    /// Run one command, log it, and classify a failure
    pub async fn execute(
        &self,
        log: &mut RunLog,
        label: &str,
        command: &str,
        options: &ExecOptions,
    ) -> Result<RemoteOutput, ZephyrError> {
        let script = self.build_command(command, options)?;
        let cwd = if options.bootstrap_env {
            None
        } else {
            options.cwd.as_deref()
        };

        debug!("[{}] {}", label, command);
        let output = self.session.exec(&script, cwd).await?;
        log.append_command(label, command, &output).await?;

        if output.success() {
            return Ok(output);
        }

        console::detail("stdout", &output.stdout);
        console::detail("stderr", &output.stderr);

        if options.allow_failure {
            debug!("{} exited with {} (allowed)", label, output.exit_code);
            return Ok(output);
        }

        let hint = is_missing_executable(&output).then(|| PATH_HINT.to_string());
        Err(ZephyrError::RemoteCommand {
            label: label.to_string(),
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr,
            hint,
        })
    }
}
