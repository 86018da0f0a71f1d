//! Application configuration options

use std::path::PathBuf;

use crate::deploy::orchestrator::{OrchestratorOptions, ResumePolicy};
use crate::storage::layout::ProjectLayout;
use crate::storage::settings::Settings;

/// Options for one invocation of the deployer
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Repository root holding the `.zephyr` metadata directory
    pub root_dir: PathBuf,

    /// App to deploy, by server name; optional when only one is configured
    pub server: Option<String>,

    /// Answer every prompt with its default
    pub non_interactive: bool,

    /// Message used when staged changes must be committed
    pub commit_message: Option<String>,

    /// Stop after the local repository checks
    pub precheck_only: bool,

    /// What to do with a pending snapshot
    pub resume_policy: ResumePolicy,

    /// SSH connection options
    pub ssh: SshOptions,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            server: None,
            non_interactive: false,
            commit_message: None,
            precheck_only: false,
            resume_policy: ResumePolicy::Ask,
            ssh: SshOptions::default(),
        }
    }
}

impl DeployOptions {
    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout::new(&self.root_dir)
    }

    /// Orchestrator configuration from these options and the settings file
    pub fn orchestrator_options(&self, settings: &Settings) -> OrchestratorOptions {
        OrchestratorOptions {
            php_binary: settings.php_binary.clone(),
            local_checks: settings.local_checks.clone(),
            bootstrap_env: settings.bootstrap_env,
            env: settings.env.clone(),
            resume_policy: self.resume_policy,
        }
    }
}

/// SSH connection options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Seconds before a connection attempt is abandoned
    pub connect_timeout_secs: u32,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
        }
    }
}
