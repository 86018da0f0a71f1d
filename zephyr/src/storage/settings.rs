//! Settings file management

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::ZephyrError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::target::DeploymentTarget;

/// Project settings, read from `.zephyr/settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Deployable apps
    #[serde(default)]
    pub apps: Vec<AppSettings>,

    /// Command prefix used to invoke the framework runtime on the server
    #[serde(default = "default_php_binary")]
    pub php_binary: String,

    /// Shell commands run locally before connecting (lint, tests)
    #[serde(default)]
    pub local_checks: Vec<String>,

    /// Source shell profiles and version managers before remote steps
    #[serde(default = "default_true")]
    pub bootstrap_env: bool,

    /// Extra variables exported for every remote step
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_php_binary() -> String {
    "php".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            apps: Vec::new(),
            php_binary: default_php_binary(),
            local_checks: Vec::new(),
            bootstrap_env: true,
            env: BTreeMap::new(),
        }
    }
}

/// One app on one server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Server display name
    pub server_name: String,

    /// Server hostname or IP
    pub server_host: String,

    /// Project directory on the server
    pub project_path: String,

    /// Branch to deploy
    #[serde(default = "default_branch")]
    pub branch: String,

    /// SSH login
    pub ssh_user: String,

    /// Private key path, `~/` allowed
    #[serde(default = "default_ssh_key")]
    pub ssh_key: String,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_ssh_key() -> String {
    "~/.ssh/id_ed25519".to_string()
}

impl AppSettings {
    /// Build the deployment target, expanding `~` in the key path against
    /// the local home directory
    pub fn to_target(&self) -> DeploymentTarget {
        let ssh_key_path = match (self.ssh_key.strip_prefix("~/"), local_home()) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(&self.ssh_key),
        };

        DeploymentTarget {
            server_name: self.server_name.clone(),
            server_host: self.server_host.clone(),
            project_path: self.project_path.clone(),
            branch: self.branch.clone(),
            ssh_user: self.ssh_user.clone(),
            ssh_key_path,
        }
    }
}

fn local_home() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

impl Settings {
    /// Load settings; a missing file yields the defaults
    pub async fn load(file: &File) -> Result<Self, ZephyrError> {
        match file.try_read_json::<Settings>().await {
            Ok(Some(settings)) => Ok(settings),
            Ok(None) => Ok(Settings::default()),
            Err(ZephyrError::JsonError(e)) => Err(ZephyrError::ConfigError(format!(
                "invalid settings file {}: {}",
                file.path().display(),
                e
            ))),
            Err(e) => Err(e),
        }
    }

    /// Pick an app by server name, or the only configured app
    pub fn select_app(&self, server_name: Option<&str>) -> Result<&AppSettings, ZephyrError> {
        match server_name {
            Some(name) => self
                .apps
                .iter()
                .find(|app| app.server_name == name)
                .ok_or_else(|| ZephyrError::ConfigError(format!("no app configured for server '{}'", name))),
            None => match self.apps.as_slice() {
                [only] => Ok(only),
                [] => Err(ZephyrError::ConfigError(
                    "no apps configured; add one to .zephyr/settings.json".to_string(),
                )),
                _ => Err(ZephyrError::ConfigError(
                    "several apps configured; choose one with --server".to_string(),
                )),
            },
        }
    }
}
