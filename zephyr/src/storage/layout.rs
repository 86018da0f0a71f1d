//! Metadata layout, local and remote

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::utils::join_remote;

/// Name of the metadata directory, both in the local repository and in the
/// remote project directory
pub const METADATA_DIR: &str = ".zephyr";

pub const LOCK_FILE: &str = "deploy.lock";
pub const SNAPSHOT_FILE: &str = "pending-tasks.json";
pub const SETTINGS_FILE: &str = "settings.json";
pub const LOGS_DIR: &str = "logs";

/// Where zephyr keeps its state for one project
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    /// Root of the local repository
    pub root_dir: PathBuf,
}

impl ProjectLayout {
    /// Create a new layout rooted at the local repository
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Local metadata directory
    pub fn metadata_dir(&self) -> Dir {
        Dir::new(self.root_dir.join(METADATA_DIR))
    }

    pub fn settings_file(&self) -> File {
        self.metadata_dir().file(SETTINGS_FILE)
    }

    pub fn lock_file(&self) -> File {
        self.metadata_dir().file(LOCK_FILE)
    }

    pub fn snapshot_file(&self) -> File {
        self.metadata_dir().file(SNAPSHOT_FILE)
    }

    pub fn logs_dir(&self) -> Dir {
        self.metadata_dir().subdir(LOGS_DIR)
    }

    /// Run log file for a run started at `started_at`
    pub fn run_log_file(&self, started_at: DateTime<Utc>) -> File {
        self.logs_dir()
            .file(&format!("deploy-{}.log", started_at.format("%Y%m%d-%H%M%S")))
    }

    /// Remote metadata directory under a resolved project path
    pub fn remote_metadata_dir(project_path: &str) -> String {
        join_remote(project_path, METADATA_DIR)
    }

    pub fn remote_lock_file(project_path: &str) -> String {
        join_remote(&Self::remote_metadata_dir(project_path), LOCK_FILE)
    }

    pub fn remote_snapshot_file(project_path: &str) -> String {
        join_remote(&Self::remote_metadata_dir(project_path), SNAPSHOT_FILE)
    }
}

impl Default for ProjectLayout {
    fn default() -> Self {
        Self::new(".")
    }
}
