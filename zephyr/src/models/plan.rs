//! Deployment plan models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::target::DeploymentTarget;

/// Repository-relative paths that differ between the remote HEAD and the
/// upstream tip of the target branch
pub type ChangeSet = Vec<String>;

/// One labeled remote command in a deployment plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStep {
    pub label: String,
    pub command: String,
}

impl TaskStep {
    pub fn new(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
        }
    }
}

/// Persisted description of an in-flight plan.
///
/// Present on disk only between "about to mutate the server" and "every step
/// succeeded"; finding one means a previous run died mid-plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSnapshot {
    pub server_name: String,
    pub branch: String,
    pub project_path: String,
    pub ssh_user: String,
    pub created_at: DateTime<Utc>,
    pub changed_files: ChangeSet,
    pub task_labels: Vec<String>,

    /// Full steps, so a resumed run does not depend on replanning
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskStep>,
}

impl PendingSnapshot {
    /// Capture the plan computed for a target
    pub fn new(target: &DeploymentTarget, changed_files: ChangeSet, tasks: Vec<TaskStep>) -> Self {
        Self {
            server_name: target.server_name.clone(),
            branch: target.branch.clone(),
            project_path: target.project_path.clone(),
            ssh_user: target.ssh_user.clone(),
            created_at: Utc::now(),
            changed_files,
            task_labels: tasks.iter().map(|t| t.label.clone()).collect(),
            tasks,
        }
    }

    /// Whether the snapshot was recorded for the same server and branch
    pub fn matches(&self, target: &DeploymentTarget) -> bool {
        self.server_name == target.server_name && self.branch == target.branch
    }
}
