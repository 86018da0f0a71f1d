//! Pending-plan snapshots

use tracing::{debug, warn};

use crate::errors::ZephyrError;
use crate::filesys::file::File;
use crate::models::plan::PendingSnapshot;
use crate::models::target::DeploymentTarget;
use crate::prompt::{ConfirmKind, Confirmation, Decision, Prompter};
use crate::ssh::RemoteSession;
use crate::storage::layout::ProjectLayout;
use crate::utils::shell_quote;

/// Persists the plan of the current run, locally and on the server
pub struct SnapshotManager<'a> {
    session: &'a dyn RemoteSession,
    local_file: File,
    remote_dir: String,
    remote_file: String,
}

impl<'a> SnapshotManager<'a> {
    /// `project_path` must already be resolved (no `~`)
    pub fn new(session: &'a dyn RemoteSession, layout: &ProjectLayout, project_path: &str) -> Self {
        Self {
            session,
            local_file: layout.snapshot_file(),
            remote_dir: ProjectLayout::remote_metadata_dir(project_path),
            remote_file: ProjectLayout::remote_snapshot_file(project_path),
        }
    }

    /// Write the snapshot locally, then mirror it to the server
    pub async fn save(&self, snapshot: &PendingSnapshot) -> Result<(), ZephyrError> {
        self.local_file.write_json(snapshot).await?;

        let json = serde_json::to_string(snapshot)?;
        let command = format!(
            "mkdir -p {} && printf '%s' {} > {}",
            shell_quote(&self.remote_dir),
            shell_quote(&json),
            shell_quote(&self.remote_file)
        );
        let output = self.session.exec(&command, None).await?;
        if !output.success() {
            return Err(ZephyrError::SnapshotError(format!(
                "could not write {} on the server: {}",
                self.remote_file,
                output.stderr.trim()
            )));
        }
        debug!("Saved pending snapshot with {} task(s)", snapshot.task_labels.len());
        Ok(())
    }

    /// Load the snapshot, falling back to the server copy when the local one
    /// is missing
    pub async fn load(&self) -> Result<Option<PendingSnapshot>, ZephyrError> {
        if let Some(snapshot) = self.read_local().await {
            return Ok(Some(snapshot));
        }

        let probe = format!("test -f {}", shell_quote(&self.remote_file));
        if !self.session.exec(&probe, None).await?.success() {
            return Ok(None);
        }

        debug!("Local snapshot missing, downloading {}", self.remote_file);
        self.session
            .get_file(&self.remote_file, self.local_file.path())
            .await?;
        Ok(self.read_local().await)
    }

    /// Remove both copies
    pub async fn clear(&self) -> Result<(), ZephyrError> {
        self.local_file.delete().await?;

        let command = format!("rm -f {}", shell_quote(&self.remote_file));
        let output = self.session.exec(&command, None).await?;
        if !output.success() {
            return Err(ZephyrError::SnapshotError(format!(
                "could not remove {} on the server: {}",
                self.remote_file,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn read_local(&self) -> Option<PendingSnapshot> {
        match self.local_file.try_read_json::<PendingSnapshot>().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    "Ignoring unreadable snapshot {}: {}",
                    self.local_file.path().display(),
                    e
                );
                None
            }
        }
    }
}

/// Ask whether to resume a pending snapshot. The default is to resume only
/// when it was recorded for the same server and branch.
pub async fn resume_decision(
    prompter: &dyn Prompter,
    snapshot: &PendingSnapshot,
    target: &DeploymentTarget,
) -> Result<Decision, ZephyrError> {
    let matches = snapshot.matches(target);
    let mut message = format!(
        "An interrupted deployment to {} ({}) from {} left {} pending task(s): {}. Resume it?",
        snapshot.server_name,
        snapshot.branch,
        snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.task_labels.len(),
        snapshot.task_labels.join(", ")
    );
    if !matches {
        message.push_str(&format!(
            " (it does not match the current target {} / {})",
            target.server_name, target.branch
        ));
    }

    let confirmation = Confirmation {
        kind: ConfirmKind::ResumeSnapshot,
        message,
        default: matches,
    };
    if prompter.confirm(&confirmation).await? {
        Ok(Decision::Resume)
    } else {
        Ok(Decision::Proceed)
    }
}
