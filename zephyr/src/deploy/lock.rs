//! Dual-sided deployment lock.
//!
//! A marker file in the remote `.zephyr` directory keeps two deployments from
//! mutating the same project at once. The same payload is mirrored locally so
//! a later run from this machine can recognise a marker its crashed
//! predecessor left behind.
//!
//! The remote marker is created with shell `noclobber` (an `O_EXCL` open), so
//! two simultaneous acquirers cannot both succeed. The lock is still
//! advisory: anything that ignores the marker is not stopped by it.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::console;
use crate::errors::ZephyrError;
use crate::filesys::file::File;
use crate::prompt::{ConfirmKind, Confirmation, Decision, Prompter};
use crate::ssh::RemoteSession;
use crate::storage::layout::ProjectLayout;
use crate::utils::{current_user, generate_uuid, hostname, shell_quote};

/// Exit code used by the create script when the marker already exists
const EXISTS_EXIT_CODE: i32 = 3;

/// Identity of one lock holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockPayload {
    pub user: String,
    pub pid: u32,
    pub hostname: String,
    pub started_at: String,

    /// Random per-run identifier; absent in markers from older versions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl LockPayload {
    /// Payload describing the current process
    pub fn current() -> Self {
        Self {
            user: current_user(),
            pid: std::process::id(),
            hostname: hostname(),
            started_at: chrono::Utc::now().to_rfc3339(),
            run_id: Some(generate_uuid()),
        }
    }

    /// Whether two payloads were written by the same lock acquisition.
    ///
    /// The run id is only compared when both sides carry one.
    pub fn same_instance(&self, other: &LockPayload) -> bool {
        let run_ids_agree = match (&self.run_id, &other.run_id) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        self.user == other.user
            && self.pid == other.pid
            && self.hostname == other.hostname
            && self.started_at == other.started_at
            && run_ids_agree
    }

    fn describe(&self) -> String {
        format!(
            "{}@{} pid {} since {}",
            self.user, self.hostname, self.pid, self.started_at
        )
    }
}

/// Lock lifecycle for one deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Checking,
    Locked,
    Conflict,
    Released,
}

enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Acquires and releases the deployment lock for one project
pub struct LockCoordinator<'a> {
    session: &'a dyn RemoteSession,
    prompter: &'a dyn Prompter,
    local_file: File,
    remote_dir: String,
    remote_file: String,
    state: LockState,
    payload: Option<LockPayload>,
}

impl<'a> LockCoordinator<'a> {
    /// `project_path` must already be resolved (no `~`)
    pub fn new(
        session: &'a dyn RemoteSession,
        prompter: &'a dyn Prompter,
        layout: &ProjectLayout,
        project_path: &str,
    ) -> Self {
        Self {
            session,
            prompter,
            local_file: layout.lock_file(),
            remote_dir: ProjectLayout::remote_metadata_dir(project_path),
            remote_file: ProjectLayout::remote_lock_file(project_path),
            state: LockState::Unlocked,
            payload: None,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    /// Payload written by this coordinator, once locked
    pub fn payload(&self) -> Option<&LockPayload> {
        self.payload.as_ref()
    }

    /// Acquire the lock, resolving a stale self-authored marker with the
    /// operator's consent. Retries at most once.
    pub async fn acquire(&mut self) -> Result<(), ZephyrError> {
        self.state = LockState::Checking;
        let payload = LockPayload::current();

        for attempt in 0..2 {
            if let CreateOutcome::Created = self.create_remote(&payload).await? {
                if let Err(e) = self.local_file.write_json(&payload).await {
                    // Never leave a remote marker without its local mirror
                    if let Err(rm) = self.remove_remote().await {
                        warn!("Failed to roll back remote lock {}: {}", self.remote_file, rm);
                        console::warning(&format!(
                            "Could not remove remote lock {}: {}",
                            self.remote_file, rm
                        ));
                    }
                    self.state = LockState::Unlocked;
                    return Err(e);
                }
                info!("Acquired deployment lock {}", self.remote_file);
                self.payload = Some(payload);
                self.state = LockState::Locked;
                return Ok(());
            }

            let remote = self.read_remote().await?;
            let Some(remote) = remote else {
                debug!("Lock disappeared between create and read, retrying");
                continue;
            };

            let local = self.read_local().await;
            let stale = local.as_ref().is_some_and(|l| l.same_instance(&remote));

            if attempt == 0 && stale {
                if let Decision::Proceed = self.stale_lock_decision(&remote).await? {
                    self.remove_remote().await?;
                    self.local_file.delete().await?;
                    console::success("Removed stale deployment lock");
                    continue;
                }
            }

            self.state = LockState::Conflict;
            return Err(ZephyrError::LockConflict {
                user: remote.user,
                hostname: remote.hostname,
                pid: remote.pid,
                started_at: remote.started_at,
            });
        }

        self.state = LockState::Conflict;
        Err(ZephyrError::LockConflict {
            user: "unknown".to_string(),
            hostname: "unknown".to_string(),
            pid: 0,
            started_at: "unknown".to_string(),
        })
    }

    /// Release both markers. Only a lock this coordinator acquired is
    /// removed; failures are reported as warnings.
    pub async fn release(&mut self) {
        if self.state != LockState::Locked {
            return;
        }

        if let Err(e) = self.remove_remote().await {
            warn!("Failed to remove remote lock {}: {}", self.remote_file, e);
            console::warning(&format!("Could not remove remote lock {}: {}", self.remote_file, e));
        }
        if let Err(e) = self.local_file.delete().await {
            warn!("Failed to remove local lock {}: {}", self.local_file.path().display(), e);
            console::warning(&format!(
                "Could not remove local lock {}: {}",
                self.local_file.path().display(),
                e
            ));
        }
        self.state = LockState::Released;
    }

    async fn stale_lock_decision(&self, remote: &LockPayload) -> Result<Decision, ZephyrError> {
        let confirmation = Confirmation {
            kind: ConfirmKind::StaleLock,
            message: format!(
                "A deployment lock left by an earlier run on this machine ({}) is still on the server. Remove it and continue?",
                remote.describe()
            ),
            default: false,
        };
        if self.prompter.confirm(&confirmation).await? {
            Ok(Decision::Proceed)
        } else {
            Ok(Decision::Abort)
        }
    }

    async fn create_remote(&self, payload: &LockPayload) -> Result<CreateOutcome, ZephyrError> {
        let json = serde_json::to_string(payload)?;
        let file = shell_quote(&self.remote_file);
        let command = format!(
            "mkdir -p {dir} && ( set -C; printf '%s' {json} > {file} ) 2>/dev/null || {{ [ -e {file} ] && exit {code}; exit 1; }}",
            dir = shell_quote(&self.remote_dir),
            json = shell_quote(&json),
            file = file,
            code = EXISTS_EXIT_CODE,
        );

        let output = self.session.exec(&command, None).await?;
        match output.exit_code {
            0 => Ok(CreateOutcome::Created),
            EXISTS_EXIT_CODE => Ok(CreateOutcome::AlreadyExists),
            code => Err(ZephyrError::RemoteCommand {
                label: "Create deployment lock".to_string(),
                command: format!("create {}", self.remote_file),
                exit_code: code,
                stderr: output.stderr,
                hint: None,
            }),
        }
    }

    async fn read_remote(&self) -> Result<Option<LockPayload>, ZephyrError> {
        let command = format!("cat {} 2>/dev/null", shell_quote(&self.remote_file));
        let output = self.session.exec(&command, None).await?;
        if !output.success() {
            return Ok(None);
        }

        match serde_json::from_str::<LockPayload>(output.stdout.trim()) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                warn!("Remote lock {} is not valid JSON: {}", self.remote_file, e);
                Ok(Some(LockPayload {
                    user: "unknown".to_string(),
                    pid: 0,
                    hostname: "unknown".to_string(),
                    started_at: "unknown".to_string(),
                    run_id: None,
                }))
            }
        }
    }

    async fn read_local(&self) -> Option<LockPayload> {
        match self.local_file.try_read_json::<LockPayload>().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Ignoring unreadable local lock {}: {}", self.local_file.path().display(), e);
                None
            }
        }
    }

    async fn remove_remote(&self) -> Result<(), ZephyrError> {
        let command = format!("rm -f {}", shell_quote(&self.remote_file));
        let output = self.session.exec(&command, None).await?;
        if !output.success() {
            return Err(ZephyrError::RemoteCommand {
                label: "Remove deployment lock".to_string(),
                command,
                exit_code: output.exit_code,
                stderr: output.stderr,
                hint: None,
            });
        }
        Ok(())
    }
}
