//! Deployment orchestrator.
//!
//! Drives one run through the deployment state machine: local precheck,
//! connect, lock, plan (or resume), snapshot, execute, and a cleanup that
//! runs on every path once the remote phase has started.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::console;
use crate::deploy::command::{CommandRunner, CommandSpec};
use crate::deploy::executor::{ExecOptions, RemoteExecutor};
use crate::deploy::fsm::{DeployEvent, DeployState, DeploymentFsm};
use crate::deploy::git::ensure_local_repository_state;
use crate::deploy::lock::LockCoordinator;
use crate::deploy::planner::{self, PlanInput};
use crate::deploy::runlog::RunLog;
use crate::deploy::snapshot::{resume_decision, SnapshotManager};
use crate::errors::ZephyrError;
use crate::models::plan::{ChangeSet, PendingSnapshot, TaskStep};
use crate::models::target::DeploymentTarget;
use crate::prompt::{Decision, Prompter};
use crate::ssh::{ConnectParams, RemoteSession, SessionConnector};
use crate::storage::layout::ProjectLayout;
use crate::utils::{expand_home, shell_quote};

/// What to do with a pending snapshot left by an interrupted run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResumePolicy {
    /// Ask the prompter
    #[default]
    Ask,
    Always,
    Never,
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Runtime command prefix for framework commands
    pub php_binary: String,

    /// Shell commands run locally during precheck
    pub local_checks: Vec<String>,

    /// Bootstrap the remote shell environment for every step
    pub bootstrap_env: bool,

    /// Variables exported for every remote step
    pub env: BTreeMap<String, String>,

    pub resume_policy: ResumePolicy,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            php_binary: "php".to_string(),
            local_checks: Vec::new(),
            bootstrap_env: true,
            env: BTreeMap::new(),
            resume_policy: ResumePolicy::Ask,
        }
    }
}

/// Options for the remote phase
#[derive(Debug, Clone, Default)]
pub struct RemoteTaskOptions {
    /// Snapshot to offer for resumption instead of looking one up
    pub snapshot: Option<PendingSnapshot>,
}

/// Summary of a successful run
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub log_path: PathBuf,
    pub executed: Vec<TaskStep>,
    pub resumed: bool,
    pub states: Vec<DeployState>,
}

/// Remote project characteristics that shape the plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectProbe {
    pub is_framework_project: bool,
    pub queue_dashboard_configured: bool,
}

struct Plan {
    steps: Vec<TaskStep>,
    changed_files: ChangeSet,
    resumed: bool,

    /// Already on disk exactly as it will run
    persisted: bool,
}

struct Completed {
    executed: Vec<TaskStep>,
    resumed: bool,
}

/// Resolve a `~` prefixed project path against the remote `$HOME`
pub async fn resolve_project_path(
    session: &dyn RemoteSession,
    project_path: &str,
) -> Result<String, ZephyrError> {
    if project_path != "~" && !project_path.starts_with("~/") {
        return Ok(project_path.to_string());
    }

    let output = session.exec("echo $HOME", None).await?;
    let home = output.stdout.trim();
    if !output.success() || home.is_empty() {
        return Err(ZephyrError::Transport(format!(
            "could not determine the remote home directory to resolve {}",
            project_path
        )));
    }

    let resolved = expand_home(project_path, home);
    debug!("Resolved project path {} to {}", project_path, resolved);
    Ok(resolved)
}

fn record_failure(fsm: &mut DeploymentFsm, err: &ZephyrError) {
    if let Err(e) = fsm.process(DeployEvent::Fail(err.to_string())) {
        warn!("{}", e);
    }
}

/// Top-level deployment state machine
pub struct Orchestrator<'a> {
    runner: &'a dyn CommandRunner,
    connector: &'a dyn SessionConnector,
    prompter: &'a dyn Prompter,
    layout: ProjectLayout,
    options: OrchestratorOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        connector: &'a dyn SessionConnector,
        prompter: &'a dyn Prompter,
        layout: ProjectLayout,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            runner,
            connector,
            prompter,
            layout,
            options,
        }
    }

    /// Precheck followed by the remote phase
    pub async fn deploy(&self, target: &DeploymentTarget) -> Result<DeployReport, ZephyrError> {
        let mut fsm = DeploymentFsm::new();

        if let Err(e) = self.precheck(target).await {
            record_failure(&mut fsm, &e);
            return Err(e.into_deployment_failure());
        }
        fsm.process(DeployEvent::PrecheckPassed)?;

        self.remote_phase(&mut fsm, target, RemoteTaskOptions::default())
            .await
    }

    /// Reconcile the local repository and run the configured local checks
    pub async fn precheck(&self, target: &DeploymentTarget) -> Result<(), ZephyrError> {
        console::step(&format!("Checking local repository for {}", target.branch));
        ensure_local_repository_state(self.runner, self.prompter, &target.branch, &self.layout.root_dir)
            .await?;
        console::success("Local repository is ready");

        for check in &self.options.local_checks {
            console::step(&format!("Running local check `{}`", check));
            let output = self
                .runner
                .run(&CommandSpec::shell(check, &self.layout.root_dir))
                .await?;
            if !output.success() {
                return Err(ZephyrError::Precondition(format!(
                    "Local check `{}` failed with exit code {}",
                    check, output.exit_code
                )));
            }
            console::success(&format!("Local check `{}` passed", check));
        }
        Ok(())
    }

    /// Connect, lock, plan and execute. Assumes the precheck already passed.
    pub async fn run_remote_tasks(
        &self,
        target: &DeploymentTarget,
        options: RemoteTaskOptions,
    ) -> Result<DeployReport, ZephyrError> {
        let mut fsm = DeploymentFsm::new();
        fsm.process(DeployEvent::PrecheckPassed)?;
        self.remote_phase(&mut fsm, target, options).await
    }

    async fn remote_phase(
        &self,
        fsm: &mut DeploymentFsm,
        target: &DeploymentTarget,
        options: RemoteTaskOptions,
    ) -> Result<DeployReport, ZephyrError> {
        let log_file = self.layout.run_log_file(Utc::now());
        let log_path = log_file.path().to_path_buf();

        let mut log = match RunLog::open(log_file).await {
            Ok(log) => log,
            Err(e) => {
                record_failure(fsm, &e);
                fsm.process(DeployEvent::CleanupFinished)?;
                return Err(e.into_deployment_failure());
            }
        };
        info!(
            "Deploying {} to {} ({}), logging to {}",
            target.branch,
            target.server_name,
            target.destination(),
            log_path.display()
        );

        let outcome = match self.connect(target).await {
            Ok((session, project_path)) => {
                let outcome = self
                    .with_session(fsm, target, &*session, &project_path, &mut log, options)
                    .await;
                if let Err(e) = session.dispose().await {
                    warn!("Failed to close the SSH session: {}", e);
                }
                outcome
            }
            Err(e) => {
                record_failure(fsm, &e);
                Err(e)
            }
        };

        if let Err(e) = log.close().await {
            warn!("Failed to close run log {}: {}", log_path.display(), e);
        }
        fsm.process(DeployEvent::CleanupFinished)?;

        match outcome {
            Ok(completed) => {
                console::success(&format!(
                    "Deployed {} to {} ({} step(s))",
                    target.branch,
                    target.server_name,
                    completed.executed.len()
                ));
                console::note(&format!("Deployment log: {}", log_path.display()));
                Ok(DeployReport {
                    log_path,
                    executed: completed.executed,
                    resumed: completed.resumed,
                    states: fsm.history().to_vec(),
                })
            }
            Err(e) => {
                console::note(&format!("Deployment log: {}", log_path.display()));
                Err(e.into_deployment_failure())
            }
        }
    }

    async fn connect(
        &self,
        target: &DeploymentTarget,
    ) -> Result<(Box<dyn RemoteSession>, String), ZephyrError> {
        console::step(&format!("Connecting to {}", target.destination()));
        let params = ConnectParams {
            host: target.server_host.clone(),
            user: target.ssh_user.clone(),
            private_key: target.ssh_key_path.clone(),
        };
        let session = self.connector.connect(&params).await?;

        match resolve_project_path(&*session, &target.project_path).await {
            Ok(project_path) => {
                console::success(&format!("Connected to {}", target.server_name));
                Ok((session, project_path))
            }
            Err(e) => {
                if let Err(dispose) = session.dispose().await {
                    warn!("Failed to close the SSH session: {}", dispose);
                }
                Err(e)
            }
        }
    }

    /// Everything between a successful connect and the session dispose
    async fn with_session(
        &self,
        fsm: &mut DeploymentFsm,
        target: &DeploymentTarget,
        session: &dyn RemoteSession,
        project_path: &str,
        log: &mut RunLog,
        options: RemoteTaskOptions,
    ) -> Result<Completed, ZephyrError> {
        fsm.process(DeployEvent::Connected)?;

        let mut lock = LockCoordinator::new(session, self.prompter, &self.layout, project_path);
        let snapshots = SnapshotManager::new(session, &self.layout, project_path);
        let executor = RemoteExecutor::new(
            session,
            ExecOptions {
                cwd: Some(project_path.to_string()),
                allow_failure: false,
                bootstrap_env: self.options.bootstrap_env,
                env: self.options.env.clone(),
            },
        );

        let outcome = self
            .locked_run(fsm, target, &mut lock, &snapshots, &executor, log, options)
            .await;

        if let Err(e) = &outcome {
            record_failure(fsm, e);
            if let Err(note) = log.note(&format!("failed: {}", e)).await {
                warn!("Failed to write run log: {}", note);
            }
        }

        // The snapshot lives in the locked directory, so it goes first
        if outcome.is_ok() {
            if let Err(e) = snapshots.clear().await {
                warn!("Failed to clear pending snapshot: {}", e);
                console::warning(&format!("Could not clear the pending snapshot: {}", e));
            }
        }
        lock.release().await;
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn locked_run(
        &self,
        fsm: &mut DeploymentFsm,
        target: &DeploymentTarget,
        lock: &mut LockCoordinator<'_>,
        snapshots: &SnapshotManager<'_>,
        executor: &RemoteExecutor<'_>,
        log: &mut RunLog,
        options: RemoteTaskOptions,
    ) -> Result<Completed, ZephyrError> {
        console::step("Acquiring deployment lock");
        lock.acquire().await?;
        fsm.process(DeployEvent::LockAcquired)?;
        console::success("Deployment lock acquired");

        let plan = self
            .plan(target, snapshots, executor, log, options.snapshot)
            .await?;
        let persist = !plan.persisted && plan.steps.len() > 1;
        fsm.process(DeployEvent::Planned { persist })?;
        log.note(&format!(
            "plan: {}",
            plan.steps
                .iter()
                .map(|s| s.label.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .await?;

        if persist {
            snapshots
                .save(&PendingSnapshot::new(
                    target,
                    plan.changed_files.clone(),
                    plan.steps.clone(),
                ))
                .await?;
            fsm.process(DeployEvent::SnapshotSaved)?;
        }

        let step_options = executor.options();
        for step in &plan.steps {
            console::step(&step.label);
            executor
                .execute(log, &step.label, &step.command, &step_options)
                .await?;
            console::success(&step.label);
        }
        fsm.process(DeployEvent::StepsCompleted)?;

        Ok(Completed {
            executed: plan.steps,
            resumed: plan.resumed,
        })
    }

    async fn plan(
        &self,
        target: &DeploymentTarget,
        snapshots: &SnapshotManager<'_>,
        executor: &RemoteExecutor<'_>,
        log: &mut RunLog,
        supplied: Option<PendingSnapshot>,
    ) -> Result<Plan, ZephyrError> {
        let (pending, from_disk) = match supplied {
            Some(snapshot) => (Some(snapshot), false),
            None => (snapshots.load().await?, true),
        };

        if let Some(snapshot) = pending {
            if self.resume_choice(&snapshot, target).await? == Decision::Resume {
                console::success(&format!(
                    "Resuming {} pending task(s) from {}",
                    snapshot.task_labels.len(),
                    snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                ));
                return self.replay(snapshot, from_disk, target, executor, log).await;
            }
            snapshots.clear().await?;
            console::warning("Discarded the pending deployment snapshot");
        }

        let probe = self.probe(executor, log).await?;
        let changed_files = self.changed_files(executor, log, &target.branch).await?;
        info!("{} file(s) changed on {}", changed_files.len(), target.branch);

        let steps = planner::plan(&self.plan_input(target, probe, &changed_files));
        Ok(Plan {
            steps,
            changed_files,
            resumed: false,
            persisted: false,
        })
    }

    async fn resume_choice(
        &self,
        snapshot: &PendingSnapshot,
        target: &DeploymentTarget,
    ) -> Result<Decision, ZephyrError> {
        match self.options.resume_policy {
            ResumePolicy::Ask => resume_decision(self.prompter, snapshot, target).await,
            ResumePolicy::Always => Ok(Decision::Resume),
            ResumePolicy::Never => Ok(Decision::Proceed),
        }
    }

    /// Replay a snapshot. Older snapshots carry only labels, so their steps
    /// are rebuilt from the recorded change set and saved again in full.
    async fn replay(
        &self,
        snapshot: PendingSnapshot,
        from_disk: bool,
        target: &DeploymentTarget,
        executor: &RemoteExecutor<'_>,
        log: &mut RunLog,
    ) -> Result<Plan, ZephyrError> {
        if !snapshot.tasks.is_empty() {
            return Ok(Plan {
                steps: snapshot.tasks,
                changed_files: snapshot.changed_files,
                resumed: true,
                persisted: from_disk,
            });
        }

        let probe = self.probe(executor, log).await?;
        let steps = planner::plan(&self.plan_input(target, probe, &snapshot.changed_files))
            .into_iter()
            .filter(|step| snapshot.task_labels.contains(&step.label))
            .collect();
        Ok(Plan {
            steps,
            changed_files: snapshot.changed_files,
            resumed: true,
            persisted: false,
        })
    }

    fn plan_input<'p>(
        &'p self,
        target: &'p DeploymentTarget,
        probe: ProjectProbe,
        changed_files: &'p [String],
    ) -> PlanInput<'p> {
        PlanInput {
            branch: &target.branch,
            is_framework_project: probe.is_framework_project,
            changed_files,
            queue_dashboard_configured: probe.queue_dashboard_configured,
            runtime_prefix: &self.options.php_binary,
        }
    }

    async fn probe(
        &self,
        executor: &RemoteExecutor<'_>,
        log: &mut RunLog,
    ) -> Result<ProjectProbe, ZephyrError> {
        let optional = executor.options().allow_failure();

        let artisan = executor
            .execute(log, "Detect Laravel project", "test -f artisan", &optional)
            .await?;
        if !artisan.success() {
            debug!("No artisan file, treating the project as a plain repository");
            return Ok(ProjectProbe::default());
        }

        let horizon = executor
            .execute(
                log,
                "Detect Horizon",
                "grep -q '\"laravel/horizon\"' composer.json",
                &optional,
            )
            .await?;

        Ok(ProjectProbe {
            is_framework_project: true,
            queue_dashboard_configured: horizon.success(),
        })
    }

    async fn changed_files(
        &self,
        executor: &RemoteExecutor<'_>,
        log: &mut RunLog,
        branch: &str,
    ) -> Result<ChangeSet, ZephyrError> {
        let options = executor.options();
        let branch = shell_quote(branch);

        console::step("Fetching remote changes");
        executor
            .execute(
                log,
                "Fetch upstream",
                &format!("git fetch origin {}", branch),
                &options,
            )
            .await?;

        let diff = executor
            .execute(
                log,
                "Detect changed files",
                &format!("git diff --name-only HEAD origin/{}", branch),
                &options,
            )
            .await?;

        Ok(diff
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
