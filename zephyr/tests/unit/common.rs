//! Shared test doubles

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use zephyr::deploy::command::{CommandOutput, CommandRunner, CommandSpec};
use zephyr::deploy::orchestrator::{Orchestrator, OrchestratorOptions};
use zephyr::errors::ZephyrError;
use zephyr::models::target::DeploymentTarget;
use zephyr::prompt::{Confirmation, Prompter};
use zephyr::ssh::{ConnectParams, RemoteOutput, RemoteSession, SessionConnector};
use zephyr::storage::layout::ProjectLayout;

// ================================ PROMPTER ===================================== //

/// Answers confirmations from a queue, falling back to their defaults
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<bool>>,
    commit_message: Option<String>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            ..Default::default()
        }
    }

    pub fn with_commit_message(mut self, message: &str) -> Self {
        self.commit_message = Some(message.to_string());
        self
    }

    /// Every question asked so far
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn commit_message(&self) -> Result<String, ZephyrError> {
        self.asked.lock().unwrap().push("commit message".to_string());
        self.commit_message
            .clone()
            .ok_or_else(|| ZephyrError::Precondition("no commit message".to_string()))
    }

    async fn confirm(&self, confirmation: &Confirmation) -> Result<bool, ZephyrError> {
        self.asked.lock().unwrap().push(confirmation.message.clone());
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(confirmation.default))
    }
}

// ================================ LOCAL GIT ==================================== //

/// State of the simulated local repository
#[derive(Debug, Clone, Default)]
pub struct GitState {
    pub branch: String,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,

    /// Local and upstream both moved; a fast-forward is impossible
    pub diverged: bool,
}

impl GitState {
    /// Clean checkout of `branch` tracking `origin/<branch>`
    pub fn clean(branch: &str) -> Self {
        Self {
            branch: branch.to_string(),
            upstream: Some(format!("origin/{}", branch)),
            ..Default::default()
        }
    }

    fn porcelain(&self) -> String {
        let mut header = format!("## {}", self.branch);
        if let Some(upstream) = &self.upstream {
            header.push_str(&format!("...{}", upstream));
            let mut counts = Vec::new();
            if self.ahead > 0 {
                counts.push(format!("ahead {}", self.ahead));
            }
            if self.behind > 0 {
                counts.push(format!("behind {}", self.behind));
            }
            if !counts.is_empty() {
                header.push_str(&format!(" [{}]", counts.join(", ")));
            }
        }

        let mut text = header + "\n";
        for file in &self.staged {
            text.push_str(&format!("M  {}\n", file));
        }
        for file in &self.modified {
            text.push_str(&format!(" M {}\n", file));
        }
        for file in &self.untracked {
            text.push_str(&format!("?? {}\n", file));
        }
        text
    }
}

/// CommandRunner that simulates git and records every command line
#[derive(Default)]
pub struct FakeGitRunner {
    pub state: Mutex<GitState>,
    calls: Mutex<Vec<String>>,
    /// Local check scripts that should fail
    pub failing_checks: Vec<String>,
}

impl FakeGitRunner {
    pub fn new(state: GitState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn snapshot(&self) -> GitState {
        self.state.lock().unwrap().clone()
    }

    fn ok(stdout: impl Into<String>) -> CommandOutput {
        CommandOutput {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeGitRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ZephyrError> {
        self.calls.lock().unwrap().push(spec.display());

        if spec.program == "sh" {
            let script = spec.args.last().cloned().unwrap_or_default();
            let exit_code = if self.failing_checks.contains(&script) { 1 } else { 0 };
            return Ok(CommandOutput {
                exit_code,
                ..Default::default()
            });
        }

        assert_eq!(spec.program, "git", "unexpected program {}", spec.program);
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        let mut state = self.state.lock().unwrap();

        let output = match args.as_slice() {
            ["rev-parse", "--abbrev-ref", "HEAD"] => Self::ok(format!("{}\n", state.branch)),
            ["status", "--porcelain=v1", "--branch"] => Self::ok(state.porcelain()),
            ["checkout", branch] => {
                state.branch = branch.to_string();
                state.upstream = Some(format!("origin/{}", branch));
                Self::ok("")
            }
            ["fetch", "--quiet"] => Self::ok(""),
            ["pull", "--ff-only"] if state.diverged => CommandOutput {
                exit_code: 128,
                stdout: String::new(),
                stderr: "fatal: Not possible to fast-forward, aborting.\n".to_string(),
            },
            ["pull", "--ff-only"] => {
                state.behind = 0;
                Self::ok("")
            }
            ["commit", "-m", _] => {
                state.staged.clear();
                state.ahead += 1;
                Self::ok("")
            }
            ["push"] => {
                state.ahead = 0;
                Self::ok("")
            }
            ["push", "--set-upstream", "origin", branch] => {
                state.upstream = Some(format!("origin/{}", branch));
                state.ahead = 0;
                Self::ok("")
            }
            other => panic!("unexpected git invocation {:?}", other),
        };
        Ok(output)
    }
}

// ================================ REMOTE ======================================= //

struct SessionInner {
    root: PathBuf,
    canned: Mutex<Vec<(String, RemoteOutput)>>,
    calls: Mutex<Vec<String>>,
    disposed: Mutex<bool>,
}

/// RemoteSession over a local directory.
///
/// Commands starting with a canned prefix get the canned answer; everything
/// else runs through `sh -c`, so the lock and snapshot files really exist.
#[derive(Clone)]
pub struct LocalShellSession {
    inner: Arc<SessionInner>,
}

impl LocalShellSession {
    pub fn new(root: &Path) -> Self {
        let session = Self {
            inner: Arc::new(SessionInner {
                root: root.to_path_buf(),
                canned: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
                disposed: Mutex::new(false),
            }),
        };
        session.answer("echo $HOME", 0, &format!("{}\n", root.display()), "");
        session
    }

    /// Answer commands starting with `prefix`; later answers win
    pub fn answer(&self, prefix: &str, exit_code: i32, stdout: &str, stderr: &str) {
        self.inner.canned.lock().unwrap().insert(
            0,
            (
                prefix.to_string(),
                RemoteOutput {
                    exit_code,
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                },
            ),
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().unwrap().clear();
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    pub fn disposed(&self) -> bool {
        *self.inner.disposed.lock().unwrap()
    }
}

#[async_trait]
impl RemoteSession for LocalShellSession {
    async fn exec(&self, command: &str, cwd: Option<&str>) -> Result<RemoteOutput, ZephyrError> {
        self.inner.calls.lock().unwrap().push(command.to_string());

        let canned = self
            .inner
            .canned
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone());
        if let Some(output) = canned {
            return Ok(output);
        }

        let dir = cwd.map(PathBuf::from).unwrap_or_else(|| self.inner.root.clone());
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .output()
            .await?;
        Ok(RemoteOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn get_file(&self, remote_path: &str, local_path: &Path) -> Result<(), ZephyrError> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(remote_path, local_path).await?;
        Ok(())
    }

    async fn dispose(&self) -> Result<(), ZephyrError> {
        *self.inner.disposed.lock().unwrap() = true;
        Ok(())
    }
}

/// Hands out clones of one session
pub struct FakeConnector {
    pub session: LocalShellSession,
    pub connects: Mutex<Vec<ConnectParams>>,
    pub refuse: bool,
}

impl FakeConnector {
    pub fn new(session: LocalShellSession) -> Self {
        Self {
            session,
            connects: Mutex::new(Vec::new()),
            refuse: false,
        }
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn RemoteSession>, ZephyrError> {
        self.connects.lock().unwrap().push(params.clone());
        if self.refuse {
            return Err(ZephyrError::Transport(format!(
                "could not connect to {}@{}: Connection refused",
                params.user, params.host
            )));
        }
        Ok(Box::new(self.session.clone()))
    }
}

// ================================ HARNESS ====================================== //

/// A local repository and a remote "server" in two temp directories
pub struct Harness {
    pub local: TempDir,
    pub remote: TempDir,
    pub layout: ProjectLayout,
    pub runner: FakeGitRunner,
    pub connector: FakeConnector,
    pub prompter: ScriptedPrompter,
}

impl Harness {
    /// Clean local `main`, and a Laravel project at `~/app` on the server
    pub fn laravel() -> Self {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();

        let project = remote.path().join("app");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(project.join("artisan"), "#!/usr/bin/env php\n").unwrap();
        std::fs::write(
            project.join("composer.json"),
            r#"{"require": {"laravel/framework": "^11.0"}}"#,
        )
        .unwrap();

        let session = LocalShellSession::new(remote.path());
        for prefix in [
            "git fetch origin",
            "git pull origin",
            "if [ ! -f composer.lock ]",
            "if [ -f package-lock.json ]",
            "php artisan",
            "npm run build",
        ] {
            session.answer(prefix, 0, "", "");
        }

        Self {
            layout: ProjectLayout::new(local.path()),
            local,
            remote,
            runner: FakeGitRunner::new(GitState::clean("main")),
            connector: FakeConnector::new(session),
            prompter: ScriptedPrompter::default(),
        }
    }

    pub fn session(&self) -> &LocalShellSession {
        &self.connector.session
    }

    /// Resolved remote project directory
    pub fn project_dir(&self) -> PathBuf {
        self.remote.path().join("app")
    }

    pub fn project_path(&self) -> String {
        self.project_dir().display().to_string()
    }

    /// Files the server reports as changed between HEAD and upstream
    pub fn changed(&self, files: &[&str]) {
        let stdout: String = files.iter().map(|f| format!("{}\n", f)).collect();
        self.session()
            .answer("git diff --name-only HEAD origin/", 0, &stdout, "");
    }

    pub fn target(&self) -> DeploymentTarget {
        DeploymentTarget {
            server_name: "production".to_string(),
            server_host: "deploy.test".to_string(),
            project_path: "~/app".to_string(),
            branch: "main".to_string(),
            ssh_user: "forge".to_string(),
            ssh_key_path: "/home/dev/.ssh/id_ed25519".into(),
        }
    }

    pub fn options() -> OrchestratorOptions {
        OrchestratorOptions {
            bootstrap_env: false,
            ..Default::default()
        }
    }

    pub fn orchestrator(&self) -> Orchestrator<'_> {
        self.orchestrator_with(Self::options())
    }

    pub fn orchestrator_with(&self, options: OrchestratorOptions) -> Orchestrator<'_> {
        Orchestrator::new(
            &self.runner,
            &self.connector,
            &self.prompter,
            self.layout.clone(),
            options,
        )
    }

    pub fn remote_lock(&self) -> PathBuf {
        self.project_dir().join(".zephyr").join("deploy.lock")
    }

    pub fn remote_snapshot(&self) -> PathBuf {
        self.project_dir().join(".zephyr").join("pending-tasks.json")
    }
}
