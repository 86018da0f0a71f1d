//! Local repository reconciliation.
//!
//! Before anything touches the server, the local checkout must be on the
//! target branch, level with its upstream, and have every staged change
//! committed and pushed. The server pulls from the same remote, so anything
//! left local would silently not be deployed.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::console;
use crate::deploy::command::{run_checked, CommandRunner, CommandSpec};
use crate::errors::ZephyrError;
use crate::prompt::Prompter;

/// Parsed `git status --porcelain=v1 --branch`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoStatus {
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
}

impl RepoStatus {
    pub fn parse(text: &str) -> Self {
        let mut status = RepoStatus::default();

        for line in text.lines() {
            if let Some(header) = line.strip_prefix("## ") {
                parse_branch_header(header, &mut status);
                continue;
            }
            if line.len() < 4 {
                continue;
            }

            let (code, path) = line.split_at(2);
            let path = path.trim_start();
            let path = path.split(" -> ").last().unwrap_or(path).to_string();
            let mut chars = code.chars();
            let x = chars.next().unwrap_or(' ');
            let y = chars.next().unwrap_or(' ');

            match (x, y) {
                ('?', '?') => status.untracked.push(path),
                ('!', '!') => {}
                _ => {
                    if x != ' ' {
                        status.staged.push(path.clone());
                    }
                    if y != ' ' {
                        status.modified.push(path);
                    }
                }
            }
        }

        status
    }

    /// Staged or modified tracked files; untracked files do not count
    pub fn has_tracked_changes(&self) -> bool {
        !self.staged.is_empty() || !self.modified.is_empty()
    }
}

fn parse_branch_header(header: &str, status: &mut RepoStatus) {
    let (refs, counts) = match header.split_once(" [") {
        Some((refs, counts)) => (refs, Some(counts.trim_end_matches(']'))),
        None => (header, None),
    };

    if let Some((_, upstream)) = refs.split_once("...") {
        status.upstream = Some(upstream.to_string());
    }

    if let Some(counts) = counts {
        for part in counts.split(", ") {
            if let Some(n) = part.strip_prefix("ahead ") {
                status.ahead = n.parse().unwrap_or(0);
            } else if let Some(n) = part.strip_prefix("behind ") {
                status.behind = n.parse().unwrap_or(0);
            }
        }
    }
}

/// Brings the local repository into a deployable state
pub struct Reconciler<'a> {
    runner: &'a dyn CommandRunner,
    prompter: &'a dyn Prompter,
    root_dir: PathBuf,
}

impl<'a> Reconciler<'a> {
    pub fn new(runner: &'a dyn CommandRunner, prompter: &'a dyn Prompter, root_dir: impl AsRef<Path>) -> Self {
        Self {
            runner,
            prompter,
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }

    fn git<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("git", &self.root_dir).args(args).capture()
    }

    pub async fn current_branch(&self) -> Result<String, ZephyrError> {
        let output = run_checked(self.runner, &self.git(["rev-parse", "--abbrev-ref", "HEAD"])).await?;
        Ok(output.stdout.trim().to_string())
    }

    pub async fn status(&self) -> Result<RepoStatus, ZephyrError> {
        let output = run_checked(self.runner, &self.git(["status", "--porcelain=v1", "--branch"])).await?;
        Ok(RepoStatus::parse(&output.stdout))
    }

    /// Ensure `branch` is checked out, synced, committed and pushed
    pub async fn ensure(&self, branch: &str) -> Result<(), ZephyrError> {
        let current = self.current_branch().await?;
        let mut status = self.status().await?;
        debug!("Local repository on {} with status {:?}", current, status);

        if current != branch {
            if status.has_tracked_changes() {
                return Err(ZephyrError::Precondition(format!(
                    "Local branch {} has uncommitted changes; commit or stash them before deploying {}",
                    current, branch
                )));
            }
            run_checked(self.runner, &self.git(["checkout", branch]))
                .await
                .map_err(|e| ZephyrError::Precondition(format!("Could not check out {}: {}", branch, e)))?;
            console::success(&format!("Switched local repository to {}", branch));
            status = self.status().await?;
        }

        if status.upstream.is_some() {
            status = self.sync_with_upstream(branch, status).await?;
        } else {
            console::warning(&format!(
                "Branch {} has no upstream configured; skipping ahead/behind checks",
                branch
            ));
        }

        if status.staged.is_empty() {
            if !status.modified.is_empty() {
                console::warning(&format!(
                    "{} modified file(s) are not staged and will not be deployed",
                    status.modified.len()
                ));
            }
            return self.ensure_pushed(branch, &status).await;
        }

        self.commit_and_push(branch, &status).await
    }

    async fn sync_with_upstream(&self, branch: &str, status: RepoStatus) -> Result<RepoStatus, ZephyrError> {
        let fetch = self.runner.run(&self.git(["fetch", "--quiet"])).await?;
        let mut status = if fetch.success() {
            self.status().await?
        } else {
            console::warning(&format!(
                "git fetch failed, using last known upstream state: {}",
                fetch.stderr.trim()
            ));
            status
        };

        if status.ahead > 0 {
            console::warning(&format!(
                "{} is {} commit(s) ahead of its upstream; they will be pushed",
                branch, status.ahead
            ));
        }

        if status.behind > 0 {
            info!("{} is {} commit(s) behind, fast-forwarding", branch, status.behind);
            run_checked(self.runner, &self.git(["pull", "--ff-only"]))
                .await
                .map_err(|e| {
                    ZephyrError::Precondition(format!(
                        "Could not fast-forward {}; resolve the divergence manually and retry: {}",
                        branch, e
                    ))
                })?;
            console::success(&format!("Pulled {} commit(s) into {}", status.behind, branch));
            status = self.status().await?;
        }

        Ok(status)
    }

    async fn ensure_pushed(&self, branch: &str, status: &RepoStatus) -> Result<(), ZephyrError> {
        if status.upstream.is_none() || status.ahead == 0 {
            return Ok(());
        }

        run_checked(self.runner, &self.git(["push"]))
            .await
            .map_err(|e| ZephyrError::Precondition(format!("Could not push {}: {}", branch, e)))?;
        console::success(&format!("Pushed {} local commit(s) on {}", status.ahead, branch));
        Ok(())
    }

    async fn commit_and_push(&self, branch: &str, status: &RepoStatus) -> Result<(), ZephyrError> {
        console::step(&format!("{} staged file(s) need to be committed", status.staged.len()));
        let message = self.prompter.commit_message().await?;

        run_checked(self.runner, &self.git(["commit", "-m", message.as_str()]))
            .await
            .map_err(|e| ZephyrError::Precondition(format!("Commit failed: {}", e)))?;
        console::success("Committed staged changes");

        let push = if status.upstream.is_some() {
            self.git(["push"])
        } else {
            self.git(["push", "--set-upstream", "origin", branch])
        };
        run_checked(self.runner, &push)
            .await
            .map_err(|e| ZephyrError::Precondition(format!("Could not push {}: {}", branch, e)))?;
        console::success(&format!("Pushed {}", branch));

        let after = self.status().await?;
        if after.has_tracked_changes() {
            return Err(ZephyrError::Precondition(format!(
                "Working tree is still dirty after committing ({} staged, {} modified); check commit hooks and retry",
                after.staged.len(),
                after.modified.len()
            )));
        }
        Ok(())
    }
}

/// Guarantee the local repository at `root_dir` is ready to deploy `branch`
pub async fn ensure_local_repository_state(
    runner: &dyn CommandRunner,
    prompter: &dyn Prompter,
    branch: &str,
    root_dir: &Path,
) -> Result<(), ZephyrError> {
    Reconciler::new(runner, prompter, root_dir).ensure(branch).await
}
