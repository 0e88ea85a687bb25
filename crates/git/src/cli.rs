//! Driving the `git` binary.
//!
//! The external CLI is the engine: it is what users already have configured
//! (credential helpers, default branch names, hooks), and its script-facing
//! output formats (`status --porcelain`, `%(refname:short)`) are stable
//! contracts. This module centralizes every git invocation so command
//! choices and output parsing live in one place.

use std::{ffi::OsStr, path::Path, time::Duration};

use thiserror::Error;
use utils::command::{CommandResult, CommandRunner};

use crate::{BranchSet, SyncCounts, status::changed_paths};

#[derive(Debug, Error)]
pub enum GitCliError {
    #[error("git executable not found or not runnable")]
    NotAvailable,
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("push rejected: {0}")]
    PushRejected(String),
    #[error("git command timed out after {0:?}")]
    TimedOut(Duration),
}

/// Result of a commit attempt. An empty index is an expected outcome, not an
/// error, so pipelines can carry on to their push step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Created,
    NothingToCommit,
}

/// Thin wrapper over the `git` binary.
///
/// Every operation is an argv invocation through [`CommandRunner`], with the
/// repository passed as the child's working directory; no shell strings are
/// built here.
#[derive(Debug, Clone)]
pub struct GitCli {
    runner: CommandRunner,
    deadline: Option<Duration>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::with_runner(CommandRunner::new())
    }

    /// Uses `runner` for spawning. Credential prompts are disabled so an
    /// unauthenticated remote operation fails instead of hanging on a hidden
    /// prompt.
    pub fn with_runner(runner: CommandRunner) -> Self {
        Self {
            runner: runner.env("GIT_TERMINAL_PROMPT", "0"),
            deadline: None,
        }
    }

    /// Enforces `limit` on every git invocation; when it elapses the child is
    /// killed and the call reports [`GitCliError::TimedOut`].
    pub fn with_deadline(mut self, limit: Duration) -> Self {
        self.deadline = Some(limit);
        self
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub async fn available(&self) -> bool {
        matches!(self.raw(None, ["--version"]).await, Ok(result) if result.success())
    }

    /// Changed paths from `git status --porcelain`, deduplicated in
    /// first-occurrence order.
    pub async fn status_paths(&self, repo: &Path) -> Result<Vec<String>, GitCliError> {
        let out = self.git(repo, ["status", "--porcelain"]).await?;
        Ok(changed_paths(&out))
    }

    pub async fn branches(&self, repo: &Path) -> Result<Vec<String>, GitCliError> {
        let out = self
            .git(repo, ["branch", "--format=%(refname:short)"])
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// The checked-out branch name, or an empty string when detection fails
    /// (detached HEAD reports itself as `HEAD`).
    pub async fn current_branch(&self, repo: &Path) -> Result<String, GitCliError> {
        match self.git(repo, ["rev-parse", "--abbrev-ref", "HEAD"]).await {
            Ok(out) => {
                let name = out.trim();
                if name.is_empty() || name == "HEAD" {
                    Ok(String::new())
                } else {
                    Ok(name.to_string())
                }
            }
            Err(GitCliError::CommandFailed(_)) => Ok(String::new()),
            Err(err) => Err(err),
        }
    }

    pub async fn branch_set(&self, repo: &Path) -> Result<BranchSet, GitCliError> {
        let names = self.branches(repo).await?;
        let current = self.current_branch(repo).await?;
        Ok(BranchSet { names, current })
    }

    pub async fn checkout(&self, repo: &Path, branch: &str) -> Result<(), GitCliError> {
        self.git(repo, ["checkout", branch]).await.map(|_| ())
    }

    pub async fn create_branch(&self, repo: &Path, name: &str) -> Result<(), GitCliError> {
        self.git(repo, ["checkout", "-b", name]).await.map(|_| ())
    }

    pub async fn merge_no_ff(&self, repo: &Path, branch: &str) -> Result<(), GitCliError> {
        self.git(repo, ["merge", "--no-ff", branch]).await.map(|_| ())
    }

    /// Working-tree diff, optionally narrowed to a single path.
    pub async fn diff(&self, repo: &Path, path: Option<&str>) -> Result<String, GitCliError> {
        let mut args = vec!["--no-pager", "diff"];
        if let Some(path) = path {
            args.push("--");
            args.push(path);
        }
        self.git(repo, args).await
    }

    /// Ahead/behind counts of HEAD against its upstream.
    ///
    /// When no upstream is configured the conventional `origin/<branch>` name
    /// is tried; when that cannot be resolved either (unborn branch, no such
    /// remote ref) the counts are absent rather than zero, keeping "no
    /// upstream yet" distinguishable from "in sync".
    pub async fn sync_counts(&self, repo: &Path) -> Result<Option<SyncCounts>, GitCliError> {
        let current = self.current_branch(repo).await?;
        if current.is_empty() {
            return Ok(None);
        }

        let upstream = match self
            .git(repo, ["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"])
            .await
        {
            Ok(out) => out.trim().to_string(),
            Err(GitCliError::CommandFailed(_)) => format!("origin/{current}"),
            Err(err) => return Err(err),
        };

        let range = format!("HEAD...{upstream}");
        match self
            .git(repo, ["rev-list", "--left-right", "--count", range.as_str()])
            .await
        {
            Ok(out) => Ok(parse_sync_counts(&out)),
            Err(GitCliError::CommandFailed(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// `git clone <url> <target>`. The raw result is returned so callers can
    /// surface the full clone transcript even on failure.
    pub async fn clone_repo(&self, url: &str, target: &Path) -> Result<CommandResult, GitCliError> {
        self.raw(
            None,
            [OsStr::new("clone"), OsStr::new(url), target.as_os_str()],
        )
        .await
    }

    /// Initializes a repository in `dir`, which must already exist.
    pub async fn init(&self, dir: &Path) -> Result<(), GitCliError> {
        self.git(dir, ["init"]).await.map(|_| ())
    }

    pub async fn stage_all(&self, repo: &Path) -> Result<(), GitCliError> {
        self.git(repo, ["add", "."]).await.map(|_| ())
    }

    pub async fn commit(&self, repo: &Path, message: &str) -> Result<CommitOutcome, GitCliError> {
        match self.git(repo, ["commit", "-m", message]).await {
            Ok(_) => Ok(CommitOutcome::Created),
            Err(GitCliError::CommandFailed(msg)) if is_nothing_to_commit(&msg) => {
                Ok(CommitOutcome::NothingToCommit)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn commit_allow_empty(&self, repo: &Path, message: &str) -> Result<(), GitCliError> {
        self.git(repo, ["commit", "--allow-empty", "-m", message])
            .await
            .map(|_| ())
    }

    /// Whether HEAD resolves to a commit.
    pub async fn has_commits(&self, repo: &Path) -> Result<bool, GitCliError> {
        match self.git(repo, ["rev-parse", "--verify", "HEAD"]).await {
            Ok(_) => Ok(true),
            Err(GitCliError::CommandFailed(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn is_inside_work_tree(&self, dir: &Path) -> Result<bool, GitCliError> {
        match self.git(dir, ["rev-parse", "--is-inside-work-tree"]).await {
            Ok(out) => Ok(out.trim() == "true"),
            Err(GitCliError::CommandFailed(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// `git branch -M <name>`, used to normalize a fresh repository onto a
    /// conventional branch name.
    pub async fn rename_current_branch(&self, repo: &Path, name: &str) -> Result<(), GitCliError> {
        self.git(repo, ["branch", "-M", name]).await.map(|_| ())
    }

    pub async fn push(&self, repo: &Path) -> Result<(), GitCliError> {
        self.classified(self.git(repo, ["push"]).await).map(|_| ())
    }

    pub async fn push_set_upstream(
        &self,
        repo: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<(), GitCliError> {
        self.classified(self.git(repo, ["push", "-u", remote, branch]).await)
            .map(|_| ())
    }

    pub async fn pull(&self, repo: &Path) -> Result<(), GitCliError> {
        self.classified(self.git(repo, ["pull", "--no-rebase"]).await)
            .map(|_| ())
    }

    pub async fn remote_url(&self, repo: &Path, remote: &str) -> Result<Option<String>, GitCliError> {
        match self.git(repo, ["remote", "get-url", remote]).await {
            Ok(out) => Ok(Some(out.trim().to_string()).filter(|url| !url.is_empty())),
            Err(GitCliError::CommandFailed(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Points `remote` at `url`, adding it or updating an existing entry.
    pub async fn set_remote(&self, repo: &Path, remote: &str, url: &str) -> Result<(), GitCliError> {
        match self.git(repo, ["remote", "add", remote, url]).await {
            Ok(_) => Ok(()),
            Err(GitCliError::CommandFailed(_)) => self
                .git(repo, ["remote", "set-url", remote, url])
                .await
                .map(|_| ()),
            Err(err) => Err(err),
        }
    }

    /// Reads a config value, locally or from the global scope. Unset keys are
    /// `None`, not errors.
    pub async fn config_value(
        &self,
        repo: &Path,
        key: &str,
        global: bool,
    ) -> Result<Option<String>, GitCliError> {
        let args: Vec<&str> = if global {
            vec!["config", "--global", key]
        } else {
            vec!["config", key]
        };
        match self.git(repo, args).await {
            Ok(out) => Ok(Some(out.trim().to_string()).filter(|value| !value.is_empty())),
            Err(GitCliError::CommandFailed(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn set_config(&self, repo: &Path, key: &str, value: &str) -> Result<(), GitCliError> {
        self.git(repo, ["config", key, value]).await.map(|_| ())
    }

    /// Copies `user.name`/`user.email` from the global scope into the
    /// repository when they are not set locally. Keys missing from both
    /// scopes are left alone; the eventual commit reports the problem.
    pub async fn ensure_commit_identity(&self, repo: &Path) -> Result<(), GitCliError> {
        for key in ["user.name", "user.email"] {
            if self.config_value(repo, key, false).await?.is_none()
                && let Some(value) = self.config_value(repo, key, true).await?
            {
                self.set_config(repo, key, &value).await?;
            }
        }
        Ok(())
    }

    /// Runs `git <args>` and returns the raw captured result, successful or
    /// not. Prefer the dedicated helpers so command choices and parsing stay
    /// centralized; use this directly only where a flow needs the untouched
    /// output for its transcript.
    pub async fn raw<I, S>(
        &self,
        repo: Option<&Path>,
        args: I,
    ) -> Result<CommandResult, GitCliError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let invocation = self.runner.run("git", args, repo);
        let result = match self.deadline {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(result) => result,
                Err(_) => return Err(GitCliError::TimedOut(limit)),
            },
            None => invocation.await,
        };

        if result.launch_failed() {
            tracing::warn!(message = %result.stderr, "git could not be launched");
            return Err(GitCliError::NotAvailable);
        }
        Ok(result)
    }

    async fn git<I, S>(&self, repo: &Path, args: I) -> Result<String, GitCliError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let result = self.raw(Some(repo), args).await?;
        if result.success() {
            return Ok(result.stdout);
        }

        let combined = result.combined().trim().to_string();
        Err(GitCliError::CommandFailed(if combined.is_empty() {
            "command failed with no output".to_string()
        } else {
            combined
        }))
    }

    fn classified<T>(&self, outcome: Result<T, GitCliError>) -> Result<T, GitCliError> {
        match outcome {
            Err(GitCliError::CommandFailed(msg)) => Err(classify_failure(msg)),
            other => other,
        }
    }
}

fn classify_failure(msg: String) -> GitCliError {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("could not read password")
        || lower.contains("invalid username or password")
    {
        GitCliError::AuthFailed(msg)
    } else if lower.contains("non-fast-forward")
        || lower.contains("fetch first")
        || lower.contains("failed to push some refs")
        || lower.contains("updates were rejected")
    {
        GitCliError::PushRejected(msg)
    } else {
        GitCliError::CommandFailed(msg)
    }
}

/// Whether git output describes an empty index rather than a real failure.
/// Multi-step flows treat this as recoverable and keep going.
pub fn is_nothing_to_commit(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("nothing to commit")
        || lower.contains("nothing added to commit")
        || lower.contains("no changes added to commit")
}

fn parse_sync_counts(out: &str) -> Option<SyncCounts> {
    let mut fields = out.split_whitespace();
    let ahead = fields.next()?.parse().ok()?;
    let behind = fields.next()?.parse().ok()?;
    Some(SyncCounts { ahead, behind })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_counts_parse_from_rev_list_output() {
        assert_eq!(
            parse_sync_counts("3\t1\n"),
            Some(SyncCounts { ahead: 3, behind: 1 })
        );
        assert_eq!(parse_sync_counts("0 0"), Some(SyncCounts::default()));
        assert_eq!(parse_sync_counts(""), None);
        assert_eq!(parse_sync_counts("nonsense"), None);
    }

    #[test]
    fn nothing_to_commit_patterns_match() {
        assert!(is_nothing_to_commit(
            "On branch main\nnothing to commit, working tree clean"
        ));
        assert!(is_nothing_to_commit(
            "Nothing added to commit but untracked files present"
        ));
        assert!(!is_nothing_to_commit("fatal: not a git repository"));
    }

    #[test]
    fn failures_classify_by_known_patterns() {
        assert!(matches!(
            classify_failure("fatal: Authentication failed for 'https://x'".into()),
            GitCliError::AuthFailed(_)
        ));
        assert!(matches!(
            classify_failure("! [rejected] main -> main (non-fast-forward)".into()),
            GitCliError::PushRejected(_)
        ));
        assert!(matches!(
            classify_failure("error: pathspec 'nope' did not match".into()),
            GitCliError::CommandFailed(_)
        ));
    }
}
