//! Repository snapshots and their reconciliation.
//!
//! Nothing here watches the filesystem: the working copy changes underneath
//! the app whenever an external command runs, so state is re-derived by
//! querying git and replacing the previous snapshot wholesale.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock, Mutex},
    time::Duration,
};

use git::{BranchSet, GitCli, GitCliError, SyncCounts, is_nothing_to_commit};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::RwLock, task::JoinSet};
use utils::shell::expand_tilde;

use crate::services::transcript::{Transcript, render_command};

// Serializes mutations and refreshes per repository path.
static REPO_LOCKS: LazyLock<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn repo_lock(repo: &Path) -> Arc<tokio::sync::Mutex<()>> {
    let path_str = repo.to_string_lossy().to_string();
    let mut locks = REPO_LOCKS.lock().unwrap();
    locks
        .entry(path_str)
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

/// Delays of the refresh waves kicked off after a mutation. A command's
/// effects can land on disk after it returns, so later waves re-query and
/// overwrite whatever the earlier ones produced.
pub const REFRESH_WAVES: [Duration; 3] = [
    Duration::ZERO,
    Duration::from_secs(1),
    Duration::from_secs(3),
];

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Path does not exist: {0}")]
    PathNotFound(PathBuf),
    #[error("Path is not a directory: {0}")]
    PathNotDirectory(PathBuf),
    #[error("Path is not a git repository: {0}")]
    NotGitRepository(PathBuf),
    #[error("Git error: {0}")]
    Git(#[from] GitCliError),
}

pub type Result<T> = std::result::Result<T, RepoError>;

/// Point-in-time view of one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoSnapshot {
    pub changed_files: Vec<String>,
    pub branches: BranchSet,
    pub sync: Option<SyncCounts>,
    pub selection: Option<Selection>,
}

/// The changed file whose diff is on display, with the diff loaded eagerly
/// so consumers never hold a path without its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub path: String,
    pub diff: String,
}

/// Outcome of a multi-step flow: whether it completed, and what each step
/// printed.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub success: bool,
    pub transcript: String,
}

impl PipelineReport {
    fn halted(transcript: Transcript) -> Self {
        Self {
            success: false,
            transcript: transcript.into_string(),
        }
    }
}

#[derive(Clone, Default)]
pub struct RepoService {
    git: GitCli,
}

impl RepoService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_git(git: GitCli) -> Self {
        Self { git }
    }

    pub fn git(&self) -> &GitCli {
        &self.git
    }

    pub fn normalize_path(&self, path: &str) -> std::io::Result<PathBuf> {
        std::path::absolute(expand_tilde(path))
    }

    pub fn validate_git_repo_path(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(RepoError::PathNotFound(path.to_path_buf()));
        }

        if !path.is_dir() {
            return Err(RepoError::PathNotDirectory(path.to_path_buf()));
        }

        if !path.join(".git").exists() {
            return Err(RepoError::NotGitRepository(path.to_path_buf()));
        }

        Ok(())
    }

    pub async fn checkout(&self, repo: &Path, branch: &str) -> Result<()> {
        let lock = repo_lock(repo);
        let _guard = lock.lock().await;
        Ok(self.git.checkout(repo, branch).await?)
    }

    pub async fn pull(&self, repo: &Path) -> Result<()> {
        let lock = repo_lock(repo);
        let _guard = lock.lock().await;
        Ok(self.git.pull(repo).await?)
    }

    /// Stage, commit, push — each recorded in the transcript. A failing step
    /// halts the pipeline, except that an empty index is tolerated so a
    /// commit made earlier can still be pushed.
    pub async fn push_pipeline(&self, repo: &Path, message: &str) -> Result<PipelineReport> {
        self.validate_git_repo_path(repo)?;
        let lock = repo_lock(repo);
        let _guard = lock.lock().await;

        let mut transcript = Transcript::new();

        let add_args = ["add", "."];
        let add = self.git.raw(Some(repo), add_args).await?;
        transcript.step(&render_command("git", add_args), &add);
        if !add.success() {
            return Ok(PipelineReport::halted(transcript));
        }

        let commit_args = ["commit", "-m", message];
        let commit = self.git.raw(Some(repo), commit_args).await?;
        transcript.step(&render_command("git", commit_args), &commit);
        if !commit.success() {
            if !is_nothing_to_commit(&commit.combined()) {
                return Ok(PipelineReport::halted(transcript));
            }
            transcript.note("nothing new to commit; pushing what exists");
        }

        let push_args = ["push"];
        let push = self.git.raw(Some(repo), push_args).await?;
        transcript.step(&render_command("git", push_args), &push);

        Ok(PipelineReport {
            success: push.success(),
            transcript: transcript.into_string(),
        })
    }
}

/// Maintains the snapshot of one repository.
///
/// Clones share the same underlying state, so one handle can be parked in a
/// background task while another serves reads.
#[derive(Clone)]
pub struct Reconciler {
    service: RepoService,
    repo: PathBuf,
    state: Arc<RwLock<RepoSnapshot>>,
}

impl Reconciler {
    pub fn new(service: RepoService, repo: PathBuf) -> Self {
        Self {
            service,
            repo,
            state: Arc::new(RwLock::new(RepoSnapshot::default())),
        }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    pub fn service(&self) -> &RepoService {
        &self.service
    }

    pub async fn snapshot(&self) -> RepoSnapshot {
        self.state.read().await.clone()
    }

    /// One reconciliation pass: re-query everything and replace the snapshot
    /// wholesale. A selection that still names a changed file survives with
    /// its diff intact; otherwise the first listed file becomes the selection
    /// and its diff is fetched before the snapshot is published.
    pub async fn refresh(&self) -> Result<RepoSnapshot> {
        let lock = repo_lock(&self.repo);
        let _guard = lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<RepoSnapshot> {
        let git = self.service.git();
        let changed_files = git.status_paths(&self.repo).await?;
        let branches = git.branch_set(&self.repo).await?;
        let sync = git.sync_counts(&self.repo).await?;

        let previous = self.state.read().await.selection.clone();
        let selection = match previous {
            Some(selection) if changed_files.contains(&selection.path) => Some(selection),
            _ => match changed_files.first() {
                Some(first) => {
                    let diff = git.diff(&self.repo, Some(first)).await?;
                    Some(Selection {
                        path: first.clone(),
                        diff,
                    })
                }
                None => None,
            },
        };

        let snapshot = RepoSnapshot {
            changed_files,
            branches,
            sync,
            selection,
        };
        *self.state.write().await = snapshot.clone();
        Ok(snapshot)
    }

    /// Makes `path` the selection and loads its diff. A path the snapshot
    /// does not list clears the selection instead.
    pub async fn select(&self, path: &str) -> Result<RepoSnapshot> {
        let lock = repo_lock(&self.repo);
        let _guard = lock.lock().await;

        let known = self
            .state
            .read()
            .await
            .changed_files
            .iter()
            .any(|p| p == path);
        let selection = if known {
            let diff = self.service.git().diff(&self.repo, Some(path)).await?;
            Some(Selection {
                path: path.to_string(),
                diff,
            })
        } else {
            None
        };

        let mut state = self.state.write().await;
        state.selection = selection;
        Ok(state.clone())
    }

    /// Spawns the staggered refresh waves and returns a handle over them.
    /// Each wave runs a full refresh; the last one to finish wins. Dropping
    /// the handle aborts waves that have not run yet.
    pub fn refresh_staggered(&self) -> RefreshHandle {
        let mut waves = JoinSet::new();
        for delay in REFRESH_WAVES {
            let reconciler = self.clone();
            waves.spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if let Err(err) = reconciler.refresh().await {
                    tracing::warn!(
                        repo = %reconciler.repo.display(),
                        %err,
                        "refresh wave failed"
                    );
                }
            });
        }
        RefreshHandle { waves }
    }
}

/// In-flight refresh waves. Await [`RefreshHandle::wait`] to join them,
/// [`RefreshHandle::detach`] to let them finish on their own, or drop the
/// handle to abort pending waves.
pub struct RefreshHandle {
    waves: JoinSet<()>,
}

impl RefreshHandle {
    pub async fn wait(mut self) {
        while self.waves.join_next().await.is_some() {}
    }

    pub fn detach(mut self) {
        tokio::spawn(async move { while self.waves.join_next().await.is_some() {} });
    }
}
