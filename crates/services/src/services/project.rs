//! Saved repositories: the persisted list, cloning, and local discovery.

use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use git::{GitCli, GitCliError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::services::{
    git_host::RepoSummary,
    transcript::{Transcript, render_command},
};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("no data directory is available on this platform")]
    NoDataDir,
    #[error("a record needs both a name and a path")]
    EmptyField,
    #[error("a repository link and target directory are both required")]
    MissingCloneInput,
    #[error("Git error: {0}")]
    Git(#[from] GitCliError),
}

pub type Result<T> = std::result::Result<T, ProjectError>;

/// One remembered repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRepo {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub last_updated: DateTime<Utc>,
}

impl SavedRepo {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            last_updated: Utc::now(),
        }
    }
}

/// JSON-file store for [`SavedRepo`] records.
///
/// Loading never fails: a missing file is an empty store and unreadable
/// content is logged and replaced on the next save.
#[derive(Debug, Clone)]
pub struct RepoStore {
    path: PathBuf,
}

impl RepoStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_location() -> Result<PathBuf> {
        let base = dirs::data_dir().ok_or(ProjectError::NoDataDir)?;
        Ok(base.join("gitdeck").join("repositories.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Vec<SavedRepo> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(repos) => repos,
                Err(err) => {
                    tracing::warn!(
                        %err,
                        path = %self.path.display(),
                        "saved-repo store was unreadable; starting empty"
                    );
                    Vec::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                tracing::warn!(%err, path = %self.path.display(), "could not read saved repos");
                Vec::new()
            }
        }
    }

    /// Records sorted most recently updated first.
    pub fn list(&self) -> Vec<SavedRepo> {
        let mut repos = self.load();
        repos.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        repos
    }

    pub fn save(&self, repos: &[SavedRepo]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(repos)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    /// Inserts, or updates in place when a record for `path` already exists;
    /// an updated record keeps its id but takes the new name and a fresh
    /// timestamp.
    pub fn add(&self, name: &str, path: &str) -> Result<SavedRepo> {
        if name.trim().is_empty() || path.trim().is_empty() {
            return Err(ProjectError::EmptyField);
        }
        let mut repos = self.load();
        let record = match repos.iter_mut().find(|repo| repo.path == path) {
            Some(existing) => {
                existing.name = name.to_string();
                existing.last_updated = Utc::now();
                existing.clone()
            }
            None => {
                let record = SavedRepo::new(name, path);
                repos.push(record.clone());
                record
            }
        };
        self.save(&repos)?;
        Ok(record)
    }

    pub fn touch(&self, id: Uuid) -> Result<()> {
        let mut repos = self.load();
        if let Some(repo) = repos.iter_mut().find(|repo| repo.id == id) {
            repo.last_updated = Utc::now();
            self.save(&repos)?;
        }
        Ok(())
    }

    /// Removes the record only; the working copy on disk is the caller's
    /// decision.
    pub fn remove(&self, id: Uuid) -> Result<Option<SavedRepo>> {
        let mut repos = self.load();
        let removed = repos
            .iter()
            .position(|repo| repo.id == id)
            .map(|idx| repos.remove(idx));
        if removed.is_some() {
            self.save(&repos)?;
        }
        Ok(removed)
    }
}

/// Outcome of one clone, with the record that was saved on success.
#[derive(Debug, Clone)]
pub struct CloneReport {
    pub success: bool,
    pub target: PathBuf,
    pub transcript: String,
    pub record: Option<SavedRepo>,
}

/// Cloning and local discovery built on top of the store.
pub struct ProjectService {
    git: GitCli,
    store: RepoStore,
}

impl ProjectService {
    pub fn new(git: GitCli, store: RepoStore) -> Self {
        Self { git, store }
    }

    pub fn store(&self) -> &RepoStore {
        &self.store
    }

    /// Where a clone of `url` should land. An existing directory gains a
    /// child named after the explicit title or the repository; any other
    /// base is treated as the full target path.
    pub fn clone_target(base: &Path, url: &str, title: Option<&str>) -> PathBuf {
        if base.is_dir() {
            let name = match title.map(str::trim).filter(|t| !t.is_empty()) {
                Some(title) => title.to_string(),
                None => derive_repo_name(url),
            };
            base.join(name)
        } else {
            base.to_path_buf()
        }
    }

    /// Clones `url` under `base` and saves the record when the clone
    /// succeeds. A failed clone is reported, not returned as `Err`.
    pub async fn clone_and_save(
        &self,
        url: &str,
        base: &Path,
        title: Option<&str>,
    ) -> Result<CloneReport> {
        let url = url.trim();
        if url.is_empty() || base.as_os_str().is_empty() {
            return Err(ProjectError::MissingCloneInput);
        }

        let target = Self::clone_target(base, url, title);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let result = self.git.clone_repo(url, &target).await?;
        let mut transcript = Transcript::new();
        let shown = target.to_string_lossy();
        transcript.step(
            &render_command("git", ["clone", url, shown.as_ref()]),
            &result,
        );
        if !result.success() {
            return Ok(CloneReport {
                success: false,
                target,
                transcript: transcript.into_string(),
                record: None,
            });
        }

        let name = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => title.to_string(),
            None => target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| derive_repo_name(url)),
        };
        let record = self.store.add(&name, shown.as_ref())?;
        Ok(CloneReport {
            success: true,
            target,
            transcript: transcript.into_string(),
            record: Some(record),
        })
    }

    /// Walks `base` for git working copies. A directory containing `.git`
    /// is reported and not descended into, so nested checkouts inside a
    /// repository (vendored trees, worktrees) stay hidden.
    pub fn scan_local_repos(base: &Path) -> Vec<RepoSummary> {
        let mut found = Vec::new();
        let mut stack = vec![base.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            let mut children = Vec::new();
            let mut is_repo = false;
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                if path.file_name() == Some(OsStr::new(".git")) {
                    is_repo = true;
                } else {
                    children.push(path);
                }
            }
            if is_repo {
                let name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| dir.display().to_string());
                found.push(RepoSummary {
                    name,
                    ssh_url: Some(dir.to_string_lossy().into_owned()),
                    url: Some(format!("file://{}", dir.display())),
                });
            } else {
                stack.extend(children);
            }
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}

/// Last path-ish segment of a repository URL, without any `.git` suffix.
fn derive_repo_name(url: &str) -> String {
    let last = url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(url);
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        "repo".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn repo_names_derive_from_urls() {
        assert_eq!(derive_repo_name("https://github.com/o/widget.git"), "widget");
        assert_eq!(derive_repo_name("https://github.com/o/widget"), "widget");
        assert_eq!(derive_repo_name("git@github.com:o/widget.git"), "widget");
        assert_eq!(derive_repo_name("https://github.com/o/widget/"), "widget");
        assert_eq!(derive_repo_name(""), "repo");
    }

    #[test]
    fn clone_targets_nest_under_existing_directories() {
        let base = TempDir::new().unwrap();
        let url = "https://github.com/o/widget.git";

        let derived = ProjectService::clone_target(base.path(), url, None);
        assert_eq!(derived, base.path().join("widget"));

        let titled = ProjectService::clone_target(base.path(), url, Some("My Widget"));
        assert_eq!(titled, base.path().join("My Widget"));

        // a base that is not an existing directory is the target itself
        let missing = base.path().join("checkouts").join("widget");
        assert_eq!(
            ProjectService::clone_target(&missing, url, None),
            missing
        );
    }

    #[test]
    fn store_adds_updates_and_removes_records() {
        let dir = TempDir::new().unwrap();
        let store = RepoStore::new(dir.path().join("repos.json"));
        assert!(store.load().is_empty());

        let first = store.add("widget", "/tmp/widget").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let renamed = store.add("widget-2", "/tmp/widget").unwrap();
        assert_eq!(first.id, renamed.id);
        assert!(renamed.last_updated > first.last_updated);
        assert_eq!(store.load().len(), 1);

        let other = store.add("gadget", "/tmp/gadget").unwrap();
        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, other.id);

        assert_eq!(store.remove(other.id).unwrap().map(|r| r.name).as_deref(), Some("gadget"));
        assert_eq!(store.load().len(), 1);
        assert!(store.remove(other.id).unwrap().is_none());
    }

    #[test]
    fn unreadable_store_content_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repos.json");
        fs::write(&path, "{ definitely not a list").unwrap();
        let store = RepoStore::new(path);
        assert!(store.load().is_empty());
    }

    #[test]
    fn blank_fields_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = RepoStore::new(dir.path().join("repos.json"));
        assert!(matches!(
            store.add("  ", "/tmp/x"),
            Err(ProjectError::EmptyField)
        ));
        assert!(matches!(store.add("x", ""), Err(ProjectError::EmptyField)));
    }

    #[test]
    fn scans_find_repos_without_descending_into_them() {
        let base = TempDir::new().unwrap();
        let mk = |segments: &[&str]| {
            let mut path = base.path().to_path_buf();
            for segment in segments {
                path.push(segment);
            }
            fs::create_dir_all(path).unwrap();
        };
        mk(&["alpha", ".git"]);
        mk(&["group", "beta", ".git"]);
        // a checkout nested inside alpha must stay hidden
        mk(&["alpha", "vendor", "dep", ".git"]);
        mk(&["empty", "nothing-here"]);

        let found = ProjectService::scan_local_repos(base.path());
        let names: Vec<&str> = found.iter().map(|repo| repo.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert!(found[0].url.as_deref().unwrap_or_default().starts_with("file://"));
    }
}
