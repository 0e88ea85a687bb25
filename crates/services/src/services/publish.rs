//! Create-and-publish: turn a directory into a git repository with a first
//! commit, then create and push its remote on the hosting provider.

use std::{fs, path::Path};

use git::{GitCli, is_nothing_to_commit};
use utils::{
    command::CommandResult,
    text::{first_url, sanitize_project_name},
};

use crate::services::{
    git_host::GhCli,
    transcript::{Transcript, render_command},
};

/// Progress of the publish flow. `Failed` is reachable from every other
/// state and carries the reason; the transcript accumulated up to the
/// failing step is preserved in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishState {
    Idle,
    DirectoryPrepared,
    GitInitialized,
    CommitCreated,
    RemoteCreateAttempted,
    RemotePushed,
    FallbackRemoteResolution,
    FallbackPushed,
    Done,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub title: String,
    pub directory: std::path::PathBuf,
    pub private: bool,
}

/// Terminal report of one publish run.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub state: PublishState,
    pub transcript: String,
    /// Repository URL, when one was learned from the provider.
    pub url: Option<String>,
    /// Branch that was (or would have been) pushed.
    pub branch: String,
}

pub struct Publisher {
    git: GitCli,
    host: GhCli,
}

impl Publisher {
    pub fn new(git: GitCli, host: GhCli) -> Self {
        Self { git, host }
    }

    /// Drives the flow to a terminal state. Step failures surface as
    /// `PublishState::Failed`, never as a panic or a half-finished report.
    pub async fn publish(&self, request: &PublishRequest) -> PublishReport {
        let mut flow = PublishFlow::new();
        match self.drive(&mut flow, request).await {
            Ok(()) => flow.finish(),
            Err(reason) => flow.fail(reason),
        }
    }

    async fn drive(&self, flow: &mut PublishFlow, request: &PublishRequest) -> Result<(), String> {
        let title = sanitize_project_name(&request.title);
        if title.is_empty() || request.directory.as_os_str().is_empty() {
            return Err("a project title and target directory are both required".to_string());
        }
        let dir = request.directory.as_path();

        fs::create_dir_all(dir)
            .map_err(|err| format!("could not create {}: {err}", dir.display()))?;
        flow.advance(PublishState::DirectoryPrepared);

        if !dir.join(".git").exists() {
            let init = self.git_step(flow, dir, &["init"]).await?;
            if !init.success() {
                return Err("git init failed".to_string());
            }
        }
        self.git
            .ensure_commit_identity(dir)
            .await
            .map_err(|err| err.to_string())?;
        flow.advance(PublishState::GitInitialized);

        let readme = dir.join("README.md");
        if !readme.exists() {
            fs::write(&readme, format!("# {title}\n"))
                .map_err(|err| format!("could not write README.md: {err}"))?;
            flow.note("created README.md");
        }

        let add = self.git_step(flow, dir, &["add", "."]).await?;
        if !add.success() {
            return Err("git add failed".to_string());
        }

        let commit = self
            .git_step(flow, dir, &["commit", "-m", "Initial commit"])
            .await?;
        if !commit.success() && !is_nothing_to_commit(&commit.combined()) {
            return Err("initial commit failed".to_string());
        }

        // The push below needs a commit to exist even when the directory had
        // nothing stageable.
        if !self.has_head(dir).await? {
            let empty = self
                .git_step(flow, dir, &["commit", "--allow-empty", "-m", "Initial commit"])
                .await?;
            if !empty.success() || !self.has_head(dir).await? {
                return Err("could not create an initial commit".to_string());
            }
        }
        flow.advance(PublishState::CommitCreated);

        flow.branch = self.normalized_branch(flow, dir).await?;

        let visibility = if request.private {
            "--private"
        } else {
            "--public"
        };
        let primary_args = [
            "repo", "create", &title, visibility, "--source", ".", "--remote", "origin", "--push",
        ];
        let primary = self.host_step(flow, Some(dir), &primary_args).await?;
        flow.advance(PublishState::RemoteCreateAttempted);
        if primary.success() {
            flow.url = first_url(&primary.combined());
            flow.advance(PublishState::RemotePushed);
            return Ok(());
        }

        // One fallback: create the repository bare on the provider, then wire
        // up the remote and push by hand.
        flow.note("create-with-source failed; retrying with a plain create");
        let create = self
            .host_step(flow, None, &["repo", "create", &title, visibility, "--confirm"])
            .await?;
        if !create.success() {
            return Err("remote repository creation failed".to_string());
        }
        flow.advance(PublishState::FallbackRemoteResolution);

        let url = self
            .host
            .repository_url(&title)
            .await
            .map_err(|err| err.to_string())?
            .ok_or_else(|| "could not resolve the new repository's URL".to_string())?;
        flow.note(format!("resolved remote URL: {url}"));

        let add_remote = self
            .git_step(flow, dir, &["remote", "add", "origin", &url])
            .await?;
        if !add_remote.success() {
            let set_url = self
                .git_step(flow, dir, &["remote", "set-url", "origin", &url])
                .await?;
            if !set_url.success() {
                return Err("could not configure the origin remote".to_string());
            }
        }

        let branch = flow.branch.clone();
        let push = self
            .git_step(flow, dir, &["push", "-u", "origin", &branch])
            .await?;
        if !push.success() {
            return Err("pushing to the new remote failed".to_string());
        }
        flow.url = Some(url);
        flow.advance(PublishState::FallbackPushed);
        Ok(())
    }

    /// Current branch short name, renaming to `main` when HEAD is unborn or
    /// ambiguous.
    async fn normalized_branch(&self, flow: &mut PublishFlow, dir: &Path) -> Result<String, String> {
        let current = self
            .git_step(flow, dir, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        let name = if current.success() {
            current.stdout.trim().to_string()
        } else {
            String::new()
        };
        if name.is_empty() || name == "HEAD" {
            let rename = self.git_step(flow, dir, &["branch", "-M", "main"]).await?;
            if !rename.success() {
                return Err("could not rename the initial branch".to_string());
            }
            return Ok("main".to_string());
        }
        Ok(name)
    }

    async fn has_head(&self, dir: &Path) -> Result<bool, String> {
        self.git
            .has_commits(dir)
            .await
            .map_err(|err| err.to_string())
    }

    async fn git_step(
        &self,
        flow: &mut PublishFlow,
        dir: &Path,
        args: &[&str],
    ) -> Result<CommandResult, String> {
        let result = self
            .git
            .raw(Some(dir), args.iter().copied())
            .await
            .map_err(|err| err.to_string())?;
        flow.step("git", args, &result);
        Ok(result)
    }

    async fn host_step(
        &self,
        flow: &mut PublishFlow,
        dir: Option<&Path>,
        args: &[&str],
    ) -> Result<CommandResult, String> {
        let result = self
            .host
            .raw(dir, args.iter().copied())
            .await
            .map_err(|err| err.to_string())?;
        flow.step("gh", args, &result);
        Ok(result)
    }
}

struct PublishFlow {
    state: PublishState,
    transcript: Transcript,
    url: Option<String>,
    branch: String,
}

impl PublishFlow {
    fn new() -> Self {
        Self {
            state: PublishState::Idle,
            transcript: Transcript::new(),
            url: None,
            branch: String::new(),
        }
    }

    fn advance(&mut self, next: PublishState) {
        tracing::debug!(state = ?next, "publish flow advanced");
        self.state = next;
    }

    fn note(&mut self, line: impl AsRef<str>) {
        self.transcript.note(line);
    }

    fn step(&mut self, program: &str, args: &[&str], result: &CommandResult) {
        self.transcript
            .step(&render_command(program, args.iter().copied()), result);
    }

    fn finish(mut self) -> PublishReport {
        self.advance(PublishState::Done);
        PublishReport {
            state: self.state,
            transcript: self.transcript.into_string(),
            url: self.url,
            branch: self.branch,
        }
    }

    fn fail(mut self, reason: String) -> PublishReport {
        tracing::warn!(%reason, "publish flow failed");
        self.state = PublishState::Failed(reason);
        PublishReport {
            state: self.state,
            transcript: self.transcript.into_string(),
            url: self.url,
            branch: self.branch,
        }
    }
}
