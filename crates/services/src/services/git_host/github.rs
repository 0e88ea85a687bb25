//! GitHub hosting operations driven through the `gh` CLI.
//!
//! Listings ask for JSON with explicit field lists and decode into wire
//! structs; one undecodable element drops that element, not the whole list.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, de::DeserializeOwned};
use utils::{
    command::{CommandResult, CommandRunner},
    shell,
    text::truncate_to_char_boundary,
};
use uuid::Uuid;

use super::{
    GitHost,
    types::{
        Comment, GitHostError, Issue, ItemState, PullRequest, RepoSummary, StateFilter,
        UserAccount,
    },
};
use crate::services::transcript::{Transcript, render_command};

/// `gh` reserves this exit code for "not logged in".
const GH_AUTH_EXIT_CODE: i32 = 4;

const LIST_LIMIT: &str = "100";
const ISSUE_FIELDS: &str = "number,title,state,url,body,author,assignees";
const PR_FIELDS: &str = "number,title,state,url,body,author,assignees,headRefName,baseRefName";
const REPO_FIELDS: &str = "name,sshUrl,url";

#[derive(Debug, Clone)]
pub struct GhCli {
    runner: CommandRunner,
    deadline: Option<Duration>,
}

impl Default for GhCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GhCli {
    pub fn new() -> Self {
        Self::with_runner(CommandRunner::new())
    }

    pub fn with_runner(runner: CommandRunner) -> Self {
        Self {
            runner,
            deadline: None,
        }
    }

    /// Caps every invocation at `limit`; the child is killed on expiry.
    pub fn with_deadline(mut self, limit: Duration) -> Self {
        self.deadline = Some(limit);
        self
    }

    pub async fn available(&self) -> bool {
        self.raw(None, ["--version"])
            .await
            .map(|result| result.success())
            .unwrap_or(false)
    }

    /// Runs `gh` with the given argv and hands back the raw result without
    /// interpreting the exit status.
    pub async fn raw<I, S>(
        &self,
        repo: Option<&Path>,
        args: I,
    ) -> Result<CommandResult, GitHostError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let invocation = self.runner.run("gh", args, repo);
        let result = match self.deadline {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(result) => result,
                Err(_) => return Err(GitHostError::TimedOut(limit)),
            },
            None => invocation.await,
        };

        if result.launch_failed() {
            tracing::warn!(message = %result.stderr, "gh could not be launched");
            return Err(GitHostError::NotAvailable);
        }
        Ok(result)
    }

    async fn gh<I, S>(&self, repo: Option<&Path>, args: I) -> Result<String, GitHostError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let result = self.raw(repo, args).await?;
        if result.success() {
            return Ok(result.stdout);
        }
        Err(classify_failure(&result))
    }

    /// Runs a user-entered command line, split with POSIX word rules. A
    /// leading `gh` token is tolerated so pasted commands work as typed.
    pub async fn run_line(
        &self,
        repo: Option<&Path>,
        line: &str,
    ) -> Result<CommandResult, GitHostError> {
        let Some(mut words) = shell::split_command_line(line) else {
            return Err(GitHostError::CommandFailed(
                "nothing to run in the entered command".to_string(),
            ));
        };
        if words.first().map(String::as_str) == Some("gh") {
            words.remove(0);
        }
        if words.is_empty() {
            return Err(GitHostError::CommandFailed(
                "nothing to run in the entered command".to_string(),
            ));
        }
        self.raw(repo, words).await
    }

    pub async fn auth_status(&self) -> Result<bool, GitHostError> {
        let result = self.raw(None, ["auth", "status"]).await?;
        if result.success() {
            return Ok(true);
        }
        if is_auth_failure(&result) {
            return Ok(false);
        }
        Err(command_failed(&result))
    }

    /// Starts the browser-based login; `gh` drives the rest.
    pub async fn login_web(&self) -> Result<CommandResult, GitHostError> {
        self.raw(None, ["auth", "login", "--web"]).await
    }

    pub async fn current_user(&self) -> Result<UserAccount, GitHostError> {
        let raw = self.gh(None, ["api", "user"]).await?;
        let user: GhApiUserResponse = serde_json::from_str(raw.trim())
            .map_err(|err| unexpected_output("gh api user response", &raw, &err))?;
        Ok(UserAccount {
            login: user.login,
            name: user.name.filter(|name| !name.is_empty()),
            avatar_url: user.avatar_url,
        })
    }

    pub async fn list_issues(
        &self,
        repo: &Path,
        filter: StateFilter,
    ) -> Result<Vec<Issue>, GitHostError> {
        let raw = self
            .gh(
                Some(repo),
                [
                    "issue",
                    "list",
                    "--state",
                    filter.as_arg(),
                    "--json",
                    ISSUE_FIELDS,
                    "--limit",
                    LIST_LIMIT,
                ],
            )
            .await?;
        let issues: Vec<GhIssueResponse> = decode_list("gh issue list response", &raw)?;
        Ok(issues.into_iter().map(Into::into).collect())
    }

    pub async fn create_issue(
        &self,
        repo: &Path,
        title: &str,
        body: &str,
    ) -> Result<String, GitHostError> {
        self.gh(
            Some(repo),
            ["issue", "create", "--title", title, "--body", body],
        )
        .await
        .map(|out| out.trim().to_string())
    }

    pub async fn close_issue(&self, repo: &Path, number: i64) -> Result<String, GitHostError> {
        self.gh(Some(repo), ["issue", "close", &number.to_string()])
            .await
            .map(|out| out.trim().to_string())
    }

    pub async fn reopen_issue(&self, repo: &Path, number: i64) -> Result<String, GitHostError> {
        self.gh(Some(repo), ["issue", "reopen", &number.to_string()])
            .await
            .map(|out| out.trim().to_string())
    }

    pub async fn issue_comments(
        &self,
        repo: &Path,
        number: i64,
    ) -> Result<Vec<Comment>, GitHostError> {
        let raw = self
            .gh(
                Some(repo),
                ["issue", "view", &number.to_string(), "--json", "comments"],
            )
            .await?;
        parse_comments("gh issue view --json comments response", &raw)
    }

    pub async fn comment_issue(
        &self,
        repo: &Path,
        number: i64,
        body: &str,
    ) -> Result<String, GitHostError> {
        self.gh(
            Some(repo),
            ["issue", "comment", &number.to_string(), "--body", body],
        )
        .await
        .map(|out| out.trim().to_string())
    }

    pub async fn list_pull_requests(
        &self,
        repo: &Path,
        filter: StateFilter,
    ) -> Result<Vec<PullRequest>, GitHostError> {
        let raw = self
            .gh(
                Some(repo),
                [
                    "pr",
                    "list",
                    "--state",
                    filter.as_arg(),
                    "--json",
                    PR_FIELDS,
                    "--limit",
                    LIST_LIMIT,
                ],
            )
            .await?;
        let prs: Vec<GhPrResponse> = decode_list("gh pr list response", &raw)?;
        Ok(prs.into_iter().map(Into::into).collect())
    }

    pub async fn pull_request_merged(
        &self,
        repo: &Path,
        number: i64,
    ) -> Result<bool, GitHostError> {
        let raw = self
            .gh(
                Some(repo),
                ["pr", "view", &number.to_string(), "--json", "merged"],
            )
            .await?;
        let merged: GhMergedResponse = serde_json::from_str(raw.trim())
            .map_err(|err| unexpected_output("gh pr view --json merged response", &raw, &err))?;
        Ok(merged.merged)
    }

    pub async fn merge_pull_request(
        &self,
        repo: &Path,
        number: i64,
    ) -> Result<String, GitHostError> {
        self.gh(Some(repo), ["pr", "merge", &number.to_string()])
            .await
            .map(|out| out.trim().to_string())
    }

    pub async fn close_pull_request(
        &self,
        repo: &Path,
        number: i64,
    ) -> Result<String, GitHostError> {
        self.gh(Some(repo), ["pr", "close", &number.to_string()])
            .await
            .map(|out| out.trim().to_string())
    }

    pub async fn pull_request_comments(
        &self,
        repo: &Path,
        number: i64,
    ) -> Result<Vec<Comment>, GitHostError> {
        let raw = self
            .gh(
                Some(repo),
                ["pr", "view", &number.to_string(), "--json", "comments"],
            )
            .await?;
        parse_comments("gh pr view --json comments response", &raw)
    }

    pub async fn comment_pull_request(
        &self,
        repo: &Path,
        number: i64,
        body: &str,
    ) -> Result<String, GitHostError> {
        self.gh(
            Some(repo),
            ["pr", "comment", &number.to_string(), "--body", body],
        )
        .await
        .map(|out| out.trim().to_string())
    }

    /// Lists the account's repositories. When the tool prints something other
    /// than the requested JSON (older versions print a table), falls back to
    /// line parsing rather than failing.
    pub async fn list_repositories(&self) -> Result<Vec<RepoSummary>, GitHostError> {
        let raw = self
            .gh(
                None,
                ["repo", "list", "--limit", LIST_LIMIT, "--json", REPO_FIELDS],
            )
            .await?;
        match serde_json::from_str::<Vec<GhRepoResponse>>(raw.trim()) {
            Ok(repos) => Ok(repos.into_iter().map(Into::into).collect()),
            Err(err) => {
                tracing::debug!(%err, "repo list was not JSON; parsing lines");
                Ok(parse_repo_lines(&raw))
            }
        }
    }

    /// Resolves the web or SSH URL of a repository the account owns.
    pub async fn repository_url(&self, name: &str) -> Result<Option<String>, GitHostError> {
        let raw = self
            .gh(None, ["repo", "view", name, "--json", "url,sshUrl"])
            .await?;
        let view: GhRepoViewResponse = serde_json::from_str(raw.trim())
            .map_err(|err| unexpected_output("gh repo view response", &raw, &err))?;
        Ok(view.url.or(view.ssh_url).filter(|url| !url.is_empty()))
    }

    /// Creates a release for `tag`, then uploads each staged asset with
    /// `--clobber`. Directory assets are zipped from their parent so the
    /// archive keeps the directory as its top-level entry; assets that cannot
    /// be staged are skipped with a transcript note.
    pub async fn create_release(
        &self,
        repo: &Path,
        release: &ReleaseSpec,
    ) -> Result<ReleaseReport, GitHostError> {
        let tag = release.tag.trim();
        if tag.is_empty() {
            return Err(GitHostError::CommandFailed(
                "a release tag is required".to_string(),
            ));
        }

        let mut transcript = Transcript::new();
        // The staging directory must outlive every upload step.
        let staging = tempfile::tempdir().map_err(|err| {
            GitHostError::CommandFailed(format!("could not create a staging directory: {err}"))
        })?;
        let staged = self
            .stage_assets(&release.assets, staging.path(), &mut transcript)
            .await;

        let mut args: Vec<String> = vec!["release".into(), "create".into(), tag.into()];
        if let Some(title) = release.title.as_deref().filter(|t| !t.trim().is_empty()) {
            args.push("--title".into());
            args.push(title.into());
        }
        if let Some(notes) = release.notes.as_deref() {
            args.push("--notes".into());
            args.push(notes.into());
        }
        let create = self.raw(Some(repo), &args).await?;
        transcript.step(&render_command("gh", args.iter().map(String::as_str)), &create);
        if !create.success() {
            return Ok(ReleaseReport {
                created: false,
                failed_uploads: Vec::new(),
                transcript: transcript.into_string(),
            });
        }

        let mut failed_uploads = Vec::new();
        for path in &staged {
            let shown = path.to_string_lossy();
            let upload_args = ["release", "upload", tag, shown.as_ref(), "--clobber"];
            let upload = self.raw(Some(repo), upload_args).await?;
            transcript.step(&render_command("gh", upload_args), &upload);
            if !upload.success() {
                failed_uploads.push(
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string()),
                );
            }
        }
        Ok(ReleaseReport {
            created: true,
            failed_uploads,
            transcript: transcript.into_string(),
        })
    }

    async fn stage_assets(
        &self,
        assets: &[PathBuf],
        staging: &Path,
        transcript: &mut Transcript,
    ) -> Vec<PathBuf> {
        let mut staged = Vec::new();
        for asset in assets {
            let Some(name) = asset.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                transcript.note(format!(
                    "skipping asset without a file name: {}",
                    asset.display()
                ));
                continue;
            };
            if asset.is_dir() {
                let archive = staging.join(format!("{name}.zip"));
                let parent = asset.parent().unwrap_or_else(|| Path::new("."));
                let result = self
                    .runner
                    .run(
                        "zip",
                        [
                            OsStr::new("-r"),
                            archive.as_os_str(),
                            OsStr::new(name.as_str()),
                        ],
                        Some(parent),
                    )
                    .await;
                if result.success() {
                    staged.push(archive);
                } else {
                    transcript.note(format!(
                        "skipping {name}: zip exited with {}",
                        result.status
                    ));
                }
            } else if asset.is_file() {
                let copy = staging.join(&name);
                match std::fs::copy(asset, &copy) {
                    Ok(_) => staged.push(copy),
                    Err(err) => transcript.note(format!("skipping {name}: {err}")),
                }
            } else {
                transcript.note(format!("skipping missing asset: {}", asset.display()));
            }
        }
        staged
    }
}

/// What to publish as one release.
#[derive(Debug, Clone, Default)]
pub struct ReleaseSpec {
    pub tag: String,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub assets: Vec<PathBuf>,
}

/// Outcome of a release: whether the release itself was created, which
/// uploads failed, and the step-by-step transcript.
#[derive(Debug, Clone)]
pub struct ReleaseReport {
    pub created: bool,
    pub failed_uploads: Vec<String>,
    pub transcript: String,
}

#[async_trait]
impl GitHost for GhCli {
    async fn authenticated(&self) -> Result<bool, GitHostError> {
        self.auth_status().await
    }

    async fn current_user(&self) -> Result<UserAccount, GitHostError> {
        GhCli::current_user(self).await
    }

    async fn list_issues(
        &self,
        repo: &Path,
        filter: StateFilter,
    ) -> Result<Vec<Issue>, GitHostError> {
        GhCli::list_issues(self, repo, filter).await
    }

    async fn create_issue(
        &self,
        repo: &Path,
        title: &str,
        body: &str,
    ) -> Result<String, GitHostError> {
        GhCli::create_issue(self, repo, title, body).await
    }

    async fn close_issue(&self, repo: &Path, number: i64) -> Result<String, GitHostError> {
        GhCli::close_issue(self, repo, number).await
    }

    async fn reopen_issue(&self, repo: &Path, number: i64) -> Result<String, GitHostError> {
        GhCli::reopen_issue(self, repo, number).await
    }

    async fn issue_comments(
        &self,
        repo: &Path,
        number: i64,
    ) -> Result<Vec<Comment>, GitHostError> {
        GhCli::issue_comments(self, repo, number).await
    }

    async fn comment_issue(
        &self,
        repo: &Path,
        number: i64,
        body: &str,
    ) -> Result<String, GitHostError> {
        GhCli::comment_issue(self, repo, number, body).await
    }

    async fn list_pull_requests(
        &self,
        repo: &Path,
        filter: StateFilter,
    ) -> Result<Vec<PullRequest>, GitHostError> {
        GhCli::list_pull_requests(self, repo, filter).await
    }

    async fn pull_request_merged(&self, repo: &Path, number: i64) -> Result<bool, GitHostError> {
        GhCli::pull_request_merged(self, repo, number).await
    }

    async fn merge_pull_request(&self, repo: &Path, number: i64) -> Result<String, GitHostError> {
        GhCli::merge_pull_request(self, repo, number).await
    }

    async fn close_pull_request(&self, repo: &Path, number: i64) -> Result<String, GitHostError> {
        GhCli::close_pull_request(self, repo, number).await
    }

    async fn pull_request_comments(
        &self,
        repo: &Path,
        number: i64,
    ) -> Result<Vec<Comment>, GitHostError> {
        GhCli::pull_request_comments(self, repo, number).await
    }

    async fn comment_pull_request(
        &self,
        repo: &Path,
        number: i64,
        body: &str,
    ) -> Result<String, GitHostError> {
        GhCli::comment_pull_request(self, repo, number, body).await
    }

    async fn list_repositories(&self) -> Result<Vec<RepoSummary>, GitHostError> {
        GhCli::list_repositories(self).await
    }

    async fn repository_url(&self, name: &str) -> Result<Option<String>, GitHostError> {
        GhCli::repository_url(self, name).await
    }
}

#[derive(Debug, Deserialize)]
struct GhActorResponse {
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhIssueResponse {
    number: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    state: ItemState,
    #[serde(default)]
    url: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    author: Option<GhActorResponse>,
    #[serde(default)]
    assignees: Vec<GhActorResponse>,
}

impl From<GhIssueResponse> for Issue {
    fn from(raw: GhIssueResponse) -> Self {
        Issue {
            number: raw.number,
            title: raw.title,
            state: raw.state,
            url: raw.url,
            body: raw.body.filter(|body| !body.is_empty()),
            author: raw.author.and_then(|a| a.login),
            assignees: raw
                .assignees
                .into_iter()
                .filter_map(|a| a.login)
                .collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPrResponse {
    number: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    state: ItemState,
    #[serde(default)]
    url: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    author: Option<GhActorResponse>,
    #[serde(default)]
    assignees: Vec<GhActorResponse>,
    #[serde(default)]
    head_ref_name: String,
    #[serde(default)]
    base_ref_name: String,
}

impl From<GhPrResponse> for PullRequest {
    fn from(raw: GhPrResponse) -> Self {
        PullRequest {
            number: raw.number,
            title: raw.title,
            state: raw.state,
            url: raw.url,
            body: raw.body.filter(|body| !body.is_empty()),
            author: raw.author.and_then(|a| a.login),
            assignees: raw
                .assignees
                .into_iter()
                .filter_map(|a| a.login)
                .collect(),
            head_branch: raw.head_ref_name,
            base_branch: raw.base_ref_name,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhCommentResponse {
    #[serde(default)]
    author: Option<GhActorResponse>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    created_at: String,
}

#[derive(Deserialize)]
struct GhCommentsWrapper {
    #[serde(default)]
    comments: Vec<GhCommentResponse>,
}

#[derive(Deserialize)]
struct GhMergedResponse {
    #[serde(default)]
    merged: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhRepoResponse {
    name: String,
    #[serde(default)]
    ssh_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl From<GhRepoResponse> for RepoSummary {
    fn from(raw: GhRepoResponse) -> Self {
        RepoSummary {
            name: raw.name,
            ssh_url: raw.ssh_url.filter(|url| !url.is_empty()),
            url: raw.url.filter(|url| !url.is_empty()),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhRepoViewResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ssh_url: Option<String>,
}

// `gh api user` proxies the REST shape, so fields are snake_case here.
#[derive(Deserialize)]
struct GhApiUserResponse {
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

fn classify_failure(result: &CommandResult) -> GitHostError {
    if is_auth_failure(result) {
        return GitHostError::AuthFailed(result.combined().trim().to_string());
    }
    command_failed(result)
}

fn command_failed(result: &CommandResult) -> GitHostError {
    let message = result.combined().trim().to_string();
    GitHostError::CommandFailed(if message.is_empty() {
        "command failed with no output".to_string()
    } else {
        message
    })
}

fn is_auth_failure(result: &CommandResult) -> bool {
    // Exit code first; string matching covers older gh versions.
    if result.status == GH_AUTH_EXIT_CODE {
        return true;
    }
    let lower = result.combined().to_ascii_lowercase();
    lower.contains("authentication failed")
        || lower.contains("must authenticate")
        || lower.contains("bad credentials")
        || lower.contains("unauthorized")
        || lower.contains("not logged in")
        || lower.contains("gh auth login")
}

/// Decodes a JSON array element by element. An element that does not decode
/// is dropped so one malformed record cannot hide the rest of the list;
/// non-array output is an error.
fn decode_list<T>(context: &str, raw: &str) -> Result<Vec<T>, GitHostError>
where
    T: DeserializeOwned,
{
    let values: Vec<serde_json::Value> =
        serde_json::from_str(raw.trim()).map_err(|err| unexpected_output(context, raw, &err))?;
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::debug!(%err, "skipping undecodable list element");
                None
            }
        })
        .collect())
}

fn parse_comments(context: &str, raw: &str) -> Result<Vec<Comment>, GitHostError> {
    let wrapper: GhCommentsWrapper =
        serde_json::from_str(raw.trim()).map_err(|err| unexpected_output(context, raw, &err))?;
    Ok(wrapper
        .comments
        .into_iter()
        .map(|c| Comment {
            id: Uuid::new_v4(),
            author: c.author.and_then(|a| a.login),
            body: c.body,
            created_at: DateTime::parse_from_rfc3339(&c.created_at)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            created_at_raw: c.created_at,
        })
        .collect())
}

/// Table-output fallback for `gh repo list`: the first token of each line is
/// the repository name; a trailing token mentioning github.com is taken as
/// its URL, otherwise the whole line is kept as the name with a constructed
/// URL.
fn parse_repo_lines(raw: &str) -> Vec<RepoSummary> {
    let mut repos = Vec::new();
    for line in raw.split(['\n', '\r']) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let last = tokens.last().copied().unwrap_or("");
        if tokens.len() >= 2 && last.contains("github.com") {
            let name = tokens[0].to_string();
            let url = if last.starts_with("http") {
                last.to_string()
            } else {
                format!("https://github.com/{name}")
            };
            repos.push(RepoSummary {
                name,
                ssh_url: Some(last.to_string()),
                url: Some(url),
            });
        } else {
            repos.push(RepoSummary {
                name: line.to_string(),
                ssh_url: None,
                url: Some(format!("https://github.com/{line}")),
            });
        }
    }
    repos
}

fn unexpected_output(context: &str, raw: &str, err: &serde_json::Error) -> GitHostError {
    let excerpt = truncate_to_char_boundary(raw.trim(), 200);
    GitHostError::UnexpectedOutput(format!("Failed to parse {context}: {err}; raw: {excerpt}"))
}
