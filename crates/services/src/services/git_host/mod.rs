mod types;

pub mod github;

use std::path::Path;

use async_trait::async_trait;
pub use github::{GhCli, ReleaseReport, ReleaseSpec};
pub use types::{
    Comment, GitHostError, Issue, ItemState, PullRequest, RepoSummary, StateFilter, UserAccount,
};

/// Operations a hosting provider exposes through its CLI.
///
/// Listing and mutation calls run inside the given repository directory so
/// the tool can infer which remote project they refer to. Mutations return
/// the tool's trimmed output, which usually carries the created item's URL.
#[async_trait]
pub trait GitHost: Send + Sync {
    async fn authenticated(&self) -> Result<bool, GitHostError>;
    async fn current_user(&self) -> Result<UserAccount, GitHostError>;

    async fn list_issues(
        &self,
        repo: &Path,
        filter: StateFilter,
    ) -> Result<Vec<Issue>, GitHostError>;
    async fn create_issue(
        &self,
        repo: &Path,
        title: &str,
        body: &str,
    ) -> Result<String, GitHostError>;
    async fn close_issue(&self, repo: &Path, number: i64) -> Result<String, GitHostError>;
    async fn reopen_issue(&self, repo: &Path, number: i64) -> Result<String, GitHostError>;
    async fn issue_comments(&self, repo: &Path, number: i64)
    -> Result<Vec<Comment>, GitHostError>;
    async fn comment_issue(
        &self,
        repo: &Path,
        number: i64,
        body: &str,
    ) -> Result<String, GitHostError>;

    async fn list_pull_requests(
        &self,
        repo: &Path,
        filter: StateFilter,
    ) -> Result<Vec<PullRequest>, GitHostError>;
    async fn pull_request_merged(&self, repo: &Path, number: i64) -> Result<bool, GitHostError>;
    async fn merge_pull_request(&self, repo: &Path, number: i64) -> Result<String, GitHostError>;
    async fn close_pull_request(&self, repo: &Path, number: i64) -> Result<String, GitHostError>;
    async fn pull_request_comments(
        &self,
        repo: &Path,
        number: i64,
    ) -> Result<Vec<Comment>, GitHostError>;
    async fn comment_pull_request(
        &self,
        repo: &Path,
        number: i64,
        body: &str,
    ) -> Result<String, GitHostError>;

    async fn list_repositories(&self) -> Result<Vec<RepoSummary>, GitHostError>;
    async fn repository_url(&self, name: &str) -> Result<Option<String>, GitHostError>;
}
