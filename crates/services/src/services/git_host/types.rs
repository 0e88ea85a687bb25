use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GitHostError {
    #[error("hosting CLI is not installed or not available in PATH")]
    NotAvailable,
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
    #[error("CLI command failed: {0}")]
    CommandFailed(String),
    #[error("CLI returned unexpected output: {0}")]
    UnexpectedOutput(String),
    #[error("CLI command timed out after {0:?}")]
    TimedOut(Duration),
}

/// Lifecycle state of an issue or pull request.
///
/// The CLI emits upper-case state strings; anything unrecognized decodes as
/// `Open` rather than failing the whole listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemState {
    #[default]
    Open,
    Closed,
    Merged,
}

impl<'de> Deserialize<'de> for ItemState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_ascii_lowercase().as_str() {
            "closed" => ItemState::Closed,
            "merged" => ItemState::Merged,
            _ => ItemState::Open,
        })
    }
}

/// Scope filter for listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StateFilter {
    #[default]
    Open,
    Closed,
    All,
}

impl StateFilter {
    pub fn as_arg(&self) -> &'static str {
        match self {
            StateFilter::Open => "open",
            StateFilter::Closed => "closed",
            StateFilter::All => "all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: i64,
    pub title: String,
    pub state: ItemState,
    pub url: String,
    pub body: Option<String>,
    pub author: Option<String>,
    pub assignees: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: i64,
    pub title: String,
    pub state: ItemState,
    pub url: String,
    pub body: Option<String>,
    pub author: Option<String>,
    pub assignees: Vec<String>,
    pub head_branch: String,
    pub base_branch: String,
}

/// One thread comment.
///
/// `id` is generated locally on each fetch; it is a handle for list
/// rendering, not a stable upstream identifier. The raw timestamp string is
/// kept alongside the parsed form so nothing is lost when the tool emits a
/// format chrono does not recognize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub author: Option<String>,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
    pub created_at_raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSummary {
    pub name: String,
    pub ssh_url: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}
