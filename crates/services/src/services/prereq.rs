//! First-launch readiness checks for the external tools the app drives.

use std::path::PathBuf;

use serde::Serialize;
use utils::command::CommandRunner;

use crate::services::git_host::{GhCli, UserAccount};

/// Where each required binary resolved to, and whether the hosting CLI is
/// signed in. `brew` is only advisory: it is how missing tools are usually
/// installed, not a tool the app itself needs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolingReport {
    pub git: Option<PathBuf>,
    pub gh: Option<PathBuf>,
    pub brew: Option<PathBuf>,
    pub authenticated: bool,
    pub user: Option<UserAccount>,
}

impl ToolingReport {
    pub fn ready(&self) -> bool {
        self.git.is_some() && self.gh.is_some() && self.authenticated
    }
}

/// Resolves each tool on the deterministic search path, then probes
/// authentication when the hosting CLI is present. Never fails: a broken
/// tool shows up as absent or unauthenticated.
pub async fn check_tooling(runner: &CommandRunner) -> ToolingReport {
    let mut report = ToolingReport {
        git: runner.resolve("git"),
        gh: runner.resolve("gh"),
        brew: runner.resolve("brew"),
        ..Default::default()
    };

    if report.gh.is_some() {
        let host = GhCli::with_runner(runner.clone());
        report.authenticated = host.auth_status().await.unwrap_or(false);
        if report.authenticated {
            report.user = host.current_user().await.ok();
        }
    }

    tracing::debug!(
        git = report.git.is_some(),
        gh = report.gh.is_some(),
        authenticated = report.authenticated,
        "tooling checked"
    );
    report
}
