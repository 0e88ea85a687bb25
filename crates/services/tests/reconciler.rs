use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;
use git::{CommitOutcome, GitCli, SyncCounts};
use services::services::repo::{Reconciler, RepoError, RepoService};
use tempfile::TempDir;
use tokio::task::JoinSet;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write_file(base: &Path, rel: &str, content: &str) {
    let path = base.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
}

async fn configure_user(git: &GitCli, repo: &Path) {
    git.set_config(repo, "user.name", "Test User").await.unwrap();
    git.set_config(repo, "user.email", "test@example.com")
        .await
        .unwrap();
}

/// Repository on `main` with two committed files ready to be dirtied.
async fn init_repo_main(git: &GitCli, root: &TempDir) -> PathBuf {
    let path = root.path().join("repo");
    fs::create_dir_all(&path).unwrap();
    git.init(&path).await.unwrap();
    configure_user(git, &path).await;
    write_file(&path, "a.txt", "a\n");
    write_file(&path, "b.txt", "b\n");
    git.stage_all(&path).await.unwrap();
    assert_eq!(
        git.commit(&path, "initial commit").await.unwrap(),
        CommitOutcome::Created
    );
    git.rename_current_branch(&path, "main").await.unwrap();
    path
}

async fn init_bare_remote(git: &GitCli, root: &TempDir) -> PathBuf {
    let path = root.path().join("remote.git");
    let result = git
        .raw(
            None,
            [
                std::ffi::OsStr::new("init"),
                std::ffi::OsStr::new("--bare"),
                path.as_os_str(),
            ],
        )
        .await
        .unwrap();
    assert!(result.success(), "bare init failed: {}", result.combined());
    let head = git
        .raw(Some(&path), ["symbolic-ref", "HEAD", "refs/heads/main"])
        .await
        .unwrap();
    assert!(head.success(), "{}", head.combined());
    path
}

fn reconciler_for(repo: &Path) -> Reconciler {
    Reconciler::new(RepoService::new(), repo.to_path_buf())
}

#[tokio::test]
async fn refresh_snapshots_changes_branches_and_selection() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let git = GitCli::new();
    let repo = init_repo_main(&git, &root).await;

    write_file(&repo, "a.txt", "a\nchanged a\n");
    write_file(&repo, "b.txt", "b\nchanged b\n");

    let reconciler = reconciler_for(&repo);
    let snapshot = reconciler.refresh().await.unwrap();

    assert_eq!(snapshot.changed_files, vec!["a.txt", "b.txt"]);
    assert_eq!(snapshot.branches.current, "main");
    assert!(snapshot.branches.names.contains(&"main".to_string()));
    assert_eq!(snapshot.sync, None, "no upstream configured yet");

    let selection = snapshot.selection.expect("first file preselected");
    assert_eq!(selection.path, "a.txt");
    assert!(selection.diff.contains("+changed a"));
}

#[tokio::test]
async fn explicit_selection_survives_refreshes() -> Result<()> {
    init_tracing();
    let root = TempDir::new().unwrap();
    let git = GitCli::new();
    let repo = init_repo_main(&git, &root).await;

    write_file(&repo, "a.txt", "a\nchanged a\n");
    write_file(&repo, "b.txt", "b\nchanged b\n");

    let reconciler = reconciler_for(&repo);
    reconciler.refresh().await?;

    let snapshot = reconciler.select("b.txt").await?;
    assert_eq!(snapshot.selection.as_ref().map(|s| s.path.as_str()), Some("b.txt"));

    write_file(&repo, "a.txt", "a\nchanged a again\n");
    let snapshot = reconciler.refresh().await?;
    let selection = snapshot.selection.expect("selection kept");
    assert_eq!(selection.path, "b.txt");
    assert!(selection.diff.contains("+changed b"));
    Ok(())
}

#[tokio::test]
async fn vanished_selection_resets_to_the_first_listed_file() -> Result<()> {
    init_tracing();
    let root = TempDir::new().unwrap();
    let git = GitCli::new();
    let repo = init_repo_main(&git, &root).await;

    write_file(&repo, "a.txt", "a\nchanged a\n");
    write_file(&repo, "b.txt", "b\nchanged b\n");

    let reconciler = reconciler_for(&repo);
    reconciler.refresh().await?;
    reconciler.select("b.txt").await?;

    // commit only b.txt so the selected path drops out of the listing
    let staged = git.raw(Some(&repo), ["add", "b.txt"]).await?;
    assert!(staged.success());
    git.commit(&repo, "settle b").await?;

    let snapshot = reconciler.refresh().await?;
    assert_eq!(snapshot.changed_files, vec!["a.txt"]);
    let selection = snapshot.selection.expect("reset to first file");
    assert_eq!(selection.path, "a.txt");
    assert!(selection.diff.contains("+changed a"));
    Ok(())
}

#[tokio::test]
async fn clean_tree_clears_the_selection() -> Result<()> {
    init_tracing();
    let root = TempDir::new().unwrap();
    let git = GitCli::new();
    let repo = init_repo_main(&git, &root).await;

    write_file(&repo, "a.txt", "a\nchanged a\n");
    let reconciler = reconciler_for(&repo);
    assert!(reconciler.refresh().await?.selection.is_some());

    git.stage_all(&repo).await?;
    git.commit(&repo, "settle").await?;

    let snapshot = reconciler.refresh().await?;
    assert!(snapshot.changed_files.is_empty());
    assert!(snapshot.selection.is_none());
    Ok(())
}

#[tokio::test]
async fn selecting_an_unknown_path_clears_the_selection() -> Result<()> {
    init_tracing();
    let root = TempDir::new().unwrap();
    let git = GitCli::new();
    let repo = init_repo_main(&git, &root).await;

    write_file(&repo, "a.txt", "a\nchanged a\n");
    let reconciler = reconciler_for(&repo);
    reconciler.refresh().await?;

    let snapshot = reconciler.select("never-heard-of-it.txt").await?;
    assert!(snapshot.selection.is_none());
    Ok(())
}

#[tokio::test]
async fn staggered_waves_converge_on_the_latest_state() -> Result<()> {
    init_tracing();
    let root = TempDir::new().unwrap();
    let git = GitCli::new();
    let repo = init_repo_main(&git, &root).await;

    write_file(&repo, "a.txt", "a\nchanged a\n");
    let reconciler = reconciler_for(&repo);
    reconciler.refresh().await?;

    // new work appears between the waves; the final snapshot must include it
    write_file(&repo, "c.txt", "fresh\n");
    reconciler.refresh_staggered().wait().await;

    let snapshot = reconciler.snapshot().await;
    assert!(snapshot.changed_files.contains(&"c.txt".to_string()));
    assert_eq!(
        snapshot.selection.as_ref().map(|s| s.path.as_str()),
        Some("a.txt"),
        "existing selection survives the waves"
    );
    Ok(())
}

#[tokio::test]
async fn push_pipeline_stages_commits_and_pushes() -> Result<()> {
    init_tracing();
    let root = TempDir::new().unwrap();
    let git = GitCli::new();
    let repo = init_repo_main(&git, &root).await;
    let remote = init_bare_remote(&git, &root).await;
    git.set_remote(&repo, "origin", &remote.to_string_lossy())
        .await?;
    git.push_set_upstream(&repo, "origin", "main").await?;

    write_file(&repo, "a.txt", "a\nmore\n");
    let service = RepoService::new();
    let report = service.push_pipeline(&repo, "ship it").await?;

    assert!(report.success, "transcript:\n{}", report.transcript);
    assert!(report.transcript.contains("$ git add ."));
    assert!(report.transcript.contains("$ git commit -m 'ship it'"));
    assert!(report.transcript.contains("$ git push"));

    // remote caught up, so ahead/behind settles at zero
    assert_eq!(
        git.sync_counts(&repo).await?,
        Some(SyncCounts { ahead: 0, behind: 0 })
    );
    Ok(())
}

#[tokio::test]
async fn push_pipeline_pushes_even_with_an_empty_index() -> Result<()> {
    init_tracing();
    let root = TempDir::new().unwrap();
    let git = GitCli::new();
    let repo = init_repo_main(&git, &root).await;
    let remote = init_bare_remote(&git, &root).await;
    git.set_remote(&repo, "origin", &remote.to_string_lossy())
        .await?;
    git.push_set_upstream(&repo, "origin", "main").await?;

    let service = RepoService::new();
    let report = service.push_pipeline(&repo, "nothing new").await?;

    assert!(report.success, "transcript:\n{}", report.transcript);
    assert!(report.transcript.contains("nothing new to commit"));
    assert!(report.transcript.contains("$ git push"));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn push_pipeline_halts_when_the_commit_fails() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    init_tracing();
    let root = TempDir::new().unwrap();
    let git = GitCli::new();
    let repo = init_repo_main(&git, &root).await;

    let hook = repo.join(".git").join("hooks").join("pre-commit");
    fs::create_dir_all(hook.parent().unwrap())?;
    fs::write(&hook, "#!/bin/sh\necho rejected by hook 1>&2\nexit 1\n")?;
    fs::set_permissions(&hook, fs::Permissions::from_mode(0o755))?;

    write_file(&repo, "a.txt", "a\nblocked\n");
    let service = RepoService::new();
    let report = service.push_pipeline(&repo, "will not land").await?;

    assert!(!report.success);
    assert!(report.transcript.contains("$ git commit"));
    assert!(!report.transcript.contains("$ git push"));
    Ok(())
}

/// Concurrent checkouts on one working copy contend for `.git/index.lock`;
/// the per-path lock serializes them, so every call must succeed.
#[tokio::test(flavor = "multi_thread")]
async fn mutations_and_refreshes_on_one_repo_serialize() -> Result<()> {
    init_tracing();
    let root = TempDir::new().unwrap();
    let git = GitCli::new();
    let repo = init_repo_main(&git, &root).await;
    git.create_branch(&repo, "feature-x").await?;
    git.checkout(&repo, "main").await?;

    let service = RepoService::new();
    let reconciler = Reconciler::new(service.clone(), repo.clone());

    let mut tasks = JoinSet::new();
    for i in 0..6 {
        let service = service.clone();
        let repo = repo.clone();
        let branch = if i % 2 == 0 { "feature-x" } else { "main" };
        tasks.spawn(async move { service.checkout(&repo, branch).await });
    }
    for _ in 0..3 {
        let reconciler = reconciler.clone();
        tasks.spawn(async move { reconciler.refresh().await.map(|_| ()) });
    }
    while let Some(joined) = tasks.join_next().await {
        joined?.expect("serialized operation failed");
    }

    let current = git.current_branch(&repo).await?;
    assert!(current == "main" || current == "feature-x", "{current}");
    Ok(())
}

#[tokio::test]
async fn paths_are_validated_before_any_git_runs() {
    let root = TempDir::new().unwrap();
    let service = RepoService::new();

    let missing = root.path().join("nope");
    assert!(matches!(
        service.validate_git_repo_path(&missing),
        Err(RepoError::PathNotFound(_))
    ));

    let plain = root.path().join("plain");
    fs::create_dir_all(&plain).unwrap();
    assert!(matches!(
        service.validate_git_repo_path(&plain),
        Err(RepoError::NotGitRepository(_))
    ));

    let file = root.path().join("file.txt");
    fs::write(&file, "x").unwrap();
    assert!(matches!(
        service.validate_git_repo_path(&file),
        Err(RepoError::PathNotDirectory(_))
    ));
}
