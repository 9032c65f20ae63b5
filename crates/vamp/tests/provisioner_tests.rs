//! Workspace provisioning against a local git origin and a fake hosting API.

mod common;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use tokio::process::Command;
use vamp::session::Adoption;
use vamp::workspace::{GitCli, HostingClient, WorkspaceProvisioner};

async fn git(cwd: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await
        .expect("run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Create a bare origin with one commit on `main`; returns its path.
async fn make_origin(dir: &Path) -> PathBuf {
    let origin = dir.join("origin.git");
    let seed = dir.join("seed");
    std::fs::create_dir_all(&origin).unwrap();
    git(dir, &["init", "--bare", origin.to_str().unwrap()]).await;

    git(dir, &["clone", origin.to_str().unwrap(), seed.to_str().unwrap()]).await;
    std::fs::write(seed.join("README.md"), "# widget\n").unwrap();
    git(&seed, &["config", "user.email", "test@example.com"]).await;
    git(&seed, &["config", "user.name", "Test"]).await;
    git(&seed, &["add", "."]).await;
    git(&seed, &["commit", "-m", "initial"]).await;
    git(&seed, &["branch", "-M", "main"]).await;
    git(&seed, &["push", "-u", "origin", "main"]).await;
    git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]).await;
    origin
}

#[tokio::test]
async fn test_provision_creates_branch_and_draft_pr() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let origin = make_origin(dir.path()).await;
    let (hosting_url, hosting) = common::spawn_hosting_api().await;

    let provisioner = WorkspaceProvisioner::new(
        dir.path().join("workspaces"),
        GitCli::default(),
        HostingClient::new(&hosting_url, Some("token".to_string())),
    );

    let provisioned = provisioner
        .provision(origin.to_str().unwrap(), "riff-one", Some("token"))
        .await
        .unwrap();

    assert_eq!(provisioned.workspace.adoption, Adoption::Created);
    assert_eq!(provisioned.workspace.branch, "riff-one");
    assert!(provisioned.workspace.path.join(".git").exists());

    let pr = provisioned.pull_request.unwrap();
    assert_eq!(pr.adoption, Adoption::Created);
    assert!(pr.open);
    assert_eq!(hosting.create_pr_calls.load(Ordering::SeqCst), 1);

    // The draft PR title references the branch.
    let pulls = hosting.pulls.lock().await;
    assert!(pulls[0].draft);
    assert!(pulls[0].title.contains("riff-one"));
}

#[tokio::test]
async fn test_second_provision_adopts_everything() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let origin = make_origin(dir.path()).await;
    let (hosting_url, hosting) = common::spawn_hosting_api().await;

    let provisioner = WorkspaceProvisioner::new(
        dir.path().join("workspaces"),
        GitCli::default(),
        HostingClient::new(&hosting_url, Some("token".to_string())),
    );

    let first = provisioner
        .provision(origin.to_str().unwrap(), "riff-two", Some("token"))
        .await
        .unwrap();
    let second = provisioner
        .provision(origin.to_str().unwrap(), "riff-two", Some("token"))
        .await
        .unwrap();

    assert_eq!(first.workspace.adoption, Adoption::Created);
    assert_eq!(second.workspace.adoption, Adoption::Adopted);
    assert_eq!(
        second.pull_request.as_ref().unwrap().adoption,
        Adoption::Adopted
    );
    assert_eq!(
        first.pull_request.unwrap().number,
        second.pull_request.unwrap().number
    );
    // One branch, one PR across both runs.
    assert_eq!(hosting.create_pr_calls.load(Ordering::SeqCst), 1);
    assert_eq!(hosting.pulls.lock().await.len(), 1);
}

#[tokio::test]
async fn test_remote_branch_is_adopted_and_tracked() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let origin = make_origin(dir.path()).await;
    let (hosting_url, _) = common::spawn_hosting_api().await;

    // Push the riff branch from a separate clone first.
    let other = dir.path().join("other");
    git(dir.path(), &["clone", origin.to_str().unwrap(), other.to_str().unwrap()]).await;
    git(&other, &["checkout", "-b", "riff-three"]).await;
    git(&other, &["push", "-u", "origin", "riff-three"]).await;

    let provisioner = WorkspaceProvisioner::new(
        dir.path().join("workspaces"),
        GitCli::default(),
        HostingClient::new(&hosting_url, None),
    );
    let provisioned = provisioner
        .provision(origin.to_str().unwrap(), "riff-three", None)
        .await
        .unwrap();

    assert_eq!(provisioned.workspace.adoption, Adoption::Adopted);
    assert!(provisioned.pull_request.is_none());
}

#[tokio::test]
async fn test_no_credential_skips_push_and_pr() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let origin = make_origin(dir.path()).await;
    let (hosting_url, hosting) = common::spawn_hosting_api().await;

    let provisioner = WorkspaceProvisioner::new(
        dir.path().join("workspaces"),
        GitCli::default(),
        HostingClient::new(&hosting_url, None),
    );
    let provisioned = provisioner
        .provision(origin.to_str().unwrap(), "riff-four", None)
        .await
        .unwrap();

    assert_eq!(provisioned.workspace.adoption, Adoption::Created);
    assert!(provisioned.pull_request.is_none());
    assert_eq!(hosting.create_pr_calls.load(Ordering::SeqCst), 0);

    // The branch was never pushed.
    let git_cli = GitCli::default();
    let exists = git_cli
        .remote_branch_exists(&provisioned.workspace.path, "riff-four")
        .await
        .unwrap();
    assert!(!exists);
}
