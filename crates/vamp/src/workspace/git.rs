//! Git operations via the git CLI.

use std::path::Path;

use log::debug;
use tokio::process::Command;

use super::error::{WorkspaceError, WorkspaceResult};

/// Thin async wrapper around the git binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run git with `args`, optionally inside `cwd`, capturing stdout.
    async fn exec(&self, cwd: Option<&Path>, args: &[&str]) -> WorkspaceResult<String> {
        debug!("git {}", args.join(" "));
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        // Never prompt for credentials; fail fast instead.
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(WorkspaceError::Git {
                operation: args.first().copied().unwrap_or("?").to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Clone `repo_url` into `dest`.
    pub async fn clone_repo(&self, repo_url: &str, dest: &Path) -> WorkspaceResult<()> {
        let dest_str = dest.to_str().ok_or_else(|| {
            WorkspaceError::Configuration(format!("non-utf8 workspace path {dest:?}"))
        })?;
        self.exec(None, &["clone", repo_url, dest_str]).await?;
        Ok(())
    }

    /// Fetch all refs from origin.
    pub async fn fetch(&self, repo: &Path) -> WorkspaceResult<()> {
        self.exec(Some(repo), &["fetch", "origin", "--prune"]).await?;
        Ok(())
    }

    /// Whether `branch` exists on origin.
    pub async fn remote_branch_exists(&self, repo: &Path, branch: &str) -> WorkspaceResult<bool> {
        let refspec = format!("refs/heads/{branch}");
        let out = self
            .exec(Some(repo), &["ls-remote", "--heads", "origin", &refspec])
            .await?;
        Ok(!out.is_empty())
    }

    /// Whether `branch` exists locally.
    pub async fn local_branch_exists(&self, repo: &Path, branch: &str) -> WorkspaceResult<bool> {
        let refspec = format!("refs/heads/{branch}");
        match self
            .exec(Some(repo), &["rev-parse", "--verify", "--quiet", &refspec])
            .await
        {
            Ok(_) => Ok(true),
            Err(WorkspaceError::Git { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check out an existing local branch.
    pub async fn checkout(&self, repo: &Path, branch: &str) -> WorkspaceResult<()> {
        self.exec(Some(repo), &["checkout", branch]).await?;
        Ok(())
    }

    /// Create a local branch tracking `origin/{branch}` and check it out.
    pub async fn checkout_tracking(&self, repo: &Path, branch: &str) -> WorkspaceResult<()> {
        let remote_ref = format!("origin/{branch}");
        self.exec(
            Some(repo),
            &["checkout", "-B", branch, "--track", &remote_ref],
        )
        .await?;
        Ok(())
    }

    /// Create `branch` from `base` and check it out.
    pub async fn create_branch(&self, repo: &Path, branch: &str, base: &str) -> WorkspaceResult<()> {
        self.exec(Some(repo), &["checkout", "-b", branch, base])
            .await?;
        Ok(())
    }

    /// Push `branch` to origin, setting the upstream.
    pub async fn push(&self, repo: &Path, branch: &str) -> WorkspaceResult<()> {
        self.exec(Some(repo), &["push", "-u", "origin", branch])
            .await?;
        Ok(())
    }

    /// The branch origin/HEAD points at, when the clone recorded one.
    pub async fn default_branch(&self, repo: &Path) -> WorkspaceResult<Option<String>> {
        match self
            .exec(
                Some(repo),
                &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"],
            )
            .await
        {
            // "origin/main" -> "main"
            Ok(full) => Ok(full.strip_prefix("origin/").map(str::to_string)),
            Err(WorkspaceError::Git { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
