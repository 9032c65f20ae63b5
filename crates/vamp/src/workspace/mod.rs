//! Workspace provisioning.
//!
//! Brings a (repo, branch) pair to a ready working directory, converging on
//! existing state instead of failing on it: an existing clone is fetched, an
//! existing branch is adopted, an existing open pull request is adopted. A
//! second identical `provision` call therefore reports `Adopted` throughout
//! and never creates a duplicate branch or pull request.

mod error;
mod git;
mod hosting;

pub use error::{WorkspaceError, WorkspaceResult};
pub use git::GitCli;
pub use hosting::{HostedPullRequest, HostingClient, PullRequestState, RefInfo, RefObject, repo_slug};

use std::path::PathBuf;

use log::{debug, info};

use crate::session::{Adoption, PullRequestRecord, WorkspaceDescriptor};
use crate::settings::WorkspaceSettings;

/// Outcome of a provisioning run.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub workspace: WorkspaceDescriptor,
    pub pull_request: Option<PullRequestRecord>,
}

/// Idempotent workspace provisioner.
pub struct WorkspaceProvisioner {
    root: PathBuf,
    git: GitCli,
    hosting: HostingClient,
}

impl WorkspaceProvisioner {
    pub fn new(root: impl Into<PathBuf>, git: GitCli, hosting: HostingClient) -> Self {
        Self {
            root: root.into(),
            git,
            hosting,
        }
    }

    pub fn from_settings(settings: &WorkspaceSettings, credential: Option<String>) -> Self {
        Self::new(
            settings.root.clone(),
            GitCli::new(settings.git_binary.clone()),
            HostingClient::new(settings.hosting_api_url.clone(), credential),
        )
    }

    /// Directory a (repo, branch) workspace lives in.
    fn workspace_path(&self, repo_url: &str, branch: &str) -> WorkspaceResult<PathBuf> {
        let slug = repo_slug(repo_url)?;
        let repo_name = slug.split('/').next_back().unwrap_or(&slug);
        Ok(self.root.join(repo_name).join(sanitize_component(branch)))
    }

    /// Bring the workspace for (repo, branch) to ready.
    ///
    /// With a write credential the branch is pushed and a pull request is
    /// adopted or created; without one, provisioning stops at the checkout.
    pub async fn provision(
        &self,
        repo_url: &str,
        branch: &str,
        credential: Option<&str>,
    ) -> WorkspaceResult<Provisioned> {
        if branch.is_empty() {
            return Err(WorkspaceError::Configuration(
                "branch name must not be empty".to_string(),
            ));
        }
        let path = self.workspace_path(repo_url, branch)?;

        if path.join(".git").exists() {
            debug!("Workspace {} already cloned, fetching", path.display());
            self.git.fetch(&path).await?;
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            info!("Cloning {repo_url} into {}", path.display());
            self.git.clone_repo(repo_url, &path).await?;
        }

        // Branch disposition: remote wins, then local, then create fresh.
        let adoption = if self.git.remote_branch_exists(&path, branch).await? {
            debug!("Adopting remote branch {branch}");
            self.git.checkout_tracking(&path, branch).await?;
            Adoption::Adopted
        } else if self.git.local_branch_exists(&path, branch).await? {
            debug!("Adopting local branch {branch}");
            self.git.checkout(&path, branch).await?;
            Adoption::Adopted
        } else {
            let base = self.default_branch(repo_url, &path).await?;
            info!("Creating branch {branch} from {base}");
            self.git.create_branch(&path, branch, &base).await?;
            Adoption::Created
        };

        let workspace = WorkspaceDescriptor {
            repo_url: repo_url.to_string(),
            path: path.clone(),
            branch: branch.to_string(),
            adoption,
        };

        let pull_request = match credential {
            Some(_) => Some(self.ensure_pull_request(repo_url, branch, &path).await?),
            None => None,
        };

        Ok(Provisioned {
            workspace,
            pull_request,
        })
    }

    async fn default_branch(&self, repo_url: &str, path: &std::path::Path) -> WorkspaceResult<String> {
        if let Some(branch) = self.git.default_branch(path).await? {
            return Ok(branch);
        }
        let slug = repo_slug(repo_url)?;
        self.hosting
            .get_default_branch(&slug)
            .await?
            .ok_or_else(|| {
                WorkspaceError::Configuration(format!("cannot determine default branch of {slug}"))
            })
    }

    /// Push the branch, then adopt an open PR for it or create a draft one.
    async fn ensure_pull_request(
        &self,
        repo_url: &str,
        branch: &str,
        path: &std::path::Path,
    ) -> WorkspaceResult<PullRequestRecord> {
        self.git.push(path, branch).await?;
        let slug = repo_slug(repo_url)?;

        let open = self
            .hosting
            .list_pull_requests(&slug, branch, PullRequestState::Open)
            .await?;
        if let Some(existing) = open.first() {
            info!("Adopting open PR #{} for {branch}", existing.number);
            return Ok(PullRequestRecord {
                number: existing.number,
                url: existing.html_url.clone(),
                open: true,
                adoption: Adoption::Adopted,
            });
        }

        let base = self.default_branch(repo_url, path).await?;
        let title = format!("Riff: {branch}");
        let created = self
            .hosting
            .create_pull_request(&slug, branch, &base, &title)
            .await?;
        Ok(PullRequestRecord {
            number: created.number,
            url: created.html_url,
            open: true,
            adoption: Adoption::Created,
        })
    }
}

/// Replace path-hostile characters in a branch name.
fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
