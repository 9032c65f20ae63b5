//! Hosting API client (GitHub-style REST).
//!
//! The base URL is injectable so tests can point it at a local fake.
//! Missing resources (404) are `Ok(None)`; 5xx and timeouts on idempotent
//! reads get a bounded fixed-delay retry, and pull request creation gets
//! exactly one retry because a failed create may or may not have landed.

use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::{WorkspaceError, WorkspaceResult};

const READ_RETRIES: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Extract the `owner/repo` slug from a repository URL.
pub fn repo_slug(repo_url: &str) -> WorkspaceResult<String> {
    let trimmed = repo_url.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = trimmed.rsplit('/');
    let repo = parts.next().filter(|s| !s.is_empty());
    let owner = parts
        .next()
        .map(|s| s.rsplit(':').next().unwrap_or(s))
        .filter(|s| !s.is_empty());
    match (owner, repo) {
        (Some(owner), Some(repo)) => Ok(format!("{owner}/{repo}")),
        _ => Err(WorkspaceError::Configuration(format!(
            "cannot derive owner/repo from '{repo_url}'"
        ))),
    }
}

/// A git ref as reported by the hosting API.
#[derive(Debug, Clone, Deserialize)]
pub struct RefInfo {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub object: RefObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefObject {
    pub sha: String,
}

/// A pull request as reported by the hosting API.
#[derive(Debug, Clone, Deserialize)]
pub struct HostedPullRequest {
    pub number: u64,
    pub html_url: String,
    pub state: String,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct RepositoryInfo {
    default_branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
    All,
}

impl PullRequestState {
    fn as_str(&self) -> &'static str {
        match self {
            PullRequestState::Open => "open",
            PullRequestState::Closed => "closed",
            PullRequestState::All => "all",
        }
    }
}

/// Client for the repository hosting API.
#[derive(Debug, Clone)]
pub struct HostingClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HostingClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("vamp")
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self.http.request(method, url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// GET with retry; 404 maps to `Ok(None)`.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> WorkspaceResult<Option<T>> {
        let mut last_err = String::new();
        for attempt in 0..=READ_RETRIES {
            if attempt > 0 {
                warn!("Retrying GET {path} (attempt {})", attempt + 1);
                tokio::time::sleep(RETRY_DELAY).await;
            }
            match self.request(reqwest::Method::GET, path).send().await {
                Ok(resp) => match resp.status() {
                    reqwest::StatusCode::NOT_FOUND => return Ok(None),
                    status if status.is_success() => {
                        let body = resp
                            .json::<T>()
                            .await
                            .map_err(|e| WorkspaceError::Hosting(e.to_string()))?;
                        return Ok(Some(body));
                    }
                    status if status.is_server_error() => {
                        last_err = format!("GET {path}: {status}");
                    }
                    status => {
                        return Err(WorkspaceError::Hosting(format!("GET {path}: {status}")));
                    }
                },
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_err = e.to_string();
                }
                Err(e) => return Err(WorkspaceError::Hosting(e.to_string())),
            }
        }
        Err(WorkspaceError::Transient(last_err))
    }

    async fn expect_success(
        &self,
        resp: reqwest::Response,
        context: &str,
    ) -> WorkspaceResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(WorkspaceError::Hosting(format!(
            "{context}: {status}: {body}"
        )))
    }

    /// The repository's default branch name.
    pub async fn get_default_branch(&self, slug: &str) -> WorkspaceResult<Option<String>> {
        let info: Option<RepositoryInfo> = self.get_json(&format!("/repos/{slug}")).await?;
        Ok(info.map(|r| r.default_branch))
    }

    /// Look up a branch ref; `None` when the branch does not exist.
    pub async fn get_ref(&self, slug: &str, branch: &str) -> WorkspaceResult<Option<RefInfo>> {
        self.get_json(&format!("/repos/{slug}/git/ref/heads/{branch}"))
            .await
    }

    /// Create a branch ref pointing at `sha`.
    pub async fn create_ref(&self, slug: &str, branch: &str, sha: &str) -> WorkspaceResult<()> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/repos/{slug}/git/refs"))
            .json(&json!({ "ref": format!("refs/heads/{branch}"), "sha": sha }))
            .send()
            .await
            .map_err(|e| WorkspaceError::Hosting(e.to_string()))?;
        self.expect_success(resp, "create ref").await?;
        Ok(())
    }

    /// Delete a branch ref. Missing refs are not an error.
    pub async fn delete_ref(&self, slug: &str, branch: &str) -> WorkspaceResult<()> {
        let resp = self
            .request(
                reqwest::Method::DELETE,
                &format!("/repos/{slug}/git/refs/heads/{branch}"),
            )
            .send()
            .await
            .map_err(|e| WorkspaceError::Hosting(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.expect_success(resp, "delete ref").await?;
        Ok(())
    }

    /// Pull requests whose head is `branch`, filtered by state.
    pub async fn list_pull_requests(
        &self,
        slug: &str,
        branch: &str,
        state: PullRequestState,
    ) -> WorkspaceResult<Vec<HostedPullRequest>> {
        let owner = slug.split('/').next().unwrap_or_default();
        let path = format!(
            "/repos/{slug}/pulls?head={owner}:{branch}&state={}",
            state.as_str()
        );
        Ok(self.get_json(&path).await?.unwrap_or_default())
    }

    /// Open a draft pull request from `branch` into `base`.
    ///
    /// Retried once on transient failure: the first attempt may have landed,
    /// so callers adopt any existing open PR before calling this.
    pub async fn create_pull_request(
        &self,
        slug: &str,
        branch: &str,
        base: &str,
        title: &str,
    ) -> WorkspaceResult<HostedPullRequest> {
        let body = json!({
            "title": title,
            "head": branch,
            "base": base,
            "draft": true,
        });
        let mut last_err = String::new();
        for attempt in 0..2 {
            if attempt > 0 {
                warn!("Retrying pull request creation for {slug}#{branch}");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            let sent = self
                .request(reqwest::Method::POST, &format!("/repos/{slug}/pulls"))
                .json(&body)
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => {
                    let pr = resp
                        .json::<HostedPullRequest>()
                        .await
                        .map_err(|e| WorkspaceError::Hosting(e.to_string()))?;
                    debug!("Created PR #{} for {slug}#{branch}", pr.number);
                    return Ok(pr);
                }
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = format!("create PR: {}", resp.status());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(WorkspaceError::Hosting(format!(
                        "create PR: {status}: {body}"
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_err = e.to_string();
                }
                Err(e) => return Err(WorkspaceError::Hosting(e.to_string())),
            }
        }
        Err(WorkspaceError::Transient(last_err))
    }

    /// Close a pull request.
    pub async fn close_pull_request(&self, slug: &str, number: u64) -> WorkspaceResult<()> {
        let resp = self
            .request(
                reqwest::Method::PATCH,
                &format!("/repos/{slug}/pulls/{number}"),
            )
            .json(&json!({ "state": "closed" }))
            .send()
            .await
            .map_err(|e| WorkspaceError::Hosting(e.to_string()))?;
        self.expect_success(resp, "close PR").await?;
        Ok(())
    }

    /// Delete the repository. Missing repositories are not an error.
    pub async fn delete_repository(&self, slug: &str) -> WorkspaceResult<()> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/repos/{slug}"))
            .send()
            .await
            .map_err(|e| WorkspaceError::Hosting(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.expect_success(resp, "delete repository").await?;
        Ok(())
    }
}
