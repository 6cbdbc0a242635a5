use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::GithubContext;
use crate::manifest::ChangedFile;

/// Errors from the GitHub collaborators. `NotFound` is its own variant
/// because a manifest absent at the base ref is an expected, recoverable
/// condition for the baseline builder.
#[derive(Debug, Error)]
pub enum GithubError {
    #[error("github resource not found: {0}")]
    NotFound(String),
    #[error("github api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("github api transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Relationship of head to base as reported by the compare API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareStatus {
    Ahead,
    Behind,
    Identical,
    Diverged,
}

#[derive(Debug, Clone)]
pub struct CompareResult {
    pub status: CompareStatus,
    pub files: Vec<ChangedFile>,
}

/// Fetch raw file content for a path at a ref.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_raw(&self, path: &str, reference: &str) -> Result<Vec<u8>, GithubError>;
}

/// Compare two refs and report ahead/behind status plus changed files.
#[async_trait]
pub trait ChangeComparator: Send + Sync {
    async fn compare(&self, base: &str, head: &str) -> Result<CompareResult, GithubError>;
}

#[derive(Debug, Clone)]
pub struct IssueComment {
    pub id: u64,
    pub body: String,
}

/// Issue-comment surface used for the sticky report comment.
#[async_trait]
pub trait CommentApi: Send + Sync {
    async fn list_comments(&self, issue: u64) -> Result<Vec<IssueComment>, GithubError>;
    async fn create_comment(&self, issue: u64, body: &str) -> Result<u64, GithubError>;
    async fn update_comment(&self, comment_id: u64, body: &str) -> Result<(), GithubError>;
}

/// Resolve the files changed between two refs.
///
/// "Not ahead" is informational; whatever file list the comparison returned
/// is still used. A comparison failure (empty commit ranges and similar
/// edge cases) degrades to zero changed files with a warning and never
/// fails the run.
pub async fn resolve_change_set(
    comparator: &dyn ChangeComparator,
    base: &str,
    head: &str,
) -> Vec<ChangedFile> {
    match comparator.compare(base, head).await {
        Ok(result) => {
            if result.status != CompareStatus::Ahead {
                info!(status = ?result.status, base, head, "head is not ahead of base");
            }
            result.files
        }
        Err(err) => {
            warn!(error = %err, base, head, "change comparison failed, treating as no changed files");
            Vec::new()
        }
    }
}

/// Production GitHub API client; implements all three collaborator traits.
#[derive(Debug)]
pub struct GithubClient {
    http: Client,
    api_base: String,
    owner: String,
    repo: String,
}

impl GithubClient {
    pub fn new(context: &GithubContext) -> Result<Self> {
        if context.token.trim().is_empty() {
            anyhow::bail!("GITHUB_TOKEN must be set to talk to the GitHub API");
        }
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", context.token))
            .context("GITHUB_TOKEN contains invalid header characters")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = Client::builder()
            .user_agent(concat!("vetgate/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build GitHub HTTP client")?;
        Ok(Self {
            http,
            api_base: context.api_base.trim_end_matches('/').to_string(),
            owner: context.owner.clone(),
            repo: context.repo.clone(),
        })
    }

    fn repo_url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, tail
        )
    }

    async fn ensure_success(response: Response, what: &str) -> Result<Response, GithubError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GithubError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GithubError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ContentFetcher for GithubClient {
    async fn fetch_raw(&self, path: &str, reference: &str) -> Result<Vec<u8>, GithubError> {
        let url = self.repo_url(&format!("contents/{path}"));
        let response = self
            .http
            .get(&url)
            .query(&[("ref", reference)])
            .header(ACCEPT, "application/vnd.github.raw")
            .send()
            .await?;
        let response = Self::ensure_success(response, &format!("{path}@{reference}")).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ChangeComparator for GithubClient {
    async fn compare(&self, base: &str, head: &str) -> Result<CompareResult, GithubError> {
        let url = self.repo_url(&format!("compare/{base}...{head}"));
        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        let response = Self::ensure_success(response, &format!("compare {base}...{head}")).await?;
        let payload: CompareResponse = response.json().await?;
        Ok(CompareResult {
            status: payload.status,
            files: payload
                .files
                .into_iter()
                .map(|file| ChangedFile {
                    content_id: file.sha,
                    path: file.filename,
                    raw_url: file.raw_url,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl CommentApi for GithubClient {
    async fn list_comments(&self, issue: u64) -> Result<Vec<IssueComment>, GithubError> {
        let url = self.repo_url(&format!("issues/{issue}/comments"));
        let response = self
            .http
            .get(&url)
            .query(&[("per_page", "100")])
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        let response = Self::ensure_success(response, &format!("comments of #{issue}")).await?;
        let payload: Vec<CommentResponse> = response.json().await?;
        Ok(payload
            .into_iter()
            .map(|comment| IssueComment {
                id: comment.id,
                body: comment.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_comment(&self, issue: u64, body: &str) -> Result<u64, GithubError> {
        let url = self.repo_url(&format!("issues/{issue}/comments"));
        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;
        let response = Self::ensure_success(response, &format!("comment on #{issue}")).await?;
        let payload: CommentResponse = response.json().await?;
        Ok(payload.id)
    }

    async fn update_comment(&self, comment_id: u64, body: &str) -> Result<(), GithubError> {
        let url = self.repo_url(&format!("issues/comments/{comment_id}"));
        let response = self
            .http
            .patch(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;
        Self::ensure_success(response, &format!("comment {comment_id}")).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct CompareResponse {
    status: CompareStatus,
    #[serde(default)]
    files: Vec<CompareFileEntry>,
}

#[derive(Deserialize)]
struct CompareFileEntry {
    sha: String,
    filename: String,
    #[serde(default)]
    raw_url: String,
}

#[derive(Deserialize)]
struct CommentResponse {
    id: u64,
    #[serde(default)]
    body: Option<String>,
}
