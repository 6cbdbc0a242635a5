use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

/// Hosted relay used when the primary comment post is rejected, e.g. by the
/// read-only token a fork-originated pull request runs with.
pub const DEFAULT_RELAY_URL: &str = "https://ghcp-relay.vetgate.io";

/// Secondary comment-posting channel. `tag` carries the comment marker only
/// when an existing comment should be updated; an empty tag means create.
#[async_trait]
pub trait CommentRelay: Send + Sync {
    async fn create_comment(
        &self,
        body: &str,
        tag: &str,
        pr_number: u64,
        repo: &str,
        owner: &str,
    ) -> Result<String>;
}

/// JSON-over-HTTP relay client. The wire format is the relay's contract;
/// the gate only cares that a 2xx response carries a comment id.
pub struct HttpCommentRelay {
    http: Client,
    base_url: String,
}

impl HttpCommentRelay {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("vetgate/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build comment relay HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CommentRelay for HttpCommentRelay {
    async fn create_comment(
        &self,
        body: &str,
        tag: &str,
        pr_number: u64,
        repo: &str,
        owner: &str,
    ) -> Result<String> {
        let url = format!("{}/v1/comments", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "owner": owner,
                "repo": repo,
                "pr_number": pr_number,
                "tag": tag,
                "body": body,
            }))
            .send()
            .await
            .context("failed to reach comment relay")?;
        if !response.status().is_success() {
            anyhow::bail!("comment relay rejected the request ({})", response.status());
        }
        let payload: RelayResponse = response
            .json()
            .await
            .context("malformed comment relay response")?;
        Ok(payload.comment_id)
    }
}

#[derive(Deserialize)]
struct RelayResponse {
    comment_id: String,
}
