use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{GithubContext, ScanSettings};
use crate::diffscan::ScanArtifacts;
use crate::github::{CommentApi, GithubError};
use crate::relay::CommentRelay;

/// Marker embedded in the report comment; its presence in a comment body
/// *is* the comment's identity for upsert purposes.
pub const COMMENT_MARKER: &str = "<!-- vetgate-report -->";

/// Platform ceiling for a step summary: 1 MiB minus 32 bytes of slack the
/// upstream writer reserves for itself.
pub const STEP_SUMMARY_MAX_BYTES: usize = 1_048_544;

/// Filename the SARIF report is uploaded under.
pub const SARIF_ARTIFACT_NAME: &str = "vetgate-report.sarif";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentAction {
    Created(u64),
    Updated(u64),
}

/// Create or update the single marker-keyed comment on an issue.
///
/// Identity is marker-substring presence, not a stored comment id; the
/// body always ends with the marker so the next run finds it again.
pub async fn upsert_marked_comment(
    api: &dyn CommentApi,
    issue: u64,
    content: &str,
    marker: &str,
) -> Result<CommentAction, GithubError> {
    let body = format!("{content}\n\n{marker}");
    let existing = api.list_comments(issue).await?;
    if let Some(comment) = existing.iter().find(|comment| comment.body.contains(marker)) {
        api.update_comment(comment.id, &body).await?;
        Ok(CommentAction::Updated(comment.id))
    } else {
        let id = api.create_comment(issue, &body).await?;
        Ok(CommentAction::Created(id))
    }
}

/// Artifact upload seam; transport is the hosting CI's concern.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn upload(&self, name: &str, path: &Path) -> Result<()>;
}

/// Copies artifacts into a directory the hosting CI collects from.
pub struct FsArtifactSink {
    dir: PathBuf,
}

impl FsArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn upload(&self, name: &str, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create artifact dir {}", self.dir.display()))?;
        let target = self.dir.join(name);
        tokio::fs::copy(path, &target)
            .await
            .with_context(|| format!("failed to copy artifact to {}", target.display()))?;
        Ok(())
    }
}

/// Distributes a finished report. Every channel is best-effort: a delivery
/// failure degrades the run but never fails it, so a policy violation is
/// the only thing that can surface from a scan that produced its reports.
pub struct ReportDelivery<'a> {
    pub comments: &'a dyn CommentApi,
    pub relay: Option<&'a dyn CommentRelay>,
    pub artifacts: Option<&'a dyn ArtifactSink>,
    pub settings: &'a ScanSettings,
    pub context: &'a GithubContext,
}

impl ReportDelivery<'_> {
    pub async fn deliver(&self, artifacts: &ScanArtifacts) {
        if self.settings.pull_request_comment {
            if let Some(pr_number) = self.context.pr_number {
                self.deliver_comment(pr_number, &artifacts.markdown).await;
            }
        }
        if let Some(sink) = self.artifacts {
            self.deliver_artifact(sink, &artifacts.sarif).await;
        }
        if self.settings.step_summary {
            self.write_step_summary(&artifacts.markdown);
        }
    }

    async fn deliver_comment(&self, pr_number: u64, markdown_path: &Path) {
        let content = match fs::read_to_string(markdown_path) {
            Ok(content) => content,
            Err(err) => {
                warn!(
                    path = %markdown_path.display(),
                    error = %err,
                    "markdown report unreadable, skipping pull request comment"
                );
                return;
            }
        };
        match upsert_marked_comment(self.comments, pr_number, &content, COMMENT_MARKER).await {
            Ok(CommentAction::Created(id)) => {
                info!(comment_id = id, "created pull request comment")
            }
            Ok(CommentAction::Updated(id)) => {
                info!(comment_id = id, "updated pull request comment")
            }
            Err(err) => {
                warn!(error = %err, "failed to post pull request comment");
                if self.settings.comment_proxy {
                    if let Some(relay) = self.relay {
                        self.deliver_via_relay(relay, pr_number, &content).await;
                    }
                }
            }
        }
    }

    async fn deliver_via_relay(&self, relay: &dyn CommentRelay, pr_number: u64, content: &str) {
        // The tag tells the relay which existing comment to update; an
        // empty tag means create. When the listing itself is unavailable
        // we fall back to create.
        let tag = match self.comments.list_comments(pr_number).await {
            Ok(comments)
                if comments
                    .iter()
                    .any(|comment| comment.body.contains(COMMENT_MARKER)) =>
            {
                COMMENT_MARKER
            }
            _ => "",
        };
        let body = format!("{content}\n\n{COMMENT_MARKER}");
        match relay
            .create_comment(&body, tag, pr_number, &self.context.repo, &self.context.owner)
            .await
        {
            Ok(id) => info!(comment_id = %id, "posted pull request comment via relay"),
            Err(err) => warn!(error = %err, "comment relay fallback failed"),
        }
    }

    async fn deliver_artifact(&self, sink: &dyn ArtifactSink, sarif: &Path) {
        match sink.upload(SARIF_ARTIFACT_NAME, sarif).await {
            Ok(()) => debug!("uploaded SARIF report artifact"),
            Err(err) => warn!(error = %err, "artifact upload failed"),
        }
    }

    fn write_step_summary(&self, markdown_path: &Path) {
        let Some(summary_path) = &self.context.step_summary else {
            debug!("no step summary file configured");
            return;
        };
        let content = match fs::read(markdown_path) {
            Ok(content) => content,
            Err(err) => {
                warn!(
                    path = %markdown_path.display(),
                    error = %err,
                    "markdown report unreadable, skipping step summary"
                );
                return;
            }
        };
        let content = truncate_summary(content);
        // Overwrite: a re-run must replace, not append to, the previous
        // summary content.
        if let Err(err) = fs::write(summary_path, &content) {
            warn!(
                path = %summary_path.display(),
                error = %err,
                "failed to write step summary"
            );
        }
    }
}

/// Cap summary content at the platform ceiling, warning with the original
/// length. Truncation is byte-exact; the summary is written as raw bytes.
fn truncate_summary(mut content: Vec<u8>) -> Vec<u8> {
    if content.len() > STEP_SUMMARY_MAX_BYTES {
        warn!(
            original_len = content.len(),
            max_len = STEP_SUMMARY_MAX_BYTES,
            "step summary exceeds the platform ceiling, truncating"
        );
        content.truncate(STEP_SUMMARY_MAX_BYTES);
    }
    content
}
