use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::baseline::BaselineExceptionBuilder;
use crate::config::{GithubContext, ScanSettings};
use crate::delivery::{ArtifactSink, FsArtifactSink, ReportDelivery};
use crate::diffscan::{DifferentialScanRunner, ScanArtifacts};
use crate::error::GateError;
use crate::exec::{CommandRunner, ProcessRunner};
use crate::github::{
    resolve_change_set, ChangeComparator, CommentApi, ContentFetcher, GithubClient,
};
use crate::manifest;
use crate::relay::{CommentRelay, HttpCommentRelay, DEFAULT_RELAY_URL};
use crate::scanner::{PreinstalledScanner, ScannerBin, ScannerProvider};
use crate::workspace::RunWorkspace;

/// External collaborators the orchestrator drives, injectable for tests.
pub struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub provider: Arc<dyn ScannerProvider>,
    pub content: Arc<dyn ContentFetcher>,
    pub comparator: Arc<dyn ChangeComparator>,
    pub comments: Arc<dyn CommentApi>,
    pub relay: Option<Arc<dyn CommentRelay>>,
    pub artifacts: Option<Arc<dyn ArtifactSink>>,
}

impl Collaborators {
    /// Production wiring: real subprocesses, the GitHub API client for all
    /// three repository-facing seams, and optional relay/artifact sinks
    /// per the settings.
    pub fn production(settings: &ScanSettings, context: &GithubContext) -> Result<Self> {
        let github = Arc::new(GithubClient::new(context)?);
        let relay = if settings.comment_proxy {
            let url = settings
                .relay_url
                .clone()
                .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
            Some(Arc::new(HttpCommentRelay::new(url)?) as Arc<dyn CommentRelay>)
        } else {
            None
        };
        Ok(Self {
            runner: Arc::new(ProcessRunner),
            provider: Arc::new(PreinstalledScanner::new(settings.scanner_path.clone())),
            content: github.clone(),
            comparator: github.clone(),
            comments: github,
            relay,
            artifacts: settings
                .artifact_dir
                .clone()
                .map(|dir| Arc::new(FsArtifactSink::new(dir)) as Arc<dyn ArtifactSink>),
        })
    }
}

/// Final result of a successful run. Events that scanned nothing return
/// empty paths.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub sarif: Option<PathBuf>,
    pub markdown: Option<PathBuf>,
}

impl RunOutcome {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Top-level coordinator: acquire and verify the scanner binary, dispatch
/// on the triggering event, and resolve the run's final outcome.
pub struct ScanOrchestrator {
    settings: ScanSettings,
    context: GithubContext,
    collaborators: Collaborators,
}

impl ScanOrchestrator {
    pub fn new(settings: ScanSettings, context: GithubContext, collaborators: Collaborators) -> Self {
        Self {
            settings,
            context,
            collaborators,
        }
    }

    pub async fn run(&self) -> Result<RunOutcome, GateError> {
        let binary = self
            .collaborators
            .provider
            .acquire(self.settings.version.as_deref())
            .await?;
        let scanner = ScannerBin::new(binary, self.collaborators.runner.clone());
        let version = scanner.version().await?;
        info!(version = %version, path = %scanner.path().display(), "scanner binary verified");
        if let Some(pin) = &self.settings.version {
            if pin != &version {
                warn!(pinned = %pin, actual = %version, "scanner version differs from the configured pin");
            }
        }

        let workspace = RunWorkspace::create(&self.context.temp_root, &self.context.run_id)?;
        match self.context.event_name.as_str() {
            "push" => self.on_push(&scanner, &workspace).await,
            "pull_request" => self.on_pull_request(&scanner, &workspace).await,
            "schedule" => {
                info!("schedule events are accepted but perform no scan");
                Ok(RunOutcome::empty())
            }
            other => Err(GateError::UnsupportedEvent(other.to_string())),
        }
    }

    /// Push: one full scan of the working tree, no baseline.
    async fn on_push(
        &self,
        scanner: &ScannerBin,
        workspace: &RunWorkspace,
    ) -> Result<RunOutcome, GateError> {
        let runner =
            DifferentialScanRunner::new(scanner, &self.settings, &self.context, workspace);
        let artifacts = runner.run_full().await?;
        self.delivery().deliver(&artifacts).await;
        Self::finish(artifacts)
    }

    /// Pull request: resolve the change set, build the baseline exception
    /// list, run the differential scan, deliver, then resolve any deferred
    /// policy violation.
    async fn on_pull_request(
        &self,
        scanner: &ScannerBin,
        workspace: &RunWorkspace,
    ) -> Result<RunOutcome, GateError> {
        let base_ref = self
            .context
            .base_ref
            .clone()
            .ok_or_else(|| GateError::Environment("GITHUB_BASE_REF".to_string()))?;

        let changed = resolve_change_set(
            self.collaborators.comparator.as_ref(),
            &base_ref,
            &self.context.compare_head(),
        )
        .await;
        let scoped = manifest::in_scope(changed, &self.context.repo_root);
        if scoped.is_empty() {
            info!("no dependency manifests changed, nothing to scan");
            return Ok(RunOutcome::empty());
        }
        info!(count = scoped.len(), "dependency manifests in scope");

        let builder = BaselineExceptionBuilder::new(
            scanner,
            self.collaborators.content.as_ref(),
            workspace,
        );
        let exceptions = builder.build(&base_ref, &scoped).await?;

        let runner =
            DifferentialScanRunner::new(scanner, &self.settings, &self.context, workspace);
        let artifacts = runner.run_differential(&scoped, &exceptions).await?;
        self.delivery().deliver(&artifacts).await;
        Self::finish(artifacts)
    }

    fn delivery(&self) -> ReportDelivery<'_> {
        ReportDelivery {
            comments: self.collaborators.comments.as_ref(),
            relay: self.collaborators.relay.as_deref(),
            artifacts: self.collaborators.artifacts.as_deref(),
            settings: &self.settings,
            context: &self.context,
        }
    }

    /// Re-raise a deferred policy violation only after delivery completed.
    fn finish(artifacts: ScanArtifacts) -> Result<RunOutcome, GateError> {
        match artifacts.violation {
            Some(violation) => Err(GateError::PolicyViolation(violation)),
            None => Ok(RunOutcome {
                sarif: Some(artifacts.sarif),
                markdown: Some(artifacts.markdown),
            }),
        }
    }
}
