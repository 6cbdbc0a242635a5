use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::error::GateError;
use crate::github::{ContentFetcher, GithubError};
use crate::manifest::ScopedManifest;
use crate::scanner::ScannerBin;
use crate::workspace::RunWorkspace;

/// Builds the exception list the differential scan suppresses: every
/// finding already present in the base-ref versions of the changed
/// manifests is "known", not newly introduced.
pub struct BaselineExceptionBuilder<'a> {
    scanner: &'a ScannerBin,
    content: &'a dyn ContentFetcher,
    workspace: &'a RunWorkspace,
}

impl<'a> BaselineExceptionBuilder<'a> {
    pub fn new(
        scanner: &'a ScannerBin,
        content: &'a dyn ContentFetcher,
        workspace: &'a RunWorkspace,
    ) -> Self {
        Self {
            scanner,
            content,
            workspace,
        }
    }

    /// Scan each changed manifest as it looked at `base_ref` and aggregate
    /// the results into one exception file.
    ///
    /// Per-manifest failures (absent at base, fetch error, dump-scan error)
    /// skip that manifest only. The aggregation step is the one fatal
    /// point: without it there is no exception file to hand to the
    /// differential scan.
    pub async fn build(
        &self,
        base_ref: &str,
        manifests: &[ScopedManifest],
    ) -> Result<PathBuf, GateError> {
        let dump_dir = self.workspace.dump_dir();

        // Sequential on purpose: every iteration appends into the shared
        // dump directory, and the aggregation step reads it whole.
        for manifest in manifests {
            let content = match self.content.fetch_raw(&manifest.file.path, base_ref).await {
                Ok(content) => content,
                Err(GithubError::NotFound(_)) => {
                    warn!(
                        path = %manifest.file.path,
                        base_ref,
                        "manifest not present at base ref (newly added), skipping baseline scan"
                    );
                    continue;
                }
                Err(err) => {
                    warn!(
                        path = %manifest.file.path,
                        base_ref,
                        error = %err,
                        "failed to fetch manifest at base ref, skipping baseline scan"
                    );
                    continue;
                }
            };
            if let Err(err) = self.dump_one(manifest, &content, &dump_dir).await {
                warn!(
                    path = %manifest.file.path,
                    error = %err,
                    "baseline scan failed for manifest, skipping"
                );
            }
        }

        self.aggregate(&dump_dir).await
    }

    async fn dump_one(
        &self,
        manifest: &ScopedManifest,
        content: &[u8],
        dump_dir: &Path,
    ) -> Result<()> {
        let baseline_path = self
            .workspace
            .baseline_manifest(&manifest.file.content_id, manifest.kind);
        fs::write(&baseline_path, content).with_context(|| {
            format!("failed to write baseline manifest {}", baseline_path.display())
        })?;

        debug!(
            path = %manifest.file.path,
            kind = %manifest.kind,
            "dump-scanning baseline manifest"
        );
        let spec = self
            .scanner
            .command("scan")
            .arg("--lockfiles")
            .arg(baseline_path.display().to_string())
            .arg("--lockfile-as")
            .arg(manifest.kind.basename())
            .arg("--json-dump-dir")
            .arg(dump_dir.display().to_string())
            .arg("--enrich=false");
        self.scanner
            .run(&spec)
            .await
            .context("baseline dump scan failed")?;
        Ok(())
    }

    async fn aggregate(&self, dump_dir: &Path) -> Result<PathBuf, GateError> {
        let exceptions = self.workspace.exceptions_file();
        let spec = self
            .scanner
            .command("query")
            .arg("--from")
            .arg(dump_dir.display().to_string())
            .args(["--exceptions-filter", "true"])
            .arg("--exceptions-generate")
            .arg(exceptions.display().to_string());
        self.scanner.run(&spec).await?;

        // The scanner errors on a missing exceptions file, not an empty
        // one, so an empty aggregation still has to leave a file behind.
        if !exceptions.is_file() {
            debug!("aggregation produced no exceptions, writing empty exception file");
            fs::write(&exceptions, b"")?;
        }
        info!(path = %exceptions.display(), "baseline exception file ready");
        Ok(exceptions)
    }
}
