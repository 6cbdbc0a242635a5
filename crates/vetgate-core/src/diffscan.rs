use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{GithubContext, ScanSettings};
use crate::error::{GateError, PolicyViolation};
use crate::exec::{CommandSpec, ExecMode};
use crate::manifest::ScopedManifest;
use crate::scanner::ScannerBin;
use crate::workspace::RunWorkspace;

/// Policy filter suite used when the caller supplies none.
pub const DEFAULT_POLICY: &str = include_str!("default_policy.yml");

/// Sibling report artifacts of one completed scanner invocation.
///
/// A policy violation is carried here instead of being raised so the
/// orchestrator can run report delivery first and re-raise it after.
#[derive(Debug, Clone)]
pub struct ScanArtifacts {
    pub sarif: PathBuf,
    pub markdown: PathBuf,
    pub violation: Option<PolicyViolation>,
}

/// Runs the final scan against the head state of the repository: one
/// invocation covering every in-scope manifest, gated by the policy suite.
pub struct DifferentialScanRunner<'a> {
    scanner: &'a ScannerBin,
    settings: &'a ScanSettings,
    context: &'a GithubContext,
    workspace: &'a RunWorkspace,
}

impl<'a> DifferentialScanRunner<'a> {
    pub fn new(
        scanner: &'a ScannerBin,
        settings: &'a ScanSettings,
        context: &'a GithubContext,
        workspace: &'a RunWorkspace,
    ) -> Self {
        Self {
            scanner,
            settings,
            context,
            workspace,
        }
    }

    /// Differential scan: all in-scope head manifests, with the baseline
    /// exception file suppressing pre-existing findings.
    pub async fn run_differential(
        &self,
        manifests: &[ScopedManifest],
        exceptions: &Path,
    ) -> Result<ScanArtifacts, GateError> {
        let mut spec = self.scan_command()?;
        for manifest in manifests {
            let head_path = self.context.repo_root.join(&manifest.file.path);
            spec = spec
                .arg("--lockfiles")
                .arg(head_path.display().to_string())
                .arg("--lockfile-as")
                .arg(manifest.kind.basename());
        }
        spec = spec.arg("--exceptions").arg(exceptions.display().to_string());
        self.invoke(spec).await
    }

    /// Full (non-differential) scan of the working tree, used for push
    /// events; no exception file is attached.
    pub async fn run_full(&self) -> Result<ScanArtifacts, GateError> {
        let spec = self.scan_command()?;
        self.invoke(spec).await
    }

    fn scan_command(&self) -> Result<CommandSpec, GateError> {
        self.ensure_remote_credentials()?;
        let policy = self.policy_path()?;

        let mut spec = self
            .scanner
            .command("scan")
            .arg("--report-sarif")
            .arg(self.workspace.sarif_report().display().to_string())
            .arg("--report-markdown-summary")
            .arg(self.workspace.markdown_report().display().to_string())
            .arg("--filter-suite")
            .arg(policy.display().to_string())
            .arg("--filter-fail")
            .arg("--fail-fast");

        if let Some(extra) = &self.settings.exceptions_extra {
            spec = spec.arg("--exceptions-extra").arg(extra.display().to_string());
        }
        for pattern in &self.settings.exclude_patterns {
            spec = spec.arg("--exclude").arg(pattern.as_str());
        }
        for registry in &self.settings.trusted_registries {
            spec = spec.arg("--trusted-registry").arg(registry.as_str());
        }
        if self.settings.cloud {
            spec = spec
                .arg("--report-sync")
                .arg("--report-sync-project")
                .arg(self.context.full_repo())
                .arg("--report-sync-project-version")
                .arg(self.context.sync_ref());
        }
        if self.settings.malware {
            spec = spec
                .arg("--malware")
                .arg("--malware-analysis-timeout")
                .arg(format!("{}s", self.settings.malware_analysis_timeout_secs))
                .arg("--malware-trust-tool-result")
                .arg("--malware-analysis-min-confidence")
                .arg(self.settings.malware_min_confidence.as_str());
        }
        Ok(spec)
    }

    async fn invoke(&self, spec: CommandSpec) -> Result<ScanArtifacts, GateError> {
        // The exit status is interpreted here, not by the runner: nonzero
        // means the policy gate fired, and that outcome is deferred until
        // the report has been delivered.
        let spec = spec.mode(ExecMode::IgnoreStatus);
        let output = self.scanner.run(&spec).await?;

        let sarif = self.workspace.sarif_report();
        let markdown = self.workspace.markdown_report();
        for path in [&sarif, &markdown] {
            if !path.is_file() {
                return Err(GateError::MissingReport { path: path.clone() });
            }
        }

        let violation = if output.success() {
            None
        } else {
            info!(status = output.status, "scanner reported a policy violation");
            Some(PolicyViolation {
                status: output.status,
            })
        };
        Ok(ScanArtifacts {
            sarif,
            markdown,
            violation,
        })
    }

    fn policy_path(&self) -> Result<PathBuf, GateError> {
        match &self.settings.policy {
            Some(path) => Ok(path.clone()),
            None => {
                let path = self.workspace.policy_file();
                if !path.is_file() {
                    debug!(path = %path.display(), "materializing default policy suite");
                    fs::write(&path, DEFAULT_POLICY)?;
                }
                Ok(path)
            }
        }
    }

    fn ensure_remote_credentials(&self) -> Result<(), GateError> {
        if !self.settings.cloud {
            return Ok(());
        }
        let has_key = self
            .settings
            .api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());
        let has_tenant = self
            .settings
            .tenant
            .as_deref()
            .is_some_and(|tenant| !tenant.trim().is_empty());
        if has_key && has_tenant {
            Ok(())
        } else {
            Err(GateError::MissingRemoteCredentials)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandRunner, ExecError, ExecOutput};
    use crate::manifest::{ChangedFile, ManifestKind};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Mimics the scanner's report side effects: writes the report pair
    /// (unless told not to) and exits with the scripted status.
    struct ReportingRunner {
        seen: Mutex<Vec<Vec<String>>>,
        scan_status: i32,
        write_reports: bool,
    }

    impl ReportingRunner {
        fn new(scan_status: i32, write_reports: bool) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                scan_status,
                write_reports,
            })
        }

        fn last_args(&self) -> Vec<String> {
            self.seen.lock().unwrap().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ReportingRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<ExecOutput, ExecError> {
            self.seen.lock().unwrap().push(spec.args.clone());
            if self.write_reports {
                for flag in ["--report-sarif", "--report-markdown-summary"] {
                    if let Some(idx) = spec.args.iter().position(|arg| arg == flag) {
                        fs::write(&spec.args[idx + 1], "report").unwrap();
                    }
                }
            }
            Ok(ExecOutput {
                status: self.scan_status,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn context(repo_root: &Path) -> GithubContext {
        let mut context = GithubContext::from_map(HashMap::from([
            ("GITHUB_REPOSITORY".to_string(), "octo/widgets".to_string()),
            ("GITHUB_TOKEN".to_string(), "token".to_string()),
            ("GITHUB_EVENT_NAME".to_string(), "pull_request".to_string()),
            ("GITHUB_BASE_REF".to_string(), "main".to_string()),
            ("GITHUB_HEAD_REF".to_string(), "feature".to_string()),
        ]))
        .unwrap();
        context.repo_root = repo_root.to_path_buf();
        context
    }

    fn scoped(path: &str, kind: ManifestKind) -> ScopedManifest {
        ScopedManifest {
            file: ChangedFile {
                content_id: "abc".into(),
                path: path.into(),
                raw_url: String::new(),
            },
            kind,
        }
    }

    #[tokio::test]
    async fn differential_scan_covers_all_manifests_in_one_invocation() {
        let temp = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(temp.path(), "d1").unwrap();
        let runner = ReportingRunner::new(0, true);
        let scanner = ScannerBin::new("/opt/vet", runner.clone());
        let settings = ScanSettings::default();
        let context = context(temp.path());
        let exceptions = workspace.exceptions_file();
        fs::write(&exceptions, "").unwrap();

        let diff = DifferentialScanRunner::new(&scanner, &settings, &context, &workspace);
        let artifacts = diff
            .run_differential(
                &[
                    scoped("package-lock.json", ManifestKind::NpmPackageLock),
                    scoped("api/go.mod", ManifestKind::GoMod),
                ],
                &exceptions,
            )
            .await
            .unwrap();

        assert!(artifacts.violation.is_none());
        let args = runner.last_args();
        assert_eq!(args[..2], ["--no-banner".to_string(), "scan".to_string()]);
        assert_eq!(args.iter().filter(|arg| *arg == "--lockfiles").count(), 2);
        assert!(args.contains(&"--filter-fail".to_string()));
        assert!(args.contains(&"--fail-fast".to_string()));
        assert!(args.contains(&"--exceptions".to_string()));
        // Default policy suite was materialized into the run workspace.
        assert!(workspace.policy_file().is_file());
    }

    #[tokio::test]
    async fn nonzero_exit_is_deferred_not_raised() {
        let temp = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(temp.path(), "d2").unwrap();
        let runner = ReportingRunner::new(1, true);
        let scanner = ScannerBin::new("/opt/vet", runner);
        let settings = ScanSettings::default();
        let context = context(temp.path());

        let diff = DifferentialScanRunner::new(&scanner, &settings, &context, &workspace);
        let artifacts = diff.run_full().await.unwrap();
        assert_eq!(artifacts.violation, Some(PolicyViolation { status: 1 }));
        assert!(artifacts.sarif.is_file());
    }

    #[tokio::test]
    async fn missing_reports_are_an_immediate_error() {
        let temp = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(temp.path(), "d3").unwrap();
        let runner = ReportingRunner::new(0, false);
        let scanner = ScannerBin::new("/opt/vet", runner);
        let settings = ScanSettings::default();
        let context = context(temp.path());

        let diff = DifferentialScanRunner::new(&scanner, &settings, &context, &workspace);
        let err = diff.run_full().await.unwrap_err();
        assert!(matches!(err, GateError::MissingReport { .. }));
    }

    #[tokio::test]
    async fn remote_mode_requires_key_and_tenant() {
        let temp = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(temp.path(), "d4").unwrap();
        let runner = ReportingRunner::new(0, true);
        let scanner = ScannerBin::new("/opt/vet", runner.clone());
        let mut settings = ScanSettings::default();
        settings.cloud = true;
        settings.api_key = Some("key".into());
        let context = context(temp.path());

        let diff = DifferentialScanRunner::new(&scanner, &settings, &context, &workspace);
        let err = diff.run_full().await.unwrap_err();
        assert!(matches!(err, GateError::MissingRemoteCredentials));
        // Precondition failure happens before any invocation.
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remote_mode_adds_sync_and_malware_flags() {
        let temp = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(temp.path(), "d5").unwrap();
        let runner = ReportingRunner::new(0, true);
        let scanner = ScannerBin::new("/opt/vet", runner.clone());
        let mut settings = ScanSettings::default();
        settings.cloud = true;
        settings.api_key = Some("key".into());
        settings.tenant = Some("org-1".into());
        settings.malware = true;
        settings.malware_analysis_timeout_secs = 120;
        let context = context(temp.path());

        let diff = DifferentialScanRunner::new(&scanner, &settings, &context, &workspace);
        diff.run_full().await.unwrap();

        let args = runner.last_args();
        assert!(args.contains(&"--report-sync".to_string()));
        assert!(args.contains(&"octo/widgets".to_string()));
        assert!(args.contains(&"feature".to_string()));
        assert!(args.contains(&"--malware".to_string()));
        assert!(args.contains(&"120s".to_string()));
        assert!(args.contains(&"--malware-trust-tool-result".to_string()));
    }

    #[tokio::test]
    async fn user_policy_overrides_the_default_suite() {
        let temp = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(temp.path(), "d6").unwrap();
        let runner = ReportingRunner::new(0, true);
        let scanner = ScannerBin::new("/opt/vet", runner.clone());
        let policy = temp.path().join("custom-policy.yml");
        fs::write(&policy, "filters: []").unwrap();
        let mut settings = ScanSettings::default();
        settings.policy = Some(policy.clone());
        let context = context(temp.path());

        let diff = DifferentialScanRunner::new(&scanner, &settings, &context, &workspace);
        diff.run_full().await.unwrap();

        let args = runner.last_args();
        assert!(args.contains(&policy.display().to_string()));
        assert!(!workspace.policy_file().is_file());
    }
}
