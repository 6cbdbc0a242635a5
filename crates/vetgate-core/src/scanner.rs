use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::GateError;
use crate::exec::{CommandRunner, CommandSpec, ExecError, ExecMode, ExecOutput};

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Version: ([0-9]+\.[0-9]+\.[0-9]+)").expect("version pattern"));

/// Handle on a verified scanner executable. All subcommands are prefixed
/// with the banner-suppression flag so stdout stays machine-readable.
pub struct ScannerBin {
    path: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl ScannerBin {
    pub fn new(path: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            path: path.into(),
            runner,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base invocation for a scanner subcommand.
    pub fn command(&self, subcommand: &str) -> CommandSpec {
        CommandSpec::new(&self.path).arg("--no-banner").arg(subcommand)
    }

    pub async fn run(&self, spec: &CommandSpec) -> Result<ExecOutput, ExecError> {
        self.runner.run(spec).await
    }

    /// Probe the binary's version banner. The probe ignores the exit status
    /// and trusts only the `Version: <semver>` line on stdout.
    pub async fn version(&self) -> Result<String, GateError> {
        let spec = self.command("version").mode(ExecMode::IgnoreStatus);
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|err| GateError::Binary(err.to_string()))?;
        VERSION_PATTERN
            .captures(&output.stdout)
            .and_then(|captures| captures.get(1))
            .map(|matched| matched.as_str().to_string())
            .ok_or_else(|| {
                GateError::Binary(format!(
                    "unable to determine scanner version from {}",
                    self.path.display()
                ))
            })
    }
}

/// Resolves a scanner executable. Download/extraction from a release
/// channel is a collaborator concern behind this seam.
#[async_trait]
pub trait ScannerProvider: Send + Sync {
    async fn acquire(&self, version_pin: Option<&str>) -> Result<PathBuf, GateError>;
}

/// Uses an already-installed scanner: an explicitly configured path first,
/// then a `PATH` search for the well-known binary name.
pub struct PreinstalledScanner {
    binary_name: String,
    explicit_path: Option<PathBuf>,
}

impl PreinstalledScanner {
    pub const BINARY_NAME: &'static str = "vet";

    pub fn new(explicit_path: Option<PathBuf>) -> Self {
        Self {
            binary_name: Self::BINARY_NAME.to_string(),
            explicit_path,
        }
    }
}

#[async_trait]
impl ScannerProvider for PreinstalledScanner {
    async fn acquire(&self, _version_pin: Option<&str>) -> Result<PathBuf, GateError> {
        if let Some(path) = &self.explicit_path {
            if path.is_file() {
                return Ok(path.clone());
            }
            return Err(GateError::Binary(format!(
                "configured scanner path {} does not exist",
                path.display()
            )));
        }
        let path_var = std::env::var_os("PATH").unwrap_or_default();
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(&self.binary_name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(GateError::Binary(format!(
            "scanner binary `{}` not found on PATH",
            self.binary_name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedRunner {
        stdout: &'static str,
        status: i32,
        seen: Mutex<Vec<CommandSpec>>,
    }

    #[async_trait]
    impl CommandRunner for CannedRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<ExecOutput, ExecError> {
            self.seen.lock().unwrap().push(spec.clone());
            Ok(ExecOutput {
                status: self.status,
                stdout: self.stdout.to_string(),
                stderr: String::new(),
            })
        }
    }

    fn scanner_with(stdout: &'static str, status: i32) -> (ScannerBin, Arc<CannedRunner>) {
        let runner = Arc::new(CannedRunner {
            stdout,
            status,
            seen: Mutex::new(Vec::new()),
        });
        (ScannerBin::new("/opt/vet", runner.clone()), runner)
    }

    #[tokio::test]
    async fn version_parses_banner_line() {
        let (scanner, runner) = scanner_with("vet\nVersion: 1.5.0\n", 0);
        assert_eq!(scanner.version().await.unwrap(), "1.5.0");

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].args, vec!["--no-banner", "version"]);
        assert_eq!(seen[0].mode, ExecMode::IgnoreStatus);
    }

    #[tokio::test]
    async fn version_tolerates_nonzero_exit() {
        let (scanner, _) = scanner_with("Version: 0.9.2", 2);
        assert_eq!(scanner.version().await.unwrap(), "0.9.2");
    }

    #[tokio::test]
    async fn version_without_banner_is_a_binary_error() {
        let (scanner, _) = scanner_with("no banner here", 0);
        let err = scanner.version().await.unwrap_err();
        assert!(matches!(err, GateError::Binary(_)));
    }

    #[tokio::test]
    async fn explicit_path_must_exist() {
        let provider = PreinstalledScanner::new(Some(PathBuf::from("/nonexistent/vet")));
        let err = provider.acquire(None).await.unwrap_err();
        assert!(matches!(err, GateError::Binary(_)));
    }

    #[tokio::test]
    async fn explicit_path_wins_over_path_search() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("vet");
        std::fs::write(&binary, "#!/bin/sh\n").unwrap();

        let provider = PreinstalledScanner::new(Some(binary.clone()));
        assert_eq!(provider.acquire(None).await.unwrap(), binary);
    }
}
