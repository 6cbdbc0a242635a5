use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::manifest::ManifestKind;

/// Deterministic per-run temp layout under `<temp root>/vetgate-<run id>`.
///
/// The run id keeps concurrent CI jobs on one runner apart, and blob hashes
/// key the baseline manifest copies, so the directory contents are
/// reproducible for a given event. Nothing here is cleaned up; the hosting
/// runner owns the temp directory lifecycle.
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    root: PathBuf,
}

impl RunWorkspace {
    pub fn create(temp_root: &Path, run_id: &str) -> io::Result<Self> {
        let root = temp_root.join(format!("vetgate-{run_id}"));
        fs::create_dir_all(root.join("dump"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared dump directory all baseline scans accumulate into.
    pub fn dump_dir(&self) -> PathBuf {
        self.root.join("dump")
    }

    pub fn exceptions_file(&self) -> PathBuf {
        self.root.join("exceptions.json")
    }

    pub fn sarif_report(&self) -> PathBuf {
        self.root.join("report.sarif")
    }

    pub fn markdown_report(&self) -> PathBuf {
        self.root.join("report.md")
    }

    pub fn policy_file(&self) -> PathBuf {
        self.root.join("policy.yml")
    }

    /// Baseline copy of a manifest at the base ref, keyed by blob hash.
    pub fn baseline_manifest(&self, content_id: &str, kind: ManifestKind) -> PathBuf {
        self.root.join(format!("base-{content_id}-{}", kind.basename()))
    }
}
