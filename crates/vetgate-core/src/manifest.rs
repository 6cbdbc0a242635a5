use std::fmt;
use std::path::Path;

use tracing::debug;

/// Dependency-manifest files the scanner understands, keyed by basename.
///
/// The directory part of a changed path is ignored: `frontend/yarn.lock`
/// and `yarn.lock` are the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    GemfileLock,
    NpmPackageLock,
    YarnLock,
    PipfileLock,
    PoetryLock,
    GoMod,
    MavenPom,
    GradleLock,
    PipRequirements,
    PnpmLock,
    UvLock,
}

impl ManifestKind {
    pub const ALL: [ManifestKind; 11] = [
        ManifestKind::GemfileLock,
        ManifestKind::NpmPackageLock,
        ManifestKind::YarnLock,
        ManifestKind::PipfileLock,
        ManifestKind::PoetryLock,
        ManifestKind::GoMod,
        ManifestKind::MavenPom,
        ManifestKind::GradleLock,
        ManifestKind::PipRequirements,
        ManifestKind::PnpmLock,
        ManifestKind::UvLock,
    ];

    /// Canonical basename; also the tag passed to the scanner's
    /// `--lockfile-as` flag.
    pub fn basename(&self) -> &'static str {
        match self {
            ManifestKind::GemfileLock => "Gemfile.lock",
            ManifestKind::NpmPackageLock => "package-lock.json",
            ManifestKind::YarnLock => "yarn.lock",
            ManifestKind::PipfileLock => "Pipfile.lock",
            ManifestKind::PoetryLock => "poetry.lock",
            ManifestKind::GoMod => "go.mod",
            ManifestKind::MavenPom => "pom.xml",
            ManifestKind::GradleLock => "gradle.lockfile",
            ManifestKind::PipRequirements => "requirements.txt",
            ManifestKind::PnpmLock => "pnpm-lock.yaml",
            ManifestKind::UvLock => "uv.lock",
        }
    }

    pub fn from_basename(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.basename() == name)
    }
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.basename())
    }
}

/// A file touched by the triggering event, as reported by the change
/// comparison collaborator.
#[derive(Debug, Clone)]
pub struct ChangedFile {
    /// Blob hash identifying the changed content.
    pub content_id: String,
    /// Path relative to the repository root.
    pub path: String,
    /// Raw-content URL reported alongside the change.
    pub raw_url: String,
}

/// A changed file that passed in-scope filtering.
#[derive(Debug, Clone)]
pub struct ScopedManifest {
    pub file: ChangedFile,
    pub kind: ManifestKind,
}

/// Restrict a change set to manifests the scan covers: the basename must be
/// a registered [`ManifestKind`] and the file must still exist in the head
/// working tree (files deleted by the change are out of scope).
pub fn in_scope(files: Vec<ChangedFile>, repo_root: &Path) -> Vec<ScopedManifest> {
    files
        .into_iter()
        .filter_map(|file| {
            let basename = Path::new(&file.path).file_name()?.to_str()?;
            let kind = ManifestKind::from_basename(basename)?;
            if !repo_root.join(&file.path).is_file() {
                debug!(path = %file.path, "changed manifest no longer in head tree, skipping");
                return None;
            }
            Some(ScopedManifest { file, kind })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn changed(path: &str) -> ChangedFile {
        ChangedFile {
            content_id: format!("sha-{path}"),
            path: path.to_string(),
            raw_url: String::new(),
        }
    }

    #[test]
    fn registry_covers_known_basenames() {
        assert_eq!(
            ManifestKind::from_basename("package-lock.json"),
            Some(ManifestKind::NpmPackageLock)
        );
        assert_eq!(ManifestKind::from_basename("uv.lock"), Some(ManifestKind::UvLock));
        assert_eq!(ManifestKind::from_basename("README.md"), None);
    }

    #[test]
    fn scoping_matches_basename_anywhere_in_the_tree() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("frontend")).unwrap();
        fs::write(root.path().join("frontend/yarn.lock"), "lock").unwrap();

        let scoped = in_scope(vec![changed("frontend/yarn.lock")], root.path());
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].kind, ManifestKind::YarnLock);
    }

    #[test]
    fn scoping_drops_unknown_files_and_deleted_manifests() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("go.mod"), "module demo").unwrap();

        let scoped = in_scope(
            vec![
                changed("go.mod"),
                changed("src/main.rs"),
                // Deleted by the change: not present in the head tree.
                changed("package-lock.json"),
            ],
            root.path(),
        );
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].file.path, "go.mod");
    }
}
