pub mod baseline;
pub mod config;
pub mod delivery;
pub mod diffscan;
pub mod error;
pub mod exec;
pub mod github;
pub mod manifest;
pub mod orchestrator;
pub mod relay;
pub mod scanner;
pub mod workspace;

pub use baseline::BaselineExceptionBuilder;
pub use config::{EventPayload, GithubContext, ScanSettings};
pub use delivery::{
    upsert_marked_comment, ArtifactSink, CommentAction, FsArtifactSink, ReportDelivery,
    COMMENT_MARKER, SARIF_ARTIFACT_NAME, STEP_SUMMARY_MAX_BYTES,
};
pub use diffscan::{DifferentialScanRunner, ScanArtifacts, DEFAULT_POLICY};
pub use error::{GateError, PolicyViolation};
pub use exec::{CommandRunner, CommandSpec, ExecError, ExecMode, ExecOutput, ProcessRunner};
pub use github::{
    resolve_change_set, ChangeComparator, CommentApi, CompareResult, CompareStatus,
    ContentFetcher, GithubClient, GithubError, IssueComment,
};
pub use manifest::{in_scope, ChangedFile, ManifestKind, ScopedManifest};
pub use orchestrator::{Collaborators, RunOutcome, ScanOrchestrator};
pub use relay::{CommentRelay, HttpCommentRelay, DEFAULT_RELAY_URL};
pub use scanner::{PreinstalledScanner, ScannerBin, ScannerProvider};
pub use workspace::RunWorkspace;
