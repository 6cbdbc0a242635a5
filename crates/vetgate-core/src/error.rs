use std::path::PathBuf;

use thiserror::Error;

use crate::exec::ExecError;

/// The external scanner exited nonzero because a finding failed the
/// configured policy. Deferred by the scan runner so report delivery still
/// happens, then re-raised by the orchestrator as the run's final outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency findings violated the configured policy (scanner exit status {status})")]
pub struct PolicyViolation {
    pub status: i32,
}

/// Terminal failures of a gate run.
///
/// Everything here fails the CI run. [`GateError::PolicyViolation`] is kept
/// as its own variant so callers can tell a policy gate from an
/// infrastructural breakage even though both exit nonzero.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("unsupported event type: {0}")]
    UnsupportedEvent(String),
    #[error("scanner binary unusable: {0}")]
    Binary(String),
    #[error("scanner did not produce expected report file {}", .path.display())]
    MissingReport { path: PathBuf },
    #[error("remote mode requires both an API key and a tenant id")]
    MissingRemoteCredentials,
    #[error("required environment missing: {0}")]
    Environment(String),
    #[error(transparent)]
    PolicyViolation(#[from] PolicyViolation),
    #[error("scanner invocation failed: {0}")]
    Exec(#[from] ExecError),
    #[error("run workspace i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// True when the run failed the policy gate rather than breaking down.
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation(_))
    }
}
