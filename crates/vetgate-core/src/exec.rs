use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

/// How a [`CommandRunner`] treats the child's exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// A nonzero exit is an [`ExecError::NonZeroStatus`].
    Check,
    /// The exit status is surfaced in [`ExecOutput`] for the caller to
    /// interpret (version probes, deferred policy-gate handling).
    IgnoreStatus,
}

/// One subprocess invocation: a program plus a flat ordered argument list,
/// never a shell string.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub mode: ExecMode,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            mode: ExecMode::Check,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Captured result of a completed subprocess.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Errors from launching or (in [`ExecMode::Check`]) completing a subprocess.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with status {status}: {stderr}")]
    NonZeroStatus {
        program: String,
        status: i32,
        stderr: String,
    },
}

/// Command-execution seam. The pipeline never shells out directly; every
/// scanner invocation goes through this trait so tests can script the tool.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<ExecOutput, ExecError>;
}

/// Runs commands as real child processes with captured output.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ExecOutput, ExecError> {
        trace!(program = %spec.program.display(), args = ?spec.args, "spawning process");
        let output = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                program: spec.program.display().to_string(),
                source,
            })?;

        let result = ExecOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if spec.mode == ExecMode::Check && !result.success() {
            return Err(ExecError::NonZeroStatus {
                program: spec.program.display().to_string(),
                status: result.status,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }
}
