//! Error types for shell-supervisor.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Main error type for shell-supervisor operations.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The shell executable could not be started.
    #[error("failed to start command: {0}")]
    Spawn(#[source] std::io::Error),

    /// Waiting for the child failed, so no exit status could be determined.
    #[error("failed to wait for command: {0}")]
    Wait(#[source] std::io::Error),

    /// Sending the termination signal failed.
    #[error("failed to kill command: {0}")]
    Kill(#[source] std::io::Error),

    /// A stdio pipe was not available after spawning.
    #[error("{0} pipe unavailable")]
    Pipe(&'static str),

    /// An environment entry was not of the form `KEY=VALUE`.
    #[error("invalid environment entry: {0:?}")]
    InvalidEnv(String),

    /// Supervision was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,

    /// The configured deadline elapsed before the command finished.
    #[error("deadline exceeded after {0:?}")]
    TimedOut(Duration),

    /// The supervising task failed unexpectedly.
    #[error("supervisor crashed: {0}")]
    Crashed(String),

    /// A path was expected to live below a root directory.
    #[error("{} not a prefix of {}", .root.display(), .path.display())]
    NotUnderRoot { root: PathBuf, path: PathBuf },

    /// Invalid file name glob.
    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Check if this error came from one of the supervision signals
    /// (cancellation or timeout) rather than from the process itself.
    pub fn is_supervision(&self) -> bool {
        matches!(self, Self::Cancelled | Self::TimedOut(_))
    }
}

/// Convenience Result type for shell-supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Ordered list of every error recorded for one command.
#[derive(Debug, Clone, Default)]
pub struct ErrorList(Vec<Arc<SupervisorError>>);

impl ErrorList {
    pub(crate) fn push(&mut self, err: SupervisorError) {
        self.0.push(Arc::new(err));
    }

    /// Number of recorded errors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the errors in the order they were recorded.
    pub fn iter(&self) -> impl Iterator<Item = &SupervisorError> {
        self.0.iter().map(AsRef::as_ref)
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}
