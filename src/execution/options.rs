//! Per-run configuration.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Shell used when none is configured.
pub const DEFAULT_SHELL: &str = "bash";

/// Settings applied to a supervised command before it is launched.
///
/// Every setter can be called any number of times. Singular settings keep
/// the last value; the environment accumulates.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Shell program invoked as `<shell> -c <command line>`.
    pub shell: String,
    /// Working directory override (if any).
    pub working_dir: Option<PathBuf>,
    /// Full environment as `KEY=VALUE` entries. `None` inherits the parent's.
    pub env: Option<Vec<String>>,
    /// Deadline for the command. `None` never fires.
    pub timeout: Option<Duration>,
    /// Signal source that cancels the command when triggered.
    pub cancel: Option<CancellationToken>,
    /// Return immediately and supervise in a background task.
    pub background: bool,
}

impl RunOptions {
    /// Create options with every setting at its default.
    pub fn new() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            working_dir: None,
            env: None,
            timeout: None,
            cancel: None,
            background: false,
        }
    }

    /// Set the execution timeout. A zero duration is ignored.
    pub fn timeout(mut self, duration: Duration) -> Self {
        if !duration.is_zero() {
            self.timeout = Some(duration);
        }
        self
    }

    /// Add `KEY=VALUE` entries to the command's environment.
    ///
    /// The first call seeds the environment from the current process, so
    /// the child sees everything it would have inherited plus `vars`.
    pub fn env<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let env = self.env.get_or_insert_with(|| {
            std::env::vars_os()
                .map(|(k, v)| format!("{}={}", k.to_string_lossy(), v.to_string_lossy()))
                .collect()
        });
        env.extend(vars.into_iter().map(Into::into));
        self
    }

    /// Cancel the command when `token` is triggered.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Supervise without blocking the caller.
    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    /// Set the shell program.
    pub fn shell(mut self, program: impl Into<String>) -> Self {
        self.shell = program.into();
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a `KEY=VALUE` entry at the first `=`.
pub(crate) fn split_env_entry(entry: &str) -> Option<(&str, &str)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Some((key, value)),
        _ => None,
    }
}
