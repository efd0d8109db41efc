//! The result record of one supervised command.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use super::output::OutputBuffer;
use super::state::{InvalidTransition, Phase};
use crate::error::{ErrorList, SupervisorError};

/// Why supervision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionReason {
    /// The process ran to its own exit (whatever its exit code).
    #[default]
    Normal,
    /// The cancellation signal fired first.
    Cancelled,
    /// The deadline fired first.
    TimedOut,
    /// The supervisor itself failed.
    Crashed,
}

impl CompletionReason {
    /// True for every reason except [`Normal`](Self::Normal).
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, CompletionReason::Normal)
    }
}

/// Fields frozen when the outcome becomes ready.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Terminal {
    pub exit_code: i32,
    pub duration: Duration,
    pub reason: CompletionReason,
    pub killed: bool,
}

#[derive(Debug)]
struct Shared {
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    errors: Mutex<ErrorList>,
    terminal: OnceLock<Terminal>,
    phase: watch::Sender<Phase>,
}

/// Handle to the result of a supervised command.
///
/// The outcome is "not ready" while the command is supervised and becomes
/// ready exactly once. After that exit code, duration, completion reason
/// and errors never change. Output buffers may still be read
/// incrementally. Clones share the same record.
#[derive(Debug, Clone)]
pub struct Outcome {
    shared: Arc<Shared>,
}

impl Outcome {
    pub(crate) fn new() -> Self {
        let (phase, _) = watch::channel(Phase::Created);
        Self {
            shared: Arc::new(Shared {
                stdout: OutputBuffer::new(),
                stderr: OutputBuffer::new(),
                errors: Mutex::new(ErrorList::default()),
                terminal: OnceLock::new(),
                phase,
            }),
        }
    }

    fn errors_guard(&self) -> MutexGuard<'_, ErrorList> {
        self.shared
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an error. Ignored (and logged) once the outcome is ready.
    pub(crate) fn add_error(&self, err: SupervisorError) {
        if self.is_ready() {
            debug!(error = %err, "outcome already ready, dropping late error");
            return;
        }
        self.errors_guard().push(err);
    }

    /// Move the supervisor to `target`, leaving the phase unchanged if the
    /// transition is not allowed.
    pub(crate) fn advance(&self, target: Phase) -> Result<(), InvalidTransition> {
        let mut result = Ok(());
        self.shared.phase.send_if_modified(|phase| {
            result = phase.transition_to(target);
            result.is_ok()
        });
        result
    }

    /// Freeze the terminal fields and signal readiness.
    ///
    /// Only the first call has any effect; later calls return `false`.
    pub(crate) fn finish(&self, terminal: Terminal) -> bool {
        let first = self.shared.terminal.set(terminal).is_ok();
        if first {
            debug!(
                exit_code = terminal.exit_code,
                reason = ?terminal.reason,
                duration_ms = terminal.duration.as_millis() as u64,
                "outcome ready"
            );
        }
        self.shared.phase.send_replace(Phase::Finished);
        first
    }

    fn terminal(&self) -> Option<&Terminal> {
        self.shared.terminal.get()
    }

    /// True once supervision has finished.
    pub fn is_ready(&self) -> bool {
        self.terminal().is_some()
    }

    /// Current lifecycle phase of the supervised command.
    pub fn phase(&self) -> Phase {
        *self.shared.phase.borrow()
    }

    /// Subscribe to phase changes, e.g. to see a background command move
    /// from running to stopping. The last value is always
    /// [`Phase::Finished`].
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.shared.phase.subscribe()
    }

    /// Wait until the outcome is ready.
    pub async fn wait(&self) {
        let mut rx = self.shared.phase.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(Phase::is_terminal).await;
    }

    /// Exit code of the process, once ready.
    ///
    /// A process terminated by a signal reports `128 + signal`. A process
    /// that never started reports `-1`.
    pub fn exit_code(&self) -> Option<i32> {
        self.terminal().map(|t| t.exit_code)
    }

    /// Time from process start until termination was observed, once ready.
    pub fn duration(&self) -> Option<Duration> {
        self.terminal().map(|t| t.duration)
    }

    /// Why supervision ended. [`CompletionReason::Normal`] until ready.
    pub fn completion(&self) -> CompletionReason {
        self.terminal().map(|t| t.reason).unwrap_or_default()
    }

    /// Cancelled before the process exited.
    pub fn is_cancelled(&self) -> bool {
        self.completion() == CompletionReason::Cancelled
    }

    /// Timed out before the process exited.
    pub fn is_timed_out(&self) -> bool {
        self.completion() == CompletionReason::TimedOut
    }

    /// The supervisor failed internally.
    pub fn is_crashed(&self) -> bool {
        self.completion() == CompletionReason::Crashed
    }

    /// Supervision sent the kill signal to the process.
    pub fn was_killed(&self) -> bool {
        self.terminal().is_some_and(|t| t.killed)
    }

    /// True if any error was recorded while preparing, starting, waiting
    /// on or supervising the process. A non-zero exit code alone is not an
    /// error.
    pub fn is_error(&self) -> bool {
        !self.errors_guard().is_empty()
    }

    /// All recorded errors, in order.
    pub fn errors(&self) -> ErrorList {
        self.errors_guard().clone()
    }

    /// The aggregated error, if any was recorded.
    pub fn error(&self) -> Option<ErrorList> {
        let errors = self.errors();
        (!errors.is_empty()).then_some(errors)
    }

    /// Ready, no errors and exit code 0.
    pub fn success(&self) -> bool {
        self.exit_code() == Some(0) && !self.is_error()
    }

    /// Captured standard output.
    pub fn stdout(&self) -> &OutputBuffer {
        &self.shared.stdout
    }

    /// Captured standard error.
    pub fn stderr(&self) -> &OutputBuffer {
        &self.shared.stderr
    }
}
