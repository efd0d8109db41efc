//! Supervised execution of a single shell command.
//!
//! The supervising task owns the child process. It races three sources:
//! the process exiting, the cancellation token and the deadline. The
//! first to fire decides the [`CompletionReason`]; the losers are dropped,
//! which releases their timer and token registrations. On cancel or
//! deadline the whole process group is killed before the outcome is
//! marked ready.

use std::future::pending;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::options::{split_env_entry, RunOptions};
use super::outcome::{CompletionReason, Outcome, Terminal};
use super::output::pump;
use super::state::Phase;
use crate::error::SupervisorError;

/// How long to keep collecting output after the process has terminated.
///
/// A grandchild that escaped the process group can hold a pipe open
/// indefinitely; past this grace period the pipe readers are abandoned.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Exit code reported when no process status could be obtained.
pub const NO_EXIT_CODE: i32 = -1;

/// Run `command_line` through the shell and supervise it.
///
/// In foreground mode this returns once the outcome is ready. With
/// [`RunOptions::background`] it returns immediately and supervision
/// continues on the tokio runtime; poll [`Outcome::is_ready`] or await
/// [`Outcome::wait`].
///
/// This never fails: every problem is recorded on the returned outcome.
pub async fn run(command_line: &str, options: RunOptions) -> Outcome {
    Supervisor::new(command_line, options).run().await
}

/// Owner of one external process and its [`Outcome`].
#[derive(Debug)]
pub struct Supervisor {
    program: String,
    args: Vec<String>,
    env: Option<Vec<String>>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
    background: bool,
    outcome: Outcome,
    killed: Arc<AtomicBool>,
}

/// The winning branch of the supervision race.
enum Race {
    Exited(io::Result<ExitStatus>),
    Cancelled,
    Deadline(Duration),
}

impl Supervisor {
    /// Create a supervisor for `<shell> -c <command_line>`.
    pub fn new(command_line: impl Into<String>, options: RunOptions) -> Self {
        Self {
            program: options.shell,
            args: vec!["-c".to_string(), command_line.into()],
            env: options.env,
            working_dir: options.working_dir,
            timeout: options.timeout,
            cancel: options.cancel,
            background: options.background,
            outcome: Outcome::new(),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Launch the process and supervise it.
    ///
    /// Supervision runs in its own task so a panic inside it is caught
    /// and recorded as [`CompletionReason::Crashed`].
    pub async fn run(self) -> Outcome {
        let outcome = self.outcome.clone();
        let killed = self.killed.clone();
        let background = self.background;
        let launched = Instant::now();

        let task = tokio::spawn(self.supervise());
        let watch = watch_supervision(task, outcome.clone(), killed, launched);
        if background {
            tokio::spawn(watch);
        } else {
            watch.await;
        }
        outcome
    }

    fn enter(&self, target: Phase) {
        if let Err(e) = self.outcome.advance(target) {
            warn!(error = %e, "ignoring phase change");
        }
    }

    fn finish(&self, exit_code: i32, duration: Duration, reason: CompletionReason) {
        self.outcome.finish(Terminal {
            exit_code,
            duration,
            reason,
            killed: self.killed.load(Ordering::SeqCst),
        });
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a kill reaches everything the shell started.
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        if let Some(env) = &self.env {
            cmd.env_clear();
            for entry in env {
                match split_env_entry(entry) {
                    Some((key, value)) => {
                        cmd.env(key, value);
                    }
                    None => self
                        .outcome
                        .add_error(SupervisorError::InvalidEnv(entry.clone())),
                }
            }
        }

        cmd
    }

    fn attach_pipes(&self, child: &mut Child) -> Vec<Reader> {
        let mut readers = Vec::with_capacity(2);

        match child.stdout.take() {
            Some(out) => readers.push((
                "stdout",
                tokio::spawn(pump(out, self.outcome.stdout().clone(), "stdout")),
            )),
            None => self.outcome.add_error(SupervisorError::Pipe("stdout")),
        }
        match child.stderr.take() {
            Some(err) => readers.push((
                "stderr",
                tokio::spawn(pump(err, self.outcome.stderr().clone(), "stderr")),
            )),
            None => self.outcome.add_error(SupervisorError::Pipe("stderr")),
        }

        readers
    }

    async fn supervise(self) {
        let mut cmd = self.build_command();
        let started = Instant::now();

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(shell = %self.program, error = %e, "failed to start command");
                self.outcome.add_error(SupervisorError::Spawn(e));
                self.finish(NO_EXIT_CODE, started.elapsed(), CompletionReason::Normal);
                return;
            }
        };
        self.enter(Phase::Running);
        debug!(pid = child.id(), command = %self.args[1], "command started");

        let mut group = ProcessGroup::new(child.id(), self.killed.clone());
        let readers = self.attach_pipes(&mut child);

        let race = {
            let cancel = self.cancel.clone();
            let cancelled = async move {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => pending::<()>().await,
                }
            };
            let timeout = self.timeout;
            let deadline = async move {
                match timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                status = child.wait() => Race::Exited(status),
                () = cancelled => Race::Cancelled,
                () = deadline => Race::Deadline(timeout.unwrap_or_default()),
            }
        };

        let (status, reason) = match race {
            Race::Exited(status) => (status, CompletionReason::Normal),
            Race::Cancelled => {
                info!(pid = child.id(), "command cancelled");
                self.outcome.add_error(SupervisorError::Cancelled);
                (
                    self.stop(&mut child, &mut group).await,
                    CompletionReason::Cancelled,
                )
            }
            Race::Deadline(limit) => {
                info!(pid = child.id(), timeout = ?limit, "command timed out");
                self.outcome.add_error(SupervisorError::TimedOut(limit));
                (
                    self.stop(&mut child, &mut group).await,
                    CompletionReason::TimedOut,
                )
            }
        };
        let duration = started.elapsed();

        let exit_code = match status {
            Ok(status) => {
                group.disarm();
                exit_code(status)
            }
            Err(e) => {
                warn!(error = %e, "failed to wait for command");
                self.outcome.add_error(SupervisorError::Wait(e));
                if let Err(e) = group.kill() {
                    self.outcome.add_error(SupervisorError::Kill(e));
                }
                NO_EXIT_CODE
            }
        };

        drain(readers, &self.outcome).await;
        close_output(&self.outcome);
        self.finish(exit_code, duration, reason);
    }

    /// Kill the process group and the leader itself, then reap the leader.
    ///
    /// The leader may have left its group, in which case the group kill
    /// misses it.
    async fn stop(&self, child: &mut Child, group: &mut ProcessGroup) -> io::Result<ExitStatus> {
        self.enter(Phase::Stopping);

        if let Err(e) = group.kill() {
            warn!(error = %e, "failed to kill process group");
            self.outcome.add_error(SupervisorError::Kill(e));
        }
        match child.start_kill() {
            // already reaped
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => {
                warn!(error = %e, "failed to kill command");
                self.outcome.add_error(SupervisorError::Kill(e));
            }
            Ok(()) => self.killed.store(true, Ordering::SeqCst),
        }

        child.wait().await
    }
}

/// A pipe reader task and the stream it copies.
type Reader = (&'static str, JoinHandle<()>);

/// Wait for the pipe readers, abandoning any that outlive [`DRAIN_TIMEOUT`].
/// A reader that panicked is recorded on the outcome.
async fn drain(readers: Vec<Reader>, outcome: &Outcome) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    for (stream, reader) in readers {
        let abort = reader.abort_handle();
        match tokio::time::timeout_at(deadline, reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let message = crash_message(e);
                error!(stream, error = %message, "output reader failed");
                outcome.add_error(SupervisorError::Crashed(format!(
                    "{stream} reader: {message}"
                )));
            }
            Err(_) => {
                debug!(stream, "output pipe still open after exit, abandoning reader");
                abort.abort();
            }
        }
    }
}

/// Mark both streams complete so incremental readers release their tail.
/// Readers that were abandoned or crashed never reach EOF themselves.
fn close_output(outcome: &Outcome) {
    outcome.stdout().close();
    outcome.stderr().close();
}

/// Await the supervising task and convert a panic into a crashed outcome.
async fn watch_supervision(
    task: JoinHandle<()>,
    outcome: Outcome,
    killed: Arc<AtomicBool>,
    launched: Instant,
) {
    if let Err(e) = task.await {
        let message = crash_message(e);
        error!(error = %message, "supervisor crashed");
        outcome.add_error(SupervisorError::Crashed(message));
        close_output(&outcome);
        outcome.finish(Terminal {
            exit_code: NO_EXIT_CODE,
            duration: launched.elapsed(),
            reason: CompletionReason::Crashed,
            killed: killed.load(Ordering::SeqCst),
        });
    }
}

fn crash_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Exit code of a finished process; signals map to `128 + signal`.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    NO_EXIT_CODE
}

/// Kill switch for the child's process group.
///
/// Kills the group when dropped while armed, so a panic or early return in
/// the supervisor never leaves the process running.
struct ProcessGroup {
    pgid: Option<i32>,
    killed: Arc<AtomicBool>,
    armed: bool,
}

impl ProcessGroup {
    fn new(pid: Option<u32>, killed: Arc<AtomicBool>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()),
            killed,
            armed: true,
        }
    }

    /// Send SIGKILL to the whole group. A group that no longer exists
    /// counts as killed.
    #[cfg(unix)]
    fn kill(&mut self) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = self.pgid else {
            return Ok(());
        };
        self.killed.store(true, Ordering::SeqCst);

        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                debug!(pgid, "process group already gone");
                Ok(())
            }
            Err(e) => Err(io::Error::from(e)),
        }
    }

    // Without process groups, the leader kill in `stop` and kill_on_drop
    // cover the process.
    #[cfg(not(unix))]
    fn kill(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// The process has been reaped; its group id may be reused.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.kill() {
                warn!(error = %e, "failed to kill process group on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_new() {
        let supervisor = Supervisor::new("ls -ltr arg1", RunOptions::new());
        assert_eq!(supervisor.program, "bash");
        assert_eq!(supervisor.args, vec!["-c", "ls -ltr arg1"]);
        assert_eq!(supervisor.outcome.phase(), Phase::Created);
        assert!(!supervisor.outcome.is_ready());
    }

    #[test]
    fn test_build_command_records_bad_env() {
        let opts = RunOptions::new().env(["GOOD=1", "BROKEN"]);
        let supervisor = Supervisor::new("true", opts);
        let _cmd = supervisor.build_command();

        let errors = supervisor.outcome.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors.iter().next(),
            Some(SupervisorError::InvalidEnv(entry)) if entry == "BROKEN"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_from_signal() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
    }

    #[tokio::test]
    async fn test_panic_becomes_crashed_outcome() {
        let outcome = Outcome::new();
        let task: JoinHandle<()> = tokio::spawn(async { panic!("boom") });

        watch_supervision(task, outcome.clone(), Arc::default(), Instant::now()).await;

        assert!(outcome.is_ready());
        assert!(outcome.is_crashed());
        assert_eq!(outcome.exit_code(), Some(NO_EXIT_CODE));
        assert!(outcome.is_error());
        assert!(outcome.errors().to_string().contains("boom"));
        assert_eq!(outcome.phase(), Phase::Finished);
    }

    #[tokio::test]
    async fn test_crash_closes_output() {
        let outcome = Outcome::new();
        outcome.stdout().append(b"partial");
        let task: JoinHandle<()> = tokio::spawn(async { panic!("boom") });

        watch_supervision(task, outcome.clone(), Arc::default(), Instant::now()).await;

        assert!(outcome.stdout().is_closed());
        assert!(outcome.stderr().is_closed());
        assert_eq!(outcome.stdout().next_lines(), vec!["partial"]);
    }

    #[tokio::test]
    async fn test_drain_records_failed_reader() {
        let outcome = Outcome::new();
        let ok: JoinHandle<()> = tokio::spawn(async {});
        let failed: JoinHandle<()> = tokio::spawn(async { panic!("read exploded") });

        drain(vec![("stdout", ok), ("stderr", failed)], &outcome).await;

        let errors = outcome.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors.iter().next(),
            Some(SupervisorError::Crashed(msg)) if msg == "stderr reader: read exploded"
        ));
    }

    #[tokio::test]
    async fn test_clean_task_leaves_outcome_alone() {
        let outcome = Outcome::new();
        let task = tokio::spawn(async {});

        watch_supervision(task, outcome.clone(), Arc::default(), Instant::now()).await;

        assert!(!outcome.is_ready());
        assert!(!outcome.is_error());
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_missing_group_is_noop() {
        let killed = Arc::new(AtomicBool::new(false));
        let mut group = ProcessGroup::new(None, killed.clone());
        assert!(group.kill().is_ok());
        assert!(!killed.load(Ordering::SeqCst));
        group.disarm();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_after_exit_is_noop() {
        let supervisor = Supervisor::new("true", RunOptions::new());
        let mut child = supervisor.build_command().spawn().unwrap();
        supervisor.enter(Phase::Running);
        let mut group = ProcessGroup::new(child.id(), supervisor.killed.clone());

        // reap first; the group and the leader are both gone
        let status = child.wait().await.unwrap();
        assert!(status.success());
        assert!(group.kill().is_ok());

        let stopped = supervisor.stop(&mut child, &mut group).await.unwrap();
        assert!(stopped.success());
        assert!(!supervisor.outcome.is_error(), "{}", supervisor.outcome.errors());
        assert_eq!(supervisor.outcome.phase(), Phase::Stopping);
        group.disarm();
    }
}
