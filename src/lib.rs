//! # shell-supervisor
//!
//! Run a shell command as a deterministic, always-returning async
//! operation.
//!
//! A command line is handed to a shell (`bash -c` by default) and
//! supervised until the first of three things happens: the process exits,
//! a cancellation token fires, or a deadline passes. On cancel or deadline
//! the process group is killed. Either way the caller gets exactly one
//! [`Outcome`] holding the exit code, duration, captured output, the
//! [`CompletionReason`] and every error encountered.
//!
//! ## Features
//!
//! - **Race arbitration**: exit, cancellation and timeout are awaited
//!   together; the first one wins and the rest are released
//! - **Always an outcome**: spawn failures and internal panics are
//!   recorded on the outcome, never raised
//! - **Background mode**: return immediately and read output
//!   incrementally while the command runs
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use shell_supervisor::{run, RunOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     shell_supervisor::logging::try_init().ok();
//!
//!     let outcome = run(
//!         "make test",
//!         RunOptions::new().timeout(Duration::from_secs(600)),
//!     )
//!     .await;
//!
//!     if outcome.is_timed_out() {
//!         eprintln!("gave up after {:?}", outcome.duration());
//!     }
//!     for line in outcome.stdout().lines() {
//!         println!("{}", line);
//!     }
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod fsutil;
pub mod logging;

// Re-export commonly used types
pub use error::{ErrorList, Result, SupervisorError};
pub use execution::{
    run, CompletionReason, Outcome, OutputBuffer, OutputCursor, RunOptions, Supervisor,
};
pub use tokio_util::sync::CancellationToken;
