//! Command supervision engine.
//!
//! This module provides supervised shell command execution:
//! - Timeout and cancellation racing against natural exit
//! - Foreground and background supervision
//! - Buffered output with incremental reads
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use shell_supervisor::execution::{run, RunOptions};
//!
//! # async fn demo() {
//! let outcome = run("echo hello", RunOptions::new()).await;
//! assert_eq!(outcome.stdout().text(), "hello");
//!
//! let outcome = run("sleep 5", RunOptions::new().timeout(Duration::from_millis(200))).await;
//! assert!(outcome.is_timed_out());
//! # }
//! ```

mod options;
mod outcome;
mod output;
mod state;
mod supervisor;

pub use options::{RunOptions, DEFAULT_SHELL};
pub use outcome::{CompletionReason, Outcome};
pub use output::{OutputBuffer, OutputCursor};
pub use state::{InvalidTransition, Phase};
pub use supervisor::{run, Supervisor, DRAIN_TIMEOUT, NO_EXIT_CODE};
