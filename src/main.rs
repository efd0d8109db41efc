//! Shell-supervisor binary entry point.

use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use shell_supervisor::cli::{self, ArgsError};
use shell_supervisor::config::Config;
use shell_supervisor::execution::{run, Outcome};
use shell_supervisor::logging;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Exit status when the deadline fired (same as coreutils `timeout`).
const EXIT_TIMED_OUT: u8 = 124;
/// Exit status when supervision itself failed.
const EXIT_SUPERVISION_FAILED: u8 = 125;
/// Exit status after Ctrl-C.
const EXIT_CANCELLED: u8 = 130;
/// Exit status for bad arguments or configuration.
const EXIT_USAGE: u8 = 2;

/// How often background mode flushes captured output.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }
    if args.command.is_empty() {
        eprintln!("error: {}", ArgsError::MissingCommand);
        eprintln!("try 'shell-supervisor --help'");
        return ExitCode::from(EXIT_USAGE);
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    logging::init_with_filter(config.log_filter()).ok();
    info!("shell-supervisor v{}", env!("CARGO_PKG_VERSION"));

    // Ctrl-C cancels the command instead of killing us first
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let mut opts = config.run_options().cancel_on(cancel);
    if let Some(ref cwd) = args.cwd {
        opts = opts.working_dir(cwd);
    }
    if args.background {
        opts = opts.background();
    }

    let command_line = args.command_line();
    let outcome = run(&command_line, opts).await;

    if args.background {
        stream_until_ready(&outcome).await;
    } else {
        let _ = std::io::stdout().write_all(&outcome.stdout().bytes());
        let _ = std::io::stderr().write_all(&outcome.stderr().bytes());
    }

    exit_status(&outcome)
}

/// Relay output as it arrives until the outcome is ready.
async fn stream_until_ready(outcome: &Outcome) {
    loop {
        let done = outcome.is_ready();

        let out = outcome.stdout().read_new();
        let err = outcome.stderr().read_new();
        if !out.is_empty() {
            print!("{}", out);
            let _ = std::io::stdout().flush();
        }
        if !err.is_empty() {
            eprint!("{}", err);
        }

        if done {
            return;
        }
        tokio::select! {
            () = outcome.wait() => {}
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

fn exit_status(outcome: &Outcome) -> ExitCode {
    for err in outcome.errors().iter() {
        eprintln!("shell-supervisor: {}", err);
    }

    if outcome.is_timed_out() {
        return ExitCode::from(EXIT_TIMED_OUT);
    }
    if outcome.is_cancelled() {
        return ExitCode::from(EXIT_CANCELLED);
    }
    if outcome.is_error() {
        return ExitCode::from(EXIT_SUPERVISION_FAILED);
    }

    match outcome.exit_code().map(u8::try_from) {
        Some(Ok(code)) => ExitCode::from(code),
        _ => ExitCode::from(EXIT_SUPERVISION_FAILED),
    }
}
