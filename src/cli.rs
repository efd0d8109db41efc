//! Command-line interface for shell-supervisor.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Extra `KEY=VALUE` environment entries, in order.
    pub env: Vec<String>,
    /// Shell program override.
    pub shell: Option<String>,
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// Supervise in the background and stream output while polling.
    pub background: bool,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
    /// Words of the command line to run.
    pub command: Vec<String>,
}

impl Args {
    /// The command line handed to the shell.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
///
/// Everything from the first positional argument on belongs to the
/// command, including words that look like options.
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('t') | Long("timeout") => {
                let value: String = parser.value()?.parse()?;
                result.timeout_secs = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("timeout", value))?,
                );
            }
            Short('e') | Long("env") => {
                let value: String = parser.value()?.parse()?;
                if !value.contains('=') {
                    return Err(ArgsError::InvalidValue("env", value));
                }
                result.env.push(value);
            }
            Short('s') | Long("shell") => {
                result.shell = Some(parser.value()?.parse()?);
            }
            Short('C') | Long("cwd") => {
                result.cwd = Some(parser.value()?.parse()?);
            }
            Short('b') | Long("background") => {
                result.background = true;
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                result.command.push(val.string()?);
                for rest in parser.raw_args()? {
                    result.command.push(rest.to_string_lossy().into_owned());
                }
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"shell-supervisor {version}
Run a shell command under supervision

USAGE:
    shell-supervisor [OPTIONS] [--] <COMMAND>...

OPTIONS:
    -t, --timeout <SECS>    Kill the command after SECS seconds
    -e, --env <KEY=VALUE>   Add an environment variable (repeatable)
    -s, --shell <PROGRAM>   Shell used to run the command [default: bash]
    -C, --cwd <DIR>         Working directory for the command
    -b, --background        Stream output while supervising in the background
    -c, --config <FILE>     Path to configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    SHELL_SUPERVISOR_SHELL      Shell program (overrides config)
    SHELL_SUPERVISOR_TIMEOUT    Timeout in seconds (overrides config)
    SHELL_SUPERVISOR_LOG_LEVEL  Log level (overrides config)
    RUST_LOG                    Alternative log level setting

EXIT STATUS:
    The command's own exit code, or
    124 on timeout, 130 on cancellation (Ctrl-C),
    125 if the command could not be supervised.

EXAMPLES:
    # Give a build five minutes
    shell-supervisor -t 300 -- make all

    # Extra environment
    shell-supervisor -e HIP_HIP=hooray env
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("shell-supervisor {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// No command was given.
    MissingCommand,
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::MissingCommand => write!(f, "no command given"),
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        std::iter::once("shell-supervisor")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_default_args() {
        let result = parse_args_from(args(&[])).unwrap();
        assert!(result.timeout_secs.is_none());
        assert!(result.env.is_empty());
        assert!(!result.background);
        assert!(result.command.is_empty());
    }

    #[test]
    fn test_timeout_and_env() {
        let result =
            parse_args_from(args(&["-t", "5", "-e", "A=1", "--env", "B=2", "env"])).unwrap();
        assert_eq!(result.timeout_secs, Some(5));
        assert_eq!(result.env, vec!["A=1", "B=2"]);
        assert_eq!(result.command_line(), "env");
    }

    #[test]
    fn test_command_keeps_its_options() {
        let result = parse_args_from(args(&["-b", "ls", "-ltr", "arg1"])).unwrap();
        assert!(result.background);
        assert_eq!(result.command, vec!["ls", "-ltr", "arg1"]);
        assert_eq!(result.command_line(), "ls -ltr arg1");
    }

    #[test]
    fn test_double_dash() {
        let result = parse_args_from(args(&["-s", "sh", "--", "-x", "echo hi"])).unwrap();
        assert_eq!(result.shell, Some("sh".to_string()));
        assert_eq!(result.command, vec!["-x", "echo hi"]);
    }

    #[test]
    fn test_cwd_and_config() {
        let result = parse_args_from(args(&["-C", "/tmp", "-c", "/etc/ss.json", "pwd"])).unwrap();
        assert_eq!(result.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(result.config, Some(PathBuf::from("/etc/ss.json")));
    }

    #[test]
    fn test_help_and_version_flags() {
        assert!(parse_args_from(args(&["-h"])).unwrap().help);
        assert!(parse_args_from(args(&["--help"])).unwrap().help);
        assert!(parse_args_from(args(&["-V"])).unwrap().version);
        assert!(parse_args_from(args(&["--version"])).unwrap().version);
    }

    #[test]
    fn test_log_level() {
        let result = parse_args_from(args(&["-l", "debug", "true"])).unwrap();
        assert_eq!(result.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_invalid_timeout() {
        let err = parse_args_from(args(&["-t", "soon"])).unwrap_err();
        assert!(err.to_string().contains("--timeout"));
    }

    #[test]
    fn test_invalid_env() {
        let err = parse_args_from(args(&["-e", "NOVALUE"])).unwrap_err();
        assert!(matches!(err, ArgsError::InvalidValue("env", _)));
    }

    #[test]
    fn test_unknown_option() {
        assert!(parse_args_from(args(&["--bogus"])).is_err());
    }
}
