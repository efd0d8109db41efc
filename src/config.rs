//! Configuration management for shell-supervisor.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::execution::{RunOptions, DEFAULT_SHELL};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell configuration.
    pub shell: ShellSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Shell configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    /// Shell program invoked with `-c`.
    pub program: String,
    /// Default timeout in seconds (0 = none).
    pub timeout_secs: u64,
    /// Extra `KEY=VALUE` environment entries.
    pub env: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            program: DEFAULT_SHELL.to_string(),
            timeout_secs: 0,
            env: Vec::new(),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(shell) = std::env::var("SHELL_SUPERVISOR_SHELL") {
            if !shell.is_empty() {
                self.shell.program = shell;
            }
        }

        if let Ok(secs) = std::env::var("SHELL_SUPERVISOR_TIMEOUT") {
            self.shell.timeout_secs = secs
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(secs))?;
        }

        if let Ok(level) = std::env::var("SHELL_SUPERVISOR_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(ref shell) = args.shell {
            self.shell.program = shell.clone();
        }

        if let Some(secs) = args.timeout_secs {
            self.shell.timeout_secs = secs;
        }

        self.shell.env.extend(args.env.iter().cloned());

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env()?;
        config.apply_args(args);

        Ok(config)
    }

    /// Build run options for a command from this configuration.
    pub fn run_options(&self) -> RunOptions {
        let mut opts = RunOptions::new()
            .shell(&self.shell.program)
            .timeout(Duration::from_secs(self.shell.timeout_secs));

        if !self.shell.env.is_empty() {
            opts = opts.env(self.shell.env.iter().cloned());
        }

        opts
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Timeout that is not a whole number of seconds.
    InvalidTimeout(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidTimeout(value) => write!(f, "invalid timeout: '{}'", value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.shell.program, "bash");
        assert_eq!(config.shell.timeout_secs, 0);
        assert!(config.shell.env.is_empty());
        assert_eq!(config.log_filter(), "warn");
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "shell": {
                "program": "sh",
                "timeout_secs": 30,
                "env": ["CI=1"]
            },
            "logging": {
                "level": "debug"
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.shell.program, "sh");
        assert_eq!(config.shell.timeout_secs, 30);
        assert_eq!(config.shell.env, vec!["CI=1"]);
        assert_eq!(config.log_filter(), "debug");
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{ "shell": { "timeout_secs": 5 } }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.shell.program, "bash"); // Default
        assert_eq!(config.shell.timeout_secs, 5);
    }

    #[test]
    fn test_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.shell.env.push("FROM_FILE=1".to_string());

        let args = Args {
            shell: Some("zsh".to_string()),
            timeout_secs: Some(9),
            env: vec!["FROM_CLI=2".to_string()],
            log_level: Some("trace".to_string()),
            ..Args::default()
        };
        config.apply_args(&args);

        assert_eq!(config.shell.program, "zsh");
        assert_eq!(config.shell.timeout_secs, 9);
        assert_eq!(config.shell.env, vec!["FROM_FILE=1", "FROM_CLI=2"]);
        assert_eq!(config.log_filter(), "trace");
    }

    #[test]
    fn test_run_options() {
        let mut config = Config::default();
        let opts = config.run_options();
        assert_eq!(opts.shell, "bash");
        assert!(opts.timeout.is_none());
        assert!(opts.env.is_none());

        config.shell.timeout_secs = 2;
        config.shell.env.push("HIP_HIP=hooray".to_string());
        let opts = config.run_options();
        assert_eq!(opts.timeout, Some(Duration::from_secs(2)));
        assert!(opts
            .env
            .unwrap()
            .contains(&"HIP_HIP=hooray".to_string()));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"program\""));
        assert!(json.contains("\"timeout_secs\""));
    }
}
