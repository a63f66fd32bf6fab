//! Configuration file handling
//!
//! Hosts may ship a TOML file or rely entirely on the defaults, which target
//! the standard .NET test host conventions.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// External test runner invocation
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Result log discovery
    #[serde(default)]
    pub results: ResultsConfig,

    /// Debugger and attach behavior
    #[serde(default)]
    pub debug: DebugConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// External test runner invocation
#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    /// Runner program, resolved on PATH
    #[serde(default = "default_runner_program")]
    pub program: String,

    /// Arguments for a build invocation, before the project path
    #[serde(default = "default_build_args")]
    pub build_args: Vec<String>,

    /// Arguments for a test invocation, before the project path
    #[serde(default = "default_test_args")]
    pub test_args: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: default_runner_program(),
            build_args: default_build_args(),
            test_args: default_test_args(),
        }
    }
}

fn default_runner_program() -> String {
    "dotnet".to_string()
}
fn default_build_args() -> Vec<String> {
    vec!["build".to_string()]
}
fn default_test_args() -> Vec<String> {
    vec!["test".to_string(), "--no-build".to_string()]
}

/// Result log discovery settings
#[derive(Debug, Deserialize, Clone)]
pub struct ResultsConfig {
    /// Filename prefix the result log is located by (empty matches any)
    #[serde(default)]
    pub log_prefix: String,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            log_prefix: String::new(),
        }
    }
}

/// Debugger and attach behavior
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// DAP debugger program, resolved on PATH
    #[serde(default = "default_debugger")]
    pub debugger: String,

    /// Arguments passed to the debugger program
    #[serde(default = "default_debugger_args")]
    pub debugger_args: Vec<String>,

    /// Flag that asks a direct test executable to pause until attach
    #[serde(default = "default_wait_flag")]
    pub wait_flag: String,

    /// Output phrase signalling a direct executable is ready for attach
    #[serde(default = "default_ready_phrase")]
    pub ready_phrase: String,

    /// Exception filter ids sent when the session is configured
    #[serde(default = "default_exception_filters")]
    pub exception_filters: Vec<String>,

    /// Exception type granted a "never break" override on every
    /// set-exception-filters message; it fires spuriously inside the test
    /// host's own startup code
    #[serde(default = "default_never_break_exception")]
    pub never_break_exception: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            debugger: default_debugger(),
            debugger_args: default_debugger_args(),
            wait_flag: default_wait_flag(),
            ready_phrase: default_ready_phrase(),
            exception_filters: default_exception_filters(),
            never_break_exception: default_never_break_exception(),
        }
    }
}

fn default_debugger() -> String {
    "netcoredbg".to_string()
}
fn default_debugger_args() -> Vec<String> {
    vec!["--interpreter=vscode".to_string()]
}
fn default_wait_flag() -> String {
    "--wait-for-debugger".to_string()
}
fn default_ready_phrase() -> String {
    "Waiting for debugger attach".to_string()
}
fn default_exception_filters() -> Vec<String> {
    vec!["user-unhandled".to_string()]
}
fn default_never_break_exception() -> String {
    "System.IO.FileNotFoundException".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Window for a debugger-waiting process to print its readiness signal
    #[serde(default = "default_readiness")]
    pub readiness_secs: u64,

    /// Timeout for individual debug protocol requests
    #[serde(default = "default_dap_request")]
    pub dap_request_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            readiness_secs: default_readiness(),
            dap_request_secs: default_dap_request(),
        }
    }
}

fn default_readiness() -> u64 {
    30
}
fn default_dap_request() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Resolve the runner program on PATH
    pub fn resolve_runner(&self) -> Result<PathBuf> {
        which::which(&self.runner.program).map_err(|_| {
            Error::Config(format!(
                "Test runner '{}' not found on PATH",
                self.runner.program
            ))
        })
    }

    /// Resolve the debugger program on PATH
    pub fn resolve_debugger(&self) -> Result<PathBuf> {
        which::which(&self.debug.debugger).map_err(|_| Error::DebuggerNotFound {
            name: self.debug.debugger.clone(),
            searched: std::env::var("PATH").unwrap_or_default(),
        })
    }
}

/// Default config file path
fn config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "testbridge")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.runner.program, "dotnet");
        assert_eq!(config.runner.build_args, vec!["build"]);
        assert_eq!(config.debug.debugger, "netcoredbg");
        assert_eq!(config.timeouts.readiness_secs, 30);
        assert_eq!(
            config.debug.never_break_exception,
            "System.IO.FileNotFoundException"
        );
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [timeouts]
            readiness_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.timeouts.readiness_secs, 5);
        assert_eq!(config.timeouts.dap_request_secs, 30);
        assert_eq!(config.runner.program, "dotnet");
    }
}
