//! Error types for the test bridge
//!
//! Failures are localized by the orchestrators to the owning group or leaf;
//! messages are written so a host UI can surface them verbatim.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the test bridge
#[derive(Error, Debug)]
pub enum Error {
    // === Process Errors ===
    #[error("Failed to launch '{program}': {source}")]
    ProcessLaunch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Build failed for '{group}' (exit code {exit_code})")]
    BuildFailed { group: String, exit_code: i32 },

    // === Result Log Errors ===
    #[error("No result log found under {}. The test host exited with code {exit_code} without producing one", .dir.display())]
    ResultLogMissing { dir: PathBuf, exit_code: i32 },

    #[error("Malformed result log: {0}")]
    ResultLogParse(String),

    // === Debug Session Errors ===
    #[error("Test process did not start within {0} seconds (no readiness signal)")]
    ReadinessTimeout(u64),

    #[error("Failed to attach debugger to {target}: {reason}")]
    AttachFailed { target: String, reason: String },

    #[error("Debugger '{name}' not found. Searched: {searched}")]
    DebuggerNotFound { name: String, searched: String },

    #[error("Debugger failed to start: {0}")]
    DebuggerStartFailed(String),

    #[error("Debugger exited unexpectedly")]
    DebuggerCrashed,

    #[error("Debug protocol error: {0}")]
    DapProtocol(String),

    #[error("Debug request '{command}' failed: {message}")]
    DapRequestFailed { command: String, message: String },

    #[error("No debug session named '{0}'")]
    SessionNotFound(String),

    // === Tree Errors ===
    #[error("Test item '{0}' carries no metadata; it cannot be scheduled")]
    MissingMetadata(String),

    #[error("Test item '{0}' is not present in the tree")]
    UnknownNode(String),

    // === Cancellation ===
    #[error("Run was cancelled")]
    Cancelled,

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl Error {
    /// Create a process launch error
    pub fn process_launch(program: &str, source: io::Error) -> Self {
        Self::ProcessLaunch {
            program: program.to_string(),
            source,
        }
    }

    /// Create an attach failed error
    pub fn attach_failed(target: &str, reason: &str) -> Self {
        Self::AttachFailed {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a DAP request failed error
    pub fn dap_request_failed(command: &str, message: &str) -> Self {
        Self::DapRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error came from cooperative cancellation rather than a fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
