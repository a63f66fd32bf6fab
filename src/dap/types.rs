//! Debug protocol message types
//!
//! The subset of the Debug Adapter Protocol an attach-and-supervise session
//! needs. See: https://microsoft.github.io/debug-adapter-protocol/specification

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// DAP response message
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Initialize request arguments
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    pub client_id: String,
    pub client_name: String,
    #[serde(rename = "adapterID")]
    pub adapter_id: String,
    pub lines_start_at1: bool,
    pub columns_start_at1: bool,
    pub path_format: String,
}

impl Default for InitializeArguments {
    fn default() -> Self {
        Self {
            client_id: "testbridge".to_string(),
            client_name: "Test Bridge".to_string(),
            adapter_id: "testbridge".to_string(),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format: "path".to_string(),
        }
    }
}

/// Attach request arguments
///
/// Exactly one of `process_id`/`process_name` is set, depending on how the
/// launch strategy identified the waiting process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachArguments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
}

/// setExceptionBreakpoints request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetExceptionBreakpointsArguments {
    pub filters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_options: Option<Vec<ExceptionOptions>>,
}

/// Per-exception-path break behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<ExceptionPathSegment>>,
    pub break_mode: String,
}

/// One segment of an exception category path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionPathSegment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negate: Option<bool>,
    pub names: Vec<String>,
}

/// Disconnect request arguments
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectArguments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminate_debuggee: Option<bool>,
}

/// Events the session supervisor cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Initialized,
    /// Debuggee stopped (breakpoint, exception, pause...)
    Stopped,
    Exited {
        exit_code: i64,
    },
    Terminated,
    Other(String),
}

impl Event {
    /// Classify a raw event message by its `event` field
    pub fn from_message(message: &Value) -> Self {
        let name = message
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default();
        match name {
            "initialized" => Self::Initialized,
            "stopped" => Self::Stopped,
            "exited" => {
                let exit_code = message
                    .pointer("/body/exitCode")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                Self::Exited { exit_code }
            }
            "terminated" => Self::Terminated,
            other => Self::Other(other.to_string()),
        }
    }
}
