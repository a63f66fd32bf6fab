//! Protocol message middleware
//!
//! Interceptors sit on the debug-session channel and may rewrite outgoing
//! requests before they are framed onto the wire. They are installed before
//! a session starts and dropped with the client when it ends.

use serde_json::{json, Value};

/// Typed middleware over outgoing protocol requests
pub trait MessageInterceptor: Send {
    /// Rewrite an outgoing request's arguments in place
    fn rewrite_request(&self, command: &str, arguments: &mut Value);
}

/// Forces a "never break" override for one exception type onto every
/// outgoing set-exception-filters message
///
/// The test host's own startup code raises this exception type and catches
/// it internally; without the override every attach stops there first. The
/// wire protocol scopes exception options by type name only, so the
/// override is necessarily that coarse.
pub struct NeverBreakOverride {
    exception_type: String,
}

impl NeverBreakOverride {
    pub fn new(exception_type: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
        }
    }
}

impl MessageInterceptor for NeverBreakOverride {
    fn rewrite_request(&self, command: &str, arguments: &mut Value) {
        if command != "setExceptionBreakpoints" {
            return;
        }

        if !arguments.is_object() {
            *arguments = json!({ "filters": [] });
        }
        let Some(object) = arguments.as_object_mut() else {
            return;
        };

        let options = object
            .entry("exceptionOptions")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !options.is_array() {
            *options = Value::Array(Vec::new());
        }
        let Some(options) = options.as_array_mut() else {
            return;
        };

        // Our override wins over whatever the incoming set said for the type
        options.retain(|option| !names_exception(option, &self.exception_type));
        options.push(json!({
            "path": [{ "names": [self.exception_type] }],
            "breakMode": "never",
        }));

        tracing::debug!(
            exception = %self.exception_type,
            "Added never-break override to exception filters"
        );
    }
}

/// Whether an exceptionOptions entry addresses the given type name
fn names_exception(option: &Value, exception_type: &str) -> bool {
    option
        .pointer("/path")
        .and_then(Value::as_array)
        .map(|segments| {
            segments.iter().any(|segment| {
                segment
                    .pointer("/names")
                    .and_then(Value::as_array)
                    .map(|names| names.iter().any(|n| n.as_str() == Some(exception_type)))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}
