//! Attach-oriented debugger client
//!
//! Spawns the configured DAP debugger and drives the one session shape the
//! orchestrator needs: initialize, attach to the waiting test process,
//! configure exception filters (through the interceptor middleware), signal
//! configuration done, then supervise until the session terminates or is
//! cancelled. Every outgoing request passes through the installed
//! interceptors before it reaches the wire.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};

use super::interceptor::MessageInterceptor;
use super::transport::DapTransport;
use super::types::{
    AttachArguments, DisconnectArguments, Event, InitializeArguments, ResponseMessage,
    SetExceptionBreakpointsArguments,
};

/// How a supervised session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The debuggee terminated (normally or not)
    Terminated { exit_code: Option<i64> },
    /// The named session was cancelled from outside
    Cancelled,
}

/// A live connection to a spawned debugger
pub struct DebuggerClient {
    adapter: Child,
    transport: DapTransport<ChildStdout, ChildStdin>,
    seq: i64,
    interceptors: Vec<Box<dyn MessageInterceptor>>,
    pending_events: VecDeque<Event>,
    request_timeout: Duration,
}

impl DebuggerClient {
    /// Spawn the debugger and wrap its stdio in the framed transport
    pub async fn spawn(program: &Path, args: &[String], request_timeout: Duration) -> Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut adapter = command.spawn().map_err(|e| {
            Error::DebuggerStartFailed(format!("Failed to start {}: {}", program.display(), e))
        })?;

        let stdin = adapter
            .stdin
            .take()
            .ok_or_else(|| Error::DebuggerStartFailed("Failed to get debugger stdin".to_string()))?;
        let stdout = adapter.stdout.take().ok_or_else(|| {
            Error::DebuggerStartFailed("Failed to get debugger stdout".to_string())
        })?;

        Ok(Self {
            adapter,
            transport: DapTransport::new(stdout, stdin),
            seq: 0,
            interceptors: Vec::new(),
            pending_events: VecDeque::new(),
            request_timeout,
        })
    }

    /// Install middleware; must happen before the session is driven
    pub fn add_interceptor(&mut self, interceptor: Box<dyn MessageInterceptor>) {
        self.interceptors.push(interceptor);
    }

    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    /// Frame and send one request, running it through the interceptors
    async fn send_request(&mut self, command: &str, arguments: Option<Value>) -> Result<i64> {
        let seq = self.next_seq();

        let mut arguments = arguments.unwrap_or(Value::Null);
        for interceptor in &self.interceptors {
            interceptor.rewrite_request(command, &mut arguments);
        }

        let request = if arguments.is_null() {
            json!({ "seq": seq, "type": "request", "command": command })
        } else {
            json!({ "seq": seq, "type": "request", "command": command, "arguments": arguments })
        };

        tracing::trace!(target: "testbridge::dap", %command, seq, "-> request");
        self.transport.send(&request).await?;
        Ok(seq)
    }

    /// Send a request and wait for its response, buffering events that
    /// arrive in between
    async fn request(&mut self, command: &str, arguments: Option<Value>) -> Result<Value> {
        let seq = self.send_request(command, arguments).await?;
        let deadline = tokio::time::Instant::now() + self.request_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::dap_request_failed(command, "timed out"));
            }

            let message = match tokio::time::timeout(remaining, self.transport.recv()).await {
                Ok(result) => result?,
                Err(_) => return Err(Error::dap_request_failed(command, "timed out")),
            };

            match message.get("type").and_then(Value::as_str) {
                Some("response") => {
                    let response: ResponseMessage = serde_json::from_value(message)?;
                    if response.request_seq != seq {
                        tracing::warn!(
                            command = %response.command,
                            "Response for an unexpected request, ignoring"
                        );
                        continue;
                    }
                    if response.success {
                        return Ok(response.body.unwrap_or(Value::Null));
                    }
                    return Err(Error::dap_request_failed(
                        command,
                        response.message.as_deref().unwrap_or("unknown error"),
                    ));
                }
                Some("event") => {
                    let event = Event::from_message(&message);
                    tracing::trace!(target: "testbridge::dap", ?event, "<- event");
                    self.pending_events.push_back(event);
                }
                _ => tracing::warn!("Unexpected debugger message type, ignoring"),
            }
        }
    }

    /// Initialize the debugger
    pub async fn initialize(&mut self) -> Result<()> {
        let arguments = serde_json::to_value(InitializeArguments::default())?;
        self.request("initialize", Some(arguments)).await?;
        Ok(())
    }

    /// Attach to the waiting test process
    pub async fn attach(&mut self, arguments: AttachArguments) -> Result<()> {
        let arguments = serde_json::to_value(arguments)?;
        self.request("attach", Some(arguments)).await?;
        Ok(())
    }

    /// Wait for the `initialized` event (arrives after attach)
    pub async fn wait_initialized(&mut self) -> Result<()> {
        if let Some(position) = self
            .pending_events
            .iter()
            .position(|e| *e == Event::Initialized)
        {
            self.pending_events.remove(position);
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + self.request_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::DapProtocol(
                    "Timed out waiting for the initialized event".to_string(),
                ));
            }
            let message = match tokio::time::timeout(remaining, self.transport.recv()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::DapProtocol(
                        "Timed out waiting for the initialized event".to_string(),
                    ))
                }
            };
            if message.get("type").and_then(Value::as_str) == Some("event") {
                match Event::from_message(&message) {
                    Event::Initialized => return Ok(()),
                    event => self.pending_events.push_back(event),
                }
            }
        }
    }

    /// Configure exception filters; the interceptor rewrites this on the way out
    pub async fn set_exception_filters(&mut self, filters: &[String]) -> Result<()> {
        let arguments = SetExceptionBreakpointsArguments {
            filters: filters.to_vec(),
            exception_options: None,
        };
        self.request(
            "setExceptionBreakpoints",
            Some(serde_json::to_value(arguments)?),
        )
        .await?;
        Ok(())
    }

    /// Signal that configuration is done; the debuggee resumes
    pub async fn configuration_done(&mut self) -> Result<()> {
        self.request("configurationDone", None).await?;
        Ok(())
    }

    /// Supervise the session until the debuggee terminates or the session
    /// is cancelled
    pub async fn wait_for_termination(&mut self, cancel: &CancellationToken) -> Result<SessionEnd> {
        let mut exit_code = None;

        // Events that arrived while configuring may already settle this
        while let Some(event) = self.pending_events.pop_front() {
            match event {
                Event::Exited { exit_code: code } => exit_code = Some(code),
                Event::Terminated => return Ok(SessionEnd::Terminated { exit_code }),
                _ => {}
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                message = self.transport.recv() => {
                    let message = match message {
                        Ok(message) => message,
                        // The debugger exiting right after the debuggee is a
                        // normal way for the session to end
                        Err(Error::DebuggerCrashed) => {
                            return Ok(SessionEnd::Terminated { exit_code });
                        }
                        Err(e) => return Err(e),
                    };
                    if message.get("type").and_then(Value::as_str) != Some("event") {
                        continue;
                    }
                    match Event::from_message(&message) {
                        Event::Exited { exit_code: code } => exit_code = Some(code),
                        Event::Terminated => return Ok(SessionEnd::Terminated { exit_code }),
                        Event::Stopped => {
                            tracing::debug!(target: "testbridge::dap", "Debuggee stopped");
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Ask the debugger to let go of the debuggee
    pub async fn disconnect(&mut self, terminate_debuggee: bool) -> Result<()> {
        let arguments = serde_json::to_value(DisconnectArguments {
            terminate_debuggee: Some(terminate_debuggee),
        })?;
        // Fire and forget; the debugger may exit before responding
        let _ = self.send_request("disconnect", Some(arguments)).await;
        Ok(())
    }

    /// Tear the session down on every exit path
    pub async fn shutdown(mut self, terminate_debuggee: bool) {
        let _ = self.disconnect(terminate_debuggee).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = self.adapter.kill().await;
    }
}

impl Drop for DebuggerClient {
    fn drop(&mut self) {
        // Best-effort; kill_on_drop backs this up
        let _ = self.adapter.start_kill();
    }
}
