//! External process adapter
//!
//! Spawns a child in its own process group, streams stdout/stderr
//! line-by-line through an unbounded channel, and supports cooperative
//! cancellation by killing the whole process tree. Every line is mirrored to
//! the live log as it arrives; a trailing partial line is flushed at exit so
//! nothing is lost.
//!
//! A non-zero exit code is not an error here. Callers inspect
//! [`ProcessResult::exit_code`]; only an OS-level spawn failure fails the
//! call.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};

/// Which pipe a line arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One complete output line
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

/// An invocation of an external program
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Outcome of a completed (or killed) invocation
#[derive(Debug)]
pub struct ProcessResult {
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Whether cancellation killed the process before it finished
    pub cancelled: bool,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Splits streamed chunks into complete lines, with an explicit trailing
/// flush for a final unterminated line
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a chunk and return the complete lines it finished
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let mut line: String = self.pending.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Emit the trailing partial line, if any
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.pending);
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

/// A spawned child with live line streaming
pub struct RunningProcess {
    child: Child,
    program: String,
    lines_rx: mpsc::UnboundedReceiver<OutputLine>,
    stdout_acc: String,
    stderr_acc: String,
}

impl RunningProcess {
    /// Spawn the command with piped stdio
    ///
    /// On unix the child becomes its own process-group leader so
    /// [`kill_tree`](Self::kill_tree) reaps grandchildren too.
    pub fn spawn(cmd: &ProcessCommand) -> Result<Self> {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::process_launch(&cmd.program, e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, lines_rx) = mpsc::unbounded_channel();

        if let Some(stdout) = stdout {
            tokio::spawn(pump_lines(stdout, StreamKind::Stdout, tx.clone()));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(pump_lines(stderr, StreamKind::Stderr, tx));
        }

        tracing::debug!(program = %cmd.program, args = ?cmd.args, "Spawned process");

        Ok(Self {
            child,
            program: cmd.program.clone(),
            lines_rx,
            stdout_acc: String::new(),
            stderr_acc: String::new(),
        })
    }

    /// OS process id, if the child has not been reaped yet
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next output line in receipt order, None once both pipes closed
    ///
    /// Interleaving between the two streams is not guaranteed; order within
    /// one stream is.
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        let line = self.lines_rx.recv().await?;
        self.absorb(&line);
        Some(line)
    }

    /// Drain remaining output and wait for exit
    ///
    /// Cancellation kills the process tree but still drains what was
    /// produced, so the result carries everything written before the kill.
    pub async fn collect(mut self, cancel: &CancellationToken) -> Result<ProcessResult> {
        let mut cancelled = false;
        loop {
            tokio::select! {
                line = self.lines_rx.recv() => match line {
                    Some(line) => self.absorb(&line),
                    None => break,
                },
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    tracing::debug!(program = %self.program, "Cancellation requested, killing process tree");
                    self.kill_tree();
                }
            }
        }

        let status = self.child.wait().await?;
        tracing::debug!(program = %self.program, code = ?status.code(), cancelled, "Process finished");

        Ok(ProcessResult {
            exit_code: status.code(),
            stdout: std::mem::take(&mut self.stdout_acc),
            stderr: std::mem::take(&mut self.stderr_acc),
            cancelled,
        })
    }

    /// Kill the child and every process in its group
    pub fn kill_tree(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                unsafe {
                    libc::killpg(pid as i32, libc::SIGKILL);
                }
                return;
            }
        }

        #[cfg(windows)]
        {
            if let Some(pid) = self.child.id() {
                let _ = std::process::Command::new("taskkill")
                    .args(["/PID", &pid.to_string(), "/T", "/F"])
                    .status();
                return;
            }
        }

        // Already reaped or id unavailable; best-effort direct kill
        let _ = self.child.start_kill();
    }

    fn absorb(&mut self, line: &OutputLine) {
        let acc = match line.stream {
            StreamKind::Stdout => &mut self.stdout_acc,
            StreamKind::Stderr => &mut self.stderr_acc,
        };
        acc.push_str(&line.text);
        acc.push('\n');
    }
}

/// Read a pipe to EOF, mirroring each complete line to the live log and the
/// consumer channel, then flush the trailing partial line
async fn pump_lines<R>(mut reader: R, stream: StreamKind, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buffer = LineBuffer::new();
    let mut chunk = [0u8; 4096];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&chunk[..n]);
                for line in buffer.push(&text) {
                    emit(stream, line, &tx);
                }
            }
        }
    }

    if let Some(line) = buffer.flush() {
        emit(stream, line, &tx);
    }
}

fn emit(stream: StreamKind, text: String, tx: &mpsc::UnboundedSender<OutputLine>) {
    tracing::debug!(target: "testbridge::process", %stream, "{text}");
    let _ = tx.send(OutputLine { stream, text });
}
