//! Hosted-runner launch strategy
//!
//! Used when the build output has no executable artifact. The runner is
//! invoked exactly like a normal test run, with the debug-wait environment
//! flag set so the spawned test host pauses until a debugger attaches, and a
//! second flag suppressing the host's internal forced break on attach
//! (without it, every attach stalls on an irrelevant internal breakpoint).
//! The waiting host prints its process id, which becomes the attach target.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::common::Result;
use crate::process::{ProcessCommand, RunningProcess};

use super::strategy::{self, AttachTarget, LaunchKind, LaunchStrategy};

/// Makes the spawned test host pause until a debugger attaches
pub const DEBUG_WAIT_ENV: &str = "VSTEST_HOST_DEBUG";
/// Suppresses the host's internal forced break once the debugger attaches
pub const DEBUG_SUPPRESS_BREAK_ENV: &str = "VSTEST_DEBUG_NOBP";

/// The waiting host announces itself with a `Process Id: <n>` line
fn process_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)process id\s*:\s*(\d+)").unwrap())
}

/// Extract the announced process id, if this is the readiness line
pub(crate) fn parse_process_id(line: &str) -> Option<u32> {
    process_id_pattern()
        .captures(line)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

pub struct HostedRunner {
    command: ProcessCommand,
    results_dir: PathBuf,
    timeout: Duration,
    process: Option<RunningProcess>,
}

impl HostedRunner {
    /// `command` is the regular test invocation for the group; the
    /// debug-wait environment flags are added here
    pub fn new(command: ProcessCommand, results_dir: PathBuf, timeout: Duration) -> Self {
        let command = command
            .env(DEBUG_WAIT_ENV, "1")
            .env(DEBUG_SUPPRESS_BREAK_ENV, "1");
        Self {
            command,
            results_dir,
            timeout,
            process: None,
        }
    }
}

#[async_trait]
impl LaunchStrategy for HostedRunner {
    fn kind(&self) -> LaunchKind {
        LaunchKind::HostedRunner
    }

    async fn prepare_and_wait_attachable(&mut self) -> Result<AttachTarget> {
        let process = RunningProcess::spawn(&self.command)?;
        self.process = Some(process);

        let process = self.process.as_mut().expect("process just stored");
        strategy::wait_for_readiness(process, self.timeout, |line| {
            parse_process_id(line).map(AttachTarget::Pid)
        })
        .await
    }

    fn take_process(&mut self) -> Option<RunningProcess> {
        self.process.take()
    }

    fn results_dir(&self) -> Option<&Path> {
        Some(&self.results_dir)
    }
}
