//! Debug launch strategies
//!
//! Two structurally different ways to get a debuggable test process exist:
//! running an executable test artifact directly, or going through the hosted
//! runner. Each knows how to launch its process in debugger-waiting mode and
//! how to recognize its readiness signal; everything after the attach target
//! is resolved (attach, intercept, await termination, fold results) is
//! strategy-agnostic and lives in the orchestrator.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::dap::AttachArguments;
use crate::process::RunningProcess;

/// Which launch path a group uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchKind {
    DirectExecutable,
    HostedRunner,
}

impl fmt::Display for LaunchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectExecutable => write!(f, "direct executable"),
            Self::HostedRunner => write!(f, "hosted runner"),
        }
    }
}

/// How the external debugger finds the waiting process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachTarget {
    Pid(u32),
    /// Used when the launch path never reports a numeric id
    ProcessName(String),
}

impl fmt::Display for AttachTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pid(pid) => write!(f, "pid-{pid}"),
            Self::ProcessName(name) => write!(f, "{name}"),
        }
    }
}

impl From<&AttachTarget> for AttachArguments {
    fn from(target: &AttachTarget) -> Self {
        match target {
            AttachTarget::Pid(pid) => Self {
                process_id: Some(*pid),
                process_name: None,
            },
            AttachTarget::ProcessName(name) => Self {
                process_id: None,
                process_name: Some(name.clone()),
            },
        }
    }
}

/// A way to produce an attachable test process
#[async_trait]
pub trait LaunchStrategy: Send {
    fn kind(&self) -> LaunchKind;

    /// Launch the test process in debugger-waiting mode and return once its
    /// readiness signal identifies the attach target
    async fn prepare_and_wait_attachable(&mut self) -> Result<AttachTarget>;

    /// Hand the launched process over for post-attach supervision
    fn take_process(&mut self) -> Option<RunningProcess>;

    /// Hosted runner only: where this invocation's result log will land
    fn results_dir(&self) -> Option<&Path> {
        None
    }
}

/// Probe the build output for an executable artifact adjacent to the
/// library artifact; its presence selects the direct-executable strategy
pub fn adjacent_executable(library_artifact: &Path) -> Option<PathBuf> {
    let stem = library_artifact.file_stem()?;
    let dir = library_artifact.parent().unwrap_or_else(|| Path::new("."));

    let windows_style = dir.join(format!("{}.exe", stem.to_string_lossy()));
    if windows_style.is_file() {
        return Some(windows_style);
    }

    let bare = dir.join(stem);
    if bare != library_artifact && bare.is_file() {
        return Some(bare);
    }

    None
}

/// Drain process output until `probe` recognizes the readiness signal
///
/// The timeout is fixed: when it elapses the process tree is killed and the
/// group errors instead of hanging. A process that exits before signalling
/// readiness is an attach failure, not a timeout.
pub(crate) async fn wait_for_readiness<F>(
    process: &mut RunningProcess,
    timeout: Duration,
    mut probe: F,
) -> Result<AttachTarget>
where
    F: FnMut(&str) -> Option<AttachTarget> + Send,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            process.kill_tree();
            return Err(Error::ReadinessTimeout(timeout.as_secs()));
        }

        match tokio::time::timeout(remaining, process.next_line()).await {
            Ok(Some(line)) => {
                if let Some(target) = probe(&line.text) {
                    tracing::debug!(attach_target = %target, "Test process is ready for attach");
                    return Ok(target);
                }
            }
            Ok(None) => {
                return Err(Error::attach_failed(
                    "test process",
                    "process exited before signalling readiness",
                ));
            }
            Err(_) => {
                process.kill_tree();
                return Err(Error::ReadinessTimeout(timeout.as_secs()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_executable_prefers_exe_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("Calc.Tests.dll");
        std::fs::write(&library, "lib").unwrap();
        assert_eq!(adjacent_executable(&library), None);

        let exe = dir.path().join("Calc.Tests.exe");
        std::fs::write(&exe, "exe").unwrap();
        assert_eq!(adjacent_executable(&library), Some(exe));
    }

    #[test]
    fn adjacent_executable_accepts_bare_unix_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("Calc.Tests.dll");
        std::fs::write(&library, "lib").unwrap();
        let bare = dir.path().join("Calc.Tests");
        std::fs::write(&bare, "exe").unwrap();
        assert_eq!(adjacent_executable(&library), Some(bare));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn readiness_probe_finds_the_signal_line() {
        use crate::process::ProcessCommand;

        let cmd = ProcessCommand::new("/bin/sh")
            .arg("-c")
            .arg("echo warming up; echo READY; sleep 30");
        let mut process = RunningProcess::spawn(&cmd).unwrap();

        let target = wait_for_readiness(&mut process, Duration::from_secs(10), |line| {
            line.contains("READY").then(|| AttachTarget::Pid(7))
        })
        .await
        .unwrap();

        assert_eq!(target, AttachTarget::Pid(7));
        process.kill_tree();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn readiness_timeout_kills_and_errors() {
        use crate::process::ProcessCommand;

        let cmd = ProcessCommand::new("/bin/sh").arg("-c").arg("sleep 30");
        let mut process = RunningProcess::spawn(&cmd).unwrap();

        let started = std::time::Instant::now();
        let result =
            wait_for_readiness(&mut process, Duration::from_millis(300), |_| None).await;

        assert!(matches!(result, Err(Error::ReadinessTimeout(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_is_an_attach_failure_not_a_timeout() {
        use crate::process::ProcessCommand;

        let cmd = ProcessCommand::new("/bin/sh").arg("-c").arg("exit 1");
        let mut process = RunningProcess::spawn(&cmd).unwrap();

        let result =
            wait_for_readiness(&mut process, Duration::from_secs(10), |_| None).await;
        assert!(matches!(result, Err(Error::AttachFailed { .. })));
    }
}
