//! Direct-executable launch strategy
//!
//! Used when the build output carries an executable test artifact. The
//! artifact is run with the wait-for-debugger flag (plus optional selector
//! arguments); it polls its attached state and blocks until a debugger
//! binds. Readiness is a fixed output phrase, and because this path never
//! reports its own numeric id the attach target is the process display name.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::Result;
use crate::process::{ProcessCommand, RunningProcess};

use super::strategy::{self, AttachTarget, LaunchKind, LaunchStrategy};

pub struct DirectExecutable {
    command: ProcessCommand,
    ready_phrase: String,
    process_name: String,
    timeout: Duration,
    process: Option<RunningProcess>,
}

impl DirectExecutable {
    pub fn new(
        executable: PathBuf,
        wait_flag: &str,
        selector: Option<String>,
        ready_phrase: &str,
        timeout: Duration,
    ) -> Self {
        let process_name = executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| executable.to_string_lossy().into_owned());

        let mut command = ProcessCommand::new(executable.to_string_lossy()).arg(wait_flag);
        if let Some(parent) = executable.parent() {
            command = command.cwd(parent);
        }
        if let Some(selector) = selector {
            command = command.arg("--filter").arg(selector);
        }

        Self {
            command,
            ready_phrase: ready_phrase.to_string(),
            process_name,
            timeout,
            process: None,
        }
    }
}

#[async_trait]
impl LaunchStrategy for DirectExecutable {
    fn kind(&self) -> LaunchKind {
        LaunchKind::DirectExecutable
    }

    async fn prepare_and_wait_attachable(&mut self) -> Result<AttachTarget> {
        let process = RunningProcess::spawn(&self.command)?;
        self.process = Some(process);

        let phrase = self.ready_phrase.clone();
        let name = self.process_name.clone();
        let process = self.process.as_mut().expect("process just stored");

        strategy::wait_for_readiness(process, self.timeout, move |line| {
            line.contains(&phrase)
                .then(|| AttachTarget::ProcessName(name.clone()))
        })
        .await
    }

    fn take_process(&mut self) -> Option<RunningProcess> {
        self.process.take()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_the_process_name_once_ready() {
        // A stand-in executable that announces readiness like the real one
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("Calc.Tests");
        std::fs::write(
            &exe,
            "#!/bin/sh\necho \"Waiting for debugger attach\"\nsleep 30\n",
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut launch = DirectExecutable::new(
            exe,
            "--wait-for-debugger",
            None,
            "Waiting for debugger attach",
            Duration::from_secs(10),
        );

        let target = launch.prepare_and_wait_attachable().await.unwrap();
        assert_eq!(
            target,
            AttachTarget::ProcessName("Calc.Tests".to_string())
        );

        let mut process = launch.take_process().unwrap();
        process.kill_tree();
    }
}
