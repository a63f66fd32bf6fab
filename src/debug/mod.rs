//! Debug orchestrator
//!
//! Per group: build synchronously, pick a launch strategy by probing the
//! build output, launch the test process in debugger-waiting mode, attach
//! the external debugger with the exception-filter interceptor installed,
//! supervise until the session terminates or is cancelled, then fold
//! results. Failures localize to the owning group's leaves; other groups in
//! the same run still execute.

pub mod registry;
pub mod strategy;

mod direct;
mod hosted;

pub use direct::DirectExecutable;
pub use hosted::HostedRunner;
pub use strategy::{AttachTarget, LaunchKind, LaunchStrategy};

use std::fs;
use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::common::{Config, Error, Result};
use crate::correlate::{Correlator, RunSummary};
use crate::dap::{AttachArguments, DebuggerClient, NeverBreakOverride, SessionEnd};
use crate::process::{ProcessCommand, ProcessResult, RunningProcess};
use crate::run::{self, filter, GroupPlan};
use crate::tree::{RunLog, RunRequest, RunState, TestTree};
use crate::trx;

/// Window for a released debuggee to exit after its session ends
const EXIT_GRACE: Duration = Duration::from_secs(10);

/// Sequentially debugs the groups of one request
pub struct DebugOrchestrator<'a> {
    tree: &'a mut TestTree,
    config: &'a Config,
    log: &'a mut RunLog,
}

impl<'a> DebugOrchestrator<'a> {
    pub fn new(tree: &'a mut TestTree, config: &'a Config, log: &'a mut RunLog) -> Self {
        Self { tree, config, log }
    }

    /// Debug the request's groups to completion or cancellation
    pub async fn execute(&mut self, request: &RunRequest) -> Result<()> {
        let groups = run::plan_groups(self.tree, request);
        if groups.is_empty() {
            self.log.append("Nothing to debug");
            return Ok(());
        }

        let debugger = match self.config.resolve_debugger() {
            Ok(path) => path,
            Err(e) => {
                let message = e.to_string();
                for group in &groups {
                    group.mark_errored(self.tree, &message);
                }
                self.log.append(message);
                return Ok(());
            }
        };

        // Hosted-runner result logs land here; removed on drop on every path
        let results_root = tempfile::tempdir()?;

        for (index, group) in groups.iter().enumerate() {
            if request.cancel.is_cancelled() {
                self.log
                    .append("Debug run cancelled; remaining groups skipped");
                for remaining in &groups[index..] {
                    remaining.mark_skipped(self.tree);
                }
                break;
            }

            group.mark_enqueued(self.tree);
            let label = group.label(self.tree);

            match self
                .debug_group(group, &debugger, results_root.path(), request)
                .await
            {
                Ok(Some(summary)) => {
                    self.log.append(format!("{label}: {summary}"));
                }
                Ok(None) => {
                    self.log.append(format!("{label}: debug session finished"));
                }
                Err(e) if e.is_cancelled() => {
                    group.mark_skipped(self.tree);
                    self.log.append(format!("{label}: cancelled"));
                }
                Err(e) => {
                    group.mark_errored(self.tree, &e.to_string());
                    self.log.append(format!("{label}: {e}"));
                }
            }
        }

        Ok(())
    }

    /// One group's full debug flow
    ///
    /// Returns a summary for strategies that produce a result log, None for
    /// pure inspection sessions.
    async fn debug_group(
        &mut self,
        group: &GroupPlan,
        debugger: &Path,
        results_root: &Path,
        request: &RunRequest,
    ) -> Result<Option<RunSummary>> {
        let meta = self
            .tree
            .meta(&group.group_id)
            .ok_or_else(|| Error::MissingMetadata(group.group_id.clone()))?;
        let project = meta
            .project_path
            .clone()
            .ok_or_else(|| Error::MissingMetadata(group.group_id.clone()))?;
        let library_artifact = meta.target_path.clone();
        let label = meta.display_name.clone();

        // Build before anything waits on readiness, so the timeout window
        // is never spent compiling
        self.log.append(format!("Building {label}"));
        let build_cmd = ProcessCommand::new(&self.config.runner.program)
            .args(self.config.runner.build_args.iter().cloned())
            .arg(project.to_string_lossy());
        let build = RunningProcess::spawn(&build_cmd)?
            .collect(&request.cancel)
            .await?;
        if build.cancelled {
            return Err(Error::Cancelled);
        }
        if !build.success() {
            return Err(Error::BuildFailed {
                group: label,
                exit_code: build.exit_code.unwrap_or(-1),
            });
        }

        let timeout = Duration::from_secs(self.config.timeouts.readiness_secs);
        let selector = if group.unfiltered {
            None
        } else {
            filter::build_filter(self.tree, &group.items)
        };

        let mut launch: Box<dyn LaunchStrategy> = match library_artifact
            .as_deref()
            .and_then(strategy::adjacent_executable)
        {
            Some(executable) => Box::new(DirectExecutable::new(
                executable,
                &self.config.debug.wait_flag,
                selector,
                &self.config.debug.ready_phrase,
                timeout,
            )),
            None => {
                let results_dir =
                    results_root.join(format!("group-{}", run::sanitize(&group.group_id)));
                fs::create_dir_all(&results_dir)?;
                let command = run::host_invocation(
                    self.config,
                    &project,
                    &results_dir,
                    selector.as_deref(),
                );
                Box::new(HostedRunner::new(command, results_dir, timeout))
            }
        };

        tracing::info!(group = %group.group_id, kind = %launch.kind(), "Launching for debug");
        group.mark_running(self.tree);

        let attach_target = launch.prepare_and_wait_attachable().await?;

        // Unique per group and target, so cancellation can stop exactly
        // this session among concurrent groups
        let session_name = format!("{}/{}", group.group_id, attach_target);
        let session_token = request.cancel.child_token();
        registry::ensure_registered().register(&session_name, session_token.clone());

        let session = self
            .run_session(debugger, &attach_target, &session_token)
            .await;

        registry::ensure_registered().remove(&session_name);

        let mut process = launch.take_process();
        let session_cancelled = matches!(session, Ok(SessionEnd::Cancelled));
        if !matches!(session, Ok(SessionEnd::Terminated { .. })) {
            // The debuggee is still waiting or mid-run; take it down before
            // draining
            if let Some(p) = process.as_mut() {
                p.kill_tree();
            }
        }

        let host_exit = match process {
            Some(p) => supervise_exit(p, &request.cancel).await,
            None => None,
        };

        session?;

        match launch.kind() {
            // Inspection-only: there is no result log, every debugged leaf
            // passes unconditionally
            LaunchKind::DirectExecutable => {
                for leaf in &group.leaves {
                    let display = self
                        .tree
                        .meta(leaf)
                        .map(|m| m.display_name.clone())
                        .unwrap_or_else(|| leaf.clone());
                    self.tree.set_state(leaf, RunState::Passed { duration_ms: 0 });
                    self.log.append(format!("Passed: {display}"));
                }
                if group.unfiltered {
                    self.tree
                        .set_state(&group.group_id, RunState::Passed { duration_ms: 0 });
                }
                Ok(None)
            }
            LaunchKind::HostedRunner => {
                let results_dir = launch
                    .results_dir()
                    .expect("hosted runner always has a results dir")
                    .to_path_buf();
                let correlator = Correlator::new(self.tree, &group.leaves);

                match trx::locate_result_log(&results_dir, &self.config.results.log_prefix)? {
                    Some(path) => {
                        let content = fs::read_to_string(path)?;
                        let outcomes = trx::parse_document(&content)?;
                        let summary = correlator.apply(self.tree, self.log, &outcomes);
                        group.finalize(self.tree, &summary);
                        Ok(Some(summary))
                    }
                    // Killed before the host wrote a log; settle the leaves
                    None if session_cancelled => {
                        let summary = correlator.apply(self.tree, self.log, &[]);
                        group.mark_skipped(self.tree);
                        Ok(Some(summary))
                    }
                    None => Err(Error::ResultLogMissing {
                        dir: results_dir,
                        exit_code: host_exit.and_then(|r| r.exit_code).unwrap_or(-1),
                    }),
                }
            }
        }
    }

    /// The strategy-agnostic session tail: spawn the debugger, install the
    /// interceptor, attach, configure, supervise, tear down
    async fn run_session(
        &self,
        debugger: &Path,
        target: &AttachTarget,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd> {
        let request_timeout = Duration::from_secs(self.config.timeouts.dap_request_secs);
        let mut client =
            DebuggerClient::spawn(debugger, &self.config.debug.debugger_args, request_timeout)
                .await?;

        // Installed before the session starts; dropped with the client when
        // it ends
        client.add_interceptor(Box::new(NeverBreakOverride::new(
            self.config.debug.never_break_exception.clone(),
        )));

        let end = drive_session(
            &mut client,
            target,
            &self.config.debug.exception_filters,
            cancel,
        )
        .await;

        // A cancelled or failed session takes its debuggee down with it
        let terminate_debuggee = !matches!(end, Ok(SessionEnd::Terminated { .. }));
        client.shutdown(terminate_debuggee).await;
        end
    }
}

/// initialize -> attach -> initialized -> exception filters (rewritten by
/// the interceptor) -> configurationDone -> supervise
async fn drive_session(
    client: &mut DebuggerClient,
    target: &AttachTarget,
    exception_filters: &[String],
    cancel: &CancellationToken,
) -> Result<SessionEnd> {
    client.initialize().await?;
    client
        .attach(AttachArguments::from(target))
        .await
        .map_err(|e| Error::attach_failed(&target.to_string(), &e.to_string()))?;
    client.wait_initialized().await?;
    client.set_exception_filters(exception_filters).await?;
    client.configuration_done().await?;
    client.wait_for_termination(cancel).await
}

/// Drain the released debuggee, bounded so a wedged process cannot hang the
/// run (dropping the future kills the child)
async fn supervise_exit(
    process: RunningProcess,
    cancel: &CancellationToken,
) -> Option<ProcessResult> {
    match tokio::time::timeout(EXIT_GRACE, process.collect(cancel)).await {
        Ok(Ok(result)) => Some(result),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to collect test process output");
            None
        }
        Err(_) => {
            tracing::warn!("Test process did not exit after the session ended, killing it");
            None
        }
    }
}
