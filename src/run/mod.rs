//! Run orchestrator
//!
//! Drives one run request end to end: partition the included items by owning
//! group, invoke the external test host once per group (strictly
//! sequentially), locate and parse each invocation's result log, correlate
//! outcomes onto the tree, and aggregate a summary. Failures are localized
//! to the affected group; cancellation is honored between groups and
//! mid-group by killing the host's process tree. The per-run temp results
//! directory is removed on every exit path.

pub mod filter;

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::common::{Config, Error, Result};
use crate::correlate::{Correlator, RunSummary};
use crate::process::{ProcessCommand, RunningProcess};
use crate::tree::{NodeId, RunLog, RunRequest, RunState, TestTree};
use crate::trx;

/// Flags of the external host's invocation grammar
const LOGGER_FLAG: &str = "--logger";
const LOGGER_VALUE: &str = "trx";
const RESULTS_DIR_FLAG: &str = "--results-directory";
const FILTER_FLAG: &str = "--filter";

/// One group's slice of a run request
#[derive(Debug)]
pub(crate) struct GroupPlan {
    pub group_id: NodeId,
    /// The included items themselves, as requested (filter clauses come
    /// from these, not from the expanded leaves)
    pub items: Vec<NodeId>,
    /// Expanded runnable leaves, exclusions applied
    pub leaves: Vec<NodeId>,
    /// True when the sole included item is the group node itself
    pub unfiltered: bool,
}

impl GroupPlan {
    /// With a group-only request the group node is the single progress unit
    pub(crate) fn mark_enqueued(&self, tree: &mut TestTree) {
        if self.unfiltered {
            tree.set_state(&self.group_id, RunState::Enqueued);
        } else {
            for leaf in &self.leaves {
                tree.set_state(leaf, RunState::Enqueued);
            }
        }
    }

    pub(crate) fn mark_running(&self, tree: &mut TestTree) {
        if self.unfiltered {
            tree.set_state(&self.group_id, RunState::Running);
        } else {
            for leaf in &self.leaves {
                tree.set_state(leaf, RunState::Running);
            }
        }
    }

    /// Cancellation lands every non-terminal leaf on skipped; nothing may
    /// end the run still running or enqueued
    pub(crate) fn mark_skipped(&self, tree: &mut TestTree) {
        for leaf in &self.leaves {
            let terminal = tree.state(leaf).is_some_and(RunState::is_terminal);
            if !terminal {
                tree.set_state(leaf, RunState::Skipped);
            }
        }
        if self.unfiltered {
            tree.set_state(&self.group_id, RunState::Skipped);
        }
    }

    /// A failure around the invocation errors the whole group
    pub(crate) fn mark_errored(&self, tree: &mut TestTree, message: &str) {
        for leaf in &self.leaves {
            tree.set_state(
                leaf,
                RunState::Errored {
                    message: message.to_string(),
                },
            );
        }
        tree.set_state(
            &self.group_id,
            RunState::Errored {
                message: message.to_string(),
            },
        );
    }

    /// Converge the group node itself once its leaves are settled
    pub(crate) fn finalize(&self, tree: &mut TestTree, summary: &RunSummary) {
        let state = if summary.failed > 0 {
            RunState::Failed {
                duration_ms: summary.execution_time_ms,
                message: format!("{} of {} tests failed", summary.failed, summary.total),
                location: None,
            }
        } else {
            RunState::Passed {
                duration_ms: summary.execution_time_ms,
            }
        };
        tree.set_state(&self.group_id, state);
    }

    pub(crate) fn label(&self, tree: &TestTree) -> String {
        tree.meta(&self.group_id)
            .map(|m| m.display_name.clone())
            .unwrap_or_else(|| self.group_id.clone())
    }
}

/// The test invocation for a group, shared by the run orchestrator and the
/// hosted-runner debug strategy
pub(crate) fn host_invocation(
    config: &Config,
    project: &Path,
    results_dir: &Path,
    filter_expr: Option<&str>,
) -> ProcessCommand {
    let mut cmd = ProcessCommand::new(&config.runner.program)
        .args(config.runner.test_args.iter().cloned())
        .arg(project.to_string_lossy())
        .arg(LOGGER_FLAG)
        .arg(LOGGER_VALUE)
        .arg(RESULTS_DIR_FLAG)
        .arg(results_dir.to_string_lossy());
    if let Some(expr) = filter_expr {
        cmd = cmd.arg(FILTER_FLAG).arg(expr);
    }
    cmd
}

/// Partition a request's included items by owning group
///
/// Items missing from the tree or carrying no metadata are logged and
/// skipped. Group order is deterministic (sorted by group id).
pub(crate) fn plan_groups(tree: &TestTree, request: &RunRequest) -> Vec<GroupPlan> {
    let mut by_group: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();

    for id in &request.included {
        let Some(meta) = tree.meta(id) else {
            tracing::warn!(id = %id, "Included item is unknown or has no metadata, skipping");
            continue;
        };
        by_group
            .entry(meta.owning_group.clone())
            .or_default()
            .push(id.clone());
    }

    // Leaves under any excluded item are excluded too
    let excluded_leaves: HashSet<NodeId> = request
        .excluded
        .iter()
        .flat_map(|id| tree.leaves_under(id))
        .collect();

    by_group
        .into_iter()
        .map(|(group_id, items)| {
            let unfiltered = items.len() == 1 && items[0] == group_id;
            let mut seen = HashSet::new();
            let leaves = items
                .iter()
                .flat_map(|id| tree.leaves_under(id))
                .filter(|leaf| !excluded_leaves.contains(leaf))
                .filter(|leaf| seen.insert(leaf.clone()))
                .collect();
            GroupPlan {
                group_id,
                items,
                leaves,
                unfiltered,
            }
        })
        .collect()
}

/// Sequentially executes the groups of one run request
pub struct RunOrchestrator<'a> {
    tree: &'a mut TestTree,
    config: &'a Config,
    log: &'a mut RunLog,
}

impl<'a> RunOrchestrator<'a> {
    pub fn new(tree: &'a mut TestTree, config: &'a Config, log: &'a mut RunLog) -> Self {
        Self { tree, config, log }
    }

    /// Execute the request to completion or cancellation
    ///
    /// Returns the run summary: per-group when a single group participated,
    /// merged across groups otherwise.
    pub async fn execute(&mut self, request: &RunRequest) -> Result<RunSummary> {
        let groups = plan_groups(self.tree, request);
        if groups.is_empty() {
            self.log.append("Nothing to run");
            return Ok(RunSummary::default());
        }

        // Exclusive per-run results directory, removed on drop whatever
        // path this function leaves by
        let results_root = tempfile::tempdir()?;

        let mut summaries = Vec::new();

        for (index, group) in groups.iter().enumerate() {
            if request.cancel.is_cancelled() {
                self.log.append("Run cancelled; remaining groups skipped");
                for remaining in &groups[index..] {
                    remaining.mark_skipped(self.tree);
                }
                break;
            }

            group.mark_enqueued(self.tree);
            let label = group.label(self.tree);

            match self.run_group(group, results_root.path(), request).await {
                Ok(summary) => {
                    self.log.append(format!("{label}: {summary}"));
                    summaries.push(summary);
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

        let combined = summaries.len() > 1;
        let mut merged = RunSummary::default();
        for summary in &summaries {
            merged.merge(summary);
        }
        if combined {
            self.log.append(format!("All groups: {merged}"));
        }
        Ok(merged)
    }

    /// Invoke the host for one group and correlate its result log
    async fn run_group(
        &mut self,
        group: &GroupPlan,
        results_root: &Path,
        request: &RunRequest,
    ) -> Result<RunSummary> {
        let meta = self
            .tree
            .meta(&group.group_id)
            .ok_or_else(|| Error::MissingMetadata(group.group_id.clone()))?;
        let project = meta
            .project_path
            .clone()
            .ok_or_else(|| Error::MissingMetadata(group.group_id.clone()))?;

        let group_results = results_root.join(format!("group-{}", sanitize(&group.group_id)));
        fs::create_dir_all(&group_results)?;

        let filter_expr = if group.unfiltered {
            None
        } else {
            filter::build_filter(self.tree, &group.items)
        };
        let cmd = host_invocation(
            self.config,
            &project,
            &group_results,
            filter_expr.as_deref(),
        );

        group.mark_running(self.tree);
        tracing::info!(group = %group.group_id, unfiltered = group.unfiltered, "Invoking test host");

        let process = RunningProcess::spawn(&cmd)?;
        let result = process.collect(&request.cancel).await?;

        if result.cancelled {
            return Err(Error::Cancelled);
        }

        let correlator = Correlator::new(self.tree, &group.leaves);
        let log_path = trx::locate_result_log(&group_results, &self.config.results.log_prefix)?
            .ok_or_else(|| Error::ResultLogMissing {
                dir: group_results.clone(),
                exit_code: result.exit_code.unwrap_or(-1),
            })?;

        let content = fs::read_to_string(&log_path)?;
        let outcomes = trx::parse_document(&content)?;
        let summary = correlator.apply(self.tree, self.log, &outcomes);
        group.finalize(self.tree, &summary);
        Ok(summary)
    }
}

pub(crate) fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeKind, NodeMeta, RunProfile, TestNode};

    fn meta(kind: NodeKind, fqn: &str, group: &str) -> NodeMeta {
        NodeMeta {
            qualified_name: fqn.to_string(),
            owning_group: group.to_string(),
            kind,
            parameterized: false,
            display_name: fqn.to_string(),
            project_path: None,
            target_path: None,
        }
    }

    fn two_group_tree() -> TestTree {
        let mut tree = TestTree::new();
        tree.insert(TestNode::new("g1", Some(meta(NodeKind::Group, "G1", "g1"))));
        tree.insert(TestNode::new("g2", Some(meta(NodeKind::Group, "G2", "g2"))));
        tree.insert(TestNode::new("a", Some(meta(NodeKind::Method, "G1.A", "g1"))));
        tree.insert(TestNode::new("b", Some(meta(NodeKind::Method, "G1.B", "g1"))));
        tree.insert(TestNode::new("c", Some(meta(NodeKind::Method, "G2.C", "g2"))));
        tree.add_child("g1", "a");
        tree.add_child("g1", "b");
        tree.add_child("g2", "c");
        tree
    }

    #[test]
    fn planning_partitions_by_owning_group() {
        let tree = two_group_tree();
        let request = RunRequest::new(
            RunProfile::Run,
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec![],
        );

        let groups = plan_groups(&tree, &request);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_id, "g1");
        assert_eq!(groups[0].leaves, vec!["a", "b"]);
        assert!(!groups[0].unfiltered);
        assert_eq!(groups[1].leaves, vec!["c"]);
    }

    #[test]
    fn sole_group_item_runs_unfiltered() {
        let tree = two_group_tree();
        let request = RunRequest::new(RunProfile::Run, vec!["g1".to_string()], vec![]);

        let groups = plan_groups(&tree, &request);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].unfiltered);
        // The group expands to its leaves for correlation purposes
        assert_eq!(groups[0].leaves, vec!["a", "b"]);
    }

    #[test]
    fn exclusions_remove_leaves_from_the_plan() {
        let tree = two_group_tree();
        let request = RunRequest::new(
            RunProfile::Run,
            vec!["g1".to_string()],
            vec!["b".to_string()],
        );

        let groups = plan_groups(&tree, &request);
        assert_eq!(groups[0].leaves, vec!["a"]);
    }
}
