//! Result correlator
//!
//! Maps parsed outcomes back onto tree leaves and guarantees every
//! originally-requested leaf ends in a terminal state: reported leaves get
//! their outcome, unreported ones are marked skipped. Unmatched outcomes are
//! logged and dropped, never silently counted.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::tree::{NodeId, RunLog, RunState, SourceLocation, TestTree};
use crate::trx::{Outcome, ParsedOutcome};

/// Aggregate of one group invocation, combinable across groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    pub execution_time_ms: u64,
}

impl RunSummary {
    /// Fold another group's summary into this one
    pub fn merge(&mut self, other: &RunSummary) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.total += other.total;
        self.execution_time_ms += other.execution_time_ms;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} skipped ({} total) in {} ms",
            self.passed, self.failed, self.skipped, self.total, self.execution_time_ms
        )
    }
}

/// Some runners shorten long parameterized display names and append a run of
/// dot or middle-dot glyphs before the closing brace
fn truncation_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"[.·]{2,}\}$").unwrap())
}

/// `in <file>:line <n>` frame reference inside a stack trace
fn frame_location() -> &'static Regex {
    static LOCATION: OnceLock<Regex> = OnceLock::new();
    LOCATION.get_or_init(|| Regex::new(r"in (.+):line (\d+)").unwrap())
}

/// Scan a stack trace for the first clickable source position
pub fn scan_stack_location(stack_trace: &str) -> Option<SourceLocation> {
    let captures = frame_location().captures(stack_trace)?;
    let file = PathBuf::from(captures.get(1)?.as_str().trim());
    let line = captures.get(2)?.as_str().parse().ok()?;
    Some(SourceLocation { file, line })
}

/// Correlates one invocation's outcomes onto the tree
pub struct Correlator {
    /// Exact qualified name -> leaf
    exact: HashMap<String, NodeId>,
    /// (qualified name, case display name) -> leaf, parameterized leaves only.
    /// Ordered so truncation-fallback prefix scans are deterministic.
    cases: BTreeMap<(String, String), NodeId>,
    /// The originally-requested leaves, skip-filled at the end
    requested: Vec<NodeId>,
}

impl Correlator {
    /// Build the match indexes over the requested leaves
    pub fn new(tree: &TestTree, requested: &[NodeId]) -> Self {
        let mut exact = HashMap::new();
        let mut cases = BTreeMap::new();

        for id in requested {
            let Some(meta) = tree.meta(id) else { continue };
            exact
                .entry(meta.qualified_name.clone())
                .or_insert_with(|| id.clone());
            if meta.parameterized {
                cases.insert(
                    (meta.qualified_name.clone(), meta.display_name.clone()),
                    id.clone(),
                );
            }
        }

        Self {
            exact,
            cases,
            requested: requested.to_vec(),
        }
    }

    /// Apply outcomes in document order, then skip-fill and summarize
    ///
    /// Application is idempotent per leaf: a later outcome for the same leaf
    /// overwrites an earlier one. The summary is computed from the requested
    /// leaves' final states, so totals always equal correlated outcomes plus
    /// skip-filled leaves.
    pub fn apply(
        &self,
        tree: &mut TestTree,
        log: &mut RunLog,
        outcomes: &[ParsedOutcome],
    ) -> RunSummary {
        for outcome in outcomes {
            match self.match_leaf(outcome) {
                Some(id) => apply_outcome(tree, log, &id, outcome),
                None => {
                    tracing::warn!(
                        qualified_name = %outcome.qualified_name,
                        display_name = %outcome.display_name,
                        "Reported result matches no requested test item, dropping"
                    );
                    log.append(format!(
                        "No test item matches reported result '{}'",
                        outcome.display_name
                    ));
                }
            }
        }

        // No requested leaf may end the run still running or enqueued
        for id in &self.requested {
            let terminal = tree.state(id).is_some_and(RunState::is_terminal);
            if !terminal {
                tree.set_state(id, RunState::Skipped);
            }
        }

        self.summarize(tree)
    }

    /// Match order: exact case key, truncation-marker prefix fallback,
    /// then plain qualified name
    fn match_leaf(&self, outcome: &ParsedOutcome) -> Option<NodeId> {
        let key = (
            outcome.qualified_name.clone(),
            outcome.display_name.clone(),
        );
        if let Some(id) = self.cases.get(&key) {
            return Some(id.clone());
        }

        if truncation_marker().is_match(&outcome.display_name) {
            let stripped = truncation_marker().replace(&outcome.display_name, "");
            let prefix = stripped.trim_end_matches(|c: char| c == ',' || c.is_whitespace());
            if !prefix.is_empty() {
                let found = self
                    .cases
                    .range((outcome.qualified_name.clone(), String::new())..)
                    .take_while(|((fqn, _), _)| *fqn == outcome.qualified_name)
                    .find(|((_, display), _)| display.starts_with(prefix));
                if let Some((_, id)) = found {
                    return Some(id.clone());
                }
            }
        }

        self.exact.get(&outcome.qualified_name).cloned()
    }

    fn summarize(&self, tree: &TestTree) -> RunSummary {
        let mut summary = RunSummary::default();
        for id in &self.requested {
            match tree.state(id) {
                Some(RunState::Passed { duration_ms }) => {
                    summary.passed += 1;
                    summary.execution_time_ms += duration_ms;
                }
                Some(RunState::Failed { duration_ms, .. }) => {
                    summary.failed += 1;
                    summary.execution_time_ms += duration_ms;
                }
                Some(RunState::Errored { .. }) => summary.failed += 1,
                _ => summary.skipped += 1,
            }
        }
        summary.total = summary.passed + summary.failed + summary.skipped;
        summary
    }
}

/// Write one outcome onto its leaf and into the run log
fn apply_outcome(tree: &mut TestTree, log: &mut RunLog, id: &str, outcome: &ParsedOutcome) {
    match outcome.outcome {
        Outcome::Passed => {
            tree.set_state(
                id,
                RunState::Passed {
                    duration_ms: outcome.duration_ms,
                },
            );
            log.append(format!(
                "Passed: {} ({} ms)",
                outcome.display_name, outcome.duration_ms
            ));
        }
        Outcome::Failed => {
            let mut message = outcome.error_message.clone().unwrap_or_default();
            let location = outcome.stack_trace.as_deref().and_then(scan_stack_location);
            // The full trace travels with the message whether or not a
            // clickable location was extracted from it
            if let Some(stack) = &outcome.stack_trace {
                if !message.is_empty() {
                    message.push('\n');
                }
                message.push_str(stack);
            }
            tree.set_state(
                id,
                RunState::Failed {
                    duration_ms: outcome.duration_ms,
                    message: message.clone(),
                    location,
                },
            );
            log.append(format!(
                "Failed: {} ({} ms)",
                outcome.display_name, outcome.duration_ms
            ));
            for line in message.lines() {
                log.append(format!("    {line}"));
            }
        }
        Outcome::Skipped | Outcome::NotExecuted => {
            tree.set_state(id, RunState::Skipped);
            log.append(format!("Skipped: {}", outcome.display_name));
        }
    }

    if let Some(std_out) = &outcome.std_out {
        for line in std_out.lines() {
            log.append(format!("    out: {line}"));
        }
    }
}
