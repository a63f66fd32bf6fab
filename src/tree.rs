//! Test tree data model and run state
//!
//! The tree itself is discovered and owned by the host; this crate only
//! mutates the per-node run state. Node ids are stable across discovery
//! cycles, which is what lets a run request reference items by id.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Stable identifier of a tree item, assigned by the host
pub type NodeId = String;

/// Kind of a tree item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The batching unit for host invocations (one external process per group)
    Group,
    /// A namespace or class grouping methods
    Container,
    /// A test method
    Method,
    /// A single parameterized case under a method
    Case,
}

/// Metadata attached to a tree item by the host's discovery layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Fully qualified name as the test host reports it
    pub qualified_name: String,
    /// Id of the group this item belongs to (a group owns itself)
    pub owning_group: NodeId,
    pub kind: NodeKind,
    /// Whether this item expands into parameterized cases
    #[serde(default)]
    pub parameterized: bool,
    pub display_name: String,
    /// Group nodes only: the path handed to the runner invocation
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    /// Group nodes only: the built library artifact, probed for an adjacent
    /// executable when choosing the debug launch strategy
    #[serde(default)]
    pub target_path: Option<PathBuf>,
}

/// A clickable source position attached to a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: u32,
}

/// Run state of a tree item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    /// No run has touched this item yet
    Pending,
    /// Scheduled as part of the current run
    Enqueued,
    /// The owning group's process is executing
    Running,
    Passed {
        duration_ms: u64,
    },
    Failed {
        duration_ms: u64,
        message: String,
        location: Option<SourceLocation>,
    },
    Skipped,
    /// The run itself failed around this item (launch, build, missing log...)
    Errored {
        message: String,
    },
}

impl RunState {
    /// Terminal states are never revisited within a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Passed { .. } | Self::Failed { .. } | Self::Skipped | Self::Errored { .. }
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Enqueued => write!(f, "enqueued"),
            Self::Running => write!(f, "running"),
            Self::Passed { .. } => write!(f, "passed"),
            Self::Failed { .. } => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Errored { .. } => write!(f, "errored"),
        }
    }
}

/// A tree item
#[derive(Debug, Clone)]
pub struct TestNode {
    pub id: NodeId,
    pub children: Vec<NodeId>,
    pub meta: Option<NodeMeta>,
    pub state: RunState,
}

impl TestNode {
    pub fn new(id: impl Into<NodeId>, meta: Option<NodeMeta>) -> Self {
        Self {
            id: id.into(),
            children: Vec::new(),
            meta,
            state: RunState::Pending,
        }
    }

    /// Leaf-runnable nodes are exactly childless method nodes and case nodes
    pub fn is_runnable_leaf(&self) -> bool {
        self.children.is_empty()
            && matches!(
                self.meta.as_ref().map(|m| m.kind),
                Some(NodeKind::Method) | Some(NodeKind::Case)
            )
    }
}

/// The discovered test tree
#[derive(Debug, Default)]
pub struct TestTree {
    nodes: HashMap<NodeId, TestNode>,
}

impl TestTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, replacing any previous node with the same id
    pub fn insert(&mut self, node: TestNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Record a parent/child edge; both nodes must already be inserted
    pub fn add_child(&mut self, parent: &str, child: &str) {
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child.to_string());
        }
    }

    pub fn get(&self, id: &str) -> Option<&TestNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TestNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn meta(&self, id: &str) -> Option<&NodeMeta> {
        self.nodes.get(id).and_then(|n| n.meta.as_ref())
    }

    /// Set a node's run state
    pub fn set_state(&mut self, id: &str, state: RunState) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.state = state;
        }
    }

    pub fn state(&self, id: &str) -> Option<&RunState> {
        self.nodes.get(id).map(|n| &n.state)
    }

    /// All runnable leaves at or under `id`, in depth-first order
    pub fn leaves_under(&self, id: &str) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                if node.is_runnable_leaf() {
                    leaves.push(current);
                } else {
                    // Reverse keeps the depth-first order stable
                    for child in node.children.iter().rev() {
                        stack.push(child.clone());
                    }
                }
            }
        }
        leaves
    }
}

/// What kind of run a request asks for
///
/// A closed enum dispatched through one `match`; new kinds are
/// compile-time-checked at every dispatch site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunProfile {
    Run,
    Debug,
}

/// A user-initiated run, alive until completion or cancellation
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub profile: RunProfile,
    pub included: Vec<NodeId>,
    pub excluded: Vec<NodeId>,
    pub cancel: CancellationToken,
}

impl RunRequest {
    pub fn new(profile: RunProfile, included: Vec<NodeId>, excluded: Vec<NodeId>) -> Self {
        Self {
            profile,
            included,
            excluded,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_excluded(&self, id: &str) -> bool {
        self.excluded.iter().any(|e| e == id)
    }
}

/// Human-readable run output shown by the host, in append order
///
/// Every appended line is mirrored to `tracing` as it is written.
#[derive(Debug, Default)]
pub struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(target: "testbridge::run_log", "{line}");
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(kind: NodeKind, fqn: &str) -> NodeMeta {
        NodeMeta {
            qualified_name: fqn.to_string(),
            owning_group: "g".to_string(),
            kind,
            parameterized: false,
            display_name: fqn.rsplit('.').next().unwrap().to_string(),
            project_path: None,
            target_path: None,
        }
    }

    #[test]
    fn leaves_under_skips_methods_with_cases() {
        let mut tree = TestTree::new();
        tree.insert(TestNode::new("g", Some(meta(NodeKind::Group, "G"))));
        tree.insert(TestNode::new("c", Some(meta(NodeKind::Container, "G.C"))));
        tree.insert(TestNode::new("m1", Some(meta(NodeKind::Method, "G.C.M1"))));
        tree.insert(TestNode::new("m2", Some(meta(NodeKind::Method, "G.C.M2"))));
        tree.insert(TestNode::new("m2a", Some(meta(NodeKind::Case, "G.C.M2"))));
        tree.insert(TestNode::new("m2b", Some(meta(NodeKind::Case, "G.C.M2"))));
        tree.add_child("g", "c");
        tree.add_child("c", "m1");
        tree.add_child("c", "m2");
        tree.add_child("m2", "m2a");
        tree.add_child("m2", "m2b");

        // A method with cases is not itself a leaf; its cases are
        assert_eq!(tree.leaves_under("g"), vec!["m1", "m2a", "m2b"]);
        assert_eq!(tree.leaves_under("m1"), vec!["m1"]);
    }

    #[test]
    fn terminal_states() {
        assert!(RunState::Skipped.is_terminal());
        assert!(RunState::Passed { duration_ms: 1 }.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(!RunState::Enqueued.is_terminal());
    }
}
