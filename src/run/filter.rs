//! Filter expression builder
//!
//! The test host's filter grammar: `Field=Value` matches exactly,
//! `Field~Value` matches by substring, clauses are OR-joined with `|`.
//! Commas separate clauses in that grammar, and qualified names of generic
//! types contain literal commas, so commas in values are percent-encoded.

use crate::tree::{NodeId, NodeKind, TestTree};

/// The field every clause filters on
pub const FILTER_FIELD: &str = "FullyQualifiedName";

/// Percent-encode the commas of a qualified name for use inside a clause
pub fn encode_commas(name: &str) -> String {
    name.replace(',', "%2C")
}

/// Recover a qualified name from its encoded clause form
pub fn decode_commas(value: &str) -> String {
    value.replace("%2C", ",")
}

/// Build one OR-joined filter over the included items of a group
///
/// Leaves get an exact-match clause, containers (and group items that reach
/// a filtered invocation) a contains-match clause. Items without metadata
/// contribute nothing and are logged.
pub fn build_filter(tree: &TestTree, items: &[NodeId]) -> Option<String> {
    let mut clauses = Vec::new();

    for id in items {
        let Some(meta) = tree.meta(id) else {
            tracing::warn!(id = %id, "Included item has no metadata, leaving it out of the filter");
            continue;
        };
        let value = encode_commas(&meta.qualified_name);
        let clause = match meta.kind {
            NodeKind::Method | NodeKind::Case => format!("{FILTER_FIELD}={value}"),
            NodeKind::Container | NodeKind::Group => format!("{FILTER_FIELD}~{value}"),
        };
        clauses.push(clause);
    }

    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeMeta, TestNode};

    fn node(id: &str, fqn: &str, kind: NodeKind) -> TestNode {
        TestNode::new(
            id,
            Some(NodeMeta {
                qualified_name: fqn.to_string(),
                owning_group: "g".to_string(),
                kind,
                parameterized: false,
                display_name: fqn.to_string(),
                project_path: None,
                target_path: None,
            }),
        )
    }

    #[test]
    fn commas_round_trip_through_encoding() {
        let original = "N.C.M(x,y)";
        let encoded = encode_commas(original);
        assert_eq!(encoded, "N.C.M(x%2Cy)");
        assert_eq!(decode_commas(&encoded), original);
    }

    #[test]
    fn leaf_clause_is_exact_and_encoded() {
        let mut tree = TestTree::new();
        tree.insert(node("m", "N.C.M(x,y)", NodeKind::Method));

        let filter = build_filter(&tree, &["m".to_string()]).unwrap();
        assert_eq!(filter, "FullyQualifiedName=N.C.M(x%2Cy)");
    }

    #[test]
    fn clauses_are_or_joined_by_kind() {
        let mut tree = TestTree::new();
        tree.insert(node("c", "N.C", NodeKind::Container));
        tree.insert(node("m", "N.D.M", NodeKind::Method));

        let filter = build_filter(&tree, &["c".to_string(), "m".to_string()]).unwrap();
        assert_eq!(
            filter,
            "FullyQualifiedName~N.C|FullyQualifiedName=N.D.M"
        );
    }

    #[test]
    fn no_usable_items_yields_no_filter() {
        let mut tree = TestTree::new();
        tree.insert(TestNode::new("bare", None));
        assert_eq!(build_filter(&tree, &["bare".to_string()]), None);
    }
}
