//! Structural comparison of two logical trees.
//!
//! Used as the fidelity gate when converting: the tree read back from a
//! writer's output must be equivalent to the tree read from the input.
//! Comparison is set-based at each level (traversal order never matters)
//! and follows declared-name paths, so hoisting differences between the
//! encodings are invisible here by construction.

use crate::tree::{DepKind, LogicalTree, NodeId};
use std::collections::HashSet;

/// True iff the two trees describe the same resolved graph: the same
/// dependency names at every position reachable by the same declared-name
/// path, resolving to the same name+locator, with matching edge kind
/// classification under the precedence rule.
pub fn equivalent(a: &LogicalTree, b: &LogicalTree) -> bool {
    let kinds_a = a.classify();
    let kinds_b = b.classify();
    let mut seen = HashSet::new();
    eq_at(a, a.root(), b, b.root(), &kinds_a, &kinds_b, &mut seen)
}

#[allow(clippy::too_many_arguments)]
fn eq_at(
    a: &LogicalTree,
    na: NodeId,
    b: &LogicalTree,
    nb: NodeId,
    kinds_a: &[DepKind],
    kinds_b: &[DepKind],
    seen: &mut HashSet<(NodeId, NodeId)>,
) -> bool {
    // Shared occurrences make the arena a graph; a revisited pair has
    // already been checked (or is being checked higher up the path).
    if !seen.insert((na, nb)) {
        return true;
    }

    let node_a = a.node(na);
    let node_b = b.node(nb);
    if node_a.name != node_b.name || node_a.locator != node_b.locator {
        return false;
    }
    if kinds_a[na.0] != kinds_b[nb.0] {
        return false;
    }

    if node_a.dependencies.len() != node_b.dependencies.len() {
        return false;
    }
    for (name, edge_a) in &node_a.dependencies {
        let Some(edge_b) = node_b.dependencies.get(name) else {
            return false;
        };
        if !eq_at(a, edge_a.node, b, edge_b.node, kinds_a, kinds_b, seen) {
            return false;
        }
    }
    true
}
