//! Operator-tree height reduction: skewed chains of one associative
//! operator are rebuilt as balanced trees so the fabric's critical path
//! shrinks.
use crate::dfg::{Dfg, DfgEdge, NodeKind};
use crate::pass_manager::DfgPass;
use cgraomp_ir::{Function, LoopId, LoopInfo};
use petgraph::stable_graph::NodeIndex;
use std::collections::VecDeque;

/// Opcodes safe to reassociate.
const ASSOCIATIVE: &[&str] = &["add", "mul", "fadd", "fmul", "and", "or", "xor"];

pub struct BalanceTree;

impl DfgPass for BalanceTree {
    fn name(&self) -> &'static str {
        "balance-tree"
    }

    fn run(
        &self,
        graph: &mut Dfg,
        _func: &Function,
        _li: &LoopInfo,
        _kernel: LoopId,
    ) -> bool {
        let mut changed = false;
        for root in find_root_candidates(graph) {
            changed |= balance(graph, root);
        }
        changed
    }
}

fn opcode_of(graph: &Dfg, idx: NodeIndex) -> Option<&str> {
    match &graph.node(idx).kind {
        NodeKind::Compute { opcode, .. } => Some(opcode.as_str()),
        _ => None,
    }
}

/// Roots of reassociable trees: associative compute nodes that do not feed
/// another node of the same opcode.
fn find_root_candidates(graph: &Dfg) -> Vec<NodeIndex> {
    graph
        .nodes()
        .filter(|&n| {
            let Some(op) = opcode_of(graph, n) else {
                return false;
            };
            if !ASSOCIATIVE.contains(&op) {
                return false;
            }
            !graph
                .outgoing(n)
                .iter()
                .any(|(_, dst, _)| opcode_of(graph, *dst) == Some(op))
        })
        .collect()
}

/// Collect the same-opcode operator tree under `root`. Internal nodes must
/// be single-use and free of loop-carried or init edges; everything else
/// is a leaf. Returns `(internals post-order, leaves, depth)`.
fn collect_tree(
    graph: &Dfg,
    root: NodeIndex,
) -> (Vec<NodeIndex>, Vec<NodeIndex>, usize) {
    let op = opcode_of(graph, root).unwrap_or_default().to_string();
    let mut internals = Vec::new();
    let mut leaves = Vec::new();
    let mut max_depth = 0;

    fn visit(
        graph: &Dfg,
        op: &str,
        node: NodeIndex,
        depth: usize,
        internals: &mut Vec<NodeIndex>,
        leaves: &mut Vec<NodeIndex>,
        max_depth: &mut usize,
    ) {
        *max_depth = (*max_depth).max(depth);
        let mut incoming = graph.incoming(node, true);
        incoming.sort_by_key(|(_, _, e)| e.operand());
        for (_, src, edge) in incoming {
            if !matches!(edge, DfgEdge::Normal { .. }) {
                // A loop-carried operand pins the whole subtree.
                leaves.push(src);
                continue;
            }
            let is_internal = opcode_of(graph, src) == Some(op)
                && graph.outgoing(src).len() == 1
                && graph
                    .incoming(src, true)
                    .iter()
                    .all(|(_, _, e)| matches!(e, DfgEdge::Normal { .. }));
            if is_internal {
                visit(
                    graph, op, src, depth + 1, internals, leaves,
                    max_depth,
                );
                internals.push(src);
            } else {
                leaves.push(src);
            }
        }
    }

    visit(
        graph,
        &op,
        root,
        1,
        &mut internals,
        &mut leaves,
        &mut max_depth,
    );
    (internals, leaves, max_depth)
}

fn balanced_depth(leaves: usize) -> usize {
    (usize::BITS - (leaves.saturating_sub(1)).leading_zeros()) as usize
}

/// Rebuild the operator tree under `root` as a balanced binary tree over
/// its leaves, reusing the existing internal nodes.
fn balance(graph: &mut Dfg, root: NodeIndex) -> bool {
    let (internals, leaves, depth) = collect_tree(graph, root);
    if leaves.len() < 3 || internals.is_empty() {
        return false;
    }
    if depth <= balanced_depth(leaves.len()) {
        return false;
    }

    // Detach every edge inside the tree.
    let mut combiners: Vec<NodeIndex> = internals;
    combiners.push(root);
    for &n in &combiners {
        for (eidx, _, _) in graph.incoming(n, true) {
            graph.disconnect(eidx);
        }
    }

    // Pair leaves first-in-first-out; each combiner consumes two inputs
    // and becomes a new input.
    let mut queue: VecDeque<NodeIndex> = leaves.into();
    for &comb in &combiners {
        let a = queue.pop_front().expect("leaf underflow");
        let b = queue.pop_front().expect("leaf underflow");
        graph.connect(a, comb, DfgEdge::Normal { operand: 0 });
        graph.connect(b, comb, DfgEdge::Normal { operand: 1 });
        queue.push_back(comb);
    }
    debug_assert_eq!(queue.len(), 1);
    debug_assert_eq!(queue.front(), Some(&root));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfg::{ConstValue, DfgNode};
    use cgraomp_ir::ValueId;

    fn leaf(graph: &mut Dfg, id: i64) -> NodeIndex {
        graph.add_node(DfgNode::new(
            id,
            NodeKind::Constant {
                value: ConstValue::Int { bits: 32, value: id },
                skipped: vec![],
            },
        ))
    }

    fn adder(graph: &mut Dfg, id: i64) -> NodeIndex {
        graph.add_node(DfgNode::new(
            id,
            NodeKind::Compute {
                inst: ValueId(id as u32),
                opcode: "add".to_string(),
                is_custom: false,
            },
        ))
    }

    /// ((((a+b)+c)+d): depth 3 chain over 4 leaves.
    fn skewed_chain() -> (Dfg, NodeIndex) {
        let mut g = Dfg::new("chain");
        let a = leaf(&mut g, 10);
        let b = leaf(&mut g, 11);
        let c = leaf(&mut g, 12);
        let d = leaf(&mut g, 13);
        let add0 = adder(&mut g, 0);
        let add1 = adder(&mut g, 1);
        let add2 = adder(&mut g, 2);
        g.connect(a, add0, DfgEdge::Normal { operand: 0 });
        g.connect(b, add0, DfgEdge::Normal { operand: 1 });
        g.connect(add0, add1, DfgEdge::Normal { operand: 0 });
        g.connect(c, add1, DfgEdge::Normal { operand: 1 });
        g.connect(add1, add2, DfgEdge::Normal { operand: 0 });
        g.connect(d, add2, DfgEdge::Normal { operand: 1 });
        (g, add2)
    }

    #[test]
    fn skewed_chain_is_rebalanced() {
        let (mut g, root) = skewed_chain();
        let nodes_before = g.node_count();
        let edges_before = g.edge_count();
        assert!(balance(&mut g, root));
        // Same resources, shallower tree.
        assert_eq!(g.node_count(), nodes_before);
        assert_eq!(g.edge_count(), edges_before);
        let (_, leaves, depth) = collect_tree(&g, root);
        assert_eq!(leaves.len(), 4);
        assert_eq!(depth, 2);
    }

    #[test]
    fn balanced_tree_is_left_alone() {
        let (mut g, root) = skewed_chain();
        assert!(balance(&mut g, root));
        assert!(!balance(&mut g, root));
    }
}
