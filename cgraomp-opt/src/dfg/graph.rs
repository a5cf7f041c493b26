//! The DFG container: a petgraph-backed directed graph owning its nodes
//! and edges, with the virtual-root convention maintained on every
//! mutation.
use super::{DfgNode, NodeKind};
use cgraomp_ir::ValueId;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};

/// Edge variants of the DFG. Every edge records the operand position it
/// feeds on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfgEdge {
    Normal { operand: u32 },
    /// An inter-iteration edge, `distance` iterations back.
    LoopCarried { operand: u32, distance: i64 },
    /// Seeds the first iteration of a loop-carried value.
    Init { operand: u32 },
}

impl DfgEdge {
    pub fn operand(&self) -> u32 {
        match self {
            DfgEdge::Normal { operand }
            | DfgEdge::LoopCarried { operand, .. }
            | DfgEdge::Init { operand } => *operand,
        }
    }

    /// Attribute pairs for graph output.
    pub fn attr_pairs(&self) -> Vec<(String, String)> {
        match self {
            DfgEdge::Normal { operand } => {
                vec![("operand".into(), operand.to_string())]
            }
            DfgEdge::LoopCarried { operand, distance } => vec![
                ("operand".into(), operand.to_string()),
                ("dir".into(), "back".into()),
                ("distance".into(), distance.to_string()),
                ("label".into(), distance.to_string()),
            ],
            DfgEdge::Init { operand } => vec![
                ("operand".into(), operand.to_string()),
                ("type".into(), "init".into()),
                ("label".into(), "init".into()),
            ],
        }
    }
}

/// The kernel data-flow graph. Owns its nodes and edges; exactly one
/// virtual root exists, with a virtual `Normal` edge to every source node.
/// Loop-carried edges may close cycles, so traversals are visited-set
/// guarded.
pub struct Dfg {
    graph: StableDiGraph<DfgNode, DfgEdge>,
    root: NodeIndex,
    name: String,
}

impl Dfg {
    pub fn new(name: impl ToString) -> Self {
        let mut graph = StableDiGraph::new();
        let root = graph.add_node(DfgNode::new(-1, NodeKind::VirtualRoot));
        Dfg {
            graph,
            root,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl ToString) {
        self.name = name.to_string();
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// Add a node; it starts as a source, hanging off the virtual root.
    pub fn add_node(&mut self, node: DfgNode) -> NodeIndex {
        let idx = self.graph.add_node(node);
        self.graph
            .add_edge(self.root, idx, DfgEdge::Normal { operand: 0 });
        idx
    }

    /// Connect two nodes. Gaining a real predecessor removes the
    /// destination's virtual edge.
    pub fn connect(
        &mut self,
        src: NodeIndex,
        dst: NodeIndex,
        edge: DfgEdge,
    ) -> EdgeIndex {
        let idx = self.graph.add_edge(src, dst, edge);
        if src != self.root {
            let virtual_edges: Vec<EdgeIndex> = self
                .graph
                .edges_connecting(self.root, dst)
                .map(|e| e.id())
                .collect();
            for e in virtual_edges {
                self.graph.remove_edge(e);
            }
        }
        idx
    }

    /// Remove an edge; a destination left without real predecessors
    /// becomes a source again.
    pub fn disconnect(&mut self, edge: EdgeIndex) -> Option<DfgEdge> {
        let (_, dst) = self.graph.edge_endpoints(edge)?;
        let removed = self.graph.remove_edge(edge);
        self.restore_virtual_edge(dst);
        removed
    }

    /// Remove a node together with its edges, maintaining the virtual
    /// root's view of the orphaned successors.
    pub fn remove_node(&mut self, idx: NodeIndex) -> Option<DfgNode> {
        if idx == self.root {
            return None;
        }
        let successors: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        let node = self.graph.remove_node(idx);
        for succ in successors {
            self.restore_virtual_edge(succ);
        }
        node
    }

    fn restore_virtual_edge(&mut self, dst: NodeIndex) {
        if !self.graph.contains_node(dst) || dst == self.root {
            return;
        }
        let has_real_pred = self
            .graph
            .edges_directed(dst, Direction::Incoming)
            .any(|e| e.source() != self.root);
        let has_virtual = self
            .graph
            .edges_connecting(self.root, dst)
            .next()
            .is_some();
        if !has_real_pred && !has_virtual {
            self.graph
                .add_edge(self.root, dst, DfgEdge::Normal { operand: 0 });
        }
    }

    pub fn node(&self, idx: NodeIndex) -> &DfgNode {
        &self.graph[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut DfgNode {
        &mut self.graph[idx]
    }

    /// All non-root nodes.
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        let root = self.root;
        self.graph.node_indices().filter(move |&n| n != root)
    }

    /// Number of non-root nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count() - 1
    }

    /// Number of edges excluding the virtual root's.
    pub fn edge_count(&self) -> usize {
        self.graph
            .edge_references()
            .filter(|e| e.source() != self.root)
            .count()
    }

    /// Outgoing `(edge, src, dst)` triples of a node.
    pub fn edges_from(
        &self,
        idx: NodeIndex,
    ) -> impl Iterator<Item = (DfgEdge, NodeIndex, NodeIndex)> + '_ {
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (*e.weight(), e.source(), e.target()))
    }

    /// Incoming edges of a node, optionally ignoring the virtual root.
    pub fn incoming(
        &self,
        idx: NodeIndex,
        ignore_root: bool,
    ) -> Vec<(EdgeIndex, NodeIndex, DfgEdge)> {
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|e| !ignore_root || e.source() != self.root)
            .map(|e| (e.id(), e.source(), *e.weight()))
            .collect()
    }

    /// Outgoing edges of a node as `(edge index, dst, weight)`.
    pub fn outgoing(
        &self,
        idx: NodeIndex,
    ) -> Vec<(EdgeIndex, NodeIndex, DfgEdge)> {
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.id(), e.target(), *e.weight()))
            .collect()
    }

    /// The node built over an IR instruction.
    pub fn find_by_inst(&self, inst: ValueId) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&n| self.graph[n].inst() == Some(inst))
    }

    /// Breadth-first walk from the virtual root, cycle-safe. Nodes
    /// unreachable from the root (none, by the source invariant) would be
    /// appended in index order.
    pub fn bfs_order(&self) -> Vec<NodeIndex> {
        let mut seen: HashMap<NodeIndex, ()> = HashMap::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([self.root]);
        seen.insert(self.root, ());
        while let Some(n) = queue.pop_front() {
            if n != self.root {
                order.push(n);
            }
            let mut next: Vec<NodeIndex> = self
                .graph
                .edges_directed(n, Direction::Outgoing)
                .map(|e| e.target())
                .collect();
            next.sort_by_key(|&t| self.graph[t].id);
            for t in next {
                if seen.insert(t, ()).is_none() {
                    queue.push_back(t);
                }
            }
        }
        for n in self.nodes() {
            if !seen.contains_key(&n) {
                order.push(n);
            }
        }
        order
    }

    /// Reassign node ids densely from 0 in breadth-first order, for plain
    /// node naming.
    pub fn make_sequential_ids(&mut self) {
        for (seq, idx) in self.bfs_order().into_iter().enumerate() {
            self.graph[idx].id = seq as i64;
        }
    }

    /// True when a path from the node reaches any `MemStore`.
    pub fn reaches_store(&self, from: NodeIndex) -> bool {
        let mut seen = vec![from];
        let mut queue = VecDeque::from([from]);
        while let Some(n) = queue.pop_front() {
            if matches!(self.graph[n].kind, NodeKind::MemStore { .. }) {
                return true;
            }
            for e in self.graph.edges_directed(n, Direction::Outgoing) {
                let t = e.target();
                if !seen.contains(&t) {
                    seen.push(t);
                    queue.push_back(t);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfg::ConstValue;

    fn constant(id: i64) -> DfgNode {
        DfgNode::new(
            id,
            NodeKind::Constant {
                value: ConstValue::Int {
                    bits: 32,
                    value: id,
                },
                skipped: vec![],
            },
        )
    }

    #[test]
    fn new_nodes_hang_off_the_root() {
        let mut g = Dfg::new("g");
        let a = g.add_node(constant(1));
        assert_eq!(g.node_count(), 1);
        assert_eq!(g.incoming(a, false).len(), 1);
        // The virtual edge does not count as a real edge.
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn connecting_removes_the_virtual_edge() {
        let mut g = Dfg::new("g");
        let a = g.add_node(constant(1));
        let b = g.add_node(constant(2));
        g.connect(a, b, DfgEdge::Normal { operand: 0 });
        let incoming = g.incoming(b, false);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].1, a);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn removing_last_predecessor_restores_the_virtual_edge() {
        let mut g = Dfg::new("g");
        let a = g.add_node(constant(1));
        let b = g.add_node(constant(2));
        let e = g.connect(a, b, DfgEdge::Normal { operand: 0 });
        g.disconnect(e);
        let incoming = g.incoming(b, false);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].1, g.root());
    }

    #[test]
    fn loop_carried_cycles_are_traversal_safe() {
        let mut g = Dfg::new("g");
        let a = g.add_node(constant(1));
        let b = g.add_node(constant(2));
        g.connect(a, b, DfgEdge::Normal { operand: 0 });
        g.connect(
            b,
            a,
            DfgEdge::LoopCarried {
                operand: 0,
                distance: 1,
            },
        );
        // bfs_order terminates despite the cycle.
        assert_eq!(g.bfs_order().len(), 2);
    }

    #[test]
    fn sequential_ids_are_dense_from_zero(){
        let mut g = Dfg::new("g");
        let a = g.add_node(constant(100));
        let b = g.add_node(constant(50));
        g.connect(a, b, DfgEdge::Normal { operand: 0 });
        g.make_sequential_ids();
        let mut ids: Vec<i64> =
            g.nodes().map(|n| g.node(n).id).collect();
        ids.sort();
        assert_eq!(ids, vec![0, 1]);
    }
}
