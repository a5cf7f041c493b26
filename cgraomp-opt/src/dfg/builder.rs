//! DFG construction from a verified kernel: the decoupled path builds over
//! the decoupling report, the time-multiplexed path over the full loop
//! body; both apply the memory-carried dependency rewiring when the model
//! admits backward inter-loop dependencies.
use super::{ConstValue, Dfg, DfgEdge, DfgNode, NodeKind};
use crate::analysis::{AnnotationAnalysis, LoopDependency};
use crate::verify::KernelReport;
use cgraomp_ir::{
    FuncId, Function, InstKind, LoopInfo, Module, ValueId, ValueKind,
};
use cgraomp_model::{CgraCategory, InterLoopDep, Model};
use petgraph::stable_graph::NodeIndex;
use std::collections::HashMap;

pub struct DfgBuilder<'a> {
    module: &'a Module,
    func: &'a Function,
    li: &'a LoopInfo,
    model: &'a Model,
    annotations: &'a AnnotationAnalysis,
    next_synthetic: i64,
}

impl<'a> DfgBuilder<'a> {
    pub fn new(
        module: &'a Module,
        func: &'a Function,
        li: &'a LoopInfo,
        model: &'a Model,
        annotations: &'a AnnotationAnalysis,
    ) -> Self {
        DfgBuilder {
            module,
            func,
            li,
            model,
            annotations,
            next_synthetic: func.values.len() as i64,
        }
    }

    /// Build the DFG for a kernel that passed verification.
    pub fn build(&mut self, report: &KernelReport) -> Dfg {
        let mut graph = match self.model.category {
            CgraCategory::Decoupled => self.build_decoupled(report),
            CgraCategory::TimeMultiplexed => {
                self.build_time_multiplexed(report)
            }
        };
        if self.model.inter_loop_dep != InterLoopDep::No {
            self.rewire_memory_deps(&mut graph, report);
        }
        graph
    }

    fn fresh_id(&mut self) -> i64 {
        let id = self.next_synthetic;
        self.next_synthetic += 1;
        id
    }

    fn map_entry_for(&self, inst: ValueId) -> Option<(String, bool)> {
        let module = self.module;
        let annotations = self.annotations;
        let name_of = |f: FuncId| module.function(f).name.clone();
        let is_custom = |f: FuncId| annotations.is_custom_inst(f);
        self.model
            .inst_map()
            .find(self.func, inst, &name_of, &is_custom)
            .map(|e| (e.map_name().to_string(), e.is_custom()))
    }

    fn compute_node(&mut self, inst: ValueId) -> DfgNode {
        let (opcode, is_custom) = self
            .map_entry_for(inst)
            .unwrap_or_else(|| {
                (
                    self.func
                        .opcode_name(inst)
                        .unwrap_or("unknown")
                        .to_string(),
                    false,
                )
            });
        DfgNode::new(
            inst.0 as i64,
            NodeKind::Compute {
                inst,
                opcode,
                is_custom,
            },
        )
    }

    fn mem_node(&mut self, inst: ValueId) -> Option<DfgNode> {
        let kind = match self.func.inst(inst).map(|i| &i.kind) {
            Some(InstKind::Load { ptr }) => NodeKind::MemLoad {
                inst,
                symbol: self.resolve_symbol(*ptr),
                datatype: self.func.ty(inst).clone(),
            },
            Some(InstKind::Store { value, ptr }) => NodeKind::MemStore {
                inst,
                symbol: self.resolve_symbol(*ptr),
                datatype: self.func.ty(*value).clone(),
            },
            _ => return None,
        };
        Some(DfgNode::new(inst.0 as i64, kind))
    }

    fn literal_node(&mut self, value: ValueId) -> Option<DfgNode> {
        let v = match &self.func.value(value).kind {
            ValueKind::ConstInt { value: i } => ConstValue::Int {
                bits: self.func.ty(value).bit_width(),
                value: *i,
            },
            ValueKind::ConstFloat { value: f } => ConstValue::Float {
                bits: self.func.ty(value).bit_width(),
                value: *f,
            },
            _ => return None,
        };
        let id = self.fresh_id();
        Some(DfgNode::new(
            id,
            NodeKind::Constant {
                value: v,
                skipped: vec![],
            },
        ))
    }

    /// A node for an out-of-loop value: a constant literal becomes a
    /// `Constant`, anything symbolic becomes `GlobalData`.
    fn invariant_node(
        &mut self,
        source: ValueId,
        skipped: Vec<&'static str>,
    ) -> DfgNode {
        match &self.func.value(source).kind {
            ValueKind::ConstInt { value } => DfgNode::new(
                source.0 as i64,
                NodeKind::Constant {
                    value: ConstValue::Int {
                        bits: self.func.ty(source).bit_width(),
                        value: *value,
                    },
                    skipped,
                },
            ),
            ValueKind::ConstFloat { value } => DfgNode::new(
                source.0 as i64,
                NodeKind::Constant {
                    value: ConstValue::Float {
                        bits: self.func.ty(source).bit_width(),
                        value: *value,
                    },
                    skipped,
                },
            ),
            _ => DfgNode::new(
                source.0 as i64,
                NodeKind::GlobalData {
                    name: self.func.value_name(source),
                    datatype: self.func.ty(source).clone(),
                    skipped,
                },
            ),
        }
    }

    /// Resolve the symbolic source of an access by transparently
    /// unwrapping pointer computations.
    fn resolve_symbol(&self, ptr: ValueId) -> String {
        let mut cur = ptr;
        loop {
            match &self.func.value(cur).kind {
                ValueKind::Argument { .. } => {
                    return self.func.value_name(cur)
                }
                ValueKind::Global(g) => {
                    return self.module.global(*g).name.clone()
                }
                ValueKind::Inst(inst) => match &inst.kind {
                    InstKind::Gep { base, .. } => cur = *base,
                    InstKind::Load { ptr } => cur = *ptr,
                    InstKind::Cast { arg, .. } => cur = *arg,
                    InstKind::Alloca { .. } => {
                        return self.func.value_name(cur)
                    }
                    _ => return "unknown".to_string(),
                },
                _ => return "unknown".to_string(),
            }
        }
    }

    /* ------------------------- decoupled path ------------------------- */

    fn build_decoupled(&mut self, report: &KernelReport) -> Dfg {
        let da = report
            .decoupled
            .as_ref()
            .expect("decoupled report for a decoupled model");
        let mut graph =
            Dfg::new(self.li.loop_name(self.func, report.loop_id));
        let mut map: HashMap<ValueId, NodeIndex> = HashMap::new();

        for &ld in &da.loads {
            if let Some(node) = self.mem_node(ld) {
                map.insert(ld, graph.add_node(node));
            }
        }
        // Loads folded to constants surface as constant nodes.
        let mut folded: Vec<_> = da.const_loads.iter().collect();
        folded.sort_by_key(|(v, _)| **v);
        for (&ld, data) in folded {
            if let Some(value) = ConstValue::from_const_data(data) {
                let node = DfgNode::new(
                    ld.0 as i64,
                    NodeKind::Constant {
                        value,
                        skipped: vec![],
                    },
                );
                map.insert(ld, graph.add_node(node));
            }
        }
        for &st in &da.stores {
            if let Some(node) = self.mem_node(st) {
                map.insert(st, graph.add_node(node));
            }
        }
        for &c in &da.computation {
            let node = self.compute_node(c);
            map.insert(c, graph.add_node(node));
        }
        for &inv in &da.invariants {
            let skipped: Vec<&'static str> = da
                .skip_sequences
                .get(&inv)
                .into_iter()
                .flatten()
                .filter_map(|&cast| self.func.opcode_name(cast))
                .collect();
            let node = self.invariant_node(inv, skipped);
            let idx = graph.add_node(node);
            map.insert(inv, idx);
            // Route the skipped casts at the consumers to the source.
            for &cast in
                da.skip_sequences.get(&inv).into_iter().flatten()
            {
                map.insert(cast, idx);
            }
        }

        // Edges follow the IR operand structure of the collected set.
        for &consumer in da.computation.iter().chain(da.stores.iter()) {
            let Some(&dst) = map.get(&consumer) else {
                continue;
            };
            let ops =
                crate::analysis::decoupling_data_operands(self.func, consumer);
            for (i, op) in ops.into_iter().enumerate() {
                let edge = DfgEdge::Normal { operand: i as u32 };
                if let Some(&src) = map.get(&op) {
                    graph.connect(src, dst, edge);
                } else if let Some(node) = self.literal_node(op) {
                    let src = graph.add_node(node);
                    graph.connect(src, dst, edge);
                } else {
                    log::warn!(
                        "operand {} of {} has no node in the data flow",
                        self.func.value_name(op),
                        self.func.value_name(consumer)
                    );
                }
            }
        }
        graph
    }

    /* ---------------------- time-multiplexed path --------------------- */

    fn build_time_multiplexed(&mut self, report: &KernelReport) -> Dfg {
        let func = self.func;
        let inner = self
            .li
            .innermost(report.loop_id)
            .unwrap_or(report.loop_id);
        let mut graph = Dfg::new(self.li.loop_name(func, report.loop_id));
        let lp = self.li.get(inner);
        let body: Vec<ValueId> = lp
            .blocks
            .iter()
            .flat_map(|&bb| func.block(bb).insts.iter().copied())
            .collect();

        // φ-nodes of dependencies dissolve into their defining node.
        let mut phi_def: HashMap<ValueId, ValueId> = HashMap::new();
        let mut phi_dep: HashMap<ValueId, &LoopDependency> = HashMap::new();
        for dep in report
            .deps
            .idv_deps()
            .iter()
            .chain(report.deps.simple_deps())
        {
            let (phi, def) = match dep {
                LoopDependency::Induction { phi, bin_op, .. } => {
                    (*phi, *bin_op)
                }
                LoopDependency::Simple { phi, def, .. } => (*phi, *def),
                LoopDependency::Memory { .. } => continue,
            };
            phi_def.insert(phi, def);
            phi_dep.insert(phi, dep);
        }

        let back_branch = self.li.back_branch(func, inner);
        let back_cond = self.li.back_condition(func, inner);
        let excluded = |v: ValueId| -> bool {
            Some(v) == back_branch
                || Some(v) == back_cond
                || phi_def.contains_key(&v)
                || matches!(
                    func.inst(v).map(|i| &i.kind),
                    Some(InstKind::Gep { .. })
                )
        };

        let mut map: HashMap<ValueId, NodeIndex> = HashMap::new();
        for &inst_id in &body {
            if excluded(inst_id) {
                continue;
            }
            let node = match func.inst(inst_id).map(|i| &i.kind) {
                Some(InstKind::Load { .. })
                | Some(InstKind::Store { .. }) => {
                    self.mem_node(inst_id)
                }
                Some(_) => Some(self.compute_node(inst_id)),
                None => None,
            };
            if let Some(node) = node {
                map.insert(inst_id, graph.add_node(node));
            }
        }

        // Wire operands; pointer indexing lowers to GEPAdd chains.
        let mut gep_cache: HashMap<ValueId, NodeIndex> = HashMap::new();
        for &inst_id in &body {
            if excluded(inst_id) {
                continue;
            }
            let Some(&dst) = map.get(&inst_id) else {
                continue;
            };
            let ops = func.operands(inst_id);
            for (i, &op) in ops.iter().enumerate() {
                let operand = i as u32;
                if let Some(&def) = phi_def.get(&op) {
                    let dep = phi_dep[&op];
                    let Some(&def_node) = map.get(&def) else {
                        continue;
                    };
                    if def == inst_id {
                        // The defining update consumes its own φ: that is
                        // the loop-carried self-edge.
                        graph.connect(
                            def_node,
                            def_node,
                            DfgEdge::LoopCarried {
                                operand,
                                distance: dep.distance(),
                            },
                        );
                        let init = self.dep_init_value(dep);
                        let init_node = self.init_node(&mut graph, init);
                        graph.connect(
                            init_node,
                            def_node,
                            DfgEdge::Init { operand },
                        );
                    } else {
                        graph.connect(
                            def_node,
                            dst,
                            DfgEdge::Normal { operand },
                        );
                    }
                    continue;
                }
                if matches!(
                    func.inst(op).map(|x| &x.kind),
                    Some(InstKind::Gep { .. })
                ) {
                    let addr = self.gep_chain(
                        &mut graph,
                        &mut gep_cache,
                        &mut map,
                        &phi_def,
                        op,
                    );
                    graph.connect(addr, dst, DfgEdge::Normal { operand });
                    continue;
                }
                if let Some(&src) = map.get(&op) {
                    graph.connect(src, dst, DfgEdge::Normal { operand });
                } else if let Some(node) = self.literal_node(op) {
                    let src = graph.add_node(node);
                    graph.connect(src, dst, DfgEdge::Normal { operand });
                } else if !matches!(
                    func.value(op).kind,
                    ValueKind::Inst(..)
                ) {
                    let node = self.invariant_node(op, vec![]);
                    let src = graph.add_node(node);
                    map.insert(op, src);
                    graph.connect(src, dst, DfgEdge::Normal { operand });
                }
            }
        }
        graph
    }

    fn dep_init_value(&self, dep: &LoopDependency) -> Option<ValueId> {
        match dep {
            LoopDependency::Induction { start, .. } => Some(*start),
            LoopDependency::Simple { init, .. } => Some(*init),
            LoopDependency::Memory { .. } => None,
        }
    }

    fn init_node(
        &mut self,
        graph: &mut Dfg,
        init: Option<ValueId>,
    ) -> NodeIndex {
        match init {
            Some(v) => match self.literal_node(v) {
                Some(node) => graph.add_node(node),
                None => {
                    let node = self.invariant_node(v, vec![]);
                    graph.add_node(node)
                }
            },
            None => {
                let id = self.fresh_id();
                graph.add_node(DfgNode::new(
                    id,
                    NodeKind::Constant {
                        value: ConstValue::Int { bits: 32, value: 0 },
                        skipped: vec![],
                    },
                ))
            }
        }
    }

    /// Lower one GEP into a chain of `GEPAdd` nodes producing the element
    /// address; the base pointer appears as `GlobalData`.
    fn gep_chain(
        &mut self,
        graph: &mut Dfg,
        cache: &mut HashMap<ValueId, NodeIndex>,
        map: &mut HashMap<ValueId, NodeIndex>,
        phi_def: &HashMap<ValueId, ValueId>,
        gep: ValueId,
    ) -> NodeIndex {
        if let Some(&done) = cache.get(&gep) {
            return done;
        }
        let Some(InstKind::Gep { base, indices }) =
            self.func.inst(gep).map(|i| i.kind.clone())
        else {
            unreachable!("gep_chain on non-gep");
        };
        let base_node = if let Some(&b) = map.get(&base) {
            b
        } else {
            let node = DfgNode::new(
                base.0 as i64,
                NodeKind::GlobalData {
                    name: self.resolve_symbol(base),
                    datatype: self.func.ty(base).clone(),
                    skipped: vec![],
                },
            );
            let idx = graph.add_node(node);
            map.insert(base, idx);
            idx
        };
        let mut addr = base_node;
        for (pos, &idx_val) in indices.iter().enumerate() {
            let id = if pos == 0 {
                gep.0 as i64
            } else {
                self.fresh_id()
            };
            let gepadd =
                graph.add_node(DfgNode::new(id, NodeKind::GepAdd { inst: gep }));
            graph.connect(addr, gepadd, DfgEdge::Normal { operand: 0 });
            // Index operand: either a node, a dissolved φ, or a literal.
            let src = if let Some(&def) = phi_def.get(&idx_val) {
                map.get(&def).copied()
            } else if let Some(&n) = map.get(&idx_val) {
                Some(n)
            } else {
                self.literal_node(idx_val).map(|n| graph.add_node(n))
            };
            if let Some(src) = src {
                graph.connect(src, gepadd, DfgEdge::Normal { operand: 1 });
            }
            addr = gepadd;
        }
        cache.insert(gep, addr);
        addr
    }

    /* ----------------- memory-carried dependency rewiring ------------- */

    /// Replace the `Normal` edges out of a dependence's consuming load by
    /// a `LoopCarried` edge from the defining store plus an `Init` edge
    /// from the load.
    fn rewire_memory_deps(&mut self, graph: &mut Dfg, report: &KernelReport) {
        for dep in report.deps.mem_deps() {
            let LoopDependency::Memory {
                store,
                load,
                distance,
            } = dep
            else {
                continue;
            };
            let (Some(load_node), Some(store_node)) = (
                graph.find_by_inst(*load),
                graph.find_by_inst(*store),
            ) else {
                continue;
            };
            for (eidx, dst, edge) in graph.outgoing(load_node) {
                let DfgEdge::Normal { operand } = edge else {
                    continue;
                };
                graph.disconnect(eidx);
                graph.connect(
                    store_node,
                    dst,
                    DfgEdge::LoopCarried {
                        operand,
                        distance: *distance,
                    },
                );
                graph.connect(
                    load_node,
                    dst,
                    DfgEdge::Init { operand },
                );
            }
        }
    }
}
