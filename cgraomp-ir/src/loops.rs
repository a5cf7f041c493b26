//! Natural-loop detection over the CFG, plus the loop-nest queries the
//! kernel extraction needs: innermost loop, nest depth, and perfect-nest
//! depth.
use crate::{BlockId, Function, InstKind, ValueId};
use std::collections::{HashMap, HashSet};

/// Index of a loop inside a [LoopInfo].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub usize);

/// A natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    /// Unique back-edge source, when there is exactly one.
    pub latch: Option<BlockId>,
    pub blocks: Vec<BlockId>,
    block_set: HashSet<BlockId>,
    pub parent: Option<LoopId>,
    pub subloops: Vec<LoopId>,
    pub depth: u32,
}

impl Loop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.block_set.contains(&block)
    }
}

/// A detected induction variable: the header phi, its update instruction,
/// the initial value, and the constant step.
#[derive(Debug, Clone, Copy)]
pub struct InductionVar {
    pub phi: ValueId,
    pub update: ValueId,
    pub init: ValueId,
    pub step: i64,
}

/// Loops of one function, with nesting structure.
#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    pub loops: Vec<Loop>,
    pub top_level: Vec<LoopId>,
}

impl LoopInfo {
    pub fn new(func: &Function) -> Self {
        let doms = dominators(func);
        let preds = func.predecessors();

        // Back edges: b -> h where h dominates b.
        let mut headers: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for bb in func.block_ids() {
            for succ in func.successors(bb) {
                if doms.get(&bb).is_some_and(|d| d.contains(&succ)) {
                    headers.entry(succ).or_default().push(bb);
                }
            }
        }

        // One natural loop per header; all back edges to a header merge.
        let mut loops = Vec::new();
        let mut header_order: Vec<_> = headers.keys().copied().collect();
        header_order.sort();
        for header in header_order {
            let latches = &headers[&header];
            let mut block_set: HashSet<BlockId> =
                [header].into_iter().collect();
            let mut work: Vec<BlockId> = latches.clone();
            while let Some(bb) = work.pop() {
                if block_set.insert(bb) {
                    if let Some(ps) = preds.get(&bb) {
                        work.extend(ps.iter().copied());
                    }
                }
            }
            let mut blocks: Vec<_> = block_set.iter().copied().collect();
            blocks.sort();
            loops.push(Loop {
                header,
                latch: if latches.len() == 1 {
                    Some(latches[0])
                } else {
                    None
                },
                blocks,
                block_set,
                parent: None,
                subloops: Vec::new(),
                depth: 1,
            });
        }

        // Nesting: the parent of a loop is the smallest strictly-containing
        // loop.
        let n = loops.len();
        for i in 0..n {
            let mut best: Option<usize> = None;
            for j in 0..n {
                if i == j {
                    continue;
                }
                let contains = loops[j].contains(loops[i].header)
                    && loops[j].block_set.len() > loops[i].block_set.len();
                if contains
                    && best.map_or(true, |b: usize| {
                        loops[j].block_set.len() < loops[b].block_set.len()
                    })
                {
                    best = Some(j);
                }
            }
            if let Some(p) = best {
                loops[i].parent = Some(LoopId(p));
                loops[p].subloops.push(LoopId(i));
            }
        }
        let mut info = LoopInfo {
            top_level: (0..n)
                .filter(|&i| loops[i].parent.is_none())
                .map(LoopId)
                .collect(),
            loops,
        };
        for i in 0..n {
            let mut depth = 1;
            let mut cur = info.loops[i].parent;
            while let Some(p) = cur {
                depth += 1;
                cur = info.loops[p.0].parent;
            }
            info.loops[i].depth = depth;
        }
        info
    }

    pub fn get(&self, id: LoopId) -> &Loop {
        &self.loops[id.0]
    }

    pub fn loop_ids(&self) -> impl Iterator<Item = LoopId> {
        (0..self.loops.len()).map(LoopId)
    }

    /// The innermost loop containing a block, if any.
    pub fn loop_of(&self, block: BlockId) -> Option<LoopId> {
        self.loop_ids()
            .filter(|&l| self.get(l).contains(block))
            .min_by_key(|&l| self.get(l).blocks.len())
    }

    /// Preheader: the unique predecessor of the header from outside the
    /// loop.
    pub fn preheader(&self, func: &Function, id: LoopId) -> Option<BlockId> {
        let lp = self.get(id);
        let preds = func.predecessors();
        let mut outside = preds
            .get(&lp.header)?
            .iter()
            .copied()
            .filter(|p| !lp.contains(*p));
        let first = outside.next()?;
        outside.next().is_none().then_some(first)
    }

    /// Loops of the nest rooted at `id`, outermost first, following the
    /// unique-subloop chain as far as it goes.
    pub fn nest_chain(&self, id: LoopId) -> Vec<LoopId> {
        let mut chain = vec![id];
        let mut cur = id;
        while self.get(cur).subloops.len() == 1 {
            cur = self.get(cur).subloops[0];
            chain.push(cur);
        }
        chain
    }

    /// Nest depth measured from `id` down to the deepest loop below it.
    pub fn nest_depth(&self, id: LoopId) -> u32 {
        1 + self
            .get(id)
            .subloops
            .iter()
            .map(|&s| self.nest_depth(s))
            .max()
            .unwrap_or(0)
    }

    /// The unique innermost loop below `id`. `None` when some level forks
    /// into more than one subloop.
    pub fn innermost(&self, id: LoopId) -> Option<LoopId> {
        let mut cur = id;
        loop {
            match self.get(cur).subloops.as_slice() {
                [] => return Some(cur),
                [only] => cur = *only,
                _ => return None,
            }
        }
    }

    /// Depth of the perfectly-nested prefix of the nest rooted at `id`: the
    /// number of consecutive levels where the outer loop's own blocks carry
    /// nothing but loop control (phis, the induction update, the exit
    /// compare, branches).
    pub fn max_perfect_depth(&self, func: &Function, id: LoopId) -> u32 {
        let mut depth = 1;
        let mut cur = id;
        while let [inner] = self.get(cur).subloops.as_slice() {
            if !self.is_perfect_pair(func, cur, *inner) {
                break;
            }
            depth += 1;
            cur = *inner;
        }
        depth
    }

    fn is_perfect_pair(
        &self,
        func: &Function,
        outer: LoopId,
        inner: LoopId,
    ) -> bool {
        let out_l = self.get(outer);
        let in_l = self.get(inner);
        for &bb in &out_l.blocks {
            if in_l.contains(bb) {
                continue;
            }
            for &inst_id in &func.block(bb).insts {
                let Some(inst) = func.inst(inst_id) else {
                    continue;
                };
                match &inst.kind {
                    InstKind::Phi { .. }
                    | InstKind::Br { .. }
                    | InstKind::CondBr { .. }
                    | InstKind::Cmp { .. } => (),
                    InstKind::Binary { .. } => {
                        // Only the induction update may live here.
                        let ivs = self.induction_vars(func, outer);
                        if !ivs.iter().any(|iv| iv.update == inst_id) {
                            return false;
                        }
                    }
                    _ => return false,
                }
            }
        }
        true
    }

    /// The conditional branch closing the loop, read off the latch.
    pub fn back_branch(&self, func: &Function, id: LoopId) -> Option<ValueId> {
        let latch = self.get(id).latch?;
        let &term = func.block(latch).insts.last()?;
        match func.inst(term).map(|i| &i.kind) {
            Some(InstKind::CondBr { .. }) => Some(term),
            _ => None,
        }
    }

    /// The condition feeding the back branch.
    pub fn back_condition(&self, func: &Function, id: LoopId) -> Option<ValueId> {
        let br = self.back_branch(func, id)?;
        match func.inst(br).map(|i| &i.kind) {
            Some(InstKind::CondBr { cond, .. }) => Some(*cond),
            _ => None,
        }
    }

    /// Induction variables of one loop: header phis whose in-loop incoming
    /// value is an add/sub of the phi by a constant step.
    pub fn induction_vars(
        &self,
        func: &Function,
        id: LoopId,
    ) -> Vec<InductionVar> {
        use crate::{BinOp, ValueKind};
        let lp = self.get(id);
        let mut out = Vec::new();
        for &inst_id in &func.block(lp.header).insts {
            let Some(inst) = func.inst(inst_id) else {
                continue;
            };
            let InstKind::Phi { incoming } = &inst.kind else {
                continue;
            };
            if incoming.len() != 2 {
                continue;
            }
            let mut update = None;
            let mut init = None;
            for (v, bb) in incoming {
                if lp.contains(*bb) {
                    update = Some(*v);
                } else {
                    init = Some(*v);
                }
            }
            let (Some(update), Some(init)) = (update, init) else {
                continue;
            };
            let Some(upd_inst) = func.inst(update) else {
                continue;
            };
            let InstKind::Binary { op, lhs, rhs } = &upd_inst.kind else {
                continue;
            };
            let (step_val, negate) = match op {
                BinOp::Add if *lhs == inst_id => (*rhs, false),
                BinOp::Add if *rhs == inst_id => (*lhs, false),
                BinOp::Sub if *lhs == inst_id => (*rhs, true),
                _ => continue,
            };
            let ValueKind::ConstInt { value } = func.value(step_val).kind
            else {
                // Non-constant step disqualifies the induction variable.
                continue;
            };
            out.push(InductionVar {
                phi: inst_id,
                update,
                init,
                step: if negate { -value } else { value },
            });
        }
        out
    }

    /// Printable name of a loop, derived from its header block.
    pub fn loop_name(&self, func: &Function, id: LoopId) -> String {
        let header = self.get(id).header;
        let name = &func.block(header).name;
        if name.is_empty() {
            format!("loop{}", id.0)
        } else {
            name.clone()
        }
    }
}

/// Dominator sets per block, by forward dataflow iteration. Fine for the
/// small CFGs the pipeline sees.
fn dominators(func: &Function) -> HashMap<BlockId, HashSet<BlockId>> {
    let blocks: Vec<BlockId> = func.block_ids().collect();
    let mut doms: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
    if blocks.is_empty() {
        return doms;
    }
    let preds = func.predecessors();
    let all: HashSet<BlockId> = blocks.iter().copied().collect();
    let entry = blocks[0];
    for &bb in &blocks {
        if bb == entry {
            doms.insert(bb, [bb].into_iter().collect());
        } else {
            doms.insert(bb, all.clone());
        }
    }
    let mut changed = true;
    while changed {
        changed = false;
        for &bb in &blocks[1..] {
            let mut new: Option<HashSet<BlockId>> = None;
            for p in preds.get(&bb).into_iter().flatten() {
                let pd = &doms[p];
                new = Some(match new {
                    None => pd.clone(),
                    Some(acc) => acc.intersection(pd).copied().collect(),
                });
            }
            let mut new = new.unwrap_or_default();
            new.insert(bb);
            if new != doms[&bb] {
                doms.insert(bb, new);
                changed = true;
            }
        }
    }
    doms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinOp, FunctionBuilder, Predicate, Ty};

    /// for (i = 0; i < 64; i++) { body }
    fn single_loop() -> Function {
        let mut fb = FunctionBuilder::new("f", vec![], None);
        let entry = fb.block("entry");
        let header = fb.block("for.body");
        let exit = fb.block("exit");
        fb.switch_to(entry);
        let zero = fb.const_int(64, 0);
        fb.br(header);
        fb.switch_to(header);
        let i = fb.phi(Ty::Int(64));
        let one = fb.const_int(64, 1);
        let next = fb.binary(BinOp::Add, i, one);
        let n = fb.const_int(64, 64);
        let cond = fb.cmp(Predicate::Slt, next, n);
        fb.cond_br(cond, header, exit);
        fb.phi_add_incoming(i, zero, entry);
        fb.phi_add_incoming(i, next, header);
        fb.switch_to(exit);
        fb.ret(None);
        fb.finish()
    }

    #[test]
    fn finds_single_loop() {
        let func = single_loop();
        let li = LoopInfo::new(&func);
        assert_eq!(li.loops.len(), 1);
        assert_eq!(li.top_level.len(), 1);
        let lp = li.get(li.top_level[0]);
        assert_eq!(lp.header, BlockId(1));
        assert_eq!(lp.latch, Some(BlockId(1)));
        assert_eq!(li.preheader(&func, li.top_level[0]), Some(BlockId(0)));
    }

    #[test]
    fn finds_induction_variable() {
        let func = single_loop();
        let li = LoopInfo::new(&func);
        let ivs = li.induction_vars(&func, li.top_level[0]);
        assert_eq!(ivs.len(), 1);
        assert_eq!(ivs[0].step, 1);
    }
}
