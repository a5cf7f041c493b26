//! Memory-access decoupling: partition the innermost loop body into
//! `{loads, stores, computation, loop invariants}` so a decoupled CGRA can
//! stream memory traffic through address generators while the fabric runs
//! the computation.
use super::ScheduleInfo;
use cgraomp_ir::{
    ConstData, Function, InstKind, LoopId, LoopInfo, Module, ValueId,
    ValueKind,
};
use std::collections::{HashMap, HashSet, VecDeque};

/// Why decoupling rejected the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecouplingError {
    /// A non-seed load was reached by the data flood: some load depends on
    /// loop-computed data.
    LoopDependentLoads,
    /// A store (or the absence of any store) is not fed by the flood.
    UnreachableStore,
}

impl std::fmt::Display for DecouplingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecouplingError::LoopDependentLoads => {
                write!(f, "loop-dependent memory loads")
            }
            DecouplingError::UnreachableStore => {
                write!(f, "unreachable store")
            }
        }
    }
}

/// The decoupling report for one kernel.
#[derive(Debug, Clone, Default)]
pub struct DecoupledAnalysis {
    pub loads: Vec<ValueId>,
    pub stores: Vec<ValueId>,
    pub computation: Vec<ValueId>,
    /// Loop-invariant sources, each living outside the loop.
    pub invariants: Vec<ValueId>,
    /// Transparent cast chains skipped between an invariant source and its
    /// first user inside the loop, source-to-user order.
    pub skip_sequences: HashMap<ValueId, Vec<ValueId>>,
    /// Loads folded away because they read a constant-initialised global
    /// through compile-time constant indices.
    pub const_loads: HashMap<ValueId, ConstData>,
    error: Option<DecouplingError>,
}

impl DecoupledAnalysis {
    pub fn error(&self) -> Option<DecouplingError> {
        self.error
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Everything the data flood collected (seed loads, computation) plus
    /// the folded constant loads: the value set the DFG is built over.
    pub fn collected(&self) -> HashSet<ValueId> {
        self.loads
            .iter()
            .chain(self.computation.iter())
            .chain(self.const_loads.keys())
            .copied()
            .collect()
    }

    pub fn run(
        module: &Module,
        func: &Function,
        li: &LoopInfo,
        kernel: LoopId,
        schedule: &ScheduleInfo,
    ) -> Self {
        let mut result = DecoupledAnalysis::default();
        let Some(inner) = li.innermost(kernel) else {
            result.error = Some(DecouplingError::UnreachableStore);
            return result;
        };
        let lp = li.get(inner);
        let in_loop: HashSet<ValueId> = lp
            .blocks
            .iter()
            .flat_map(|&bb| func.block(bb).insts.iter().copied())
            .collect();

        // Classify memory accesses. Loads of schedule bookkeeping (their
        // pointer is a captured schedule value, or they load a pointer
        // value itself) never seed the data flow.
        for &bb in &lp.blocks {
            for &inst_id in &func.block(bb).insts {
                match func.inst(inst_id).map(|i| &i.kind) {
                    Some(InstKind::Load { ptr }) => {
                        if schedule.contains(*ptr)
                            || func.ty(inst_id).is_pointer()
                        {
                            continue;
                        }
                        if let Some(c) =
                            fold_constant_load(module, func, *ptr)
                        {
                            result.const_loads.insert(inst_id, c);
                            continue;
                        }
                        result.loads.push(inst_id);
                    }
                    Some(InstKind::Store { .. }) => {
                        result.stores.push(inst_id)
                    }
                    _ => (),
                }
            }
        }

        // Breadth-first flood from the seed loads through use edges,
        // terminating at stores.
        let users = func.users();
        let seeds: HashSet<ValueId> = result.loads.iter().copied().collect();
        let stores: HashSet<ValueId> =
            result.stores.iter().copied().collect();
        let mut traversed: HashSet<ValueId> = seeds.clone();
        let mut order: Vec<ValueId> = Vec::new();
        let mut fifo: VecDeque<ValueId> =
            result.loads.iter().copied().collect();
        while let Some(v) = fifo.pop_front() {
            order.push(v);
            if stores.contains(&v) {
                // Stores end the data flow.
                continue;
            }
            for &user in users.get(&v).map(|u| u.as_slice()).unwrap_or(&[])
            {
                if !in_loop.contains(&user) {
                    continue;
                }
                // A load fed by flooded data means its address depends on
                // the computation: the accesses cannot be decoupled.
                if matches!(
                    func.inst(user).map(|i| &i.kind),
                    Some(InstKind::Load { .. })
                ) {
                    result.error =
                        Some(DecouplingError::LoopDependentLoads);
                    return result;
                }
                if traversed.insert(user) {
                    fifo.push_back(user);
                }
            }
        }

        // Every store must be fed; a storeless body has nothing to emit.
        if result.stores.is_empty()
            || result.stores.iter().any(|s| !traversed.contains(s))
        {
            result.error = Some(DecouplingError::UnreachableStore);
            return result;
        }

        result.computation = order
            .iter()
            .copied()
            .filter(|v| !seeds.contains(v) && !stores.contains(v))
            .collect();

        // Operands that are neither constants nor collected values are
        // loop invariants, reached through transparent casts only.
        let collected: HashSet<ValueId> = seeds
            .iter()
            .chain(result.computation.iter())
            .chain(result.const_loads.keys())
            .copied()
            .collect();
        for &consumer in
            result.computation.iter().chain(result.stores.iter())
        {
            for op in data_operands(func, consumer) {
                if func.is_constant(op)
                    || collected.contains(&op)
                    || result.const_loads.contains_key(&op)
                {
                    continue;
                }
                let (source, skipped) = skip_transparent_casts(func, op);
                if in_loop.contains(&source) {
                    log::warn!(
                        "operand {} of {} is loop-variant but outside the \
                         decoupled data flow; ignored",
                        func.value_name(source),
                        func.value_name(consumer)
                    );
                    continue;
                }
                if !result.invariants.contains(&source) {
                    result.invariants.push(source);
                    if !skipped.is_empty() {
                        result.skip_sequences.insert(source, skipped);
                    }
                }
            }
        }

        result
    }
}

/// Data operands of an instruction for decoupling purposes: a store
/// carries its value operand only (the address is the AG's business), and
/// call arguments are already callee-free.
pub(crate) fn data_operands(
    func: &Function,
    inst: ValueId,
) -> Vec<ValueId> {
    match func.inst(inst).map(|i| &i.kind) {
        Some(InstKind::Store { value, .. }) => vec![*value],
        _ => func.operands(inst).to_vec(),
    }
}

/// Follow a chain of transparent casts (trunc, sext, zext, bitcast) from a
/// value to its source. Returns the source and the skipped chain in
/// source-to-user order.
fn skip_transparent_casts(
    func: &Function,
    from: ValueId,
) -> (ValueId, Vec<ValueId>) {
    let mut chain = Vec::new();
    let mut cur = from;
    loop {
        let Some(inst) = func.inst(cur) else {
            break;
        };
        let InstKind::Cast { op, arg } = &inst.kind else {
            break;
        };
        if !op.is_transparent() {
            break;
        }
        chain.push(cur);
        cur = *arg;
    }
    chain.reverse();
    (cur, chain)
}

/// Resolve a load whose pointer is a constant-indexed GEP into a read-only
/// global with an initialiser, yielding the loaded constant.
fn fold_constant_load(
    module: &Module,
    func: &Function,
    ptr: ValueId,
) -> Option<ConstData> {
    let (global, indices) = match &func.value(ptr).kind {
        ValueKind::Global(g) => (*g, Vec::new()),
        ValueKind::Inst(inst) => match &inst.kind {
            InstKind::Gep { base, indices } => {
                let ValueKind::Global(g) = func.value(*base).kind else {
                    return None;
                };
                let mut vals = Vec::new();
                for &idx in indices {
                    let ValueKind::ConstInt { value } =
                        func.value(idx).kind
                    else {
                        return None;
                    };
                    vals.push(value);
                }
                (g, vals)
            }
            _ => return None,
        },
        _ => return None,
    };
    let gv = module.global(global);
    if !gv.is_constant {
        return None;
    }
    let mut cur = gv.initializer.as_ref()?;
    // The first index steps over the global itself and must be zero.
    let mut iter = indices.into_iter();
    if let Some(first) = iter.next() {
        if first != 0 {
            return None;
        }
    }
    for idx in iter {
        cur = cur.element(idx as u64)?;
    }
    match cur {
        ConstData::Int { .. } | ConstData::Float { .. } => Some(cur.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgraomp_ir::{
        BinOp, CastOp, FunctionBuilder, ModuleBuilder, Predicate, Ty,
    };

    /// `for (i) C[i] = A[i] + c * B[i]` with `c` passed as an i64 argument
    /// truncated inside the loop.
    fn vector_kernel() -> (Module, Function) {
        let mb = ModuleBuilder::new("m");
        let mut fb = FunctionBuilder::new(
            "worker",
            vec![
                ("A", Ty::ptr(Ty::Int(32))),
                ("B", Ty::ptr(Ty::Int(32))),
                ("C", Ty::ptr(Ty::Int(32))),
                ("c", Ty::Int(64)),
            ],
            None,
        );
        let entry = fb.block("entry");
        let body = fb.block("for.body");
        let exit = fb.block("exit");
        fb.switch_to(entry);
        let zero = fb.const_int(64, 0);
        fb.br(body);
        fb.switch_to(body);
        let i = fb.phi(Ty::Int(64));
        let a = fb.arg(0);
        let b = fb.arg(1);
        let c_arg = fb.arg(3);
        let ga = fb.gep(a, vec![i]);
        let la = fb.load(ga);
        let gb = fb.gep(b, vec![i]);
        let lb = fb.load(gb);
        let c32 = fb.cast(CastOp::Trunc, c_arg, Ty::Int(32));
        let mul = fb.binary(BinOp::Mul, c32, lb);
        let sum = fb.binary(BinOp::Add, la, mul);
        let cptr = fb.arg(2);
        let gc = fb.gep(cptr, vec![i]);
        fb.store(sum, gc);
        let one = fb.const_int(64, 1);
        let next = fb.binary(BinOp::Add, i, one);
        let n = fb.const_int(64, 1024);
        let cond = fb.cmp(Predicate::Slt, next, n);
        fb.cond_br(cond, body, exit);
        fb.phi_add_incoming(i, zero, entry);
        fb.phi_add_incoming(i, next, body);
        fb.switch_to(exit);
        fb.ret(None);
        (mb.finish(), fb.finish())
    }

    #[test]
    fn partitions_vector_kernel() {
        let (module, func) = vector_kernel();
        let li = LoopInfo::new(&func);
        let da = DecoupledAnalysis::run(
            &module,
            &func,
            &li,
            li.top_level[0],
            &ScheduleInfo::invalid(),
        );
        assert!(da.is_ok());
        assert_eq!(da.loads.len(), 2);
        assert_eq!(da.stores.len(), 1);
        assert_eq!(da.computation.len(), 2);
        // `c` arrives through a trunc: one invariant with a recorded skip.
        assert_eq!(da.invariants.len(), 1);
        let skips = &da.skip_sequences[&da.invariants[0]];
        assert_eq!(skips.len(), 1);
    }

    #[test]
    fn storeless_body_is_rejected() {
        let mb = ModuleBuilder::new("m");
        let mut fb = FunctionBuilder::new(
            "worker",
            vec![("A", Ty::ptr(Ty::Int(32)))],
            None,
        );
        let entry = fb.block("entry");
        let body = fb.block("for.body");
        let exit = fb.block("exit");
        fb.switch_to(entry);
        let zero = fb.const_int(64, 0);
        fb.br(body);
        fb.switch_to(body);
        let i = fb.phi(Ty::Int(64));
        let a = fb.arg(0);
        let g = fb.gep(a, vec![i]);
        let _l = fb.load(g);
        let one = fb.const_int(64, 1);
        let next = fb.binary(BinOp::Add, i, one);
        let n = fb.const_int(64, 16);
        let cond = fb.cmp(Predicate::Slt, next, n);
        fb.cond_br(cond, body, exit);
        fb.phi_add_incoming(i, zero, entry);
        fb.phi_add_incoming(i, next, body);
        fb.switch_to(exit);
        fb.ret(None);
        let func = fb.finish();
        let module = mb.finish();

        let li = LoopInfo::new(&func);
        let da = DecoupledAnalysis::run(
            &module,
            &func,
            &li,
            li.top_level[0],
            &ScheduleInfo::invalid(),
        );
        assert_eq!(da.error(), Some(DecouplingError::UnreachableStore));
    }

    #[test]
    fn constant_global_load_folds() {
        let mut mb = ModuleBuilder::new("m");
        let weights = mb.add_global(
            "weights",
            Ty::array(Ty::Float(32), 3),
            true,
            Some(ConstData::Array(vec![
                ConstData::Float {
                    bits: 32,
                    value: 3.0,
                },
                ConstData::Float {
                    bits: 32,
                    value: 5.0,
                },
                ConstData::Float {
                    bits: 32,
                    value: 7.0,
                },
            ])),
        );
        let module = mb.finish();

        let mut fb = FunctionBuilder::new("f", vec![], None);
        let bb = fb.block("entry");
        fb.switch_to(bb);
        let w = fb.global_ref(
            weights,
            "weights",
            Ty::array(Ty::Float(32), 3),
        );
        let zero = fb.const_int(64, 0);
        let one = fb.const_int(64, 1);
        let gep = fb.gep(w, vec![zero, one]);
        fb.ret(None);
        let func = fb.finish();

        let folded = fold_constant_load(&module, &func, gep).unwrap();
        assert_eq!(
            folded,
            ConstData::Float {
                bits: 32,
                value: 5.0
            }
        );
    }
}
