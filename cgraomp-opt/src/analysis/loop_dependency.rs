//! Inter-iteration dependency analysis: induction variables,
//! register-carried dependencies, and memory-carried RAW dependencies with
//! constant distance.
use cgraomp_ir::{
    Function, InstKind, LoopAccessInfo, LoopId, LoopInfo, ScalarEvolution,
    ValueId,
};
use std::collections::HashSet;

/// One inter-iteration dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDependency {
    /// Register-carried: `phi` merges `init` with `def` from the previous
    /// iteration; distance is always 1.
    Simple {
        def: ValueId,
        init: ValueId,
        phi: ValueId,
    },
    /// Memory-carried RAW: `load` reads what `store` wrote `distance`
    /// iterations earlier.
    Memory {
        store: ValueId,
        load: ValueId,
        distance: i64,
    },
    /// An induction variable: `phi` stepped by `bin_op` from `start`.
    Induction {
        phi: ValueId,
        bin_op: ValueId,
        start: ValueId,
        step: i64,
    },
}

impl LoopDependency {
    /// The φ-node carrying the dependency, when there is one.
    pub fn phi(&self) -> Option<ValueId> {
        match self {
            LoopDependency::Simple { phi, .. }
            | LoopDependency::Induction { phi, .. } => Some(*phi),
            LoopDependency::Memory { .. } => None,
        }
    }

    pub fn distance(&self) -> i64 {
        match self {
            LoopDependency::Memory { distance, .. } => *distance,
            _ => 1,
        }
    }
}

/// All dependencies of one loop kernel.
#[derive(Debug, Clone, Default)]
pub struct LoopDependencyInfo {
    idv_deps: Vec<LoopDependency>,
    simple_deps: Vec<LoopDependency>,
    mem_deps: Vec<LoopDependency>,
}

impl LoopDependencyInfo {
    pub fn run(
        func: &Function,
        li: &LoopInfo,
        kernel: LoopId,
        se: &mut ScalarEvolution,
        mem_dep_threshold: i64,
    ) -> Self {
        let mut info = LoopDependencyInfo::default();
        let mut indvar_phis: HashSet<ValueId> = HashSet::new();

        // Induction variables of every level of the nest.
        for level in li.nest_chain(kernel) {
            for iv in li.induction_vars(func, level) {
                indvar_phis.insert(iv.phi);
                info.idv_deps.push(LoopDependency::Induction {
                    phi: iv.phi,
                    bin_op: iv.update,
                    start: iv.init,
                    step: iv.step,
                });
            }
        }

        // Register-carried dependencies: any remaining φ with exactly one
        // incoming value from outside the loop and one from inside.
        let lp = li.get(kernel);
        for &bb in &lp.blocks {
            for &inst_id in &func.block(bb).insts {
                let Some(inst) = func.inst(inst_id) else {
                    continue;
                };
                let InstKind::Phi { incoming } = &inst.kind else {
                    continue;
                };
                if indvar_phis.contains(&inst_id) || incoming.len() != 2 {
                    continue;
                }
                let mut init = None;
                let mut carried = None;
                for (val, from) in incoming {
                    if lp.contains(*from) {
                        carried = func.inst(*val).map(|_| *val);
                    } else {
                        init = Some(*val);
                    }
                }
                if let (Some(init), Some(def)) = (init, carried) {
                    info.simple_deps.push(LoopDependency::Simple {
                        def,
                        init,
                        phi: inst_id,
                    });
                }
            }
        }

        // Memory-carried RAW dependencies over the innermost loop, with
        // element-scaled constant distance.
        let inner = li.innermost(kernel).unwrap_or(kernel);
        let lai = LoopAccessInfo::new(func, li, inner, se);
        for (store, load) in lai.unknown_distance_pairs() {
            log::warn!(
                "cannot compute dependence distance between {} and {}",
                func.value_name(*store),
                func.value_name(*load)
            );
        }
        for dep in lai.backward_dependences() {
            let elem = func.ty(dep.load).byte_size().max(1) as i64;
            let distance = dep.byte_distance / elem;
            if distance >= 1 && distance <= mem_dep_threshold {
                info.mem_deps.push(LoopDependency::Memory {
                    store: dep.store,
                    load: dep.load,
                    distance,
                });
            }
        }

        info
    }

    pub fn idv_deps(&self) -> &[LoopDependency] {
        &self.idv_deps
    }

    pub fn simple_deps(&self) -> &[LoopDependency] {
        &self.simple_deps
    }

    pub fn mem_deps(&self) -> &[LoopDependency] {
        &self.mem_deps
    }

    /// Register- plus memory-carried dependency count (induction variables
    /// excluded): the number a model without inter-loop dependency support
    /// cannot absorb.
    pub fn num_inter_loop_deps(&self) -> usize {
        self.simple_deps.len() + self.mem_deps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgraomp_ir::{BinOp, FunctionBuilder, Predicate, Ty};

    /// for (i = 1; i < 64; i++) { B[i] = A[i] + B[i-1]; }
    fn memdep_kernel() -> Function {
        let mut fb = FunctionBuilder::new(
            "worker",
            vec![
                ("A", Ty::ptr(Ty::Int(32))),
                ("B", Ty::ptr(Ty::Int(32))),
            ],
            None,
        );
        let entry = fb.block("entry");
        let body = fb.block("for.body");
        let exit = fb.block("exit");
        fb.switch_to(entry);
        let one = fb.const_int(64, 1);
        fb.br(body);
        fb.switch_to(body);
        let i = fb.phi(Ty::Int(64));
        let a = fb.arg(0);
        let b = fb.arg(1);
        let ga = fb.gep(a, vec![i]);
        let la = fb.load(ga);
        let c1 = fb.const_int(64, 1);
        let im1 = fb.binary(BinOp::Sub, i, c1);
        let gprev = fb.gep(b, vec![im1]);
        let lprev = fb.load(gprev);
        let sum = fb.binary(BinOp::Add, la, lprev);
        let gcur = fb.gep(b, vec![i]);
        fb.store(sum, gcur);
        let step = fb.const_int(64, 1);
        let next = fb.binary(BinOp::Add, i, step);
        let n = fb.const_int(64, 64);
        let cond = fb.cmp(Predicate::Slt, next, n);
        fb.cond_br(cond, body, exit);
        fb.phi_add_incoming(i, one, entry);
        fb.phi_add_incoming(i, next, body);
        fb.switch_to(exit);
        fb.ret(None);
        fb.finish()
    }

    #[test]
    fn finds_induction_and_memory_dependency() {
        let func = memdep_kernel();
        let li = LoopInfo::new(&func);
        let mut se = ScalarEvolution::new(&func, &li);
        let info = LoopDependencyInfo::run(
            &func,
            &li,
            li.top_level[0],
            &mut se,
            4,
        );
        assert_eq!(info.idv_deps().len(), 1);
        assert_eq!(info.simple_deps().len(), 0);
        assert_eq!(info.mem_deps().len(), 1);
        let LoopDependency::Memory { distance, .. } = info.mem_deps()[0]
        else {
            panic!("expected memory dependency");
        };
        assert_eq!(distance, 1);
        assert_eq!(info.num_inter_loop_deps(), 1);
    }

    #[test]
    fn distance_above_threshold_is_dropped() {
        let func = memdep_kernel();
        let li = LoopInfo::new(&func);
        let mut se = ScalarEvolution::new(&func, &li);
        let info = LoopDependencyInfo::run(
            &func,
            &li,
            li.top_level[0],
            &mut se,
            0,
        );
        assert!(info.mem_deps().is_empty());
    }
}
