//! Loop-access scanning: enumerates backward store→load dependence
//! candidates inside one loop by comparing pointer evolutions.
use crate::{
    Function, InstKind, LoopId, LoopInfo, ScalarEvolution, ValueId,
};

/// A RAW dependence candidate: a store writing a location a later iteration
/// loads. `byte_distance` is the constant pointer difference
/// `ptr(store) - ptr(load)` in bytes.
#[derive(Debug, Clone, Copy)]
pub struct BackwardDep {
    pub store: ValueId,
    pub load: ValueId,
    pub byte_distance: i64,
}

/// Memory-access information of one loop.
pub struct LoopAccessInfo {
    pub loads: Vec<ValueId>,
    pub stores: Vec<ValueId>,
    backward: Vec<BackwardDep>,
    /// Pairs whose pointer difference did not reduce to a constant.
    unknown_pairs: Vec<(ValueId, ValueId)>,
}

impl LoopAccessInfo {
    pub fn new(
        func: &Function,
        li: &LoopInfo,
        loop_id: LoopId,
        se: &mut ScalarEvolution,
    ) -> Self {
        let lp = li.get(loop_id);
        let mut loads = Vec::new();
        let mut stores = Vec::new();
        for &bb in &lp.blocks {
            for &inst_id in &func.block(bb).insts {
                match func.inst(inst_id).map(|i| &i.kind) {
                    Some(InstKind::Load { .. }) => loads.push(inst_id),
                    Some(InstKind::Store { .. }) => stores.push(inst_id),
                    _ => (),
                }
            }
        }

        let mut backward = Vec::new();
        let mut unknown_pairs = Vec::new();
        for &st in &stores {
            let Some(InstKind::Store { ptr: st_ptr, .. }) =
                func.inst(st).map(|i| i.kind.clone())
            else {
                continue;
            };
            for &ld in &loads {
                let Some(InstKind::Load { ptr: ld_ptr }) =
                    func.inst(ld).map(|i| i.kind.clone())
                else {
                    continue;
                };
                let s_scev = se.scev_of(st_ptr);
                let l_scev = se.scev_of(ld_ptr);
                // Only pointers over the same base can be related.
                let mut s_base = Vec::new();
                let mut l_base = Vec::new();
                s_scev.unknowns(&mut s_base);
                l_scev.unknowns(&mut l_base);
                if s_base.len() != 1 || s_base != l_base {
                    continue;
                }
                match se.constant_diff(s_scev, l_scev) {
                    Some(d) if d > 0 => backward.push(BackwardDep {
                        store: st,
                        load: ld,
                        byte_distance: d,
                    }),
                    Some(_) => (),
                    None => unknown_pairs.push((st, ld)),
                }
            }
        }

        LoopAccessInfo {
            loads,
            stores,
            backward,
            unknown_pairs,
        }
    }

    /// Store→load pairs carried backward across iterations.
    pub fn backward_dependences(&self) -> &[BackwardDep] {
        &self.backward
    }

    /// Same-base pairs whose distance could not be computed.
    pub fn unknown_distance_pairs(&self) -> &[(ValueId, ValueId)] {
        &self.unknown_pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinOp, FunctionBuilder, Predicate, Ty};

    /// for (i = 1; i < 64; i++) B[i] = B[i-1] + 1;
    fn memdep_loop() -> Function {
        let mut fb = FunctionBuilder::new(
            "f",
            vec![("B", Ty::ptr(Ty::Int(32)))],
            None,
        );
        let entry = fb.block("entry");
        let body = fb.block("for.body");
        let exit = fb.block("exit");
        fb.switch_to(entry);
        let one64 = fb.const_int(64, 1);
        fb.br(body);
        fb.switch_to(body);
        let i = fb.phi(Ty::Int(64));
        let b = fb.arg(0);
        let im1 = {
            let c1 = fb.const_int(64, 1);
            fb.binary(BinOp::Sub, i, c1)
        };
        let gep_prev = fb.gep(b, vec![im1]);
        let prev = fb.load(gep_prev);
        let c1i = fb.const_int(32, 1);
        let sum = fb.binary(BinOp::Add, prev, c1i);
        let gep_cur = fb.gep(b, vec![i]);
        fb.store(sum, gep_cur);
        let step = fb.const_int(64, 1);
        let next = fb.binary(BinOp::Add, i, step);
        let n = fb.const_int(64, 64);
        let cond = fb.cmp(Predicate::Slt, next, n);
        fb.cond_br(cond, body, exit);
        fb.phi_add_incoming(i, one64, entry);
        fb.phi_add_incoming(i, next, body);
        fb.switch_to(exit);
        fb.ret(None);
        fb.finish()
    }

    #[test]
    fn detects_backward_raw_dependence() {
        let func = memdep_loop();
        let li = LoopInfo::new(&func);
        let mut se = ScalarEvolution::new(&func, &li);
        let lai = LoopAccessInfo::new(&func, &li, li.top_level[0], &mut se);
        assert_eq!(lai.loads.len(), 1);
        assert_eq!(lai.stores.len(), 1);
        let deps = lai.backward_dependences();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].byte_distance, 4);
    }
}
