//! Scalar evolution: closed-form descriptions of how values evolve across
//! loop iterations. The representation is structural (constants, unknowns,
//! sums, products, add-recurrences, casts) with just enough folding that
//! affine pointer expressions reduce to nested add-recurrences and constant
//! distances between related pointers reduce to constants.
use crate::{
    BinOp, CastOp, Function, InstKind, LoopId, LoopInfo, Ty, ValueId,
    ValueKind,
};
use std::collections::HashMap;
use std::rc::Rc;

pub type ScevRef = Rc<Scev>;

/// A scalar-evolution expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Scev {
    Constant(i64),
    /// An opaque value (argument, global, load result, non-induction phi).
    Unknown(ValueId),
    Add(Vec<ScevRef>),
    Mul(Vec<ScevRef>),
    /// `start + k * step` on the k-th iteration of the associated loop.
    AddRec {
        start: ScevRef,
        step: ScevRef,
        loop_id: LoopId,
    },
    /// A cast that could not be folded away.
    Cast { op: CastOp, inner: ScevRef },
}

impl Scev {
    pub fn constant(&self) -> Option<i64> {
        match self {
            Scev::Constant(c) => Some(*c),
            _ => None,
        }
    }

    /// The unknown leaves of the expression, in traversal order.
    pub fn unknowns(&self, out: &mut Vec<ValueId>) {
        match self {
            Scev::Constant(_) => (),
            Scev::Unknown(v) => out.push(*v),
            Scev::Add(terms) | Scev::Mul(terms) => {
                for t in terms {
                    t.unknowns(out);
                }
            }
            Scev::AddRec { start, step, .. } => {
                start.unknowns(out);
                step.unknowns(out);
            }
            Scev::Cast { inner, .. } => inner.unknowns(out),
        }
    }
}

/// Scalar-evolution engine for one function.
pub struct ScalarEvolution<'a> {
    func: &'a Function,
    li: &'a LoopInfo,
    cache: HashMap<ValueId, ScevRef>,
}

impl<'a> ScalarEvolution<'a> {
    pub fn new(func: &'a Function, li: &'a LoopInfo) -> Self {
        ScalarEvolution {
            func,
            li,
            cache: HashMap::new(),
        }
    }

    /// The SCEV of a value.
    pub fn scev_of(&mut self, v: ValueId) -> ScevRef {
        if let Some(s) = self.cache.get(&v) {
            return Rc::clone(s);
        }
        let s = self.compute(v);
        self.cache.insert(v, Rc::clone(&s));
        s
    }

    fn compute(&mut self, v: ValueId) -> ScevRef {
        match &self.func.value(v).kind {
            ValueKind::ConstInt { value } => Rc::new(Scev::Constant(*value)),
            ValueKind::ConstFloat { .. }
            | ValueKind::Argument { .. }
            | ValueKind::Global(..)
            | ValueKind::FuncRef(..) => Rc::new(Scev::Unknown(v)),
            ValueKind::Inst(inst) => match inst.kind.clone() {
                InstKind::Binary { op, lhs, rhs } => {
                    let l = self.scev_of(lhs);
                    let r = self.scev_of(rhs);
                    match op {
                        BinOp::Add => self.add(l, r),
                        BinOp::Sub => self.minus(l, r),
                        BinOp::Mul => self.mul(l, r),
                        BinOp::Shl => match r.constant() {
                            Some(sh) if (0..63).contains(&sh) => self
                                .mul(l, Rc::new(Scev::Constant(1 << sh))),
                            _ => Rc::new(Scev::Unknown(v)),
                        },
                        _ => Rc::new(Scev::Unknown(v)),
                    }
                }
                InstKind::Cast { op, arg } => {
                    let inner = self.scev_of(arg);
                    self.cast(op, inner, v)
                }
                InstKind::Phi { .. } => self.phi_scev(v),
                InstKind::Gep { base, indices } => {
                    self.gep_scev(v, base, &indices)
                }
                _ => Rc::new(Scev::Unknown(v)),
            },
        }
    }

    fn cast(&mut self, op: CastOp, inner: ScevRef, orig: ValueId) -> ScevRef {
        match op {
            CastOp::FpToSi | CastOp::SiToFp => Rc::new(Scev::Unknown(orig)),
            // Bit casts carry the value unchanged.
            CastOp::BitCast => inner,
            _ => match &*inner {
                Scev::Constant(c) => Rc::new(Scev::Constant(*c)),
                // Push width changes into recurrences so affine shapes
                // survive the sext/zext the front-end inserts around
                // induction variables.
                Scev::AddRec {
                    start,
                    step,
                    loop_id,
                } => {
                    let start =
                        self.cast(op, Rc::clone(start), orig);
                    let step = self.cast(op, Rc::clone(step), orig);
                    Rc::new(Scev::AddRec {
                        start,
                        step,
                        loop_id: *loop_id,
                    })
                }
                _ => Rc::new(Scev::Cast { op, inner }),
            },
        }
    }

    fn phi_scev(&mut self, phi: ValueId) -> ScevRef {
        let block = match self.func.inst(phi) {
            Some(inst) => inst.block,
            None => return Rc::new(Scev::Unknown(phi)),
        };
        let Some(loop_id) = self.li.loop_of(block) else {
            return Rc::new(Scev::Unknown(phi));
        };
        for iv in self.li.induction_vars(self.func, loop_id) {
            if iv.phi == phi {
                let start = self.scev_of(iv.init);
                return Rc::new(Scev::AddRec {
                    start,
                    step: Rc::new(Scev::Constant(iv.step)),
                    loop_id,
                });
            }
        }
        Rc::new(Scev::Unknown(phi))
    }

    fn gep_scev(
        &mut self,
        gep: ValueId,
        base: ValueId,
        indices: &[ValueId],
    ) -> ScevRef {
        let Some(pointee) = self.func.ty(base).pointee().cloned() else {
            return Rc::new(Scev::Unknown(gep));
        };
        let mut acc = self.scev_of(base);
        let mut level = pointee;
        for (i, &idx) in indices.iter().enumerate() {
            if i > 0 {
                level = match level {
                    Ty::Array { elem, .. } => (*elem).clone(),
                    other => other,
                };
            }
            let stride = level.byte_size() as i64;
            let idx_scev = self.scev_of(idx);
            let scaled =
                self.mul(Rc::new(Scev::Constant(stride)), idx_scev);
            acc = self.add(acc, scaled);
        }
        acc
    }

    /// `a + b`, normalised: constants folded, nested sums flattened,
    /// add-recurrences of the same loop merged, invariant addends folded
    /// into the start of the deepest recurrence.
    pub fn add(&mut self, a: ScevRef, b: ScevRef) -> ScevRef {
        let mut terms = Vec::new();
        flatten_add(&a, &mut terms);
        flatten_add(&b, &mut terms);

        // Merge recurrences loop by loop.
        let mut recs: Vec<(LoopId, ScevRef, ScevRef)> = Vec::new();
        let mut rest: Vec<ScevRef> = Vec::new();
        let mut konst = 0i64;
        for t in terms {
            match &*t {
                Scev::Constant(c) => konst += c,
                Scev::AddRec {
                    start,
                    step,
                    loop_id,
                } => {
                    if let Some(entry) =
                        recs.iter_mut().find(|(l, ..)| l == loop_id)
                    {
                        entry.1 = self.add(
                            Rc::clone(&entry.1),
                            Rc::clone(start),
                        );
                        entry.2 =
                            self.add(Rc::clone(&entry.2), Rc::clone(step));
                    } else {
                        recs.push((
                            *loop_id,
                            Rc::clone(start),
                            Rc::clone(step),
                        ));
                    }
                }
                _ => rest.push(Rc::clone(&t)),
            }
        }

        if konst != 0 {
            rest.push(Rc::new(Scev::Constant(konst)));
        }
        let mut acc: Option<ScevRef> = match rest.len() {
            0 => None,
            1 => rest.pop(),
            _ => Some(Rc::new(Scev::Add(rest))),
        };

        // Nest recurrences outermost-to-innermost: the invariant part and
        // every shallower recurrence fold into the start of the next-deeper
        // one, so the top-level node belongs to the innermost loop.
        recs.sort_by_key(|(l, ..)| self.li.get(*l).depth);
        for (loop_id, start, step) in recs {
            let start = match acc {
                Some(a) => self.add(a, start),
                None => start,
            };
            acc = Some(Rc::new(Scev::AddRec {
                start,
                step,
                loop_id,
            }));
        }
        acc.unwrap_or_else(|| Rc::new(Scev::Constant(0)))
    }

    /// `a * b` with constant folding and distribution over sums and
    /// recurrences.
    pub fn mul(&mut self, a: ScevRef, b: ScevRef) -> ScevRef {
        if let (Some(x), Some(y)) = (a.constant(), b.constant()) {
            return Rc::new(Scev::Constant(x * y));
        }
        // Put a constant (if any) on the left.
        let (c, other) = match (a.constant(), b.constant()) {
            (Some(x), None) => (Some(x), b),
            (None, Some(y)) => (Some(y), a),
            _ => (None, Rc::new(Scev::Mul(vec![a, b]))),
        };
        let Some(c) = c else {
            return other;
        };
        if c == 1 {
            return other;
        }
        match &*other {
            Scev::Add(terms) => {
                let mut acc = Rc::new(Scev::Constant(0));
                for t in terms.clone() {
                    let scaled = self.mul(Rc::new(Scev::Constant(c)), t);
                    acc = self.add(acc, scaled);
                }
                acc
            }
            Scev::AddRec {
                start,
                step,
                loop_id,
            } => {
                let start =
                    self.mul(Rc::new(Scev::Constant(c)), Rc::clone(start));
                let step =
                    self.mul(Rc::new(Scev::Constant(c)), Rc::clone(step));
                Rc::new(Scev::AddRec {
                    start,
                    step,
                    loop_id: *loop_id,
                })
            }
            _ => Rc::new(Scev::Mul(vec![Rc::new(Scev::Constant(c)), other])),
        }
    }

    /// `a - b`.
    pub fn minus(&mut self, a: ScevRef, b: ScevRef) -> ScevRef {
        let neg = self.mul(Rc::new(Scev::Constant(-1)), b);
        self.add(a, neg)
    }

    /// Exact static trip count of a loop, from its back-edge condition.
    /// `None` when the bound (or any part of the recurrence) is not a
    /// compile-time constant.
    pub fn trip_count(&mut self, loop_id: LoopId) -> Option<u64> {
        use crate::Predicate::*;
        let cond = self.li.back_condition(self.func, loop_id)?;
        let InstKind::Cmp { pred, lhs, rhs } =
            self.func.inst(cond)?.kind.clone()
        else {
            return None;
        };
        let ivs = self.li.induction_vars(self.func, loop_id);
        // Identify which side carries the induction recurrence.
        let (iv, tested, bound, mut pred) = ivs.iter().find_map(|iv| {
            if lhs == iv.phi || lhs == iv.update {
                Some((iv, lhs, rhs, pred))
            } else if rhs == iv.phi || rhs == iv.update {
                Some((iv, rhs, lhs, swap_pred(pred)))
            } else {
                None
            }
        })?;
        let init = self.scev_of(iv.init).constant()?;
        let bound = self.scev_of(bound).constant()?;
        let step = iv.step;
        if step == 0 {
            return None;
        }
        // First value the exit test observes.
        let first = if tested == iv.update { init + step } else { init };
        if step < 0 {
            pred = swap_pred(pred);
        }
        let (span, le) = match pred {
            Slt | Ult | Sgt | Ugt => ((bound - first).abs(), false),
            Sle | Ule | Sge | Uge => ((bound - first).abs(), true),
            Ne => {
                let diff = bound - first;
                if diff % step != 0 || diff / step < 0 {
                    return None;
                }
                return Some((diff / step) as u64 + 1);
            }
            _ => return None,
        };
        let astep = step.abs();
        let passes = if le {
            span / astep + 1
        } else {
            (span + astep - 1) / astep
        };
        Some(passes.max(0) as u64 + 1)
    }

    /// Constant difference `a - b` if it simplifies to one.
    pub fn constant_diff(&mut self, a: ScevRef, b: ScevRef) -> Option<i64> {
        self.minus(a, b).constant()
    }
}

fn flatten_add(s: &ScevRef, out: &mut Vec<ScevRef>) {
    match &**s {
        Scev::Add(terms) => {
            for t in terms {
                flatten_add(t, out);
            }
        }
        _ => out.push(Rc::clone(s)),
    }
}

fn swap_pred(p: crate::Predicate) -> crate::Predicate {
    use crate::Predicate::*;
    match p {
        Slt => Sgt,
        Sgt => Slt,
        Sle => Sge,
        Sge => Sle,
        Ult => Ugt,
        Ugt => Ult,
        Ule => Uge,
        Uge => Ule,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FunctionBuilder, Predicate};

    /// for (i = 0; i < 1024; i++) with body loading A[i].
    fn loop_with_access() -> (Function, ValueId) {
        let mut fb = FunctionBuilder::new(
            "f",
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
        let gep = fb.gep(a, vec![i]);
        let _ld = fb.load(gep);
        let one = fb.const_int(64, 1);
        let next = fb.binary(BinOp::Add, i, one);
        let n = fb.const_int(64, 1024);
        let cond = fb.cmp(Predicate::Slt, next, n);
        fb.cond_br(cond, body, exit);
        fb.phi_add_incoming(i, zero, entry);
        fb.phi_add_incoming(i, next, body);
        fb.switch_to(exit);
        fb.ret(None);
        (fb.finish(), gep)
    }

    #[test]
    fn gep_becomes_addrec() {
        let (func, gep) = loop_with_access();
        let li = LoopInfo::new(&func);
        let mut se = ScalarEvolution::new(&func, &li);
        let s = se.scev_of(gep);
        let Scev::AddRec { start, step, .. } = &*s else {
            panic!("expected AddRec, got {:?}", s);
        };
        assert_eq!(step.constant(), Some(4));
        assert!(matches!(&**start, Scev::Unknown(..)));
    }

    #[test]
    fn trip_count_of_canonical_loop() {
        let (func, _) = loop_with_access();
        let li = LoopInfo::new(&func);
        let mut se = ScalarEvolution::new(&func, &li);
        assert_eq!(se.trip_count(li.top_level[0]), Some(1024));
    }

    #[test]
    fn constant_pointer_difference() {
        let (func, gep) = loop_with_access();
        let li = LoopInfo::new(&func);
        let mut se = ScalarEvolution::new(&func, &li);
        let s = se.scev_of(gep);
        let shifted = {
            let four = Rc::new(Scev::Constant(4));
            se.add(Rc::clone(&s), four)
        };
        assert_eq!(se.constant_diff(shifted, s), Some(4));
    }
}
