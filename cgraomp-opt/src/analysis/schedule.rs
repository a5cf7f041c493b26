//! Extraction of the static loop schedule established by the OpenMP
//! runtime: the `__kmpc_for_static_init*` call and its seven operands.
use cgraomp_ir::{FuncId, Function, InstKind, Module, ValueId};

/// Callee-name prefix of the schedule-init runtime entries (the suffix
/// varies with the index width, e.g. `_4`, `_8u`).
const SCHEDULE_INIT_PREFIX: &str = "__kmpc_for_static_init";

/// The captured schedule: the seven values passed to the schedule-init call
/// (schedule type, last-iteration flag, lower bound, upper bound, stride,
/// increment, chunk) plus the call site. Exposed as an insertion-ordered
/// set so arbitrary IR values can be tested for schedule membership.
#[derive(Debug, Clone, Default)]
pub struct ScheduleInfo {
    values: Vec<ValueId>,
    call: Option<ValueId>,
}

impl ScheduleInfo {
    /// An "invalid" schedule: nothing is schedule-related. Downstream
    /// analyses still run, they just must not classify anything as
    /// schedule bookkeeping.
    pub fn invalid() -> Self {
        ScheduleInfo::default()
    }

    pub fn is_valid(&self) -> bool {
        self.call.is_some()
    }

    pub fn call_site(&self) -> Option<ValueId> {
        self.call
    }

    /// Membership test against the captured operand set.
    pub fn contains(&self, v: ValueId) -> bool {
        self.values.contains(&v)
    }

    /// The captured operands in capture order.
    pub fn values(&self) -> &[ValueId] {
        &self.values
    }
}

/// Function analysis finding the first schedule-init call.
pub struct OmpStaticScheduleAnalysis;

impl OmpStaticScheduleAnalysis {
    pub fn run(module: &Module, func: &Function) -> ScheduleInfo {
        for inst_id in func.insts_in_order() {
            let Some(inst) = func.inst(inst_id) else {
                continue;
            };
            let InstKind::Call { callee, args } = &inst.kind else {
                continue;
            };
            if !module
                .function(*callee)
                .name
                .starts_with(SCHEDULE_INIT_PREFIX)
            {
                continue;
            }
            // Operand indices 2..=8: schedule type, plastiter, plower,
            // pupper, pstride, incr, chunk.
            let Some(slice) = args.get(2..=8) else {
                log::warn!(
                    "schedule-init call with too few operands in {}",
                    func.name
                );
                continue;
            };
            let mut values = Vec::with_capacity(7);
            for &v in slice {
                if !values.contains(&v) {
                    values.push(v);
                }
            }
            return ScheduleInfo {
                values,
                call: Some(inst_id),
            };
        }
        log::warn!("no OpenMP static schedule found in {}", func.name);
        ScheduleInfo::invalid()
    }
}

/// Erase the schedule-init calls once analysis has consumed them.
/// Returns the number of erased calls.
pub fn remove_schedule_runtime(module: &mut Module, func: FuncId) -> usize {
    let callees: Vec<String> = module
        .functions
        .iter()
        .map(|f| f.name.clone())
        .collect();
    let function = module.function_mut(func);
    let mut doomed = Vec::new();
    for inst_id in function.insts_in_order() {
        if let Some(inst) = function.inst(inst_id) {
            if let InstKind::Call { callee, .. } = &inst.kind {
                if callees[callee.0 as usize]
                    .starts_with(SCHEDULE_INIT_PREFIX)
                {
                    doomed.push(inst_id);
                }
            }
        }
    }
    for inst_id in &doomed {
        function.erase_inst(*inst_id);
    }
    doomed.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgraomp_ir::{FunctionBuilder, ModuleBuilder, Ty};

    fn module_with_schedule() -> (Module, FuncId) {
        let mut mb = ModuleBuilder::new("m");
        let init = mb.declare("__kmpc_for_static_init_8", vec![], None);
        let mut fb = FunctionBuilder::new("worker", vec![], None);
        let bb = fb.block("entry");
        fb.switch_to(bb);
        let loc = fb.const_int(64, 0);
        let gtid = fb.const_int(32, 0);
        let sched = fb.const_int(32, 34);
        let plast = fb.alloca(Ty::Int(32));
        let plower = fb.alloca(Ty::Int(64));
        let pupper = fb.alloca(Ty::Int(64));
        let pstride = fb.alloca(Ty::Int(64));
        let incr = fb.const_int(64, 1);
        let chunk = fb.const_int(64, 1);
        fb.call(
            init,
            vec![
                loc, gtid, sched, plast, plower, pupper, pstride, incr,
                chunk,
            ],
            Ty::Void,
        );
        fb.ret(None);
        let worker = mb.add_function(fb.finish());
        (mb.finish(), worker)
    }

    #[test]
    fn captures_seven_operands() {
        let (module, worker) = module_with_schedule();
        let si = OmpStaticScheduleAnalysis::run(
            &module,
            module.function(worker),
        );
        assert!(si.is_valid());
        assert_eq!(si.values().len(), 7);
        let plower = si.values()[2];
        assert!(si.contains(plower));
    }

    #[test]
    fn missing_call_yields_invalid_schedule() {
        let mut mb = ModuleBuilder::new("m");
        let mut fb = FunctionBuilder::new("f", vec![], None);
        let bb = fb.block("entry");
        fb.switch_to(bb);
        fb.ret(None);
        let f = mb.add_function(fb.finish());
        let module = mb.finish();
        let si =
            OmpStaticScheduleAnalysis::run(&module, module.function(f));
        assert!(!si.is_valid());
        assert!(si.values().is_empty());
    }

    #[test]
    fn schedule_runtime_calls_are_erased() {
        let (mut module, worker) = module_with_schedule();
        assert_eq!(remove_schedule_runtime(&mut module, worker), 1);
        let func = module.function(worker);
        let has_call = func.insts_in_order().iter().any(|&v| {
            matches!(
                func.inst(v).map(|i| &i.kind),
                Some(InstKind::Call { .. })
            )
        });
        assert!(!has_call);
    }
}
