//! Per-kernel verification: orchestrates decoupling, loop-dependency,
//! instruction-availability, and address-generator checks according to the
//! modelled CGRA category, and produces the per-loop verdicts and remarks.
use crate::analysis::{
    find_perfectly_nested_loops, AffineAgCompatibility, AnnotationAnalysis,
    DecoupledAnalysis, LoopDependencyInfo, OmpStaticScheduleAnalysis,
    ScheduleInfo,
};
use cgraomp_ir::{
    FuncId, Function, InstKind, LoopId, LoopInfo, Module, ScalarEvolution,
    ValueId,
};
use cgraomp_model::{
    AddressGenerator, CgraCategory, InterLoopDep, Model,
};
use cgraomp_utils::{Remark, RemarkKind};
use itertools::Itertools;
use std::collections::HashSet;

/// The verdict for one loop kernel: one line per verification, all of
/// which must pass.
#[derive(Debug, Clone, Default)]
pub struct LoopVerifyResult {
    items: Vec<(String, String, bool)>,
}

impl LoopVerifyResult {
    fn set_result(
        &mut self,
        name: &str,
        detail: impl ToString,
        passed: bool,
    ) {
        self.items
            .push((name.to_string(), detail.to_string(), passed));
    }

    pub fn passed(&self) -> bool {
        self.items.iter().all(|(_, _, ok)| *ok)
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &str, bool)> {
        self.items
            .iter()
            .map(|(n, d, ok)| (n.as_str(), d.as_str(), *ok))
    }
}

/// Everything the verifier learned about one kernel; the DFG builder
/// consumes the analysis artifacts of passing kernels.
pub struct KernelReport {
    pub loop_id: LoopId,
    pub verdict: LoopVerifyResult,
    pub schedule: ScheduleInfo,
    pub decoupled: Option<DecoupledAnalysis>,
    pub deps: LoopDependencyInfo,
    pub ag: Option<AffineAgCompatibility>,
}

/// Verification outcome for one function: kernel reports in program order
/// plus the remarks to surface.
#[derive(Default)]
pub struct VerifyResult {
    pub reports: Vec<KernelReport>,
    pub remarks: Vec<Remark>,
}

impl VerifyResult {
    /// Reports of kernels that passed every check.
    pub fn valid_kernels(&self) -> impl Iterator<Item = &KernelReport> {
        self.reports.iter().filter(|r| r.verdict.passed())
    }

    pub fn num_valid(&self) -> usize {
        self.valid_kernels().count()
    }
}

/// Verifies every kernel of a function against the loaded model.
pub struct KernelVerifier<'a> {
    module: &'a Module,
    model: &'a Model,
    annotations: &'a AnnotationAnalysis,
    mem_dep_threshold: i64,
}

impl<'a> KernelVerifier<'a> {
    pub fn new(
        module: &'a Module,
        model: &'a Model,
        annotations: &'a AnnotationAnalysis,
        mem_dep_threshold: i64,
    ) -> Self {
        KernelVerifier {
            module,
            model,
            annotations,
            mem_dep_threshold,
        }
    }

    /// Run the per-category verification over every kernel loop of the
    /// worker function.
    pub fn verify_function(&self, worker: FuncId) -> VerifyResult {
        let func = self.module.function(worker);
        log::debug!(
            "verifying {} for {:?} CGRA",
            func.name,
            self.model.category
        );
        let mut result = VerifyResult::default();

        let schedule = OmpStaticScheduleAnalysis::run(self.module, func);
        let li = LoopInfo::new(func);
        let kernels = find_perfectly_nested_loops(func, &li);
        if kernels.is_empty() {
            log::warn!("cannot find any valid loop kernels in {}", func.name);
            return result;
        }

        for kernel in kernels {
            let report = match self.model.category {
                CgraCategory::Decoupled => {
                    self.verify_decoupled(func, &li, kernel, &schedule)
                }
                CgraCategory::TimeMultiplexed => {
                    self.verify_time_multiplexed(func, &li, kernel, &schedule)
                }
            };
            let kind = if report.verdict.passed() {
                RemarkKind::ValidKernel
            } else {
                RemarkKind::InvalidKernel
            };
            let mut remark = Remark::new(
                kind,
                &func.name,
                &li.loop_name(func, report.loop_id),
            );
            for (name, detail, ok) in report.verdict.items() {
                remark.push(name, detail, ok);
            }
            result.remarks.push(remark);
            result.reports.push(report);
        }
        result
    }

    fn verify_decoupled(
        &self,
        func: &Function,
        li: &LoopInfo,
        kernel: LoopId,
        schedule: &ScheduleInfo,
    ) -> KernelReport {
        let mut verdict = LoopVerifyResult::default();
        let mut se = ScalarEvolution::new(func, li);

        let da = DecoupledAnalysis::run(
            self.module,
            func,
            li,
            kernel,
            schedule,
        );
        verdict.set_result(
            "Memory access decoupling",
            match da.error() {
                None => "Success".to_string(),
                Some(e) => format!("Error {}", e),
            },
            da.is_ok(),
        );

        let deps = LoopDependencyInfo::run(
            func,
            li,
            kernel,
            &mut se,
            self.mem_dep_threshold,
        );
        let mut except: HashSet<ValueId> = HashSet::new();
        match self.model.inter_loop_dep {
            InterLoopDep::No => {
                let n = deps.num_inter_loop_deps();
                if n > 0 {
                    verdict.set_result(
                        "Inter loop dependency",
                        format!("including {} inter loop dependencies", n),
                        false,
                    );
                } else {
                    verdict.set_result(
                        "Inter loop dependency",
                        "No dependency",
                        true,
                    );
                }
            }
            InterLoopDep::Generic | InterLoopDep::BackwardInst => {
                except.extend(
                    deps.idv_deps()
                        .iter()
                        .chain(deps.simple_deps())
                        .filter_map(|d| d.phi()),
                );
            }
        }

        self.check_availability(
            func,
            da.computation.iter().copied(),
            &except,
            &mut verdict,
        );

        // Memory access patterns against the address generator.
        let ag = match self.model.address_generator {
            Some(AddressGenerator::Affine { max_nests }) => {
                let accesses: Vec<ValueId> = da
                    .loads
                    .iter()
                    .chain(da.stores.iter())
                    .copied()
                    .collect();
                let ag = AffineAgCompatibility::run(
                    func, &mut se, &accesses, max_nests,
                );
                let invalid = ag.num_invalid();
                verdict.set_result(
                    "Memory access pattern",
                    if invalid == 0 {
                        "all accesses are affine".to_string()
                    } else {
                        format!("{} incompatible accesses", invalid)
                    },
                    ag.is_compatible(),
                );
                Some(ag)
            }
            _ => None,
        };

        KernelReport {
            loop_id: kernel,
            verdict,
            schedule: schedule.clone(),
            decoupled: Some(da),
            deps,
            ag,
        }
    }

    fn verify_time_multiplexed(
        &self,
        func: &Function,
        li: &LoopInfo,
        kernel: LoopId,
        schedule: &ScheduleInfo,
    ) -> KernelReport {
        let mut verdict = LoopVerifyResult::default();
        let mut se = ScalarEvolution::new(func, li);
        let inner = li.innermost(kernel).unwrap_or(kernel);

        let deps = LoopDependencyInfo::run(
            func,
            li,
            kernel,
            &mut se,
            self.mem_dep_threshold,
        );

        // The loop machinery the fabric realises natively: the back-edge
        // branch, its condition, dependency-bound φ-nodes, and pointer
        // indexing (lowered separately).
        let mut except: HashSet<ValueId> = HashSet::new();
        if let Some(back) = li.back_branch(func, inner) {
            except.insert(back);
            if let Some(cond) = li.back_condition(func, inner) {
                except.insert(cond);
            }
        }
        except.extend(
            deps.idv_deps()
                .iter()
                .chain(deps.simple_deps())
                .filter_map(|d| d.phi()),
        );
        let lp = li.get(inner);
        let body: Vec<ValueId> = lp
            .blocks
            .iter()
            .flat_map(|&bb| func.block(bb).insts.iter().copied())
            .collect();
        for &inst_id in &body {
            if matches!(
                func.inst(inst_id).map(|i| &i.kind),
                Some(InstKind::Gep { .. })
            ) {
                except.insert(inst_id);
            }
        }
        self.check_availability(
            func,
            body.iter().copied(),
            &except,
            &mut verdict,
        );

        KernelReport {
            loop_id: kernel,
            verdict,
            schedule: schedule.clone(),
            decoupled: None,
            deps,
            ag: None,
        }
    }

    /// Instruction availability: every candidate must have a map entry.
    fn check_availability(
        &self,
        func: &Function,
        candidates: impl Iterator<Item = ValueId>,
        except: &HashSet<ValueId>,
        verdict: &mut LoopVerifyResult,
    ) {
        let module = self.module;
        let annotations = self.annotations;
        let name_of = |f: FuncId| module.function(f).name.clone();
        let is_custom = |f: FuncId| annotations.is_custom_inst(f);

        let mut unsupported: Vec<&'static str> = Vec::new();
        for v in candidates {
            if except.contains(&v) {
                continue;
            }
            if func.inst(v).is_none() {
                log::warn!("unexpected IR value {}", func.value_name(v));
                continue;
            }
            if self
                .model
                .inst_map()
                .find(func, v, &name_of, &is_custom)
                .is_none()
            {
                if let Some(op) = func.opcode_name(v) {
                    unsupported.push(op);
                }
            }
        }
        let unsupported: Vec<&str> =
            unsupported.into_iter().unique().sorted().collect();
        verdict.set_result(
            "Instruction availability",
            if unsupported.is_empty() {
                "All instructions are supported".to_string()
            } else {
                format!(
                    "Unsupported instructions are used: [{}]",
                    unsupported.join(", ")
                )
            },
            unsupported.is_empty(),
        );
    }
}
