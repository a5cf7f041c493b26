//! Offload-kernel discovery: locate offload-entry descriptors, resolve the
//! outlined worker each one forks, and attach the offload-info metadata.
use cgraomp_ir::{
    CastOp, ConstData, FuncId, InstKind, Module, ValueKind,
};
use cgraomp_utils::{CgraResult, Error};

/// Prefix of offload-entry descriptor globals.
const OFFLOAD_ENTRY_PREFIX: &str = ".omp_offloading.entry";
/// The parallel-fork runtime entry called by the offload function.
const FORK_CALL: &str = "__kmpc_fork_call";

/// Source metadata of one offloaded region.
#[derive(Debug, Clone, PartialEq)]
pub struct OffloadInfo {
    pub device_id: i64,
    pub file_id: i64,
    /// Name of the function the region was written in.
    pub original_function_name: String,
    pub source_line: u32,
    pub order: u32,
}

/// One discovered kernel: the outlined worker and the offload function
/// wrapping it.
#[derive(Debug, Clone)]
pub struct KernelEntry {
    pub worker: FuncId,
    pub offload_func: FuncId,
    pub info: Option<OffloadInfo>,
}

/// Module analysis discovering every offloaded kernel, in declaration
/// order.
#[derive(Debug, Clone, Default)]
pub struct OmpKernelAnalysis {
    kernels: Vec<KernelEntry>,
}

impl OmpKernelAnalysis {
    pub fn new(module: &Module) -> CgraResult<Self> {
        let mut kernels = Vec::new();
        for global in &module.globals {
            if !global.name.starts_with(OFFLOAD_ENTRY_PREFIX) {
                continue;
            }
            // The first initialiser field points at the offload function.
            let Some(offload_func) = global
                .initializer
                .as_ref()
                .and_then(|init| init.element(0))
                .and_then(|field| match field {
                    ConstData::FuncRef(f) => Some(*f),
                    _ => None,
                })
            else {
                log::warn!(
                    "offload entry {} has no function initialiser",
                    global.name
                );
                continue;
            };
            let Some(worker) = find_forked_worker(module, offload_func)
            else {
                log::warn!(
                    "no parallel fork found in offload function {}",
                    module.function(offload_func).name
                );
                continue;
            };
            if module.offload_info.is_empty() {
                return Err(Error::invalid_module(
                    "no offload-info metadata found in the module",
                ));
            }
            let info = correlate(module, worker);
            if info.is_none() {
                log::warn!(
                    "no offload-info entry matches worker {}",
                    module.function(worker).name
                );
            }
            kernels.push(KernelEntry {
                worker,
                offload_func,
                info,
            });
        }
        Ok(OmpKernelAnalysis { kernels })
    }

    /// Discovered kernels in module declaration order.
    pub fn kernels(&self) -> &[KernelEntry] {
        &self.kernels
    }

    /// The offload function wrapping an outlined worker.
    pub fn offload_function(&self, worker: FuncId) -> Option<FuncId> {
        self.kernels
            .iter()
            .find(|k| k.worker == worker)
            .map(|k| k.offload_func)
    }
}

/// Walk the offload function for the fork call; its third argument is a
/// (possibly bit-cast) reference to the outlined worker.
fn find_forked_worker(module: &Module, offload_func: FuncId) -> Option<FuncId> {
    let func = module.function(offload_func);
    for inst_id in func.insts_in_order() {
        let Some(inst) = func.inst(inst_id) else {
            continue;
        };
        let InstKind::Call { callee, args } = &inst.kind else {
            continue;
        };
        if module.function(*callee).name != FORK_CALL {
            continue;
        }
        let &task = args.get(2)?;
        // Unwrap bitcasts around the function reference.
        let mut cur = task;
        loop {
            match &func.value(cur).kind {
                ValueKind::FuncRef(f) => return Some(*f),
                ValueKind::Inst(i) => match &i.kind {
                    InstKind::Cast {
                        op: CastOp::BitCast,
                        arg,
                    } => cur = *arg,
                    _ => return None,
                },
                _ => return None,
            }
        }
    }
    None
}

/// Match a worker against the metadata via its mangled name:
/// `__omp_offloading_<dev:hex>_<file:hex>_<name>_l<line>`.
fn correlate(module: &Module, worker: FuncId) -> Option<OffloadInfo> {
    let name = &module.function(worker).name;
    let (dev, file, orig, line) = parse_worker_name(name)?;
    module
        .offload_info
        .iter()
        .find(|e| {
            e.func_name == orig
                && e.line == line
                && e.device_id == dev
                && e.file_id == file
        })
        .map(|e| OffloadInfo {
            device_id: e.device_id,
            file_id: e.file_id,
            original_function_name: e.func_name.clone(),
            source_line: e.line,
            order: e.order,
        })
}

fn parse_worker_name(name: &str) -> Option<(i64, i64, String, u32)> {
    let rest = name.strip_prefix("__omp_offloading_")?;
    let mut parts = rest.splitn(3, '_');
    let dev = i64::from_str_radix(parts.next()?, 16).ok()?;
    let file = i64::from_str_radix(parts.next()?, 16).ok()?;
    let tail = parts.next()?;
    // The function name may itself contain underscores; the line suffix is
    // the last `_l<digits>` component.
    let pos = tail.rfind("_l")?;
    let (orig, line_part) = tail.split_at(pos);
    let line: u32 = line_part.strip_prefix("_l")?.parse().ok()?;
    Some((dev, file, orig.to_string(), line))
}
