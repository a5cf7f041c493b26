//! Module- and loop-level analyses feeding the kernel verifier.
mod ag_compat;
mod annotation;
mod decoupling;
mod kernel_info;
mod loop_dependency;
mod loop_nest;
mod schedule;

pub use ag_compat::{AffineAgCompatibility, AgAccessConfig, AgDimension};
pub use annotation::{AnnotationAnalysis, CGRA_CUSTOM_INST_ATTR};
pub use decoupling::{DecoupledAnalysis, DecouplingError};
pub(crate) use decoupling::data_operands as decoupling_data_operands;
pub use kernel_info::{KernelEntry, OffloadInfo, OmpKernelAnalysis};
pub use loop_dependency::{LoopDependency, LoopDependencyInfo};
pub use loop_nest::find_perfectly_nested_loops;
pub use schedule::{
    remove_schedule_runtime, OmpStaticScheduleAnalysis, ScheduleInfo,
};
