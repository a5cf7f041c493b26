//! The typed SSA intermediate representation consumed by the CGRAOmp
//! pipeline, together with the "standard" analyses the pipeline expects from
//! its host: loop info, scalar evolution, loop-access dependences, and
//! analysis-result caching.
//!
//! The IR is deliberately small: it models exactly the surface the kernel
//! extraction needs (typed values, SSA instructions, loops over basic blocks,
//! module-level globals/metadata) and is serialisable so module dumps can be
//! fed to the command-line driver.
mod analysis;
mod builder;
mod function;
mod loop_access;
mod loops;
mod module;
mod scev;
mod types;

pub use analysis::{AnalysisCache, Preserved};
pub use builder::{FunctionBuilder, ModuleBuilder};
pub use function::{
    BinOp, Block, BlockId, CastOp, Function, Inst, InstFlags, InstKind,
    Predicate, Value, ValueId, ValueKind,
};
pub use loop_access::{BackwardDep, LoopAccessInfo};
pub use loops::{InductionVar, Loop, LoopId, LoopInfo};
pub use module::{
    Annotation, ConstData, FuncId, GlobalId, GlobalVariable, Module,
    OffloadEntry,
};
pub use scev::{ScalarEvolution, Scev, ScevRef};
pub use types::Ty;
