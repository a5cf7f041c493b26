//! Kernel verification and data-flow-graph construction: the analyses that
//! decide whether an offloaded loop fits the modelled CGRA, the DFG data
//! model and builder, and the DFG pass pipeline.
pub mod analysis;
pub mod dfg;
mod pass_manager;
pub mod passes;
mod verify;

pub use pass_manager::{
    DfgPass, DfgPassBuilder, DfgPassManager, DfgPassPluginInfo,
    PLUGIN_ENTRY_SYMBOL,
};
pub use verify::{
    KernelReport, KernelVerifier, LoopVerifyResult, VerifyResult,
};
