//! The CGRA machine description: a typed [Model] parsed from a declarative
//! JSON file, carrying the instruction mapping the verifier and DFG builder
//! consult.
mod error;
mod inst_map;
mod model;

pub use error::ModelError;
pub use inst_map::{
    ConstOperand, InstructionMap, MapCondition, MapEntry, MapEntryKind,
    MemKind, Side,
};
pub use model::{
    AddressGenerator, CgraCategory, ConditionalStyle, InterLoopDep, Model,
};
