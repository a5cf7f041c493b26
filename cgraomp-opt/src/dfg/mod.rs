//! The typed data-flow graph extracted per kernel, and its builder.
mod builder;
mod graph;
mod node;

pub use builder::DfgBuilder;
pub use graph::{Dfg, DfgEdge};
pub use node::{ConstValue, DfgNode, NodeKind};
