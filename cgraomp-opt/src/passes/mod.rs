//! Built-in DFG passes.
mod balance_tree;

pub use balance_tree::BalanceTree;

use crate::pass_manager::DfgPassBuilder;

/// Register the built-in pass names with a builder. Runs before any
/// plugin callbacks so built-ins always win their names.
pub(crate) fn register_builtins(builder: &mut DfgPassBuilder) {
    builder.register_pipeline_parsing_callback(Box::new(|name, pm| {
        if name == "balance-tree" {
            pm.add_pass(Box::new(BalanceTree));
            true
        } else {
            false
        }
    }));
}
