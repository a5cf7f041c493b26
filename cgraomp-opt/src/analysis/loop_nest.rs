//! Search for maximally perfectly-nested loop kernels.
use cgraomp_ir::{Function, LoopId, LoopInfo};

/// For every outermost loop, descend the nest and return the outermost loop
/// whose sub-tree is maximally perfectly nested, i.e. whose nest depth
/// equals its perfect-nest depth. A nest level that forks into more than
/// one innermost loop is rejected with a warning and contributes nothing.
pub fn find_perfectly_nested_loops(
    func: &Function,
    li: &LoopInfo,
) -> Vec<LoopId> {
    let mut kernels = Vec::new();
    for &outer in &li.top_level {
        if li.innermost(outer).is_none() {
            log::warn!(
                "multiple innermost loops detected under {} in {}",
                li.loop_name(func, outer),
                func.name
            );
            continue;
        }
        for candidate in li.nest_chain(outer) {
            let depth = li.nest_depth(candidate);
            let perfect = li.max_perfect_depth(func, candidate);
            if depth == perfect {
                log::debug!(
                    "detected perfectly nested loop {} (depth {})",
                    li.loop_name(func, candidate),
                    depth
                );
                kernels.push(candidate);
                break;
            }
        }
    }
    kernels
}
