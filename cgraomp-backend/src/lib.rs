//! Backends serialising kernel DFGs.
mod dot;
mod traits;

pub use dot::{DotBackend, DotConfig};
pub use traits::Backend;
