//! The CGRAOmp driver library: command-line parsing and the per-module
//! pipeline. The heavy lifting lives in the `cgraomp-*` member crates.
pub mod cmdline;
pub mod driver;
