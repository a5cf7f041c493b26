//! Shared utilities for the CGRAOmp toolchain.
mod errors;
mod out_file;
mod remark;

pub use errors::{CgraResult, Error};
pub use out_file::OutputFile;
pub use remark::{Remark, RemarkItem, RemarkKind};
