use crate::DotConfig;
use cgraomp_opt::dfg::Dfg;
use cgraomp_utils::CgraResult;
use std::io::Write;

/// A graph serialiser.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Check structural expectations before emitting; violations that do
    /// not prevent emission are logged as warnings.
    fn validate(graph: &Dfg) -> CgraResult<()>;

    fn emit(
        graph: &Dfg,
        config: &DotConfig,
        out: &mut dyn Write,
    ) -> CgraResult<()>;
}
