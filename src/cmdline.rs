//! Command-line interface of the CGRAOmp driver.
use argh::FromArgs;
use cgraomp_backend::DotConfig;
use cgraomp_utils::{CgraResult, Error};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A comma-separated list of `key=value` attributes. An element without
/// exactly one `=` is malformed.
#[derive(Debug, Clone, Default)]
pub struct KeyValueList(pub Vec<(String, String)>);

impl FromStr for KeyValueList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut pairs = Vec::new();
        for item in s.split(',').filter(|i| !i.is_empty()) {
            let mut split = item.split('=');
            match (split.next(), split.next(), split.next()) {
                (Some(k), Some(v), None) if !k.is_empty() => {
                    pairs.push((k.to_string(), v.to_string()))
                }
                _ => {
                    return Err(format!(
                        "malformed key=value argument: {}",
                        item
                    ))
                }
            }
        }
        Ok(KeyValueList(pairs))
    }
}

/// A comma-separated list of names.
#[derive(Debug, Clone, Default)]
pub struct NameList(pub Vec<String>);

impl FromStr for NameList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(NameList(
            s.split(',')
                .filter(|n| !n.is_empty())
                .map(|n| n.to_string())
                .collect(),
        ))
    }
}

#[derive(FromArgs)]
/// The CGRAOmp kernel extractor: verifies OpenMP-offloaded loop kernels
/// against a CGRA model and lowers them to data-flow graphs.
pub struct Opts {
    /// input module dump (serialised IR)
    #[argh(positional, from_str_fn(read_path))]
    pub file: Option<PathBuf>,

    /// path to the CGRA machine description JSON
    #[argh(
        option,
        long = "cgra-model",
        short = 'm',
        default = "PathBuf::from(\"model.json\")"
    )]
    pub cgra_model: PathBuf,

    /// enable verbose diagnostics
    #[argh(switch, long = "cgraomp-verbose")]
    pub verbose: bool,

    /// attribute name used for opcodes in graph output
    #[argh(
        option,
        long = "cgra-dfg-op-key",
        default = "\"opcode\".to_string()"
    )]
    pub dfg_op_key: String,

    /// use dense sequential ids in node names
    #[argh(switch, long = "cgra-dfg-plain")]
    pub dfg_plain: bool,

    /// fractional digits emitted for float constants
    #[argh(option, long = "cgra-dfg-float-prec")]
    pub dfg_float_prec: Option<usize>,

    /// graph-level attributes (attr1=value1,attr2=value2,...)
    #[argh(option, long = "cgra-dfg-graph-prop")]
    pub dfg_graph_prop: Vec<KeyValueList>,

    /// node-level attributes (attr1=value1,attr2=value2,...)
    #[argh(option, long = "cgra-dfg-node-prop")]
    pub dfg_node_prop: Vec<KeyValueList>,

    /// edge-level attributes (attr1=value1,attr2=value2,...)
    #[argh(option, long = "cgra-dfg-edge-prop")]
    pub dfg_edge_prop: Vec<KeyValueList>,

    /// ordered list of DFG pass names
    #[argh(option, long = "dfg-pass-pipeline")]
    pub dfg_pass_pipeline: Vec<NameList>,

    /// DFG pass plugin library to load (repeatable)
    #[argh(option, long = "load-dfg-pass-plugin")]
    pub dfg_pass_plugins: Vec<PathBuf>,

    /// override for the output-file prefix
    #[argh(option, long = "dfg-file-prefix")]
    pub dfg_file_prefix: Option<String>,

    /// loop-carried memory-dependency distance threshold
    #[argh(option, long = "mem-dep-distance", default = "4")]
    pub mem_dep_distance: i64,

    /// prefer the original source function name in output filenames
    #[argh(switch, long = "use-simple-dfg-name")]
    pub use_simple_dfg_name: bool,
}

fn read_path(path: &str) -> Result<PathBuf, String> {
    Ok(Path::new(path).into())
}

fn flatten(lists: &[KeyValueList]) -> Vec<(String, String)> {
    lists.iter().flat_map(|l| l.0.iter().cloned()).collect()
}

impl Opts {
    /// Parse the process arguments, reporting errors through the usual
    /// channel.
    pub fn get_opts() -> CgraResult<Opts> {
        let args: Vec<String> = std::env::args().collect();
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        Opts::from_args(&[arg_refs[0]], &arg_refs[1..])
            .map_err(|early| Error::configuration(early.output))
    }

    /// The exporter configuration encoded by the graph options.
    pub fn dot_config(&self) -> DotConfig {
        DotConfig {
            op_key: self.dfg_op_key.clone(),
            float_prec: self.dfg_float_prec,
            graph_props: flatten(&self.dfg_graph_prop),
            node_props: flatten(&self.dfg_node_prop),
            edge_props: flatten(&self.dfg_edge_prop),
        }
    }

    /// The requested pass pipeline, flattened in option order.
    pub fn pipeline(&self) -> Vec<String> {
        self.dfg_pass_pipeline
            .iter()
            .flat_map(|l| l.0.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_lists_parse() {
        let kv: KeyValueList = "rankdir=LR,shape=box".parse().unwrap();
        assert_eq!(
            kv.0,
            vec![
                ("rankdir".to_string(), "LR".to_string()),
                ("shape".to_string(), "box".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_key_value_is_rejected() {
        assert!("rankdir".parse::<KeyValueList>().is_err());
        assert!("a=b=c".parse::<KeyValueList>().is_err());
        assert!("=x".parse::<KeyValueList>().is_err());
    }

    #[test]
    fn name_lists_split_on_commas() {
        let names: NameList = "balance-tree,my-pass".parse().unwrap();
        assert_eq!(names.0, vec!["balance-tree", "my-pass"]);
    }
}
