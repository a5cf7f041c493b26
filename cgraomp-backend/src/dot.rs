//! DOT serialisation of kernel DFGs, plus the extra-info JSON sidecar.
use crate::Backend;
use cgraomp_opt::dfg::Dfg;
use cgraomp_utils::CgraResult;
use itertools::Itertools;
use serde_json::{Map, Value as Json};
use std::io::Write;

/// Rendering configuration derived from the command-line options.
#[derive(Debug, Clone)]
pub struct DotConfig {
    /// Attribute name used for opcodes (`cgra-dfg-op-key`).
    pub op_key: String,
    /// Fractional digits for float constants (`cgra-dfg-float-prec`).
    pub float_prec: Option<usize>,
    /// Graph/node/edge preamble attributes (`cgra-dfg-*-prop`).
    pub graph_props: Vec<(String, String)>,
    pub node_props: Vec<(String, String)>,
    pub edge_props: Vec<(String, String)>,
}

impl Default for DotConfig {
    fn default() -> Self {
        DotConfig {
            op_key: "opcode".to_string(),
            float_prec: None,
            graph_props: Vec::new(),
            node_props: Vec::new(),
            edge_props: Vec::new(),
        }
    }
}

/// Writes the graph in DOT form. The virtual root and its outgoing edges
/// are stripped from the output.
pub struct DotBackend;

impl Backend for DotBackend {
    fn name(&self) -> &'static str {
        "dot"
    }

    fn validate(graph: &Dfg) -> CgraResult<()> {
        for n in graph.nodes() {
            let is_source = graph.incoming(n, true).is_empty();
            if is_source && !graph.reaches_store(n) {
                log::warn!(
                    "node {} cannot reach any store; the computation is \
                     dead in the exported graph",
                    graph.node(n).unique_name()
                );
            }
        }
        Ok(())
    }

    fn emit(
        graph: &Dfg,
        config: &DotConfig,
        out: &mut dyn Write,
    ) -> CgraResult<()> {
        writeln!(out, "digraph \"{}\" {{", graph.name())?;
        write_properties(config, out)?;

        // Nodes first, in breadth-first order from the (hidden) root.
        let order = graph.bfs_order();
        for &idx in &order {
            let node = graph.node(idx);
            let name = node.unique_name();
            let attrs = node
                .attr_pairs(&config.op_key, config.float_prec)
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .join(",");
            if attrs.is_empty() {
                writeln!(out, "\t\"{}\" [label=\"{}\"];", name, name)?;
            } else {
                writeln!(
                    out,
                    "\t\"{}\" [label=\"{}\",{}];",
                    name, name, attrs
                )?;
            }
        }

        // Then every non-virtual edge.
        for &src in &order {
            let src_name = graph.node(src).unique_name();
            let mut edges: Vec<_> = graph.outgoing(src);
            edges.sort_by_key(|(_, _, e)| e.operand());
            for (_, dst, edge) in edges {
                let attrs = edge
                    .attr_pairs()
                    .into_iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .join(",");
                writeln!(
                    out,
                    "\t\"{}\" -> \"{}\" [{}];",
                    src_name,
                    graph.node(dst).unique_name(),
                    attrs
                )?;
            }
        }
        writeln!(out, "}}")?;
        Ok(())
    }
}

impl DotBackend {
    /// Serialise the per-node extra info as a JSON object keyed by unique
    /// node name. Returns false (writing nothing) when no node carries
    /// extra info.
    pub fn write_extra_info(
        graph: &Dfg,
        out: &mut dyn Write,
    ) -> CgraResult<bool> {
        let mut obj = Map::new();
        for idx in graph.bfs_order() {
            let node = graph.node(idx);
            if node.extra_info.is_empty() {
                continue;
            }
            let mut entry = Map::new();
            for (k, v) in &node.extra_info {
                entry.insert(k.clone(), v.clone());
            }
            obj.insert(node.unique_name(), Json::Object(entry));
        }
        if obj.is_empty() {
            return Ok(false);
        }
        let text = serde_json::to_string_pretty(&Json::Object(obj))?;
        out.write_all(text.as_bytes())?;
        writeln!(out)?;
        Ok(true)
    }
}

fn write_properties(
    config: &DotConfig,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    writeln!(out, "\t//Graph Properties")?;
    for (kind, props) in [
        ("graph", &config.graph_props),
        ("node", &config.node_props),
        ("edge", &config.edge_props),
    ] {
        if props.is_empty() {
            continue;
        }
        writeln!(out, "\t{}[", kind)?;
        for (k, v) in props {
            writeln!(out, "\t\t{}={};", k, v)?;
        }
        writeln!(out, "\t]")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgraomp_opt::dfg::{ConstValue, DfgEdge, DfgNode, NodeKind};
    use cgraomp_ir::{Ty, ValueId};

    fn sample_graph() -> Dfg {
        let mut g = Dfg::new("kernel");
        let ld = g.add_node(DfgNode::new(
            3,
            NodeKind::MemLoad {
                inst: ValueId(3),
                symbol: "A".to_string(),
                datatype: Ty::Int(32),
            },
        ));
        let add = g.add_node(DfgNode::new(
            4,
            NodeKind::Compute {
                inst: ValueId(4),
                opcode: "add".to_string(),
                is_custom: false,
            },
        ));
        let c = g.add_node(DfgNode::new(
            5,
            NodeKind::Constant {
                value: ConstValue::Int {
                    bits: 32,
                    value: 10,
                },
                skipped: vec![],
            },
        ));
        let st = g.add_node(DfgNode::new(
            6,
            NodeKind::MemStore {
                inst: ValueId(6),
                symbol: "C".to_string(),
                datatype: Ty::Int(32),
            },
        ));
        g.connect(ld, add, DfgEdge::Normal { operand: 0 });
        g.connect(c, add, DfgEdge::Normal { operand: 1 });
        g.connect(add, st, DfgEdge::Normal { operand: 0 });
        g
    }

    fn emit_string(g: &Dfg, config: &DotConfig) -> String {
        let mut buf = Vec::new();
        DotBackend::emit(g, config, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn virtual_root_is_hidden() {
        let g = sample_graph();
        let text = emit_string(&g, &DotConfig::default());
        assert!(!text.contains("__VROOT"));
    }

    #[test]
    fn node_attributes_follow_the_grammar() {
        let g = sample_graph();
        let text = emit_string(&g, &DotConfig::default());
        assert!(text.contains("type=input,data=A"));
        assert!(text.contains("type=op,opcode=add"));
        assert!(text.contains("type=const"));
        assert!(text.contains("datatype=int32,value=10"));
        assert!(text.contains("type=output,data=C"));
    }

    #[test]
    fn custom_op_key_is_used() {
        let g = sample_graph();
        let config = DotConfig {
            op_key: "op".to_string(),
            ..Default::default()
        };
        let text = emit_string(&g, &config);
        assert!(text.contains("type=op,op=add"));
    }

    #[test]
    fn edges_carry_operand_indices() {
        let g = sample_graph();
        let text = emit_string(&g, &DotConfig::default());
        assert!(text.contains("\"Load_3\" -> \"add_4\" [operand=0]"));
        assert!(text.contains("\"Const_5\" -> \"add_4\" [operand=1]"));
        assert!(text.contains("\"add_4\" -> \"Store_6\" [operand=0]"));
    }

    #[test]
    fn loop_carried_edges_render_direction_and_distance() {
        let mut g = sample_graph();
        let nodes: Vec<_> = g.nodes().collect();
        let (st, ld) = (nodes[3], nodes[0]);
        g.connect(
            st,
            ld,
            DfgEdge::LoopCarried {
                operand: 0,
                distance: 2,
            },
        );
        let text = emit_string(&g, &DotConfig::default());
        assert!(text
            .contains("[operand=0,dir=back,distance=2,label=2]"));
    }

    #[test]
    fn graph_properties_preamble() {
        let g = sample_graph();
        let config = DotConfig {
            graph_props: vec![("rankdir".to_string(), "LR".to_string())],
            ..Default::default()
        };
        let text = emit_string(&g, &config);
        assert!(text.contains("graph[\n\t\trankdir=LR;\n\t]"));
    }

    #[test]
    fn extra_info_written_only_when_present() {
        let mut g = sample_graph();
        let mut buf = Vec::new();
        assert!(!DotBackend::write_extra_info(&g, &mut buf).unwrap());

        let first = g.nodes().next().unwrap();
        g.node_mut(first)
            .extra_info
            .insert("base".to_string(), serde_json::json!("A"));
        let mut buf = Vec::new();
        assert!(DotBackend::write_extra_info(&g, &mut buf).unwrap());
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"Load_3\""));
        assert!(text.contains("\"base\": \"A\""));
    }
}
