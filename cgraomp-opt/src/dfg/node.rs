//! DFG node variants and their graph-output attributes.
use cgraomp_ir::{ConstData, Ty, ValueId};
use linked_hash_map::LinkedHashMap;
use serde_json::Value as Json;

/// A literal carried by a [NodeKind::Constant] node.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int { bits: u32, value: i64 },
    Float { bits: u32, value: f64 },
}

impl ConstValue {
    pub fn from_const_data(data: &ConstData) -> Option<Self> {
        match data {
            ConstData::Int { bits, value } => Some(ConstValue::Int {
                bits: *bits,
                value: *value,
            }),
            ConstData::Float { bits, value } => Some(ConstValue::Float {
                bits: *bits,
                value: *value,
            }),
            _ => None,
        }
    }

    pub fn datatype_str(&self) -> String {
        match self {
            ConstValue::Int { bits, .. } => format!("int{}", bits),
            ConstValue::Float { bits, .. } => format!("float{}", bits),
        }
    }

    /// Literal rendering; floats honour the configured fractional
    /// precision.
    pub fn value_str(&self, float_prec: Option<usize>) -> String {
        match self {
            ConstValue::Int { value, .. } => value.to_string(),
            ConstValue::Float { value, .. } => match float_prec {
                Some(prec) => format!("{:.*}", prec, value),
                None => value.to_string(),
            },
        }
    }
}

/// The node taxonomy of the DFG.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The synthetic entry rooting the graph; stripped on export.
    VirtualRoot,
    Compute {
        inst: ValueId,
        /// The emitted operation name (the map entry's `map` string).
        opcode: String,
        /// Custom-instruction calls get no edge for their callee.
        is_custom: bool,
    },
    MemLoad {
        inst: ValueId,
        /// Resolved source symbol of the access.
        symbol: String,
        datatype: Ty,
    },
    MemStore {
        inst: ValueId,
        symbol: String,
        datatype: Ty,
    },
    Constant {
        value: ConstValue,
        /// Opcode names of transparently skipped cast instructions.
        skipped: Vec<&'static str>,
    },
    GlobalData {
        name: String,
        datatype: Ty,
        skipped: Vec<&'static str>,
    },
    /// One step of lowered pointer indexing (time-multiplexed path).
    GepAdd { inst: ValueId },
}

/// A DFG node: its integer id (IR-derived until renumbering), kind, and
/// optional key→JSON extra info.
#[derive(Debug, Clone)]
pub struct DfgNode {
    pub id: i64,
    pub kind: NodeKind,
    pub extra_info: LinkedHashMap<String, Json>,
}

impl DfgNode {
    pub fn new(id: i64, kind: NodeKind) -> Self {
        DfgNode {
            id,
            kind,
            extra_info: LinkedHashMap::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::VirtualRoot)
    }

    /// The IR instruction behind the node, when there is one.
    pub fn inst(&self) -> Option<ValueId> {
        match &self.kind {
            NodeKind::Compute { inst, .. }
            | NodeKind::MemLoad { inst, .. }
            | NodeKind::MemStore { inst, .. }
            | NodeKind::GepAdd { inst } => Some(*inst),
            _ => None,
        }
    }

    /// Unique node name used in graph output. The virtual root always
    /// renders under its reserved name.
    pub fn unique_name(&self) -> String {
        match &self.kind {
            NodeKind::VirtualRoot => "__VROOT".to_string(),
            NodeKind::Compute { opcode, .. } => {
                format!("{}_{}", opcode, self.id)
            }
            NodeKind::MemLoad { .. } => format!("Load_{}", self.id),
            NodeKind::MemStore { .. } => format!("Store_{}", self.id),
            NodeKind::Constant { .. } => format!("Const_{}", self.id),
            NodeKind::GlobalData { .. } => format!("Global_{}", self.id),
            NodeKind::GepAdd { .. } => format!("gepadd_{}", self.id),
        }
    }

    /// Semantic attributes of the node as `key=value` pairs. `op_key` is
    /// the configured attribute name for opcodes.
    pub fn attr_pairs(
        &self,
        op_key: &str,
        float_prec: Option<usize>,
    ) -> Vec<(String, String)> {
        match &self.kind {
            NodeKind::VirtualRoot => Vec::new(),
            NodeKind::Compute { opcode, .. } => vec![
                ("type".into(), "op".into()),
                (op_key.into(), opcode.clone()),
            ],
            NodeKind::GepAdd { .. } => vec![
                ("type".into(), "op".into()),
                (op_key.into(), "gepadd".into()),
            ],
            NodeKind::MemLoad { symbol, .. } => vec![
                ("type".into(), "input".into()),
                ("data".into(), symbol.clone()),
            ],
            NodeKind::MemStore { symbol, .. } => vec![
                ("type".into(), "output".into()),
                ("data".into(), symbol.clone()),
            ],
            NodeKind::Constant { value, skipped } => {
                let mut pairs = vec![("type".into(), "const".into())];
                if !skipped.is_empty() {
                    pairs.push((
                        "skipped".into(),
                        format!("\"({})\"", skipped.join(",")),
                    ));
                }
                pairs.push(("datatype".into(), value.datatype_str()));
                pairs.push(("value".into(), value.value_str(float_prec)));
                pairs
            }
            NodeKind::GlobalData {
                name,
                datatype,
                skipped,
            } => {
                let mut pairs = vec![("type".into(), "const".into())];
                if !skipped.is_empty() {
                    pairs.push((
                        "skipped".into(),
                        format!("\"({})\"", skipped.join(",")),
                    ));
                }
                pairs.push(("datatype".into(), datatype.datatype_str()));
                pairs.push(("value".into(), name.clone()));
                pairs
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_attrs_carry_type_and_value() {
        let node = DfgNode::new(
            7,
            NodeKind::Constant {
                value: ConstValue::Int {
                    bits: 32,
                    value: 10,
                },
                skipped: vec![],
            },
        );
        assert_eq!(node.unique_name(), "Const_7");
        let pairs = node.attr_pairs("opcode", None);
        assert!(pairs.contains(&("datatype".into(), "int32".into())));
        assert!(pairs.contains(&("value".into(), "10".into())));
    }

    #[test]
    fn float_precision_is_applied() {
        let v = ConstValue::Float {
            bits: 32,
            value: 2.5,
        };
        assert_eq!(v.value_str(Some(3)), "2.500");
        assert_eq!(v.value_str(None), "2.5");
    }

    #[test]
    fn skipped_sequence_renders_parenthesised() {
        let node = DfgNode::new(
            1,
            NodeKind::Constant {
                value: ConstValue::Int { bits: 8, value: 1 },
                skipped: vec!["trunc", "sext"],
            },
        );
        let pairs = node.attr_pairs("opcode", None);
        assert!(pairs
            .iter()
            .any(|(k, v)| k == "skipped" && v == "\"(trunc,sext)\""));
    }
}
