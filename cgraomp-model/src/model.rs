//! Parsing and validation of the machine-description file.
use crate::{
    ConstOperand, InstructionMap, MapCondition, ModelError, Side,
};
use serde_json::{json, Map, Value as Json};
use std::fs;
use std::path::Path;

const CATEGORY_KEY: &str = "category";
const COND_STYLE_KEY: &str = "conditional";
const IDP_STYLE_KEY: &str = "inter-loop-dependency";
const AG_CONF_KEY: &str = "address_generator";
const AG_STYLE_KEY: &str = "control";
const AG_MAX_NEST_KEY: &str = "max_nested_level";
const GEN_INST_KEY: &str = "generic_instructions";
const CUSTOM_INST_KEY: &str = "custom_instructions";
const INST_MAP_KEY: &str = "instruction_map";
const OPT_ENABLE_KEY: &str = "allowed";
const OPT_TYPE_KEY: &str = "type";
const INST_KEY: &str = "inst";
const MAP_KEY: &str = "map";
const FLAGS_KEY: &str = "flags";
const PRED_KEY: &str = "pred";
const CONST_LHS_KEY: &str = "lhs";
const CONST_RHS_KEY: &str = "rhs";
const CONST_INT_KEY: &str = "ConstantInt";
const CONST_DBL_KEY: &str = "ConstantDouble";

/// Architectural style of the target CGRA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgraCategory {
    Decoupled,
    TimeMultiplexed,
}

impl CgraCategory {
    pub const PERMITTED: &'static [&'static str] =
        &["time-multiplexed", "decoupled"];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "decoupled" => Some(CgraCategory::Decoupled),
            "time-multiplexed" => Some(CgraCategory::TimeMultiplexed),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            CgraCategory::Decoupled => "decoupled",
            CgraCategory::TimeMultiplexed => "time-multiplexed",
        }
    }
}

/// How the fabric realises conditional execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalStyle {
    No,
    MuxInst,
    TriState,
}

/// How the fabric realises inter-loop (loop-carried) dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterLoopDep {
    No,
    Generic,
    BackwardInst,
}

/// The model-side description of permissible address expressions of a
/// decoupled CGRA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressGenerator {
    /// Affine accesses: an iteration-invariant base plus constant-stride
    /// induction terms, through at most `max_nests` loop levels
    /// (unbounded when `None`).
    Affine { max_nests: Option<u32> },
    FullState,
}

/// The loaded machine description. Immutable after parse; shared read-only
/// by every downstream component.
#[derive(Debug, Clone)]
pub struct Model {
    pub category: CgraCategory,
    pub conditional: ConditionalStyle,
    pub inter_loop_dep: InterLoopDep,
    /// Present iff the category is decoupled.
    pub address_generator: Option<AddressGenerator>,
    inst_map: InstructionMap,
}

impl Model {
    /// Read and validate a machine-description file.
    pub fn parse(path: &Path, verbose: bool) -> Result<Model, ModelError> {
        let text =
            fs::read_to_string(path).map_err(|e| ModelError::Unreadable {
                file: path.display().to_string(),
                cause: e.to_string(),
            })?;
        let parsed: Json = serde_json::from_str(&text).map_err(|e| {
            ModelError::Unreadable {
                file: path.display().to_string(),
                cause: format!("invalid JSON file: {}", e),
            }
        })?;
        Model::from_json(&parsed, verbose)
    }

    /// Validate an already-parsed description.
    pub fn from_json(top: &Json, verbose: bool) -> Result<Model, ModelError> {
        let obj = top.as_object().ok_or_else(|| {
            ModelError::bad_type("<top level>", "object", top)
        })?;

        let category = get_category(obj)?;
        let conditional = get_option(
            obj,
            COND_STYLE_KEY,
            &[
                ("MuxInst", ConditionalStyle::MuxInst),
                ("TriState", ConditionalStyle::TriState),
            ],
            ConditionalStyle::No,
        )?;
        let inter_loop_dep = get_option(
            obj,
            IDP_STYLE_KEY,
            &[
                ("generic", InterLoopDep::Generic),
                ("BackwardInst", InterLoopDep::BackwardInst),
            ],
            InterLoopDep::No,
        )?;

        let address_generator = match category {
            CgraCategory::Decoupled => Some(parse_ag(obj)?),
            CgraCategory::TimeMultiplexed => None,
        };

        let mut inst_map = InstructionMap::new(verbose);
        for opcode in get_string_array(obj, GEN_INST_KEY)? {
            inst_map.add_generic_inst(&opcode)?;
        }
        for name in get_string_array(obj, CUSTOM_INST_KEY)? {
            inst_map.add_custom_inst(&name);
        }
        if let Some(map_val) = obj.get(INST_MAP_KEY) {
            let arr = map_val.as_array().ok_or_else(|| {
                ModelError::bad_type(INST_MAP_KEY, "array", map_val)
            })?;
            for entry in arr {
                let (opcode, cond) = parse_map_entry(entry, verbose)?;
                inst_map.add_map_entry(&opcode, cond)?;
            }
        }

        Ok(Model {
            category,
            conditional,
            inter_loop_dep,
            address_generator,
            inst_map,
        })
    }

    pub fn inst_map(&self) -> &InstructionMap {
        &self.inst_map
    }

    /// Serialise back to the machine-description schema.
    pub fn to_json(&self) -> Json {
        let (generic, custom, map) = self.inst_map.to_json();
        let mut obj = Map::new();
        obj.insert(CATEGORY_KEY.into(), json!(self.category.as_str()));
        obj.insert(
            COND_STYLE_KEY.into(),
            match self.conditional {
                ConditionalStyle::No => json!({ OPT_ENABLE_KEY: false }),
                ConditionalStyle::MuxInst => {
                    json!({ OPT_ENABLE_KEY: true, OPT_TYPE_KEY: "MuxInst" })
                }
                ConditionalStyle::TriState => {
                    json!({ OPT_ENABLE_KEY: true, OPT_TYPE_KEY: "TriState" })
                }
            },
        );
        obj.insert(
            IDP_STYLE_KEY.into(),
            match self.inter_loop_dep {
                InterLoopDep::No => json!({ OPT_ENABLE_KEY: false }),
                InterLoopDep::Generic => {
                    json!({ OPT_ENABLE_KEY: true, OPT_TYPE_KEY: "generic" })
                }
                InterLoopDep::BackwardInst => {
                    json!({ OPT_ENABLE_KEY: true, OPT_TYPE_KEY: "BackwardInst" })
                }
            },
        );
        if let Some(ag) = self.address_generator {
            let mut ag_obj = Map::new();
            match ag {
                AddressGenerator::Affine { max_nests } => {
                    ag_obj.insert(AG_STYLE_KEY.into(), json!("affine"));
                    if let Some(n) = max_nests {
                        ag_obj.insert(AG_MAX_NEST_KEY.into(), json!(n));
                    }
                }
                AddressGenerator::FullState => {
                    ag_obj.insert(AG_STYLE_KEY.into(), json!("full-state"));
                }
            }
            obj.insert(AG_CONF_KEY.into(), Json::Object(ag_obj));
        }
        obj.insert(GEN_INST_KEY.into(), generic);
        obj.insert(CUSTOM_INST_KEY.into(), custom);
        obj.insert(INST_MAP_KEY.into(), map);
        Json::Object(obj)
    }
}

fn get_category(obj: &Map<String, Json>) -> Result<CgraCategory, ModelError> {
    let val = obj
        .get(CATEGORY_KEY)
        .ok_or_else(|| ModelError::missing(CATEGORY_KEY))?;
    let s = val
        .as_str()
        .ok_or_else(|| ModelError::bad_type(CATEGORY_KEY, "string", val))?;
    CgraCategory::parse(s).ok_or_else(|| {
        ModelError::bad_value(CATEGORY_KEY, s, CgraCategory::PERMITTED)
    })
}

/// Shared parse for the `{allowed, type}` option blocks. An
/// `allowed: false` block maps to `no_value` regardless of any type given.
fn get_option<T: Copy>(
    obj: &Map<String, Json>,
    key: &str,
    permitted: &[(&'static str, T)],
    no_value: T,
) -> Result<T, ModelError> {
    let val = obj.get(key).ok_or_else(|| ModelError::missing(key))?;
    let block = val
        .as_object()
        .ok_or_else(|| ModelError::bad_type(key, "object", val))?;

    let allowed = block
        .get(OPT_ENABLE_KEY)
        .ok_or_else(|| ModelError::missing(OPT_ENABLE_KEY).in_region(key))?;
    let allowed = allowed.as_bool().ok_or_else(|| {
        ModelError::bad_type(OPT_ENABLE_KEY, "bool", allowed).in_region(key)
    })?;
    if !allowed {
        return Ok(no_value);
    }

    let ty = block
        .get(OPT_TYPE_KEY)
        .ok_or_else(|| ModelError::missing(OPT_TYPE_KEY).in_region(key))?;
    let ty = ty.as_str().ok_or_else(|| {
        ModelError::bad_type(OPT_TYPE_KEY, "string", ty).in_region(key)
    })?;
    permitted
        .iter()
        .find(|(name, _)| *name == ty)
        .map(|(_, v)| *v)
        .ok_or_else(|| {
            let names: Vec<&str> =
                permitted.iter().map(|(n, _)| *n).collect();
            ModelError::bad_value(OPT_TYPE_KEY, ty, &names).in_region(key)
        })
}

fn parse_ag(obj: &Map<String, Json>) -> Result<AddressGenerator, ModelError> {
    let val = obj
        .get(AG_CONF_KEY)
        .ok_or_else(|| ModelError::missing(AG_CONF_KEY))?;
    let conf = val
        .as_object()
        .ok_or_else(|| ModelError::bad_type(AG_CONF_KEY, "object", val))?;
    let style = conf.get(AG_STYLE_KEY).ok_or_else(|| {
        ModelError::missing(AG_STYLE_KEY).in_region(AG_CONF_KEY)
    })?;
    let style = style.as_str().ok_or_else(|| {
        ModelError::bad_type(AG_STYLE_KEY, "string", style)
            .in_region(AG_CONF_KEY)
    })?;
    match style {
        "affine" => {
            let max_nests = match conf.get(AG_MAX_NEST_KEY) {
                // No limit configured: any nest level is acceptable.
                None => None,
                Some(v) => {
                    let n = v.as_i64().ok_or_else(|| {
                        ModelError::bad_type(AG_MAX_NEST_KEY, "integer", v)
                            .in_region(AG_CONF_KEY)
                    })?;
                    if n <= 0 {
                        return Err(ModelError::bad_value(
                            AG_MAX_NEST_KEY,
                            n,
                            &["<positive integer>"],
                        )
                        .in_region(AG_CONF_KEY));
                    }
                    Some(n as u32)
                }
            };
            Ok(AddressGenerator::Affine { max_nests })
        }
        "full-state" => Err(ModelError::NotImplemented {
            key: AG_STYLE_KEY.to_string(),
            value: style.to_string(),
        }),
        _ => Err(ModelError::bad_value(
            AG_STYLE_KEY,
            style,
            &["affine", "full-state"],
        )
        .in_region(AG_CONF_KEY)),
    }
}

fn get_string_array(
    obj: &Map<String, Json>,
    key: &str,
) -> Result<Vec<String>, ModelError> {
    let val = obj.get(key).ok_or_else(|| ModelError::missing(key))?;
    let arr = val
        .as_array()
        .ok_or_else(|| ModelError::bad_type(key, "array", val))?;
    arr.iter()
        .map(|item| {
            item.as_str().map(|s| s.to_string()).ok_or_else(|| {
                ModelError::bad_type(key, "an array of string", item)
            })
        })
        .collect()
}

/// Parse one `instruction_map` entry into its opcode and condition.
fn parse_map_entry(
    entry: &Json,
    verbose: bool,
) -> Result<(String, MapCondition), ModelError> {
    const REGION: &str = "an entry of \"instruction_map\"";
    let obj = entry.as_object().ok_or_else(|| {
        ModelError::bad_type(INST_MAP_KEY, "object", entry)
    })?;

    let get_str = |key: &str| -> Result<String, ModelError> {
        let v = obj
            .get(key)
            .ok_or_else(|| ModelError::missing(key).in_region(REGION))?;
        v.as_str().map(|s| s.to_string()).ok_or_else(|| {
            ModelError::bad_type(key, "string", v).in_region(REGION)
        })
    };

    let opcode = get_str(INST_KEY)?;
    let map_name = get_str(MAP_KEY)?;
    let mut cond = MapCondition::new(map_name);

    if let Some(flags_val) = obj.get(FLAGS_KEY) {
        let arr = flags_val.as_array().ok_or_else(|| {
            ModelError::bad_type(FLAGS_KEY, "array", flags_val)
                .in_region(REGION)
        })?;
        let mut flags = Vec::new();
        for f in arr {
            flags.push(
                f.as_str()
                    .ok_or_else(|| {
                        ModelError::bad_type(
                            FLAGS_KEY,
                            "an array of string",
                            f,
                        )
                        .in_region(REGION)
                    })?
                    .to_string(),
            );
        }
        cond.set_flags(&flags).map_err(|e| e.in_region(REGION))?;
    }

    if obj.contains_key(PRED_KEY) {
        let pred = get_str(PRED_KEY)?;
        cond.set_pred(&pred).map_err(|e| e.in_region(REGION))?;
    }

    let parse_const = |side_obj: &Json| -> Result<ConstOperand, ModelError> {
        let c = side_obj.as_object().ok_or_else(|| {
            ModelError::bad_type("lhs/rhs", "object", side_obj)
                .in_region(REGION)
        })?;
        if let Some(iv) = c.get(CONST_INT_KEY) {
            let i = iv.as_i64().ok_or_else(|| {
                ModelError::bad_type(CONST_INT_KEY, "integer", iv)
                    .in_region(REGION)
            })?;
            Ok(ConstOperand::Int(i))
        } else if let Some(dv) = c.get(CONST_DBL_KEY) {
            let d = dv.as_f64().ok_or_else(|| {
                ModelError::bad_type(CONST_DBL_KEY, "number", dv)
                    .in_region(REGION)
            })?;
            Ok(ConstOperand::Double(d))
        } else {
            Err(ModelError::missing(CONST_INT_KEY).in_region(REGION))
        }
    };

    let mut lhs_set = false;
    if let Some(lhs) = obj.get(CONST_LHS_KEY) {
        cond.set_const(Side::Lhs, parse_const(lhs)?);
        lhs_set = true;
    }
    if let Some(rhs) = obj.get(CONST_RHS_KEY) {
        if lhs_set {
            // Both sides given: the rhs clause is ignored.
            if verbose {
                log::warn!(
                    "both left and right hand side condition is specified \
                     for an instruction mapping for {}; the right hand \
                     side one is ignored",
                    opcode
                );
            }
        } else {
            cond.set_const(Side::Rhs, parse_const(rhs)?);
        }
    }

    Ok((opcode, cond))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_json() -> Json {
        json!({
            "category": "decoupled",
            "conditional": { "allowed": false },
            "inter-loop-dependency": { "allowed": false },
            "address_generator": { "control": "affine", "max_nested_level": 3 },
            "generic_instructions": ["add", "mul", "load", "store"],
            "custom_instructions": [],
        })
    }

    #[test]
    fn parses_decoupled_model() {
        let m = Model::from_json(&base_json(), false).unwrap();
        assert_eq!(m.category, CgraCategory::Decoupled);
        assert_eq!(m.conditional, ConditionalStyle::No);
        assert_eq!(m.inter_loop_dep, InterLoopDep::No);
        assert_eq!(
            m.address_generator,
            Some(AddressGenerator::Affine {
                max_nests: Some(3)
            })
        );
    }

    #[test]
    fn unknown_category_reports_permitted_values() {
        let mut v = base_json();
        v["category"] = json!("hybrid");
        let err = Model::from_json(&v, false).unwrap_err();
        match err {
            ModelError::InvalidValue {
                key,
                value,
                permitted,
                ..
            } => {
                assert_eq!(key, "category");
                assert_eq!(value, "hybrid");
                assert_eq!(permitted, vec!["time-multiplexed", "decoupled"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn missing_required_key_is_error() {
        let mut v = base_json();
        v.as_object_mut().unwrap().remove("generic_instructions");
        assert!(matches!(
            Model::from_json(&v, false),
            Err(ModelError::MissingKey { .. })
        ));
    }

    #[test]
    fn disallowed_block_overrides_type() {
        let mut v = base_json();
        v["conditional"] =
            json!({ "allowed": false, "type": "TriState" });
        let m = Model::from_json(&v, false).unwrap();
        assert_eq!(m.conditional, ConditionalStyle::No);
    }

    #[test]
    fn allowed_block_requires_type() {
        let mut v = base_json();
        v["conditional"] = json!({ "allowed": true });
        assert!(matches!(
            Model::from_json(&v, false),
            Err(ModelError::MissingKey { .. })
        ));
    }

    #[test]
    fn round_trip_preserves_shape() {
        let mut v = base_json();
        v["inter-loop-dependency"] =
            json!({ "allowed": true, "type": "BackwardInst" });
        let m = Model::from_json(&v, false).unwrap();
        let again = Model::from_json(&m.to_json(), false).unwrap();
        assert_eq!(m.category, again.category);
        assert_eq!(m.conditional, again.conditional);
        assert_eq!(m.inter_loop_dep, again.inter_loop_dep);
        assert_eq!(m.address_generator, again.address_generator);
    }

    #[test]
    fn both_const_sides_keep_lhs() {
        let mut v = base_json();
        v["instruction_map"] = json!([{
            "inst": "add",
            "map": "addi",
            "lhs": { "ConstantInt": 1 },
            "rhs": { "ConstantInt": 2 },
        }]);
        let m = Model::from_json(&v, false).unwrap();
        let entries = m.inst_map().entries();
        let entry = entries
            .iter()
            .find(|e| e.map_name() == "addi")
            .expect("conditional entry registered");
        assert_eq!(entry.opcode(), "add");
    }

    #[test]
    fn time_multiplexed_needs_no_ag() {
        let v = json!({
            "category": "time-multiplexed",
            "conditional": { "allowed": false },
            "inter-loop-dependency": { "allowed": false },
            "generic_instructions": ["add"],
            "custom_instructions": [],
        });
        let m = Model::from_json(&v, false).unwrap();
        assert_eq!(m.category, CgraCategory::TimeMultiplexed);
        assert!(m.address_generator.is_none());
    }
}
