//! The instruction mapping: which IR operations the target CGRA can
//! execute, and what each one is emitted as.
use crate::ModelError;
use cgraomp_ir::{
    BinOp, FuncId, Function, InstKind, Predicate, ValueId, ValueKind,
};
use linked_hash_map::LinkedHashMap;
use serde_json::{json, Value as Json};

/// Which side of an instruction a constant-operand condition binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Lhs,
    Rhs,
}

/// A constant-operand condition value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstOperand {
    Int(i64),
    Double(f64),
}

/// The condition attached to a map entry. An unspecified sub-clause
/// matches anything.
#[derive(Debug, Clone, PartialEq)]
pub struct MapCondition {
    map_name: String,
    flags: Vec<&'static str>,
    pred: Option<Predicate>,
    const_op: Option<(Side, ConstOperand)>,
}

impl MapCondition {
    pub fn new(map_name: impl ToString) -> Self {
        MapCondition {
            map_name: map_name.to_string(),
            flags: Vec::new(),
            pred: None,
            const_op: None,
        }
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    /// Require instruction flags. Unknown flag names are configuration
    /// errors.
    pub fn set_flags(&mut self, flags: &[String]) -> Result<(), ModelError> {
        for f in flags {
            match cgraomp_ir::InstFlags::NAMES
                .iter()
                .copied()
                .find(|&known| known == f.as_str())
            {
                Some(known) => self.flags.push(known),
                None => {
                    return Err(ModelError::bad_value(
                        "flags",
                        f,
                        cgraomp_ir::InstFlags::NAMES,
                    ))
                }
            }
        }
        Ok(())
    }

    /// Require a compare predicate. Unknown names are configuration errors.
    pub fn set_pred(&mut self, pred: &str) -> Result<(), ModelError> {
        match Predicate::parse(pred) {
            Some(p) => {
                self.pred = Some(p);
                Ok(())
            }
            None => Err(ModelError::bad_value(
                "pred",
                pred,
                &[
                    "eq", "ne", "ugt", "uge", "ult", "ule", "sgt", "sge",
                    "slt", "sle", "false", "oeq", "ogt", "oge", "olt", "ole",
                    "one", "ord", "ueq", "une", "uno", "true",
                ],
            )),
        }
    }

    /// Require a constant operand on one side. Only the first call binds;
    /// the caller is responsible for the lhs-beats-rhs rule.
    pub fn set_const(&mut self, side: Side, value: ConstOperand) {
        self.const_op = Some((side, value));
    }

    pub fn has_const(&self) -> bool {
        self.const_op.is_some()
    }

    /// Test the condition against an instruction.
    pub fn matches(&self, func: &Function, inst: ValueId) -> bool {
        let Some(ir_inst) = func.inst(inst) else {
            return false;
        };
        for flag in &self.flags {
            if !ir_inst.flags.get(flag).unwrap_or(false) {
                return false;
            }
        }
        if let Some(want) = self.pred {
            match &ir_inst.kind {
                InstKind::Cmp { pred, .. } if *pred == want => (),
                _ => return false,
            }
        }
        if let Some((side, want)) = self.const_op {
            let operands = func.operands(inst);
            let idx = match side {
                Side::Lhs => 0,
                Side::Rhs => 1,
            };
            let Some(&op) = operands.get(idx) else {
                return false;
            };
            let ok = match (&func.value(op).kind, want) {
                (
                    ValueKind::ConstInt { value },
                    ConstOperand::Int(expect),
                ) => *value == expect,
                (
                    ValueKind::ConstFloat { value },
                    ConstOperand::Double(expect),
                ) => equal_double(*value, expect),
                _ => false,
            };
            if !ok {
                return false;
            }
        }
        true
    }

    fn to_json(&self, opcode: &str) -> Json {
        let mut obj = serde_json::Map::new();
        obj.insert("inst".into(), json!(opcode));
        obj.insert("map".into(), json!(self.map_name));
        if !self.flags.is_empty() {
            obj.insert("flags".into(), json!(self.flags));
        }
        if let Some(p) = self.pred {
            obj.insert("pred".into(), json!(p.name()));
        }
        if let Some((side, value)) = self.const_op {
            let clause = match value {
                ConstOperand::Int(i) => json!({ "ConstantInt": i }),
                ConstOperand::Double(d) => json!({ "ConstantDouble": d }),
            };
            let key = match side {
                Side::Lhs => "lhs",
                Side::Rhs => "rhs",
            };
            obj.insert(key.into(), clause);
        }
        Json::Object(obj)
    }
}

/// Equality for doubles within machine epsilon, scaled by magnitude.
pub(crate) fn equal_double(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * 1f64.max(a.abs()).max(b.abs())
}

/// Kind of memory operation a [MapEntryKind::Memory] entry covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    Load,
    Store,
}

/// What class of instruction a map entry replaces.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEntryKind {
    BinaryOp(BinOp),
    Compare { integer: bool },
    Memory(MemKind),
    Custom { func_name: String },
}

/// One entry of the instruction mapping: an instruction class plus the
/// condition under which it maps.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    opcode: String,
    kind: MapEntryKind,
    cond: MapCondition,
    is_default: bool,
}

impl MapEntry {
    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    pub fn kind(&self) -> &MapEntryKind {
        &self.kind
    }

    /// The name the matched instruction is emitted as.
    pub fn map_name(&self) -> &str {
        self.cond.map_name()
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.kind, MapEntryKind::Custom { .. })
    }

    /// Does this entry cover the instruction? `is_custom_fn` answers
    /// whether a function is an annotated custom-instruction
    /// implementation.
    fn matches(
        &self,
        func: &Function,
        inst: ValueId,
        module_funcs: &dyn Fn(FuncId) -> String,
        is_custom_fn: &dyn Fn(FuncId) -> bool,
    ) -> bool {
        let Some(ir_inst) = func.inst(inst) else {
            return false;
        };
        let class_ok = match (&self.kind, &ir_inst.kind) {
            (MapEntryKind::BinaryOp(want), InstKind::Binary { op, .. }) => {
                want == op
            }
            (
                MapEntryKind::Compare { integer },
                InstKind::Cmp { pred, .. },
            ) => pred.is_integer() == *integer,
            (MapEntryKind::Memory(MemKind::Load), InstKind::Load { .. }) => {
                true
            }
            (
                MapEntryKind::Memory(MemKind::Store),
                InstKind::Store { .. },
            ) => true,
            (
                MapEntryKind::Custom { func_name },
                InstKind::Call { callee, .. },
            ) => {
                module_funcs(*callee) == *func_name && is_custom_fn(*callee)
            }
            _ => false,
        };
        class_ok && self.cond.matches(func, inst)
    }
}

/// The full instruction mapping: an ordered entry list plus a default-entry
/// table keyed by opcode. Adding a conditional entry for an opcode
/// displaces its default entry.
#[derive(Debug, Clone, Default)]
pub struct InstructionMap {
    entries: Vec<MapEntry>,
    /// opcode -> does a default entry currently exist. Keeps registration
    /// order for serialisation.
    registered: LinkedHashMap<String, bool>,
    custom_names: Vec<String>,
    verbose: bool,
}

impl InstructionMap {
    pub fn new(verbose: bool) -> Self {
        InstructionMap {
            verbose,
            ..Default::default()
        }
    }

    fn kind_for(&self, opcode: &str) -> Option<MapEntryKind> {
        if let Some(op) = BinOp::parse(opcode) {
            return Some(MapEntryKind::BinaryOp(op));
        }
        match opcode {
            "icmp" => Some(MapEntryKind::Compare { integer: true }),
            "fcmp" => Some(MapEntryKind::Compare { integer: false }),
            "load" => Some(MapEntryKind::Memory(MemKind::Load)),
            "store" => Some(MapEntryKind::Memory(MemKind::Store)),
            _ => self
                .custom_names
                .iter()
                .any(|n| n == opcode)
                .then(|| MapEntryKind::Custom {
                    func_name: opcode.to_string(),
                }),
        }
    }

    /// Register a generic instruction with a default (unconditional) entry.
    pub fn add_generic_inst(&mut self, opcode: &str) -> Result<(), ModelError> {
        if self.registered.contains_key(opcode) {
            if self.verbose {
                log::warn!("instruction \"{}\" is already added", opcode);
            }
            return Ok(());
        }
        let Some(kind) = self.kind_for(opcode) else {
            return Err(ModelError::bad_value(
                "generic_instructions",
                opcode,
                &[
                    "add", "fadd", "sub", "fsub", "mul", "fmul", "udiv",
                    "sdiv", "fdiv", "urem", "srem", "frem", "shl", "lshr",
                    "ashr", "and", "or", "xor", "icmp", "fcmp", "load",
                    "store",
                ],
            ));
        };
        self.entries.push(MapEntry {
            opcode: opcode.to_string(),
            kind,
            cond: MapCondition::new(opcode),
            is_default: true,
        });
        self.registered.insert(opcode.to_string(), true);
        Ok(())
    }

    /// Register a custom instruction implemented by the named function.
    pub fn add_custom_inst(&mut self, func_name: &str) {
        if self.registered.contains_key(func_name) {
            if self.verbose {
                log::warn!("instruction \"{}\" is already added", func_name);
            }
            return;
        }
        self.custom_names.push(func_name.to_string());
        self.entries.push(MapEntry {
            opcode: func_name.to_string(),
            kind: MapEntryKind::Custom {
                func_name: func_name.to_string(),
            },
            cond: MapCondition::new(func_name),
            is_default: true,
        });
        self.registered.insert(func_name.to_string(), true);
    }

    /// Append a conditional entry. The first conditional entry for an
    /// opcode erases the default entry that registration created.
    pub fn add_map_entry(
        &mut self,
        opcode: &str,
        cond: MapCondition,
    ) -> Result<(), ModelError> {
        let Some(has_default) = self.registered.get_mut(opcode) else {
            return Err(ModelError::bad_value(
                "instruction_map",
                opcode,
                &["<a registered generic or custom instruction>"],
            ));
        };
        if *has_default {
            self.entries
                .retain(|e| !(e.is_default && e.opcode == opcode));
            *has_default = false;
        }
        let kind = self
            .kind_for(opcode)
            .expect("registered opcode must have a kind");
        self.entries.push(MapEntry {
            opcode: opcode.to_string(),
            kind,
            cond,
            is_default: false,
        });
        Ok(())
    }

    /// First entry (in insertion order) whose class and condition match the
    /// instruction.
    pub fn find(
        &self,
        func: &Function,
        inst: ValueId,
        module_funcs: &dyn Fn(FuncId) -> String,
        is_custom_fn: &dyn Fn(FuncId) -> bool,
    ) -> Option<&MapEntry> {
        self.entries
            .iter()
            .find(|e| e.matches(func, inst, module_funcs, is_custom_fn))
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    /// Serialise the registration back to the machine-description schema:
    /// `(generic_instructions, custom_instructions, instruction_map)`.
    pub fn to_json(&self) -> (Json, Json, Json) {
        let generic: Vec<&str> = self
            .registered
            .keys()
            .map(|s| s.as_str())
            .filter(|op| !self.custom_names.iter().any(|c| c == *op))
            .collect();
        let custom: Vec<&str> =
            self.custom_names.iter().map(|s| s.as_str()).collect();
        let map: Vec<Json> = self
            .entries
            .iter()
            .filter(|e| !e.is_default)
            .map(|e| e.cond.to_json(&e.opcode))
            .collect();
        (json!(generic), json!(custom), json!(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgraomp_ir::{FunctionBuilder, InstFlags};

    fn add_function() -> (Function, ValueId, ValueId) {
        let mut fb = FunctionBuilder::new("f", vec![], None);
        let bb = fb.block("entry");
        fb.switch_to(bb);
        let a = fb.const_int(32, 7);
        let ten = fb.const_int(32, 10);
        let plain = fb.binary(BinOp::Add, a, a);
        let with_ten = fb.binary_flagged(
            BinOp::Add,
            a,
            ten,
            InstFlags {
                nsw: true,
                ..Default::default()
            },
        );
        fb.ret(None);
        (fb.finish(), plain, with_ten)
    }

    fn no_custom(_: FuncId) -> bool {
        false
    }
    fn no_name(_: FuncId) -> String {
        String::new()
    }

    #[test]
    fn default_entry_matches_any_add() {
        let (func, plain, _) = add_function();
        let mut im = InstructionMap::new(false);
        im.add_generic_inst("add").unwrap();
        let entry = im.find(&func, plain, &no_name, &no_custom).unwrap();
        assert_eq!(entry.map_name(), "add");
    }

    #[test]
    fn conditional_entry_displaces_default() {
        let (func, plain, with_ten) = add_function();
        let mut im = InstructionMap::new(false);
        im.add_generic_inst("add").unwrap();

        let mut cond = MapCondition::new("add10");
        cond.set_const(Side::Rhs, ConstOperand::Int(10));
        im.add_map_entry("add", cond).unwrap();

        // Default is gone: the plain add no longer matches.
        assert!(im.find(&func, plain, &no_name, &no_custom).is_none());
        let entry = im.find(&func, with_ten, &no_name, &no_custom).unwrap();
        assert_eq!(entry.map_name(), "add10");
    }

    #[test]
    fn flag_condition_filters() {
        let (func, plain, with_flags) = add_function();
        let mut im = InstructionMap::new(false);
        im.add_generic_inst("add").unwrap();
        let mut cond = MapCondition::new("addnsw");
        cond.set_flags(&["nsw".to_string()]).unwrap();
        im.add_map_entry("add", cond).unwrap();

        assert!(im.find(&func, plain, &no_name, &no_custom).is_none());
        assert!(im.find(&func, with_flags, &no_name, &no_custom).is_some());
    }

    #[test]
    fn unknown_flag_is_error() {
        let mut cond = MapCondition::new("x");
        assert!(cond.set_flags(&["warp".to_string()]).is_err());
    }

    #[test]
    fn unknown_opcode_is_error() {
        let mut im = InstructionMap::new(false);
        assert!(im.add_generic_inst("frobnicate").is_err());
    }

    #[test]
    fn double_equality_is_reflexive_and_symmetric() {
        for v in [0.0, 1.0, -3.25, 1e300, f64::MIN_POSITIVE] {
            assert!(equal_double(v, v));
        }
        let (a, b) = (0.1 + 0.2, 0.3);
        assert_eq!(equal_double(a, b), equal_double(b, a));
        assert!(equal_double(a, b));
    }

    #[test]
    fn find_is_stable() {
        let (func, _, with_ten) = add_function();
        let mut im = InstructionMap::new(false);
        im.add_generic_inst("add").unwrap();
        let first = im
            .find(&func, with_ten, &no_name, &no_custom)
            .map(|e| e.map_name().to_string());
        let second = im
            .find(&func, with_ten, &no_name, &no_custom)
            .map(|e| e.map_name().to_string());
        assert_eq!(first, second);
    }
}
