use crate::{FuncId, GlobalId, Ty};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Index of a value within its [Function]'s arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
pub struct ValueId(pub u32);

/// Index of a basic block within its [Function].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
pub struct BlockId(pub u32);

/// Binary operators. Integer and floating-point forms are distinct opcodes,
/// matching the opcode strings accepted by the machine description.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum BinOp {
    Add,
    FAdd,
    Sub,
    FSub,
    Mul,
    FMul,
    UDiv,
    SDiv,
    FDiv,
    URem,
    SRem,
    FRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn name(&self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::FAdd => "fadd",
            BinOp::Sub => "sub",
            BinOp::FSub => "fsub",
            BinOp::Mul => "mul",
            BinOp::FMul => "fmul",
            BinOp::UDiv => "udiv",
            BinOp::SDiv => "sdiv",
            BinOp::FDiv => "fdiv",
            BinOp::URem => "urem",
            BinOp::SRem => "srem",
            BinOp::FRem => "frem",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        }
    }

    /// Parse an opcode string from a machine description.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "add" => BinOp::Add,
            "fadd" => BinOp::FAdd,
            "sub" => BinOp::Sub,
            "fsub" => BinOp::FSub,
            "mul" => BinOp::Mul,
            "fmul" => BinOp::FMul,
            "udiv" => BinOp::UDiv,
            "sdiv" => BinOp::SDiv,
            "fdiv" => BinOp::FDiv,
            "urem" => BinOp::URem,
            "srem" => BinOp::SRem,
            "frem" => BinOp::FRem,
            "shl" => BinOp::Shl,
            "lshr" => BinOp::LShr,
            "ashr" => BinOp::AShr,
            "and" => BinOp::And,
            "or" => BinOp::Or,
            "xor" => BinOp::Xor,
            _ => return None,
        })
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            BinOp::FAdd
                | BinOp::FSub
                | BinOp::FMul
                | BinOp::FDiv
                | BinOp::FRem
        )
    }
}

/// Comparison predicates shared by integer and floating-point compares.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[allow(clippy::upper_case_acronyms)]
pub enum Predicate {
    // icmp
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
    // fcmp
    False,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Ueq,
    FUgt,
    FUge,
    FUlt,
    FUle,
    Une,
    Uno,
    True,
}

impl Predicate {
    /// True for the integer-compare predicates.
    pub fn is_integer(&self) -> bool {
        use Predicate::*;
        matches!(
            self,
            Eq | Ne | Ugt | Uge | Ult | Ule | Sgt | Sge | Slt | Sle
        )
    }

    /// The name used in machine descriptions.
    pub fn name(&self) -> &'static str {
        use Predicate::*;
        match self {
            Eq => "eq",
            Ne => "ne",
            Ugt | FUgt => "ugt",
            Uge | FUge => "uge",
            Ult | FUlt => "ult",
            Ule | FUle => "ule",
            Sgt => "sgt",
            Sge => "sge",
            Slt => "slt",
            Sle => "sle",
            False => "false",
            Oeq => "oeq",
            Ogt => "ogt",
            Oge => "oge",
            Olt => "olt",
            Ole => "ole",
            One => "one",
            Ord => "ord",
            Ueq => "ueq",
            Une => "une",
            Uno => "uno",
            True => "true",
        }
    }

    /// Parse a predicate name as it appears in a machine description.
    /// Integer predicate names win over the identically-named unordered
    /// float predicates; the compare's operand type disambiguates later.
    pub fn parse(name: &str) -> Option<Self> {
        use Predicate::*;
        Some(match name {
            "eq" => Eq,
            "ne" => Ne,
            "ugt" => Ugt,
            "uge" => Uge,
            "ult" => Ult,
            "ule" => Ule,
            "sgt" => Sgt,
            "sge" => Sge,
            "slt" => Slt,
            "sle" => Sle,
            "false" => False,
            "oeq" => Oeq,
            "ogt" => Ogt,
            "oge" => Oge,
            "olt" => Olt,
            "ole" => Ole,
            "one" => One,
            "ord" => Ord,
            "ueq" => Ueq,
            "une" => Une,
            "uno" => Uno,
            "true" => True,
            _ => return None,
        })
    }
}

/// Cast operators. Only the value-preserving subset the pipeline cares
/// about is modelled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum CastOp {
    Trunc,
    SExt,
    ZExt,
    BitCast,
    PtrToInt,
    FpToSi,
    SiToFp,
}

impl CastOp {
    pub fn name(&self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::SExt => "sext",
            CastOp::ZExt => "zext",
            CastOp::BitCast => "bitcast",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::FpToSi => "fptosi",
            CastOp::SiToFp => "sitofp",
        }
    }

    /// Casts that are transparently skipped when chasing a loop-invariant
    /// operand to its source: truncating, widening, and bit casts.
    pub fn is_transparent(&self) -> bool {
        matches!(
            self,
            CastOp::Trunc | CastOp::SExt | CastOp::ZExt | CastOp::BitCast
        )
    }
}

/// Fast-math and integer poison flags attached to instructions.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct InstFlags {
    pub nuw: bool,
    pub nsw: bool,
    pub exact: bool,
    pub fast: bool,
    pub nnan: bool,
    pub ninf: bool,
    pub nsz: bool,
    pub arcp: bool,
    pub contract: bool,
    pub afn: bool,
    pub reassoc: bool,
}

impl InstFlags {
    pub const NAMES: &'static [&'static str] = &[
        "nuw", "nsw", "exact", "fast", "nnan", "ninf", "nsz", "arcp",
        "contract", "afn", "reassoc",
    ];

    /// Query a flag by the name used in machine descriptions. `None` for an
    /// unknown flag name.
    pub fn get(&self, name: &str) -> Option<bool> {
        Some(match name {
            "nuw" => self.nuw,
            "nsw" => self.nsw,
            "exact" => self.exact,
            "fast" => self.fast,
            "nnan" => self.nnan,
            "ninf" => self.ninf,
            "nsz" => self.nsz,
            "arcp" => self.arcp,
            "contract" => self.contract,
            "afn" => self.afn,
            "reassoc" => self.reassoc,
            _ => return None,
        })
    }

    pub fn fast() -> Self {
        InstFlags {
            fast: true,
            ..Default::default()
        }
    }
}

/// The instruction variants of the IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstKind {
    Binary {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cmp {
        pred: Predicate,
        lhs: ValueId,
        rhs: ValueId,
    },
    Load {
        ptr: ValueId,
    },
    Store {
        value: ValueId,
        ptr: ValueId,
    },
    /// Pointer indexing: `base` is stepped by each index scaled by the size
    /// of the type level it addresses.
    Gep {
        base: ValueId,
        indices: Vec<ValueId>,
    },
    Cast {
        op: CastOp,
        arg: ValueId,
    },
    Phi {
        incoming: Vec<(ValueId, BlockId)>,
    },
    /// Calls hold the callee out-of-band; the operand list is the argument
    /// list only, so operand indices are argument positions.
    Call {
        callee: FuncId,
        args: Vec<ValueId>,
    },
    Select {
        cond: ValueId,
        then_val: ValueId,
        else_val: ValueId,
    },
    Br {
        dest: BlockId,
    },
    CondBr {
        cond: ValueId,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    Ret {
        value: Option<ValueId>,
    },
    /// Stack allocation of a local.
    Alloca {
        ty: Ty,
    },
}

/// An instruction, placed in a block, defining the value it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inst {
    pub kind: InstKind,
    pub block: BlockId,
    #[serde(default)]
    pub flags: InstFlags,
}

/// What a value is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueKind {
    Argument { index: u32 },
    ConstInt { value: i64 },
    ConstFloat { value: f64 },
    Global(GlobalId),
    /// A function used as a value (e.g. the outlined task passed to the
    /// parallel-fork runtime entry).
    FuncRef(FuncId),
    Inst(Inst),
}

/// A value in the function-level arena: an argument, a constant literal, a
/// global reference, or an instruction result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub name: Option<String>,
    pub ty: Ty,
    pub kind: ValueKind,
}

/// A basic block: a name and the instruction values it contains, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub insts: Vec<ValueId>,
}

/// A function: parameters, return type, and an arena of values organised
/// into basic blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, Ty)>,
    pub ret_ty: Option<Ty>,
    pub is_declaration: bool,
    pub values: Vec<Value>,
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    pub fn ty(&self, id: ValueId) -> &Ty {
        &self.value(id).ty
    }

    /// The instruction behind a value, if it is one.
    pub fn inst(&self, id: ValueId) -> Option<&Inst> {
        match &self.value(id).kind {
            ValueKind::Inst(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn is_constant(&self, id: ValueId) -> bool {
        matches!(
            self.value(id).kind,
            ValueKind::ConstInt { .. } | ValueKind::ConstFloat { .. }
        )
    }

    /// Printable name of a value: its symbolic name when present, otherwise
    /// `%<index>`.
    pub fn value_name(&self, id: ValueId) -> String {
        match &self.value(id).name {
            Some(n) => n.clone(),
            None => format!("%{}", id.0),
        }
    }

    /// Opcode string of an instruction value, the way the machine
    /// description spells it.
    pub fn opcode_name(&self, id: ValueId) -> Option<&'static str> {
        let inst = self.inst(id)?;
        Some(match &inst.kind {
            InstKind::Binary { op, .. } => op.name(),
            InstKind::Cmp { pred, .. } => {
                if pred.is_integer() {
                    "icmp"
                } else {
                    "fcmp"
                }
            }
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::Gep { .. } => "getelementptr",
            InstKind::Cast { op, .. } => op.name(),
            InstKind::Phi { .. } => "phi",
            InstKind::Call { .. } => "call",
            InstKind::Select { .. } => "select",
            InstKind::Br { .. } | InstKind::CondBr { .. } => "br",
            InstKind::Ret { .. } => "ret",
            InstKind::Alloca { .. } => "alloca",
        })
    }

    /// Data operands of an instruction in positional order. Call operands
    /// are argument positions (the callee is not an operand); store operands
    /// are `[value, ptr]`.
    pub fn operands(&self, id: ValueId) -> SmallVec<[ValueId; 4]> {
        let Some(inst) = self.inst(id) else {
            return SmallVec::new();
        };
        match &inst.kind {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::Cmp { lhs, rhs, .. } => {
                SmallVec::from_slice(&[*lhs, *rhs])
            }
            InstKind::Load { ptr } => SmallVec::from_slice(&[*ptr]),
            InstKind::Store { value, ptr } => {
                SmallVec::from_slice(&[*value, *ptr])
            }
            InstKind::Gep { base, indices } => {
                let mut ops = SmallVec::from_slice(&[*base]);
                ops.extend(indices.iter().copied());
                ops
            }
            InstKind::Cast { arg, .. } => SmallVec::from_slice(&[*arg]),
            InstKind::Phi { incoming } => {
                incoming.iter().map(|(v, _)| *v).collect()
            }
            InstKind::Call { args, .. } => args.iter().copied().collect(),
            InstKind::Select {
                cond,
                then_val,
                else_val,
            } => SmallVec::from_slice(&[*cond, *then_val, *else_val]),
            InstKind::CondBr { cond, .. } => SmallVec::from_slice(&[*cond]),
            InstKind::Ret { value } => value.iter().copied().collect(),
            InstKind::Br { .. } | InstKind::Alloca { .. } => SmallVec::new(),
        }
    }

    /// Successor blocks of a block, read off its terminator.
    pub fn successors(&self, block: BlockId) -> SmallVec<[BlockId; 2]> {
        let Some(&term) = self.block(block).insts.last() else {
            return SmallVec::new();
        };
        match self.inst(term).map(|i| &i.kind) {
            Some(InstKind::Br { dest }) => SmallVec::from_slice(&[*dest]),
            Some(InstKind::CondBr {
                then_dest,
                else_dest,
                ..
            }) => SmallVec::from_slice(&[*then_dest, *else_dest]),
            _ => SmallVec::new(),
        }
    }

    /// Predecessor map of the whole CFG.
    pub fn predecessors(&self) -> HashMap<BlockId, Vec<BlockId>> {
        let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for bb in self.block_ids() {
            for succ in self.successors(bb) {
                preds.entry(succ).or_default().push(bb);
            }
        }
        preds
    }

    /// Use map: for every value, the instruction values consuming it.
    /// Recomputed on demand; the IR is small and analysis-only.
    pub fn users(&self) -> HashMap<ValueId, Vec<ValueId>> {
        let mut users: HashMap<ValueId, Vec<ValueId>> = HashMap::new();
        for bb in &self.blocks {
            for &inst_id in &bb.insts {
                for op in self.operands(inst_id) {
                    users.entry(op).or_default().push(inst_id);
                }
            }
        }
        users
    }

    /// All instruction values, in block order.
    pub fn insts_in_order(&self) -> Vec<ValueId> {
        self.blocks
            .iter()
            .flat_map(|bb| bb.insts.iter().copied())
            .collect()
    }

    /// Erase an instruction from its block. The arena slot stays behind (ids
    /// are stable); the value simply stops being part of any block.
    pub fn erase_inst(&mut self, id: ValueId) {
        if let Some(inst) = self.inst(id) {
            let bb = inst.block;
            self.blocks[bb.0 as usize].insts.retain(|&v| v != id);
        }
    }
}
