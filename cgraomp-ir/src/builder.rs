//! Builders used by tests and by front-end shims to assemble modules.
use crate::{
    Annotation, BinOp, Block, BlockId, CastOp, ConstData, FuncId, Function,
    GlobalId, GlobalVariable, Inst, InstFlags, InstKind, Module, OffloadEntry,
    Predicate, Ty, Value, ValueId, ValueKind,
};

/// Incrementally builds a [Module].
#[derive(Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new(name: impl ToString) -> Self {
        ModuleBuilder {
            module: Module::new(name),
        }
    }

    pub fn source_path(&mut self, path: impl ToString) -> &mut Self {
        self.module.source_path = Some(path.to_string());
        self
    }

    pub fn add_global(
        &mut self,
        name: impl ToString,
        ty: Ty,
        is_constant: bool,
        initializer: Option<ConstData>,
    ) -> GlobalId {
        self.module.globals.push(GlobalVariable {
            name: name.to_string(),
            ty,
            is_constant,
            initializer,
        });
        GlobalId(self.module.globals.len() as u32 - 1)
    }

    pub fn add_function(&mut self, func: Function) -> FuncId {
        self.module.functions.push(func);
        FuncId(self.module.functions.len() as u32 - 1)
    }

    /// Declare an external function (no body).
    pub fn declare(
        &mut self,
        name: impl ToString,
        params: Vec<(String, Ty)>,
        ret_ty: Option<Ty>,
    ) -> FuncId {
        self.add_function(Function {
            name: name.to_string(),
            params,
            ret_ty,
            is_declaration: true,
            ..Default::default()
        })
    }

    pub fn annotate(&mut self, function: FuncId, tag: impl ToString) {
        self.module.annotations.push(Annotation {
            function,
            tag: tag.to_string(),
        });
    }

    pub fn add_offload_entry(&mut self, entry: OffloadEntry) {
        self.module.offload_info.push(entry);
    }

    pub fn finish(self) -> Module {
        self.module
    }
}

/// Incrementally builds a [Function], LLVM-IRBuilder style: create blocks,
/// position at one, append instructions.
pub struct FunctionBuilder {
    func: Function,
    cursor: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(
        name: impl ToString,
        params: Vec<(&str, Ty)>,
        ret_ty: Option<Ty>,
    ) -> Self {
        let mut func = Function {
            name: name.to_string(),
            params: params
                .iter()
                .map(|(n, t)| (n.to_string(), t.clone()))
                .collect(),
            ret_ty,
            ..Default::default()
        };
        for (i, (n, t)) in params.into_iter().enumerate() {
            func.values.push(Value {
                name: Some(n.to_string()),
                ty: t,
                kind: ValueKind::Argument { index: i as u32 },
            });
        }
        FunctionBuilder { func, cursor: None }
    }

    /// The value representing parameter `index`.
    pub fn arg(&self, index: u32) -> ValueId {
        ValueId(index)
    }

    pub fn block(&mut self, name: impl ToString) -> BlockId {
        self.func.blocks.push(Block {
            name: name.to_string(),
            insts: Vec::new(),
        });
        BlockId(self.func.blocks.len() as u32 - 1)
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.cursor = Some(block);
    }

    fn push_value(&mut self, value: Value) -> ValueId {
        self.func.values.push(value);
        ValueId(self.func.values.len() as u32 - 1)
    }

    fn push_inst(&mut self, kind: InstKind, ty: Ty) -> ValueId {
        self.push_inst_flagged(kind, ty, InstFlags::default())
    }

    fn push_inst_flagged(
        &mut self,
        kind: InstKind,
        ty: Ty,
        flags: InstFlags,
    ) -> ValueId {
        let block = self.cursor.expect("no insertion block set");
        let id = self.push_value(Value {
            name: None,
            ty,
            kind: ValueKind::Inst(Inst { kind, block, flags }),
        });
        self.func.blocks[block.0 as usize].insts.push(id);
        id
    }

    pub fn name_value(&mut self, id: ValueId, name: impl ToString) {
        self.func.values[id.0 as usize].name = Some(name.to_string());
    }

    pub fn const_int(&mut self, bits: u32, value: i64) -> ValueId {
        self.push_value(Value {
            name: None,
            ty: Ty::Int(bits),
            kind: ValueKind::ConstInt { value },
        })
    }

    pub fn const_float(&mut self, bits: u32, value: f64) -> ValueId {
        self.push_value(Value {
            name: None,
            ty: Ty::Float(bits),
            kind: ValueKind::ConstFloat { value },
        })
    }

    /// Materialise a reference to a module global. `ty` is the pointed-to
    /// type; the value is a pointer to it.
    pub fn global_ref(
        &mut self,
        global: GlobalId,
        name: impl ToString,
        ty: Ty,
    ) -> ValueId {
        self.push_value(Value {
            name: Some(name.to_string()),
            ty: Ty::ptr(ty),
            kind: ValueKind::Global(global),
        })
    }

    /// Materialise a function reference value.
    pub fn func_ref(&mut self, func: FuncId) -> ValueId {
        self.push_value(Value {
            name: None,
            ty: Ty::ptr(Ty::Void),
            kind: ValueKind::FuncRef(func),
        })
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.func.ty(lhs).clone();
        self.push_inst(InstKind::Binary { op, lhs, rhs }, ty)
    }

    pub fn binary_flagged(
        &mut self,
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
        flags: InstFlags,
    ) -> ValueId {
        let ty = self.func.ty(lhs).clone();
        self.push_inst_flagged(InstKind::Binary { op, lhs, rhs }, ty, flags)
    }

    pub fn cmp(&mut self, pred: Predicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push_inst(InstKind::Cmp { pred, lhs, rhs }, Ty::Int(1))
    }

    pub fn load(&mut self, ptr: ValueId) -> ValueId {
        let ty = self
            .func
            .ty(ptr)
            .pointee()
            .cloned()
            .expect("load from non-pointer");
        self.push_inst(InstKind::Load { ptr }, ty)
    }

    pub fn store(&mut self, value: ValueId, ptr: ValueId) -> ValueId {
        self.push_inst(InstKind::Store { value, ptr }, Ty::Void)
    }

    /// `gep` with LLVM semantics: the result points at the element reached
    /// by stepping `base` with the given indices.
    pub fn gep(&mut self, base: ValueId, indices: Vec<ValueId>) -> ValueId {
        let mut ty = self
            .func
            .ty(base)
            .pointee()
            .cloned()
            .expect("gep on non-pointer");
        // The first index steps over whole pointees; the rest descend.
        for _ in 1..indices.len() {
            ty = match ty {
                Ty::Array { elem, .. } => (*elem).clone(),
                other => other,
            };
        }
        self.push_inst(InstKind::Gep { base, indices }, Ty::ptr(ty))
    }

    pub fn cast(&mut self, op: CastOp, arg: ValueId, ty: Ty) -> ValueId {
        self.push_inst(InstKind::Cast { op, arg }, ty)
    }

    pub fn phi(&mut self, ty: Ty) -> ValueId {
        self.push_inst(
            InstKind::Phi {
                incoming: Vec::new(),
            },
            ty,
        )
    }

    pub fn phi_add_incoming(
        &mut self,
        phi: ValueId,
        value: ValueId,
        block: BlockId,
    ) {
        let ValueKind::Inst(inst) = &mut self.func.values[phi.0 as usize].kind
        else {
            panic!("phi_add_incoming on non-instruction");
        };
        let InstKind::Phi { incoming } = &mut inst.kind else {
            panic!("phi_add_incoming on non-phi");
        };
        incoming.push((value, block));
    }

    pub fn call(
        &mut self,
        callee: FuncId,
        args: Vec<ValueId>,
        ret_ty: Ty,
    ) -> ValueId {
        self.push_inst(InstKind::Call { callee, args }, ret_ty)
    }

    pub fn select(
        &mut self,
        cond: ValueId,
        then_val: ValueId,
        else_val: ValueId,
    ) -> ValueId {
        let ty = self.func.ty(then_val).clone();
        self.push_inst(
            InstKind::Select {
                cond,
                then_val,
                else_val,
            },
            ty,
        )
    }

    pub fn br(&mut self, dest: BlockId) -> ValueId {
        self.push_inst(InstKind::Br { dest }, Ty::Void)
    }

    pub fn cond_br(
        &mut self,
        cond: ValueId,
        then_dest: BlockId,
        else_dest: BlockId,
    ) -> ValueId {
        self.push_inst(
            InstKind::CondBr {
                cond,
                then_dest,
                else_dest,
            },
            Ty::Void,
        )
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> ValueId {
        self.push_inst(InstKind::Ret { value }, Ty::Void)
    }

    pub fn alloca(&mut self, ty: Ty) -> ValueId {
        self.push_inst(InstKind::Alloca { ty: ty.clone() }, Ty::ptr(ty))
    }

    pub fn finish(self) -> Function {
        self.func
    }
}
