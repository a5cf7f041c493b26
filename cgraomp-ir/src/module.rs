use crate::{Function, Ty};
use serde::{Deserialize, Serialize};

/// Index of a function within its [Module].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
pub struct FuncId(pub u32);

/// Index of a global variable within its [Module].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
pub struct GlobalId(pub u32);

/// Constant initialiser data for globals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstData {
    Int { bits: u32, value: i64 },
    Float { bits: u32, value: f64 },
    Array(Vec<ConstData>),
    Struct(Vec<ConstData>),
    /// A reference to a function (e.g. an offload-entry descriptor field).
    FuncRef(FuncId),
    GlobalRef(GlobalId),
    Zero,
}

impl ConstData {
    /// Index into an array initialiser.
    pub fn element(&self, idx: u64) -> Option<&ConstData> {
        match self {
            ConstData::Array(elems) | ConstData::Struct(elems) => {
                elems.get(idx as usize)
            }
            _ => None,
        }
    }
}

/// A module-level global variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    /// Type of the pointed-to data; the global itself is a pointer to it.
    pub ty: Ty,
    /// True for read-only data (constant initialisers may be folded).
    pub is_constant: bool,
    pub initializer: Option<ConstData>,
}

/// One entry of the module's function-annotation sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub function: FuncId,
    pub tag: String,
}

/// Offload-info metadata describing one outlined target region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadEntry {
    pub device_id: i64,
    pub file_id: i64,
    /// Name of the source function the region was outlined from.
    pub func_name: String,
    /// Source line of the OpenMP construct.
    pub line: u32,
    /// Declaration order of the region within the module.
    pub order: u32,
}

/// A translation unit: globals, functions, and the metadata the OpenMP
/// offloading front-end leaves behind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    /// Path of the source module, used to place output next to it.
    pub source_path: Option<String>,
    pub globals: Vec<GlobalVariable>,
    pub functions: Vec<Function>,
    pub annotations: Vec<Annotation>,
    pub offload_info: Vec<OffloadEntry>,
}

impl Module {
    pub fn new(name: impl ToString) -> Self {
        Module {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVariable {
        &self.globals[id.0 as usize]
    }

    pub fn func_ids(&self) -> impl Iterator<Item = FuncId> {
        (0..self.functions.len() as u32).map(FuncId)
    }

    /// Look up a function by name.
    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    /// Look up a global by name.
    pub fn find_global(&self, name: &str) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|g| g.name == name)
            .map(|i| GlobalId(i as u32))
    }
}
