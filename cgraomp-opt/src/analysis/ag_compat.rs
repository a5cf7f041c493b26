//! Affine address-generator verification: every memory access of a
//! decoupled kernel must evolve as a base plus constant-stride induction
//! terms, one dimension per loop level.
use cgraomp_ir::{
    Function, InstKind, ScalarEvolution, Scev, ScevRef, ValueId,
};
use linked_hash_map::LinkedHashMap;
use serde_json::{json, Value as Json};

/// One loop dimension of an access: first element offset, element stride,
/// and static trip count (0 when the trip count is not compile-time
/// known).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgDimension {
    pub start: i64,
    pub step: i64,
    pub count: u64,
}

/// The address-generator configuration of one memory access.
#[derive(Debug, Clone, Default)]
pub struct AgAccessConfig {
    pub valid: bool,
    /// Innermost dimension first.
    pub dimensions: Vec<AgDimension>,
    /// The symbolic base pointer, when exactly one unknown term remained.
    pub base: Option<ValueId>,
}

impl AgAccessConfig {
    /// Serialisable form: `{ "base": <name or "unknown">, "offset": [...] }`.
    pub fn to_json(&self, func: &Function) -> Json {
        json!({
            "base": self
                .base
                .map(|b| func.value_name(b))
                .unwrap_or_else(|| "unknown".to_string()),
            "offset": self
                .dimensions
                .iter()
                .map(|d| json!({
                    "start": d.start,
                    "step": d.step,
                    "count": d.count,
                }))
                .collect::<Vec<_>>(),
        })
    }
}

/// AG verification result for one kernel: a configuration per memory
/// access, in program order.
#[derive(Debug, Clone, Default)]
pub struct AffineAgCompatibility {
    configs: LinkedHashMap<ValueId, AgAccessConfig>,
}

impl AffineAgCompatibility {
    pub fn run(
        func: &Function,
        se: &mut ScalarEvolution,
        accesses: &[ValueId],
        max_nests: Option<u32>,
    ) -> Self {
        let mut result = AffineAgCompatibility::default();
        for &access in accesses {
            let config = analyze_access(func, se, access, max_nests);
            result.configs.insert(access, config);
        }
        result
    }

    /// The kernel is AG-compatible iff every access configuration is
    /// valid.
    pub fn is_compatible(&self) -> bool {
        self.configs.values().all(|c| c.valid)
    }

    pub fn config(&self, access: ValueId) -> Option<&AgAccessConfig> {
        self.configs.get(&access)
    }

    pub fn configs(
        &self,
    ) -> impl Iterator<Item = (&ValueId, &AgAccessConfig)> {
        self.configs.iter()
    }

    pub fn num_invalid(&self) -> usize {
        self.configs.values().filter(|c| !c.valid).count()
    }
}

fn analyze_access(
    func: &Function,
    se: &mut ScalarEvolution,
    access: ValueId,
    max_nests: Option<u32>,
) -> AgAccessConfig {
    let (ptr, elem_bytes) = match func.inst(access).map(|i| &i.kind) {
        Some(InstKind::Load { ptr }) => {
            (*ptr, func.ty(access).byte_size())
        }
        Some(InstKind::Store { value, ptr }) => {
            (*ptr, func.ty(*value).byte_size())
        }
        _ => return AgAccessConfig::default(),
    };
    let elem = elem_bytes.max(1) as i64;
    let scev = se.scev_of(ptr);

    let mut walk = ScevWalk {
        se,
        elem,
        dims: Vec::new(),
        const_offset: 0,
        unknowns: Vec::new(),
        valid: true,
    };
    walk.decompose(&scev, true);

    let mut config = AgAccessConfig {
        valid: walk.valid,
        dimensions: walk.dims,
        base: None,
    };
    match walk.unknowns.as_slice() {
        [one] => config.base = Some(*one),
        [] => (),
        _ => config.valid = false,
    }
    // The residual constant offset belongs to the innermost dimension.
    if let Some(first) = config.dimensions.first_mut() {
        first.start += walk.const_offset / elem;
    }
    if config.dimensions.is_empty() {
        config.valid = false;
    }
    if let Some(limit) = max_nests {
        if config.dimensions.len() as u32 > limit {
            log::warn!(
                "access {} spans {} loop levels but the address generator \
                 supports {}",
                func.value_name(access),
                config.dimensions.len(),
                limit
            );
            config.valid = false;
        }
    }
    config
}

struct ScevWalk<'a, 'f> {
    se: &'a mut ScalarEvolution<'f>,
    elem: i64,
    dims: Vec<AgDimension>,
    const_offset: i64,
    unknowns: Vec<ValueId>,
    valid: bool,
}

impl ScevWalk<'_, '_> {
    /// Structural case analysis over the SCEV tree. `rec_allowed` is
    /// cleared once the walk leaves the add-recurrence spine: a recurrence
    /// showing up under a sum, product, or cast is not an affine access.
    fn decompose(&mut self, scev: &ScevRef, rec_allowed: bool) {
        if !self.valid {
            return;
        }
        match &**scev {
            Scev::AddRec {
                start,
                step,
                loop_id,
            } => {
                if !rec_allowed {
                    self.valid = false;
                    return;
                }
                let Some(step) = step.constant() else {
                    self.valid = false;
                    return;
                };
                let count =
                    self.se.trip_count(*loop_id).unwrap_or(0);
                self.dims.push(AgDimension {
                    start: 0,
                    step: step / self.elem,
                    count,
                });
                self.decompose(start, true);
            }
            Scev::Constant(c) => self.const_offset += c,
            Scev::Unknown(v) => self.unknowns.push(*v),
            Scev::Add(terms) => {
                for t in terms {
                    self.decompose(t, false);
                }
            }
            Scev::Mul(terms) => {
                // Constant factors are scales, not offsets; anything else
                // below a product must still be recurrence-free.
                for t in terms {
                    if t.constant().is_none() {
                        self.decompose(t, false);
                    }
                }
            }
            Scev::Cast { inner, .. } => self.decompose(inner, false),
        }
    }
}
