//! Function-annotation analysis: which tags each function carries in the
//! module-level annotation sink.
use cgraomp_ir::{FuncId, Module};
use std::collections::HashMap;

/// The tag marking a function as a custom-instruction implementation.
pub const CGRA_CUSTOM_INST_ATTR: &str = "cgra_custom_inst";

/// Module-scope map from function to its annotation tags. Computed once and
/// cached for the module's lifetime.
#[derive(Debug, Clone, Default)]
pub struct AnnotationAnalysis {
    tags: HashMap<FuncId, Vec<String>>,
}

impl AnnotationAnalysis {
    pub fn new(module: &Module) -> Self {
        let mut tags: HashMap<FuncId, Vec<String>> = HashMap::new();
        for ann in &module.annotations {
            let set = tags.entry(ann.function).or_default();
            // Tag sets keep first-insertion order and stay duplicate-free.
            if !set.contains(&ann.tag) {
                set.push(ann.tag.clone());
            }
        }
        AnnotationAnalysis { tags }
    }

    pub fn tags_of(&self, func: FuncId) -> &[String] {
        self.tags.get(&func).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, func: FuncId, tag: &str) -> bool {
        self.tags_of(func).iter().any(|t| t == tag)
    }

    /// True when the function is an annotated custom-instruction
    /// implementation.
    pub fn is_custom_inst(&self, func: FuncId) -> bool {
        self.contains(func, CGRA_CUSTOM_INST_ATTR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgraomp_ir::ModuleBuilder;

    #[test]
    fn custom_inst_tag_is_recognised() {
        let mut mb = ModuleBuilder::new("m");
        let f = mb.declare("fma", vec![], None);
        let g = mb.declare("other", vec![], None);
        mb.annotate(f, CGRA_CUSTOM_INST_ATTR);
        mb.annotate(f, CGRA_CUSTOM_INST_ATTR);
        mb.annotate(g, "unrelated");
        let module = mb.finish();

        let ann = AnnotationAnalysis::new(&module);
        assert!(ann.is_custom_inst(f));
        assert!(!ann.is_custom_inst(g));
        assert_eq!(ann.tags_of(f).len(), 1);
    }
}
