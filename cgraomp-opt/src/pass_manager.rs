//! The DFG pass pipeline: an ordered list of graph-rewriting passes,
//! resolved by name through registered parsing callbacks, extensible with
//! dynamically loaded plugins.
use crate::dfg::Dfg;
use cgraomp_ir::{Function, LoopId, LoopInfo};
use cgraomp_utils::{CgraResult, Error};
use std::ffi::CStr;
use std::os::raw::c_char;
use std::path::Path;

/// A transformation over one kernel DFG.
pub trait DfgPass {
    fn name(&self) -> &'static str;

    /// Run over the graph; returns whether the graph changed.
    fn run(
        &self,
        graph: &mut Dfg,
        func: &Function,
        li: &LoopInfo,
        kernel: LoopId,
    ) -> bool;
}

/// Runs an ordered pipeline of [DfgPass]es.
#[derive(Default)]
pub struct DfgPassManager {
    pipeline: Vec<Box<dyn DfgPass>>,
}

impl DfgPassManager {
    pub fn add_pass(&mut self, pass: Box<dyn DfgPass>) {
        self.pipeline.push(pass);
    }

    pub fn is_empty(&self) -> bool {
        self.pipeline.is_empty()
    }

    /// Invoke each pass in registration order; true when any pass changed
    /// the graph.
    pub fn run(
        &self,
        graph: &mut Dfg,
        func: &Function,
        li: &LoopInfo,
        kernel: LoopId,
    ) -> bool {
        let mut changed = false;
        for pass in &self.pipeline {
            log::debug!("applying {}", pass.name());
            changed |= pass.run(graph, func, li, kernel);
        }
        changed
    }
}

/// The C-ABI description a plugin's entry point returns.
#[repr(C)]
pub struct DfgPassPluginInfo {
    /// Plugin display name.
    pub name: *const c_char,
    /// Called once at load time; pushes parsing callbacks into the
    /// builder.
    pub register: unsafe extern "C" fn(*mut DfgPassBuilder),
}

/// Exported entry-point symbol every plugin must define.
pub const PLUGIN_ENTRY_SYMBOL: &[u8] = b"get_dfg_pass_plugin_info";

type PluginEntry = unsafe extern "C" fn() -> DfgPassPluginInfo;

/// Callback claiming pass names: returns true when it recognised the name
/// and pushed the pass.
pub type ParseCallback = Box<dyn Fn(&str, &mut DfgPassManager) -> bool>;

/// Resolves pass names to passes. Built-in passes register first, plugin
/// callbacks append in load order.
pub struct DfgPassBuilder {
    callbacks: Vec<ParseCallback>,
}

impl Default for DfgPassBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DfgPassBuilder {
    pub fn new() -> Self {
        let mut builder = DfgPassBuilder {
            callbacks: Vec::new(),
        };
        crate::passes::register_builtins(&mut builder);
        builder
    }

    pub fn register_pipeline_parsing_callback(&mut self, cb: ParseCallback) {
        self.callbacks.push(cb);
    }

    /// Load a plugin library and let it register its callbacks. The
    /// library stays resident for the rest of the process: symbols handed
    /// out by the plugin must never dangle.
    pub fn load_plugin(&mut self, path: &Path) -> CgraResult<()> {
        let lib = unsafe { libloading::Library::new(path) }.map_err(|e| {
            Error::plugin(format!(
                "failed to load {}: {}",
                path.display(),
                e
            ))
        })?;
        let info = unsafe {
            let entry: libloading::Symbol<PluginEntry> =
                lib.get(PLUGIN_ENTRY_SYMBOL).map_err(|_| {
                    Error::plugin(format!(
                        "get_dfg_pass_plugin_info is not implemented in {}",
                        path.display()
                    ))
                })?;
            entry()
        };
        unsafe { (info.register)(self as *mut DfgPassBuilder) };
        let name = if info.name.is_null() {
            "<unnamed>".to_string()
        } else {
            unsafe { CStr::from_ptr(info.name) }
                .to_string_lossy()
                .into_owned()
        };
        log::info!("a DFG pass plugin \"{}\" is loaded", name);
        std::mem::forget(lib);
        Ok(())
    }

    /// Resolve a requested pipeline. Every name must be claimed by some
    /// callback; the first claimant wins.
    pub fn parse_pass_pipeline(
        &self,
        pm: &mut DfgPassManager,
        names: &[String],
    ) -> CgraResult<()> {
        for name in names {
            let claimed = self
                .callbacks
                .iter()
                .any(|cb| cb(name, pm));
            if !claimed {
                return Err(Error::configuration(format!(
                    "unknown DFG pass: {}",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfg::{ConstValue, DfgNode, NodeKind};

    struct Renamer;
    impl DfgPass for Renamer {
        fn name(&self) -> &'static str {
            "renamer"
        }
        fn run(
            &self,
            graph: &mut Dfg,
            _func: &Function,
            _li: &LoopInfo,
            _kernel: LoopId,
        ) -> bool {
            graph.set_name("renamed");
            true
        }
    }

    fn empty_graph() -> Dfg {
        let mut g = Dfg::new("g");
        g.add_node(DfgNode::new(
            0,
            NodeKind::Constant {
                value: ConstValue::Int { bits: 32, value: 1 },
                skipped: vec![],
            },
        ));
        g
    }

    fn dummy_func() -> Function {
        let mut fb = cgraomp_ir::FunctionBuilder::new("f", vec![], None);
        let bb = fb.block("entry");
        fb.switch_to(bb);
        fb.ret(None);
        fb.finish()
    }

    #[test]
    fn pipeline_runs_in_order_and_reports_change() {
        let func = dummy_func();
        let li = LoopInfo::new(&func);
        let mut pm = DfgPassManager::default();
        pm.add_pass(Box::new(Renamer));
        let mut g = empty_graph();
        assert!(pm.run(&mut g, &func, &li, LoopId(0)));
        assert_eq!(g.name(), "renamed");
    }

    #[test]
    fn empty_pipeline_changes_nothing() {
        let func = dummy_func();
        let li = LoopInfo::new(&func);
        let pm = DfgPassManager::default();
        let mut g = empty_graph();
        let nodes_before = g.node_count();
        let edges_before = g.edge_count();
        assert!(!pm.run(&mut g, &func, &li, LoopId(0)));
        assert_eq!(g.node_count(), nodes_before);
        assert_eq!(g.edge_count(), edges_before);
    }

    #[test]
    fn unknown_pass_name_is_fatal() {
        let builder = DfgPassBuilder::new();
        let mut pm = DfgPassManager::default();
        let err = builder
            .parse_pass_pipeline(&mut pm, &["no-such-pass".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("no-such-pass"));
    }

    #[test]
    fn builtin_passes_resolve() {
        let builder = DfgPassBuilder::new();
        let mut pm = DfgPassManager::default();
        builder
            .parse_pass_pipeline(&mut pm, &["balance-tree".to_string()])
            .unwrap();
        assert!(!pm.is_empty());
    }

    #[test]
    fn first_claimant_wins() {
        let mut builder = DfgPassBuilder::new();
        builder.register_pipeline_parsing_callback(Box::new(
            |name, pm| {
                if name == "renamer" {
                    pm.add_pass(Box::new(Renamer));
                    true
                } else {
                    false
                }
            },
        ));
        let mut pm = DfgPassManager::default();
        builder
            .parse_pass_pipeline(&mut pm, &["renamer".to_string()])
            .unwrap();
        assert!(!pm.is_empty());
    }
}
