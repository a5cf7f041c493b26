//! Driver: per-module orchestration of model loading, kernel discovery,
//! verification, DFG construction, the DFG pass pipeline, and export.
use crate::cmdline::Opts;
use cgraomp_backend::{Backend, DotBackend};
use cgraomp_ir::{LoopInfo, Module};
use cgraomp_model::Model;
use cgraomp_opt::analysis::{
    remove_schedule_runtime, AnnotationAnalysis, KernelEntry,
    OmpKernelAnalysis,
};
use cgraomp_opt::dfg::DfgBuilder;
use cgraomp_opt::{
    DfgPassBuilder, DfgPassManager, KernelVerifier,
};
use cgraomp_utils::{CgraResult, Error, OutputFile, RemarkKind};
use std::fs::File;
use std::path::PathBuf;

/// Run the driver from the command line.
pub fn run_driver() -> CgraResult<()> {
    let opts = Opts::get_opts()?;

    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(if opts.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .target(env_logger::Target::Stderr)
        .init();

    let Some(path) = &opts.file else {
        return Err(Error::configuration("no input module given"));
    };
    let file = File::open(path).map_err(|e| {
        Error::configuration(format!("{}: {}", path.display(), e))
    })?;
    let mut module: Module =
        serde_json::from_reader(file).map_err(|e| {
            Error::configuration(format!(
                "{} is not a valid module dump: {}",
                path.display(),
                e
            ))
        })?;
    if module.source_path.is_none() {
        module.source_path = Some(path.display().to_string());
    }

    run_on_module(&mut module, &opts)
}

/// Process one module: every kernel is visited in declaration order, each
/// passing kernel's graph runs the DFG pipeline and is exported.
pub fn run_on_module(module: &mut Module, opts: &Opts) -> CgraResult<()> {
    let model = Model::parse(&opts.cgra_model, opts.verbose)?;

    // Resolve the pass pipeline before any per-kernel work: an unclaimed
    // pass name or a broken plugin aborts the whole invocation.
    let mut pass_builder = DfgPassBuilder::new();
    for plugin in &opts.dfg_pass_plugins {
        pass_builder.load_plugin(plugin)?;
    }
    let mut pass_manager = DfgPassManager::default();
    pass_builder.parse_pass_pipeline(&mut pass_manager, &opts.pipeline())?;

    let annotations = AnnotationAnalysis::new(module);
    let kernel_info = OmpKernelAnalysis::new(module)?;
    let verifier = KernelVerifier::new(
        module,
        &model,
        &annotations,
        opts.mem_dep_distance,
    );

    let mut valid_kernels = 0usize;
    for entry in kernel_info.kernels() {
        if let Some(info) = &entry.info {
            log::info!(
                "offloading function: caller {} (line {}), callee {}",
                info.original_function_name,
                info.source_line,
                module.function(entry.worker).name
            );
        }

        let result = verifier.verify_function(entry.worker);
        for remark in &result.remarks {
            let mut remark = remark.clone();
            if let Some(info) = &entry.info {
                remark = remark.with_line(info.source_line);
            }
            match remark.kind {
                RemarkKind::InvalidKernel => {
                    log::warn!("{}", remark.render())
                }
                _ => log::info!("{}", remark.render()),
            }
        }

        let func = module.function(entry.worker);
        let li = LoopInfo::new(func);
        for report in result.valid_kernels() {
            valid_kernels += 1;
            let mut builder = DfgBuilder::new(
                module,
                func,
                &li,
                &model,
                &annotations,
            );
            let mut graph = builder.build(report);

            // Memory-access nodes carry their AG configuration as extra
            // info.
            if let Some(ag) = &report.ag {
                for (&access, config) in ag.configs() {
                    let Some(node) = graph.find_by_inst(access) else {
                        continue;
                    };
                    let json = config.to_json(func);
                    if let Some(obj) = json.as_object() {
                        for (k, v) in obj {
                            graph
                                .node_mut(node)
                                .extra_info
                                .insert(k.clone(), v.clone());
                        }
                    }
                }
            }

            pass_manager.run(&mut graph, func, &li, report.loop_id);

            if opts.dfg_plain {
                graph.make_sequential_ids();
            }

            let loop_name = graph.name().to_string();
            let (stem, graph_name) =
                output_stem(module, opts, entry, &loop_name);
            graph.set_name(graph_name);
            if let Err(e) = export_graph(&graph, opts, &stem) {
                // The pipeline keeps going; only this kernel's output is
                // lost.
                log::error!(
                    "failed to export {}: {}",
                    stem.display(),
                    e
                );
            }
        }
    }

    // The schedule runtime has served its purpose once every kernel of
    // the module is analysed.
    let workers: Vec<_> =
        kernel_info.kernels().iter().map(|k| k.worker).collect();
    for worker in workers {
        remove_schedule_runtime(module, worker);
    }

    log::info!("{} valid kernels extracted", valid_kernels);
    Ok(())
}

/// Output path stem `<prefix>_<module>_<function_or_orig_name>_<loop>`
/// (placed next to the source module when no prefix is given) plus the
/// graph's own name.
fn output_stem(
    module: &Module,
    opts: &Opts,
    entry: &KernelEntry,
    loop_name: &str,
) -> (PathBuf, String) {
    let func_name = match (&entry.info, opts.use_simple_dfg_name) {
        (Some(info), true) => info.original_function_name.clone(),
        _ => module.function(entry.worker).name.clone(),
    };
    let stem = format!("{}_{}_{}", module.name, func_name, loop_name);
    let path = match &opts.dfg_file_prefix {
        Some(prefix) => PathBuf::from(format!("{}_{}", prefix, stem)),
        None => {
            let dir = module
                .source_path
                .as_ref()
                .map(|p| {
                    PathBuf::from(p)
                        .parent()
                        .map(|d| d.to_path_buf())
                        .unwrap_or_default()
                })
                .unwrap_or_default();
            dir.join(&stem)
        }
    };
    (path, stem)
}

fn export_graph(
    graph: &cgraomp_opt::dfg::Dfg,
    opts: &Opts,
    stem: &std::path::Path,
) -> CgraResult<()> {
    DotBackend::validate(graph)?;
    // Loop names may contain dots; extensions are appended, never
    // substituted.
    let dot_path = PathBuf::from(format!("{}.dot", stem.display()));
    let mut dot_out = OutputFile::file(dot_path.clone())
        .get_write()
        .map_err(|e| {
            Error::write_error(format!("{}: {}", dot_path.display(), e))
        })?;
    DotBackend::emit(graph, &opts.dot_config(), &mut dot_out)?;
    drop(dot_out);
    log::info!("saved {}", dot_path.display());

    // The metadata sidecar exists only when some node carries extra info.
    let mut buf = Vec::new();
    if DotBackend::write_extra_info(graph, &mut buf)? {
        let json_path = PathBuf::from(format!("{}.json", stem.display()));
        std::fs::write(&json_path, buf).map_err(|e| {
            Error::write_error(format!("{}: {}", json_path.display(), e))
        })?;
        log::info!("saved {}", json_path.display());
    }
    Ok(())
}
