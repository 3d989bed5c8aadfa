pub mod codegen;
pub mod graph;
pub mod imports;
pub mod liststore;
pub mod registry;
pub mod routing;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(not(target_arch = "wasm32"))]
pub mod python_check;

#[cfg(all(target_arch = "wasm32", feature = "wasm-bindings"))]
pub mod wasm;

use anyhow::{anyhow, Result};
use graph::Workspace;
use liststore::ListStore;
use registry::Registry;

/// The output of one compilation: the complete program, the raw emitted body
/// (useful for diffing and dependency-analysis debugging), and every
/// non-fatal issue recovered along the way.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub python: String,
    pub body: String,
    pub warnings: Vec<String>,
}

/// Compiles a workspace JSON document into a complete Python program.
pub fn compile_document_to_python(doc: &str, registry: &Registry) -> Result<CompiledProgram> {
    let ws = Workspace::from_json_str(doc)?;
    compile_workspace(&ws, registry)
}

pub fn compile_workspace(ws: &Workspace, registry: &Registry) -> Result<CompiledProgram> {
    let mut warnings = Vec::new();
    let store = ListStore::from_workspace(ws, &mut warnings);

    let emitted = codegen::emit_program(ws, registry)?;
    warnings.extend(emitted.warnings);

    let buttons = routing::dedupe_routes(&emitted.button_routes, "button", &mut warnings);
    let modals = routing::dedupe_routes(&emitted.modal_routes, "modal", &mut warnings);
    let dispatchers = routing::emit_dispatchers(!buttons.is_empty(), !modals.is_empty());
    let route_tables = routing::emit_route_tables(&buttons, &modals);

    let var_init = store.emit_initializers(ws);
    let python = imports::assemble_program(
        &emitted.text,
        &dispatchers,
        &route_tables,
        &var_init,
        &ws.settings,
    );

    Ok(CompiledProgram {
        python,
        body: emitted.text,
        warnings,
    })
}

#[cfg(not(target_arch = "wasm32"))]
pub fn run_cli(args: &cli::Args) -> Result<()> {
    let registry = Registry::with_builtins();

    if args.list_kinds {
        for kind in registry.kinds() {
            println!("{}", kind);
        }
        return Ok(());
    }

    let total_stages = 2
        + usize::from(args.emit_body.is_some())
        + usize::from(args.check)
        + usize::from(args.output.is_some());
    let progress = CliProgress::new("Compile", total_stages);
    let mut stage = 0usize;

    stage += 1;
    progress.emit(stage, "Reading workspace document");
    let doc = std::fs::read_to_string(&args.input)
        .map_err(|e| anyhow!("Failed to read '{}': {}.", args.input.display(), e))?;
    let mut ws = Workspace::from_json_str(&doc)?;
    if let Some(prefix) = &args.prefix {
        ws.settings.prefix = prefix.clone();
    }

    stage += 1;
    progress.emit(stage, "Compiling block graph");
    let compiled = compile_workspace(&ws, &registry)?;
    for warning in &compiled.warnings {
        eprintln!("warning: {}", warning);
    }

    if let Some(body_path) = &args.emit_body {
        stage += 1;
        progress.emit(stage, "Writing emitted body");
        std::fs::write(body_path, compiled.body.as_bytes())?;
    }

    if args.check {
        stage += 1;
        progress.emit(stage, "Checking Python syntax");
        python_check::check_python_syntax(&compiled.python)?;
    }

    if let Some(output) = &args.output {
        stage += 1;
        progress.emit(stage, "Writing program");
        std::fs::write(output, compiled.python.as_bytes())?;
    } else if args.emit_body.is_none() {
        print!("{}", compiled.python);
    }

    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
struct CliProgress {
    prefix: &'static str,
    total: usize,
}

#[cfg(not(target_arch = "wasm32"))]
impl CliProgress {
    fn new(prefix: &'static str, total: usize) -> Self {
        Self {
            prefix,
            total: total.max(1),
        }
    }

    fn emit(&self, step: usize, label: &str) {
        let step = step.clamp(1, self.total);
        let bar = render_progress_bar(step, self.total, 14);
        eprintln!(
            "[{}] {}... ({}/{}) {}",
            self.prefix, label, step, self.total, bar
        );
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn render_progress_bar(step: usize, total: usize, width: usize) -> String {
    let width = width.max(1);
    let filled = ((step * width) + (total / 2)) / total;
    let mut s = String::with_capacity(width + 2);
    s.push('[');
    for i in 0..width {
        s.push(if i < filled { '=' } else { '-' });
    }
    s.push(']');
    s
}
