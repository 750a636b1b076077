//! IScript API - compile and run orchestration
//!
//! Ties the compiler, the binary format and the VM together:
//! - `compile` / `run` / `run_program` with an explicit [`RunConfig`]
//! - `save_program` / `load_program` for `.iscr` files
//! - [`IScriptError`], one error type for every phase
//!
//! Library users should pass a `RunConfig` explicitly. `quick_run` reads the
//! process-wide configuration instead, which suits small tools and tests.

pub mod config;
pub mod error;
pub mod types;

pub use config::{config, init_config, is_initialized, RunConfig};
pub use error::{ErrorReport, IScriptError};
pub use types::ExecuteOutput;

pub use iscript_config::{CompilerConfig, Phase, VmConfig};
pub use iscript_core::{Diagnostic, Program, RunStats, Severity, Value};

use iscript_core::{CompileContext, Vm};
use iscript_log::{debug, info, warn};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// File extension of saved programs
pub const BINARY_EXTENSION: &str = "iscr";

/// Compiles `source` with explicit configuration. A fatal diagnostic becomes
/// [`IScriptError::Compile`]; warnings only reach the logger.
pub fn compile(source: &str, config: &RunConfig) -> Result<Program, IScriptError> {
    let mut ctx = CompileContext::new(source, config.compiler.clone())
        .with_logger(Arc::clone(&config.logger));
    let ok = ctx.compile();

    match ctx.program() {
        Some(program) if ok => {
            if config.dump_bytecode {
                print!("{}", program.disassemble());
            }
            Ok(program)
        }
        _ => Err(IScriptError::Compile {
            diagnostics: ctx.diagnostics().to_vec(),
            rendered: ctx.render_diagnostics(),
        }),
    }
}

/// Compiles and runs `source` to completion
pub fn run(source: &str, config: &RunConfig) -> Result<ExecuteOutput, IScriptError> {
    info!(config.logger, "starting execution");
    let program = compile(source, config)?;
    run_program(program, config)
}

/// Runs an already compiled program in a fresh VM until it is idle.
///
/// Each scheduler round gets `config.timeslice`; the loop stops when no
/// context has work left or after `config.max_rounds` rounds.
pub fn run_program(program: Program, config: &RunConfig) -> Result<ExecuteOutput, IScriptError> {
    let mut vm = Vm::new(config.vm.clone()).with_logger(Arc::clone(&config.logger));
    vm.register_builtins();
    for class in &config.classes {
        vm.register_class(Arc::clone(class))?;
    }
    let id = vm.load(program)?;

    let mut stats = RunStats::default();
    let mut rounds = 0;
    while vm.has_work() && rounds < config.max_rounds {
        let round = vm.run(config.timeslice);
        rounds += 1;
        if config.show_steps {
            info!(
                config.logger,
                "round {}: {} contexts, {} instructions, {} suspended",
                rounds,
                round.contexts,
                round.instructions,
                round.suspended
            );
        }
        stats.merge(round);
    }
    if vm.has_work() {
        warn!(config.logger, "stopped after {} rounds with work left", rounds);
    }

    if let Some(err) = vm.last_error(id) {
        return Err(err.clone().into());
    }

    let globals = vm
        .globals(id)
        .into_iter()
        .map(|(name, value)| (name, vm.display(value)))
        .collect();
    debug!(config.logger, "finished: {} instructions", vm.instructions_executed());

    Ok(ExecuteOutput {
        output: vm.take_output(),
        globals,
        instructions: vm.instructions_executed(),
        stats,
    })
}

/// Runs `source` with the process-wide configuration
pub fn quick_run(source: &str) -> Result<ExecuteOutput, IScriptError> {
    run(source, config())
}

/// Reads `path` as a saved program when it has the `.iscr` extension and
/// compiles it as source otherwise. Diagnostics name the file.
pub fn program_from_path(path: &Path, config: &RunConfig) -> Result<Program, IScriptError> {
    if path.extension().is_some_and(|ext| ext == BINARY_EXTENSION) {
        return load_program(path);
    }
    let source = std::fs::read_to_string(path).map_err(|e| IScriptError::io(path, e))?;
    let mut config = config.clone();
    config.compiler.file_name = path.display().to_string();
    compile(&source, &config)
}

/// Writes `program` to `path` in the ISCR format
pub fn save_program(program: &Program, path: impl AsRef<Path>) -> Result<(), IScriptError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| IScriptError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    iscript_core::save(program, &mut writer)?;
    writer.flush().map_err(|e| IScriptError::io(path, e))
}

pub fn load_program(path: impl AsRef<Path>) -> Result<Program, IScriptError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| IScriptError::io(path, e))?;
    Ok(iscript_core::load(&mut BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iscript_log::{Level, LogConfig};

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("iscript-api-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_run_collects_output_and_globals() {
        let out = run(
            r#"var x = 6 * 7; print("x is", x);"#,
            &RunConfig::default(),
        )
        .expect("run");
        assert_eq!(out.output, vec!["x is 42"]);
        assert_eq!(out.global("x"), Some("42"));
        assert!(out.instructions > 0);
        assert_eq!(out.stats.errors, 0);
    }

    #[test]
    fn test_compile_error_is_reported() {
        let err = run("var a;\nvar a;", &RunConfig::default()).unwrap_err();
        assert_eq!(err.phase(), "compile");
        assert_eq!(err.line(), Some(2));
        let IScriptError::Compile { rendered, .. } = &err else {
            panic!("expected compile error, got {err:?}");
        };
        assert!(rendered.contains("redefinition of 'a'"), "{rendered}");
    }

    #[test]
    fn test_runtime_error_is_returned() {
        let err = run("var a = 1; var b = a / 0;", &RunConfig::default()).unwrap_err();
        assert_eq!(err.phase(), "runtime");
        assert!(err.line().is_some());
        assert_eq!(err.to_report().error_kind, "DivisionByZero");
    }

    #[test]
    fn test_warnings_are_logged() {
        let (logger, ring) = LogConfig::new(Level::Warn).with_ring_buffer(16).init();
        let config = RunConfig::default().with_logger(logger);
        run("var a = 1; a;", &config).expect("run");
        let ring = ring.expect("ring buffer");
        assert!(ring.contains_message("no effect"), "{:?}", ring.messages());
    }

    #[test]
    fn test_registered_classes_are_usable() {
        let class = compile("class Counter; var n = 3;", &RunConfig::default()).expect("class");
        let config = RunConfig::default().with_class(class);
        let out = run("using Counter; var c = Counter(); var n = c.n;", &config).expect("run");
        assert_eq!(out.global("n"), Some("3"));
    }

    #[test]
    fn test_saved_program_loads_from_disk() {
        let path = temp_path("roundtrip.iscr");
        let program = compile("var s = \"a\" + 1;", &RunConfig::default()).expect("compile");
        save_program(&program, &path).expect("save");

        let loaded = program_from_path(&path, &RunConfig::default()).expect("load");
        let out = run_program(loaded, &RunConfig::default()).expect("run");
        assert_eq!(out.global("s"), Some("a1"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_source_file_names_diagnostics() {
        let path = temp_path("broken.is");
        std::fs::write(&path, "var = ;").expect("write");
        let err = program_from_path(&path, &RunConfig::default()).unwrap_err();
        let IScriptError::Compile { diagnostics, .. } = err else {
            panic!("expected compile error");
        };
        assert!(diagnostics[0].file.ends_with("broken.is"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_program(temp_path("missing.iscr")).unwrap_err();
        assert_eq!(err.phase(), "io");
    }

    #[test]
    fn test_quick_run_uses_global_config() {
        let out = quick_run("var ok = 1;").expect("run");
        assert_eq!(out.global("ok"), Some("1"));
        assert!(is_initialized());
    }
}
