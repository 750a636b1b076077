//! IScript CLI
//!
//! `iscript run | compile | disasm | project`. Script output goes to stdout,
//! logs and errors to stderr.

use clap::{Parser, Subcommand};
use iscript_api::{
    init_config, program_from_path, run_program, save_program, IScriptError, Program, RunConfig,
    BINARY_EXTENSION,
};
use iscript_log::{info, Logger};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;

mod config;
mod logging;
mod report;

use config::{parse_level, CliError, LogConfig, ProjectConfig};
use logging::LogFormat;

#[derive(Parser)]
#[command(name = "iscript", about = "IScript compiler and virtual machine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Default log level: trace, debug, info, warn, error or silent
    #[arg(long, global = true, default_value = "warn", value_parser = parse_level_arg)]
    log_level: Level,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[arg(long, global = true, value_parser = parse_level_arg)]
    lexer_log: Option<Level>,

    #[arg(long, global = true, value_parser = parse_level_arg)]
    parser_log: Option<Level>,

    #[arg(long, global = true, value_parser = parse_level_arg)]
    generator_log: Option<Level>,

    /// Level for the VM and the garbage collector
    #[arg(long, global = true, value_parser = parse_level_arg)]
    vm_log: Option<Level>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script (`.is`) or a saved program (`.iscr`)
    Run {
        file: PathBuf,
        /// Print the disassembly before running
        #[arg(long)]
        dump_bytecode: bool,
        /// Log scheduler statistics after every round
        #[arg(long)]
        show_steps: bool,
        /// Class to register before the script loads; repeatable
        #[arg(long = "class", value_name = "FILE")]
        classes: Vec<PathBuf>,
    },
    /// Compile a script to the binary format
    Compile {
        file: PathBuf,
        /// Output path; defaults to the input with an `.iscr` extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the compiled form of a script or saved program
    Disasm {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run the project described by a project file
    Project {
        #[arg(default_value = "iscript.json")]
        config: PathBuf,
    },
}

fn parse_level_arg(s: &str) -> Result<Level, String> {
    parse_level(s).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Cli(err)) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
        Err(Failure::Script) => ExitCode::FAILURE,
    }
}

/// Why the process exits with 1. Script errors are printed where they occur,
/// with the source at hand.
enum Failure {
    Cli(CliError),
    Script,
}

impl From<CliError> for Failure {
    fn from(err: CliError) -> Self {
        Failure::Cli(err)
    }
}

fn dispatch(cli: Cli) -> Result<(), Failure> {
    let mut log_config = LogConfig {
        global: cli.log_level,
        lexer: cli.lexer_log,
        parser: cli.parser_log,
        generator: cli.generator_log,
        vm: cli.vm_log,
    };

    // the project file may raise the log level, so read it before logging starts
    let project = match &cli.command {
        Command::Project { config } => {
            let project = ProjectConfig::read(config)?;
            if let Some(level) = &project.log_level {
                log_config.global = parse_level(level)?;
            }
            Some(project)
        }
        _ => None,
    };

    let logger = logging::init(&log_config, cli.log_format, cli.log_file.as_deref())?;
    let mut run_config = RunConfig::default().with_logger(Arc::clone(&logger));

    match cli.command {
        Command::Run {
            file,
            dump_bytecode,
            show_steps,
            classes,
        } => {
            run_config.dump_bytecode = dump_bytecode;
            run_config.show_steps = show_steps;
            run_file(&file, &classes, run_config, &logger)
        }
        Command::Compile { file, output } => {
            let output = output.unwrap_or_else(|| file.with_extension(BINARY_EXTENSION));
            compile_file(&file, &output, &run_config)
        }
        Command::Disasm { file, json } => disasm_file(&file, json, &run_config),
        Command::Project { config } => {
            let project = project.unwrap_or_default();
            let entry = ProjectConfig::resolve(&config, &project.entry);
            run_config.dump_bytecode = project.dump_bytecode;
            run_config.show_steps = project.show_steps;
            if let Some(interval) = project.gc_interval {
                run_config.vm.gc_interval = interval;
            }
            info!(logger, "project {} entry {}", config.display(), entry.display());
            if project.compile_only {
                return compile_file(&entry, &entry.with_extension(BINARY_EXTENSION), &run_config);
            }
            let classes: Vec<PathBuf> = project
                .classes
                .iter()
                .map(|class| ProjectConfig::resolve(&config, class))
                .collect();
            run_file(&entry, &classes, run_config, &logger)
        }
    }
}

/// Loads or compiles `path`, printing any error with its source excerpt
fn program_or_report(path: &Path, config: &RunConfig) -> Result<Program, Failure> {
    program_from_path(path, config).map_err(|err| {
        report::print_error(&err, path, None);
        Failure::Script
    })
}

fn run_file(
    file: &Path,
    classes: &[PathBuf],
    mut config: RunConfig,
    logger: &Arc<Logger>,
) -> Result<(), Failure> {
    for class in classes {
        let program = program_or_report(class, &config)?;
        config = config.with_class(program);
    }
    let program = program_or_report(file, &config)?;

    // later `iscript_api::quick_run` calls in this process see the same settings
    let _ = init_config(config.clone());

    match run_program(program, &config) {
        Ok(out) => {
            for line in &out.output {
                println!("{line}");
            }
            info!(
                logger,
                "{} instructions, {} collections",
                out.instructions,
                out.stats.collections
            );
            Ok(())
        }
        Err(err) => {
            let source = source_text(file);
            report::print_error(&err, file, source.as_deref());
            Err(Failure::Script)
        }
    }
}

fn compile_file(file: &Path, output: &Path, config: &RunConfig) -> Result<(), Failure> {
    let program = program_or_report(file, config)?;
    save_program(&program, output).map_err(|err| script_failure(&err, output))?;
    println!("wrote {}", output.display());
    Ok(())
}

fn disasm_file(file: &Path, json: bool, config: &RunConfig) -> Result<(), Failure> {
    let program = program_or_report(file, config)?;
    if json {
        match serde_json::to_string_pretty(&program) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                eprintln!("error: {err}");
                return Err(Failure::Script);
            }
        }
    } else {
        print!("{}", program.disassemble());
    }
    Ok(())
}

fn script_failure(err: &IScriptError, path: &Path) -> Failure {
    report::print_error(err, path, None);
    Failure::Script
}

/// Source text for error excerpts; saved programs have none
fn source_text(file: &Path) -> Option<String> {
    if file.extension().is_some_and(|ext| ext == BINARY_EXTENSION) {
        return None;
    }
    std::fs::read_to_string(file).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_phase_levels() {
        let cli = Cli::try_parse_from([
            "iscript",
            "--vm-log",
            "trace",
            "run",
            "main.is",
            "--class",
            "point.is",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.vm_log, Some(Level::TRACE));
        assert_eq!(cli.log_level, Level::WARN);
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Command::Run { file, classes, .. } => {
                assert_eq!(file, PathBuf::from("main.is"));
                assert_eq!(classes, vec![PathBuf::from("point.is")]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_project_defaults_to_iscript_json() {
        let cli = Cli::try_parse_from(["iscript", "project"]).unwrap();
        assert!(matches!(cli.command, Command::Project { config } if config == Path::new("iscript.json")));
    }

    #[test]
    fn test_unknown_level_is_rejected() {
        assert!(Cli::try_parse_from(["iscript", "--log-level", "loud", "run", "a.is"]).is_err());
    }
}
