//! API configuration
//!
//! `RunConfig` bundles compiler and VM settings with the logger. A
//! process-wide slot is offered for callers that configure once at startup.

use iscript_config::{CompilerConfig, VmConfig};
use iscript_core::Program;
use iscript_log::Logger;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;

/// Execution configuration
#[derive(Clone)]
pub struct RunConfig {
    pub compiler: CompilerConfig,
    pub vm: VmConfig,
    pub logger: Arc<Logger>,
    /// Print the disassembly after compiling
    pub dump_bytecode: bool,
    /// Log statistics after every scheduler round
    pub show_steps: bool,
    /// Wall-clock budget of one scheduler round
    pub timeslice: Duration,
    /// Scheduler rounds before `run` gives up on a busy script
    pub max_rounds: usize,
    /// Classes registered with the VM before the script loads
    pub classes: Vec<Arc<Program>>,
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("compiler", &self.compiler)
            .field("vm", &self.vm)
            .field("dump_bytecode", &self.dump_bytecode)
            .field("show_steps", &self.show_steps)
            .field("timeslice", &self.timeslice)
            .field("max_rounds", &self.max_rounds)
            .field("classes", &self.classes.len())
            .finish()
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            compiler: CompilerConfig::default(),
            vm: VmConfig::default(),
            logger: Logger::noop(),
            dump_bytecode: false,
            show_steps: false,
            timeslice: Duration::from_millis(10),
            max_rounds: 1_000_000,
            classes: Vec::new(),
        }
    }
}

impl RunConfig {
    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_class(mut self, program: impl Into<Arc<Program>>) -> Self {
        self.classes.push(program.into());
        self
    }
}

static GLOBAL_CONFIG: OnceCell<RunConfig> = OnceCell::new();

/// Installs the process-wide configuration. Hands `config` back if one is
/// already installed.
pub fn init_config(config: RunConfig) -> Result<(), RunConfig> {
    GLOBAL_CONFIG.set(config)
}

/// The process-wide configuration, installing the default on first use
pub fn config() -> &'static RunConfig {
    GLOBAL_CONFIG.get_or_init(RunConfig::default)
}

pub fn is_initialized() -> bool {
    GLOBAL_CONFIG.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_run_config() {
        let cfg = RunConfig::default();
        assert!(!cfg.dump_bytecode);
        assert!(!cfg.show_steps);
        assert_eq!(cfg.vm.gc_interval, 1000);
        assert_eq!(cfg.compiler.file_name, "<script>");
        assert!(cfg.classes.is_empty());
    }

    #[test]
    fn test_debug_omits_logger() {
        let text = format!("{:?}", RunConfig::default());
        assert!(text.contains("RunConfig"));
        assert!(!text.contains("logger"));
    }

    #[test]
    fn test_global_config_installs_once() {
        let first = config().timeslice;
        assert!(is_initialized());
        let rejected = init_config(RunConfig {
            show_steps: true,
            ..RunConfig::default()
        });
        assert!(rejected.is_err());
        assert_eq!(config().timeslice, first);
    }
}
