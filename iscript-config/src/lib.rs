//! IScript Config - pure configuration data structures
//!
//! This crate contains only data, no logic or global state. It is the shared
//! configuration vocabulary of the compiler, the VM, the API and the CLI.

use serde::{Deserialize, Serialize};

/// Compiler behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// File name reported in diagnostics and persisted as the initial file path
    pub file_name: String,
    /// Warn about expression statements without side effects
    pub warn_pointless_statements: bool,
    /// Stop collecting warnings after this many diagnostics
    pub max_errors: usize,
    /// Host natives scripts may call without a `native(...)` binding. The
    /// built-in library is always callable.
    pub natives: Vec<String>,
}

/// Virtual machine limits and garbage-collector cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Instructions between generation-0 collections
    pub gc_interval: u64,
    /// Number of heap generations
    pub generations: u8,
    /// Each older generation is collected this many times less often
    pub generation_factor: u64,
    /// Maximum call frames per context
    pub max_call_depth: usize,
    /// Maximum depth of synchronous cross-context calls
    pub max_nesting: usize,
    /// Instruction budget of one context per `run` call
    pub slice_instructions: u64,
    /// How often (in instructions) the wall clock is consulted
    pub time_check_interval: u64,
    /// Echo `print` output to stdout in addition to capturing it
    pub echo_print: bool,
}

/// Toolchain phase, used for per-phase log filtering
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lexer,
    Parser,
    Generator,
    Binary,
    Vm,
    Gc,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Lexer,
        Phase::Parser,
        Phase::Generator,
        Phase::Binary,
        Phase::Vm,
        Phase::Gc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Lexer => "lexer",
            Phase::Parser => "parser",
            Phase::Generator => "generator",
            Phase::Binary => "binary",
            Phase::Vm => "vm",
            Phase::Gc => "gc",
        }
    }

    /// Log target name for this phase
    pub fn target(&self) -> &'static str {
        match self {
            Phase::Lexer => "iscript::lexer",
            Phase::Parser => "iscript::parser",
            Phase::Generator => "iscript::generator",
            Phase::Binary => "iscript::binary",
            Phase::Vm => "iscript::vm",
            Phase::Gc => "iscript::gc",
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            file_name: "<script>".to_string(),
            warn_pointless_statements: true,
            max_errors: 64,
            natives: Vec::new(),
        }
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            gc_interval: 1000,
            generations: 3,
            generation_factor: 10,
            max_call_depth: 256,
            max_nesting: 32,
            slice_instructions: 100_000,
            time_check_interval: 64,
            echo_print: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_compiler_config() {
        let cfg = CompilerConfig::default();
        assert_eq!(cfg.file_name, "<script>");
        assert!(cfg.warn_pointless_statements);
        assert!(cfg.natives.is_empty());

        let cfg: CompilerConfig = serde_json::from_str(r#"{ "natives": ["spawn"] }"#).unwrap();
        assert_eq!(cfg.natives, vec!["spawn"]);
        assert_eq!(cfg.max_errors, 64);
    }

    #[test]
    fn test_default_vm_config() {
        let cfg = VmConfig::default();
        assert_eq!(cfg.gc_interval, 1000);
        assert_eq!(cfg.generations, 3);
        assert_eq!(cfg.generation_factor, 10);
    }

    #[test]
    fn test_phase_target() {
        assert_eq!(Phase::Lexer.as_str(), "lexer");
        assert_eq!(Phase::Vm.target(), "iscript::vm");
        assert!(Phase::ALL.iter().all(|p| p.target().ends_with(p.as_str())));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg: VmConfig = serde_json::from_str(r#"{ "gc_interval": 50 }"#).unwrap();
        assert_eq!(cfg.gc_interval, 50);
        assert_eq!(cfg.max_call_depth, 256);
    }
}
