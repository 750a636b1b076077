//! IScript Core - compiler, bytecode format and virtual machine
//!
//! Contains the lexer, parser, generator, the ISCR binary format and the
//! runtime. Everything here works on in-memory data; reading files and
//! printing to a terminal is left to the API and CLI crates.
//!
//! Configuration and the logger are passed in explicitly, never read from
//! global state.

pub mod binary;
pub mod compiler;
pub mod program;
pub mod runtime;

pub use binary::{load, load_from_bytes, save, save_to_bytes, LoadError, SaveError};
pub use compiler::{CompileContext, Diagnostic, Severity};
pub use program::Program;
pub use runtime::{
    CollectStats, ContextId, ContextStatus, NativeCall, Resume, RunStats, RuntimeError,
    RuntimeErrorKind, Value, Vm,
};

pub use iscript_config::{CompilerConfig, Phase, VmConfig};
