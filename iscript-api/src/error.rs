//! API error type
//!
//! Unifies compile diagnostics, runtime errors and binary format errors
//! behind one type with a structured report.

use iscript_core::{Diagnostic, LoadError, RuntimeError, SaveError};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IScriptError {
    /// Compilation stopped at a fatal diagnostic
    #[error("{}", first_message(.diagnostics))]
    Compile {
        /// Every diagnostic the compiler produced, warnings included
        diagnostics: Vec<Diagnostic>,
        /// Diagnostics rendered with source context
        rendered: String,
    },

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("save failed: {0}")]
    Save(#[from] SaveError),

    #[error("load failed: {0}")]
    Load(#[from] LoadError),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn first_message(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .find(|d| d.is_fatal())
        .map(|d| d.to_string())
        .unwrap_or_else(|| "compilation failed".to_string())
}

impl IScriptError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IScriptError::Io {
            path: path.into(),
            source,
        }
    }

    fn fatal(&self) -> Option<&Diagnostic> {
        match self {
            IScriptError::Compile { diagnostics, .. } => diagnostics.iter().find(|d| d.is_fatal()),
            _ => None,
        }
    }

    /// Line of the error, if it has a source position
    pub fn line(&self) -> Option<u32> {
        match self {
            IScriptError::Compile { .. } => self.fatal().map(|d| d.line),
            IScriptError::Runtime(e) => e.instruction.map(|_| e.line),
            _ => None,
        }
    }

    pub fn column(&self) -> Option<u32> {
        match self {
            IScriptError::Compile { .. } => self.fatal().map(|d| d.column),
            IScriptError::Runtime(e) => e.instruction.map(|_| e.column),
            _ => None,
        }
    }

    pub fn phase(&self) -> &'static str {
        match self {
            IScriptError::Compile { .. } => "compile",
            IScriptError::Runtime(_) => "runtime",
            IScriptError::Save(_) | IScriptError::Load(_) => "binary",
            IScriptError::Io { .. } => "io",
        }
    }

    /// Converts into a structured report for tools that want data rather
    /// than text (editors, JSON output).
    pub fn to_report(&self) -> ErrorReport {
        let (error_kind, message) = match self {
            IScriptError::Compile { .. } => (
                "Fatal".to_string(),
                self.fatal()
                    .map(|d| d.message.clone())
                    .unwrap_or_else(|| self.to_string()),
            ),
            IScriptError::Runtime(e) => (format!("{:?}", e.kind), e.to_string()),
            IScriptError::Save(e) => ("SaveError".to_string(), e.to_string()),
            IScriptError::Load(e) => ("LoadError".to_string(), e.to_string()),
            IScriptError::Io { source, .. } => (format!("{:?}", source.kind()), self.to_string()),
        };
        let others = match self {
            IScriptError::Compile { diagnostics, .. } => diagnostics.len().saturating_sub(1),
            _ => 0,
        };

        ErrorReport {
            phase: self.phase(),
            line: self.line(),
            column: self.column(),
            error_kind,
            message,
            other_diagnostics: others,
        }
    }
}

/// Structured error report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// compile, runtime, binary or io
    pub phase: &'static str,
    /// 1-based, when known
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// Machine-readable kind, e.g. `DivisionByZero`
    pub error_kind: String,
    pub message: String,
    /// Diagnostics besides the reported one
    pub other_diagnostics: usize,
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(col)) => {
                write!(f, "[{}:{}] {} error: {}", line, col, self.phase, self.message)
            }
            _ => write!(f, "[{}] {} error: {}", self.phase, self.phase, self.message),
        }
    }
}

impl ErrorReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// One line for terminals
    pub fn to_short(&self) -> String {
        format!("{}: {}", self.phase, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iscript_core::RuntimeErrorKind;

    fn compile_error() -> IScriptError {
        IScriptError::Compile {
            diagnostics: vec![
                Diagnostic::warning("statement has no effect", 1, 1),
                Diagnostic::fatal("redefinition of 'x'", 2, 5).in_file("main.is"),
            ],
            rendered: String::new(),
        }
    }

    #[test]
    fn test_compile_error_line_column() {
        let err = compile_error();
        assert_eq!(err.line(), Some(2));
        assert_eq!(err.column(), Some(5));
        assert_eq!(err.phase(), "compile");
        assert!(err.to_string().contains("redefinition of 'x'"));
    }

    #[test]
    fn test_runtime_error_without_position() {
        let err: IScriptError =
            RuntimeError::new(RuntimeErrorKind::DivisionByZero, "DIV").into();
        assert_eq!(err.line(), None);
        assert_eq!(err.phase(), "runtime");
    }

    #[test]
    fn test_runtime_error_report() {
        let err: IScriptError = RuntimeError::new(RuntimeErrorKind::DivisionByZero, "DIV")
            .at(4, 3, 9)
            .into();
        let report = err.to_report();
        assert_eq!(report.line, Some(3));
        assert_eq!(report.column, Some(9));
        assert_eq!(report.error_kind, "DivisionByZero");
        assert!(format!("{report}").starts_with("[3:9] runtime error:"));
    }

    #[test]
    fn test_load_error_phase() {
        let err: IScriptError = LoadError::Truncated.into();
        assert_eq!(err.phase(), "binary");
        assert_eq!(err.to_report().to_short(), "binary: unexpected end of data");
    }

    #[test]
    fn test_report_display_without_location() {
        let err = IScriptError::io(
            "missing.is",
            std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        );
        let display = format!("{}", err.to_report());
        assert!(display.contains("[io] io error"), "{display}");
        assert!(display.contains("missing.is"));
    }

    #[test]
    fn test_report_to_json() {
        let report = compile_error().to_report();
        assert_eq!(report.other_diagnostics, 1);
        let json = report.to_json();
        assert!(json.contains("\"phase\":\"compile\""));
        assert!(json.contains("\"line\":2"));
        assert!(json.contains("redefinition of 'x'"));
    }
}
