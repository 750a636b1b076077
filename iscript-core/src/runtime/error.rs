//! Runtime errors
//!
//! Every runtime error is fatal to the context that raised it. The error
//! records what was attempted, on which value, and where.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeErrorKind {
    #[error("type mismatch")]
    TypeMismatch,

    #[error("value is not indexable")]
    NotIndexable,

    #[error("value is not callable")]
    NotCallable,

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("key not found")]
    KeyNotFound,

    #[error("duplicate dictionary key")]
    DuplicateKey,

    #[error("value is immutable")]
    Immutable,

    #[error("expected {expected} parameters, found {found}")]
    WrongParameterCount { expected: usize, found: usize },

    #[error("value is not iterable")]
    NotIterable,

    #[error("division by zero")]
    DivisionByZero,

    #[error("undefined native '{0}'")]
    UndefinedNative(String),

    #[error("undefined member '{0}'")]
    UndefinedMember(String),

    #[error("undefined class '{0}'")]
    UndefinedClass(String),

    #[error("stack overflow")]
    StackOverflow,

    #[error("invalid object reference")]
    InvalidReference,

    #[error("context is already running")]
    ContextBusy,

    #[error("context has terminated")]
    ContextTerminated,

    #[error("malformed instruction")]
    MalformedInstruction,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{operation}: {kind}{}{}", value_suffix(.value), location_suffix(.instruction, .line, .column))]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Opcode or host operation that failed
    pub operation: String,
    /// Rendering of the offending value, empty when there is none
    pub value: String,
    pub instruction: Option<u32>,
    pub line: u32,
    pub column: u32,
}

fn value_suffix(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        format!(" (value: {value})")
    }
}

fn location_suffix(instruction: &Option<u32>, line: &u32, column: &u32) -> String {
    match instruction {
        Some(index) => format!(" at instruction {index} [{line}:{column}]"),
        None => String::new(),
    }
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, operation: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
            value: String::new(),
            instruction: None,
            line: 0,
            column: 0,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    /// Attaches the instruction position, keeping the innermost one when the
    /// error crossed a call boundary
    pub fn at(mut self, instruction: u32, line: u32, column: u32) -> Self {
        if self.instruction.is_none() {
            self.instruction = Some(instruction);
            self.line = line;
            self.column = column;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let err = RuntimeError::new(RuntimeErrorKind::NotIndexable, "GETIDX")
            .with_value("42")
            .at(7, 3, 9);
        assert_eq!(
            err.to_string(),
            "GETIDX: value is not indexable (value: 42) at instruction 7 [3:9]"
        );
    }

    #[test]
    fn test_innermost_location_wins() {
        let err = RuntimeError::new(RuntimeErrorKind::DivisionByZero, "DIV")
            .at(2, 1, 1)
            .at(10, 5, 5);
        assert_eq!(err.instruction, Some(2));
        assert_eq!(err.to_string(), "DIV: division by zero at instruction 2 [1:1]");
    }
}
