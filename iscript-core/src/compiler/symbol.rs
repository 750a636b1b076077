//! Symbols
//!
//! The generator collects symbols into one flat, ordered table. Scope
//! nesting only exists while generating (through the AST nodes that own
//! each symbol); the persisted program sees the flat list.

use super::ast::FunctionKind;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSymbol {
    /// Instruction index of the first body instruction
    pub entry: u32,
    pub params: u32,
    /// Local slots needed, parameters included
    pub locals: u32,
    /// Owning state for state events
    pub state: Option<SymbolId>,
    pub subtype: FunctionKind,
    /// Position in the function table
    pub index: u32,
    /// Bound native name for `= native("...")` declarations
    pub native: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SymbolKind {
    Function(FunctionSymbol),
    Variable {
        slot: u32,
        global: bool,
        constant: bool,
    },
    /// Resolved instruction index, bound during emission
    JumpTarget {
        target: Option<u32>,
    },
    String {
        value: String,
    },
    State {
        default: bool,
    },
}

impl SymbolKind {
    pub fn tag(&self) -> SymbolTag {
        match self {
            SymbolKind::Function(_) => SymbolTag::Function,
            SymbolKind::Variable { .. } => SymbolTag::Variable,
            SymbolKind::JumpTarget { .. } => SymbolTag::JumpTarget,
            SymbolKind::String { .. } => SymbolTag::String,
            SymbolKind::State { .. } => SymbolTag::State,
        }
    }
}

/// Kind filter for lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SymbolTag {
    Function,
    Variable,
    JumpTarget,
    String,
    State,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub line: u32,
    pub column: u32,
    pub kind: SymbolKind,
}

impl Symbol {
    pub fn new(name: impl Into<String>, line: u32, column: u32, kind: SymbolKind) -> Self {
        Self {
            name: name.into(),
            line,
            column,
            kind,
        }
    }

    /// Identifiers compare case-insensitively
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn as_function(&self) -> Option<&FunctionSymbol> {
        match &self.kind {
            SymbolKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut FunctionSymbol> {
        match &mut self.kind {
            SymbolKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match &self.kind {
            SymbolKind::String { value } => Some(value),
            _ => None,
        }
    }

    pub fn is_jump_target(&self) -> bool {
        matches!(self.kind, SymbolKind::JumpTarget { .. })
    }

    /// One-line description used by the disassembler
    pub fn describe(&self) -> String {
        match &self.kind {
            SymbolKind::Function(f) => {
                let binding = match &f.native {
                    Some(native) => format!(" native({native})"),
                    None => format!(" @{}", f.entry),
                };
                format!(
                    "{} {}({} params, {} locals){}",
                    f.subtype.keyword(),
                    self.name,
                    f.params,
                    f.locals,
                    binding
                )
            }
            SymbolKind::Variable {
                slot,
                global,
                constant,
            } => format!(
                "{}{} {} slot {}",
                if *constant { "const " } else { "" },
                if *global { "global" } else { "local" },
                self.name,
                slot
            ),
            SymbolKind::JumpTarget { target } => match target {
                Some(t) => format!("label {} -> {}", self.name, t),
                None => format!("label {} (unbound)", self.name),
            },
            SymbolKind::String { value } => format!("string {value:?}"),
            SymbolKind::State { default } => format!(
                "state {}{}",
                self.name,
                if *default { " (default)" } else { "" }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_ignores_case() {
        let sym = Symbol::new(
            "PlayerHealth",
            1,
            1,
            SymbolKind::Variable {
                slot: 0,
                global: true,
                constant: false,
            },
        );
        assert!(sym.matches("playerhealth"));
        assert!(!sym.matches("player"));
        assert_eq!(sym.kind.tag(), SymbolTag::Variable);
    }

    #[test]
    fn test_describe() {
        let label = Symbol::new("break", 2, 3, SymbolKind::JumpTarget { target: Some(9) });
        assert_eq!(label.describe(), "label break -> 9");
        assert!(label.is_jump_target());
    }
}
