//! Source to bytecode: lexer, parser, generator and the compile context

pub mod ast;
pub mod context;
pub mod diagnostic;
pub mod generator;
pub mod instruction;
pub mod lexer;
pub mod parser;
pub mod register;
pub mod symbol;
pub mod token;

pub use ast::{Ast, FunctionKind, NodeId, NodeKind, TypeName};
pub use context::CompileContext;
pub use diagnostic::{CompileResult, Diagnostic, Severity};
pub use generator::{Generated, Generator, ProgramInfo};
pub use instruction::{Instruction, Opcode, Operand};
pub use lexer::Lexer;
pub use parser::Parser;
pub use register::{Register, RegisterPool};
pub use symbol::{FunctionSymbol, Symbol, SymbolId, SymbolKind};
pub use token::{Token, TokenKind, TokenValue};
