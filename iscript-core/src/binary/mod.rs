//! ISCR compiled-program format
//!
//! # Layout
//!
//! All multi-byte values are little-endian; strings are a `u32` byte length
//! followed by UTF-8 bytes with no terminator.
//!
//! ```text
//! magic         4 bytes  "ISCR"
//! version       u8
//! instr_count   u32
//! symbol_count  u32
//! is_class      u8
//! class_name    string
//! base_name     string
//! initial_file  string
//! global_count  u32
//! fn_table      u32
//! symbols       symbol_count records
//!     kind u8, name string, line u32, column u32, then per kind:
//!     0 function  entry u32, params u32, locals u32, state i32 (-1 none),
//!                 subtype u8, index u32, native u8 [+ name string]
//!     1 variable  slot u32, global u8, constant u8
//!     2 string    value string
//!     3 state     default u8
//! instructions  instr_count records
//!     opcode u8, operand_count u8, line u32, column u32,
//!     operands: tag u8 then payload
//!     0 int i64 | 1 float f64 | 2 register u8 | 3 instruction u32
//!     4 stack u32 | 5 symbol u32
//! ```
//!
//! Jump-target symbols are never written: the writer saves
//! [`Program::without_jump_targets`], whose jumps already hold instruction
//! indices. Loading validates everything before handing out a `Program`.

mod reader;
mod writer;

pub use reader::BinaryReader;
pub use writer::BinaryWriter;

use crate::program::Program;
use std::io::{Read, Write};
use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"ISCR";
pub const VERSION: u8 = 1;

/// Symbol record kinds
pub(crate) mod kind {
    pub const FUNCTION: u8 = 0;
    pub const VARIABLE: u8 = 1;
    pub const STRING: u8 = 2;
    pub const STATE: u8 = 3;
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("instruction {instruction} still refers to an unresolved jump target")]
    UnresolvedJumpTarget { instruction: u32 },

    #[error("{what} does not fit in 32 bits")]
    TooLarge { what: &'static str },

    #[error("no compiled program to save")]
    NothingCompiled,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("bad signature {0:?}, expected \"ISCR\"")]
    BadSignature([u8; 4]),

    #[error("unsupported version {found} (newest supported is {supported})")]
    UnsupportedVersion { found: u8, supported: u8 },

    #[error("unexpected end of data")]
    Truncated,

    #[error("invalid {what} tag {tag}")]
    InvalidTag { what: &'static str, tag: u8 },

    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("instruction {instruction}: operand {operand} out of range")]
    OperandOutOfRange { instruction: u32, operand: String },

    #[error("inconsistent program: {0}")]
    Inconsistent(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes `program` (minus jump-target symbols) to `writer`
pub fn save<W: Write>(program: &Program, writer: &mut W) -> Result<(), SaveError> {
    BinaryWriter::new(writer).write_program(program)
}

/// Reads and validates a program from `reader`
pub fn load<R: Read>(reader: &mut R) -> Result<Program, LoadError> {
    BinaryReader::new(reader).read_program()
}

pub fn save_to_bytes(program: &Program) -> Result<Vec<u8>, SaveError> {
    let mut bytes = Vec::new();
    save(program, &mut bytes)?;
    Ok(bytes)
}

pub fn load_from_bytes(bytes: &[u8]) -> Result<Program, LoadError> {
    let mut cursor = bytes;
    load(&mut cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::context::CompileContext;
    use crate::compiler::instruction::{Opcode, Operand};
    use iscript_config::CompilerConfig;

    fn compile(source: &str) -> Program {
        let mut ctx = CompileContext::new(source, CompilerConfig::default());
        assert!(ctx.compile(), "{:?}", ctx.diagnostics());
        ctx.program().expect("program")
    }

    const SAMPLE: &str = r#"
        class Enemy extends Actor;
        using Weapon;
        const LIMIT = 3;
        var names = ["a", "b"], score = 1.5;
        function print(x) = native("print");
        generator count(n) { for (var i = 0; i < n; i++) { yield i; } }
        state Idle as default {
            event onHit(damage) { if (damage > LIMIT) gotostate(Angry); }
        }
        state Angry { event onHit(damage) { score -= damage; } }
        switch (score) { case 1, 2: score = 0; break; default: score = -1; }
    "#;

    #[test]
    fn test_save_load_reproduces_program() {
        let program = compile(SAMPLE);
        let bytes = save_to_bytes(&program).expect("save");
        assert_eq!(&bytes[..4], b"ISCR");
        assert_eq!(bytes[4], VERSION);

        let loaded = load_from_bytes(&bytes).expect("load");
        assert_eq!(loaded, program.without_jump_targets());
        assert_eq!(loaded.class_name.as_deref(), Some("Enemy"));
        assert_eq!(loaded.base_name.as_deref(), Some("Actor"));
    }

    #[test]
    fn test_bad_signature() {
        let mut bytes = save_to_bytes(&compile("var a = 1;")).expect("save");
        bytes[0] = b'X';
        assert!(matches!(load_from_bytes(&bytes), Err(LoadError::BadSignature(_))));
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut bytes = save_to_bytes(&compile("var a = 1;")).expect("save");
        bytes[4] = VERSION + 1;
        assert!(matches!(
            load_from_bytes(&bytes),
            Err(LoadError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn test_truncated_at_every_length() {
        let bytes = save_to_bytes(&compile(SAMPLE)).expect("save");
        for len in [0, 3, 5, 9, bytes.len() / 2, bytes.len() - 1] {
            let result = load_from_bytes(&bytes[..len]);
            assert!(
                matches!(result, Err(LoadError::Truncated)),
                "length {len}: {result:?}"
            );
        }
    }

    #[test]
    fn test_symbol_operand_out_of_range() {
        let mut program = compile("var s = \"text\";").without_jump_targets();
        let load = program
            .instructions
            .iter_mut()
            .find(|i| matches!(i.operand(1), Some(Operand::Symbol(_))))
            .expect("string load");
        load.operands[1] = Operand::Symbol(999);

        let bytes = save_to_bytes(&program).expect("save");
        assert!(matches!(
            load_from_bytes(&bytes),
            Err(LoadError::OperandOutOfRange { .. })
        ));
    }

    #[test]
    fn test_global_count_must_match_globals() {
        let mut program = compile("var a = 1; var b = a;");
        program.global_count = 1_000_000;
        let bytes = save_to_bytes(&program).expect("save");
        assert!(matches!(
            load_from_bytes(&bytes),
            Err(LoadError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_params_beyond_locals_rejected() {
        let mut program = compile("function f(a, b) { return a; }");
        let f = program
            .symbols
            .iter_mut()
            .find_map(|s| s.as_function_mut())
            .expect("function");
        f.locals = 1;
        let bytes = save_to_bytes(&program).expect("save");
        let err = load_from_bytes(&bytes).expect_err("params > locals");
        assert!(err.to_string().contains("'f'"), "{err}");
    }

    #[test]
    fn test_stack_operand_must_fit_its_frame() {
        let cases = [
            ("function f(a) { var b = a; return b; }", Opcode::GetLocal),
            ("function f(a) { var b = a; return b; }", Opcode::SetLocal),
            ("var a = 1; var b = a;", Opcode::GetGlobal),
            ("var a = 1; var b = a;", Opcode::SetGlobal),
        ];
        for (source, opcode) in cases {
            let mut program = compile(source);
            let access = program
                .instructions
                .iter_mut()
                .find(|i| i.opcode == opcode)
                .expect("slot access");
            for operand in &mut access.operands {
                if let Operand::Stack(slot) = operand {
                    *slot += 2;
                }
            }
            let bytes = save_to_bytes(&program).expect("save");
            let result = load_from_bytes(&bytes);
            assert!(
                matches!(result, Err(LoadError::OperandOutOfRange { .. })),
                "{opcode:?}: {result:?}"
            );
        }
    }

    #[test]
    fn test_local_access_in_global_code_rejected() {
        let mut program = compile("var a = 1; var b = a;");
        for ins in &mut program.instructions {
            if ins.opcode == Opcode::GetGlobal {
                ins.opcode = Opcode::GetLocal;
            }
        }
        let bytes = save_to_bytes(&program).expect("save");
        assert!(matches!(
            load_from_bytes(&bytes),
            Err(LoadError::OperandOutOfRange { .. })
        ));
    }

    #[test]
    fn test_unresolved_jump_target_refused() {
        let mut program = compile("var a = 1;");
        program.instructions[0].operands[1] = Operand::JumpTarget(0);
        assert!(matches!(
            save_to_bytes(&program),
            Err(SaveError::UnresolvedJumpTarget { instruction: 0 })
        ));
    }
}
