//! Register-machine instructions
//!
//! Registers 0..=3 are reserved: r0 holds 0, r1 holds 1, r2 receives return
//! values and r3 holds comparison results. Registers 4..=31 are allocated by
//! the generator.

use serde::Serialize;
use std::fmt;

pub const REGISTER_COUNT: usize = 32;
pub const REG_ZERO: u8 = 0;
pub const REG_ONE: u8 = 1;
pub const REG_RETURN: u8 = 2;
pub const REG_COMPARE: u8 = 3;
pub const FIRST_GENERAL_REGISTER: u8 = 4;

macro_rules! opcodes {
    ($($name:ident = $code:literal, $text:literal;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $code,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$name => $text,)*
                }
            }

            pub fn from_u8(code: u8) -> Option<Self> {
                match code {
                    $($code => Some(Opcode::$name),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Nop = 0, "NOP";
    LoadInt = 1, "LOADI";
    LoadFloat = 2, "LOADF";
    LoadString = 3, "LOADS";
    LoadSymbol = 4, "LOADSYM";
    LoadNull = 5, "LOADNULL";
    LoadFunction = 6, "LOADFN";
    Move = 7, "MOV";
    GetLocal = 8, "GETL";
    SetLocal = 9, "SETL";
    GetGlobal = 10, "GETG";
    SetGlobal = 11, "SETG";

    Add = 20, "ADD";
    Sub = 21, "SUB";
    Mul = 22, "MUL";
    Div = 23, "DIV";
    Mod = 24, "MOD";
    BitAnd = 25, "BAND";
    BitOr = 26, "BOR";
    BitXor = 27, "BXOR";
    Shl = 28, "SHL";
    Shr = 29, "SHR";
    Equal = 30, "EQ";
    NotEqual = 31, "NE";
    Less = 32, "LT";
    LessEqual = 33, "LE";
    Greater = 34, "GT";
    GreaterEqual = 35, "GE";
    Negate = 36, "NEG";
    Not = 37, "NOT";
    BitNot = 38, "BNOT";
    Bool = 39, "BOOL";
    Inc = 40, "INC";
    Dec = 41, "DEC";

    Jump = 50, "JMP";
    JumpIfZero = 51, "JZ";
    JumpIfNotZero = 52, "JNZ";

    NewList = 60, "NEWLIST";
    Append = 61, "APPEND";
    NewDict = 62, "NEWDICT";
    DictInsert = 63, "DICTINS";
    GetIndex = 64, "GETIDX";
    SetIndex = 65, "SETIDX";
    GetMember = 66, "GETMEMBER";
    SetMember = 67, "SETMEMBER";

    Iter = 70, "ITER";
    IterNext = 71, "ITERNEXT";
    IterDone = 72, "ITERDONE";

    Push = 80, "PUSH";
    Invoke = 81, "INVK";
    Call = 82, "CALL";
    CallMethod = 83, "CALLM";
    CallNative = 84, "CALLNATIVE";
    CallEvent = 85, "CALLEVENT";
    GetNative = 86, "GETNATIVE";
    Return = 87, "RET";
    Yield = 88, "YIELD";

    SetState = 90, "SETSTATE";
    IsType = 91, "ISTYPE";
    Cast = 92, "CAST";
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tagged operand
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Operand {
    Int(i64),
    Float(f64),
    Register(u8),
    /// Resolved instruction index
    Instruction(u32),
    /// Local or global slot
    Stack(u32),
    Symbol(u32),
    /// Unresolved jump target (symbol id); rewritten to `Instruction` before the program is finished
    JumpTarget(u32),
}

impl Operand {
    /// Persisted tag; `JumpTarget` has none because it never reaches disk
    pub fn tag(&self) -> Option<u8> {
        match self {
            Operand::Int(_) => Some(0),
            Operand::Float(_) => Some(1),
            Operand::Register(_) => Some(2),
            Operand::Instruction(_) => Some(3),
            Operand::Stack(_) => Some(4),
            Operand::Symbol(_) => Some(5),
            Operand::JumpTarget(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Int(v) => write!(f, "{v}"),
            Operand::Float(v) => write!(f, "{v:?}"),
            Operand::Register(r) => write!(f, "r{r}"),
            Operand::Instruction(i) => write!(f, "@{i}"),
            Operand::Stack(s) => write!(f, "[{s}]"),
            Operand::Symbol(s) => write!(f, "#{s}"),
            Operand::JumpTarget(s) => write!(f, "label#{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub opcode: Opcode,
    /// At most three
    pub operands: Vec<Operand>,
    pub line: u32,
    pub column: u32,
}

impl Instruction {
    pub const MAX_OPERANDS: usize = 3;

    pub fn new(opcode: Opcode, operands: Vec<Operand>, line: u32, column: u32) -> Self {
        debug_assert!(operands.len() <= Self::MAX_OPERANDS);
        Self {
            opcode,
            operands,
            line,
            column,
        }
    }

    pub fn operand(&self, index: usize) -> Option<Operand> {
        self.operands.get(index).copied()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10}", self.opcode.name())?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{operand}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_codes_round_trip() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_u8(op as u8), Some(op));
        }
        assert_eq!(Opcode::from_u8(255), None);
    }

    #[test]
    fn test_display() {
        let ins = Instruction::new(
            Opcode::Add,
            vec![Operand::Register(4), Operand::Register(4), Operand::Register(5)],
            1,
            1,
        );
        assert_eq!(ins.to_string(), "ADD       r4, r4, r5");

        let jump = Instruction::new(Opcode::JumpIfZero, vec![Operand::Register(4), Operand::Instruction(12)], 1, 1);
        assert_eq!(jump.to_string(), "JZ        r4, @12");
    }

    #[test]
    fn test_jump_target_has_no_tag() {
        assert_eq!(Operand::JumpTarget(3).tag(), None);
        assert_eq!(Operand::Symbol(3).tag(), Some(5));
    }
}
