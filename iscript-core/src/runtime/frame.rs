//! Call frames

use super::value::{ObjRef, Value};
use crate::compiler::instruction::{REGISTER_COUNT, REG_ONE, REG_ZERO};

/// What happens to the frame's result when it returns or yields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Ordinary call; `RET` copies r2 into the caller's `dest`
    Call { dest: u8 },
    /// Running generator body, resumed for its caller's `dest`
    Generator { iterator: ObjRef, dest: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    /// Function-table index; `None` for global code
    pub function: Option<u32>,
    pub pc: u32,
    pub registers: [Value; REGISTER_COUNT],
    pub locals: Vec<Value>,
    pub kind: FrameKind,
}

impl CallFrame {
    pub fn new(function: Option<u32>, entry: u32, locals: usize, kind: FrameKind) -> Self {
        let mut registers = [Value::Null; REGISTER_COUNT];
        registers[REG_ZERO as usize] = Value::Int(0);
        registers[REG_ONE as usize] = Value::Int(1);
        Self {
            function,
            pc: entry,
            registers,
            locals: vec![Value::Null; locals],
            kind,
        }
    }

    /// Frame for a call with `args` copied into the first local slots
    pub fn with_args(
        function: u32,
        entry: u32,
        locals: usize,
        args: &[Value],
        kind: FrameKind,
    ) -> Self {
        let mut frame = Self::new(Some(function), entry, locals.max(args.len()), kind);
        frame.locals[..args.len()].copy_from_slice(args);
        frame
    }

    /// Every value the frame keeps alive
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.registers.iter().chain(self.locals.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_registers() {
        let frame = CallFrame::new(None, 0, 2, FrameKind::Call { dest: 2 });
        assert_eq!(frame.registers[0], Value::Int(0));
        assert_eq!(frame.registers[1], Value::Int(1));
        assert_eq!(frame.locals.len(), 2);
    }

    #[test]
    fn test_args_fill_first_locals() {
        let frame = CallFrame::with_args(
            3,
            10,
            4,
            &[Value::Int(7), Value::Float(0.5)],
            FrameKind::Call { dest: 2 },
        );
        assert_eq!(frame.function, Some(3));
        assert_eq!(frame.pc, 10);
        assert_eq!(frame.locals, vec![Value::Int(7), Value::Float(0.5), Value::Null, Value::Null]);
    }
}
