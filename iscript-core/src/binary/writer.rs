//! ISCR writer

use super::{kind, SaveError, MAGIC, VERSION};
use crate::compiler::instruction::{Instruction, Operand};
use crate::compiler::symbol::{Symbol, SymbolKind};
use crate::program::Program;
use iscript_log::{debug, Logger};
use std::io::Write;
use std::sync::Arc;

pub struct BinaryWriter<'w, W: Write> {
    out: &'w mut W,
    logger: Arc<Logger>,
}

impl<'w, W: Write> BinaryWriter<'w, W> {
    pub fn new(out: &'w mut W) -> Self {
        Self {
            out,
            logger: Logger::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn write_program(mut self, program: &Program) -> Result<(), SaveError> {
        let program = program.without_jump_targets();

        self.out.write_all(&MAGIC)?;
        self.write_u8(VERSION)?;
        self.write_len(program.instructions.len(), "instruction count")?;
        self.write_len(program.symbols.len(), "symbol count")?;
        self.write_u8(program.is_class() as u8)?;
        self.write_str(program.class_name.as_deref().unwrap_or_default())?;
        self.write_str(program.base_name.as_deref().unwrap_or_default())?;
        self.write_str(&program.initial_file)?;
        self.write_u32(program.global_count)?;
        self.write_u32(program.function_table_size)?;

        for symbol in &program.symbols {
            self.write_symbol(symbol)?;
        }
        for (index, instruction) in program.instructions.iter().enumerate() {
            self.write_instruction(index as u32, instruction)?;
        }
        self.out.flush()?;

        debug!(
            self.logger,
            "saved {} symbols, {} instructions",
            program.symbols.len(),
            program.instructions.len()
        );
        Ok(())
    }

    fn write_symbol(&mut self, symbol: &Symbol) -> Result<(), SaveError> {
        let tag = match &symbol.kind {
            SymbolKind::Function(_) => kind::FUNCTION,
            SymbolKind::Variable { .. } => kind::VARIABLE,
            SymbolKind::String { .. } => kind::STRING,
            SymbolKind::State { .. } => kind::STATE,
            // stripped by without_jump_targets
            SymbolKind::JumpTarget { .. } => return Ok(()),
        };
        self.write_u8(tag)?;
        self.write_str(&symbol.name)?;
        self.write_u32(symbol.line)?;
        self.write_u32(symbol.column)?;

        match &symbol.kind {
            SymbolKind::Function(function) => {
                self.write_u32(function.entry)?;
                self.write_u32(function.params)?;
                self.write_u32(function.locals)?;
                let state = match function.state {
                    Some(state) => i32::try_from(state.0)
                        .map_err(|_| SaveError::TooLarge { what: "state index" })?,
                    None => -1,
                };
                self.out.write_all(&state.to_le_bytes())?;
                self.write_u8(function.subtype.as_u8())?;
                self.write_u32(function.index)?;
                match &function.native {
                    Some(name) => {
                        self.write_u8(1)?;
                        self.write_str(name)?;
                    }
                    None => self.write_u8(0)?,
                }
            }
            SymbolKind::Variable {
                slot,
                global,
                constant,
            } => {
                self.write_u32(*slot)?;
                self.write_u8(*global as u8)?;
                self.write_u8(*constant as u8)?;
            }
            SymbolKind::String { value } => self.write_str(value)?,
            SymbolKind::State { default } => self.write_u8(*default as u8)?,
            SymbolKind::JumpTarget { .. } => {}
        }
        Ok(())
    }

    fn write_instruction(&mut self, index: u32, instruction: &Instruction) -> Result<(), SaveError> {
        self.write_u8(instruction.opcode as u8)?;
        self.write_u8(instruction.operands.len() as u8)?;
        self.write_u32(instruction.line)?;
        self.write_u32(instruction.column)?;

        for operand in &instruction.operands {
            let tag = operand
                .tag()
                .ok_or(SaveError::UnresolvedJumpTarget { instruction: index })?;
            self.write_u8(tag)?;
            match *operand {
                Operand::Int(v) => self.out.write_all(&v.to_le_bytes())?,
                Operand::Float(v) => self.out.write_all(&v.to_le_bytes())?,
                Operand::Register(r) => self.write_u8(r)?,
                Operand::Instruction(v) | Operand::Stack(v) | Operand::Symbol(v) => {
                    self.write_u32(v)?
                }
                Operand::JumpTarget(_) => {}
            }
        }
        Ok(())
    }

    fn write_u8(&mut self, value: u8) -> Result<(), SaveError> {
        self.out.write_all(&[value])?;
        Ok(())
    }

    fn write_u32(&mut self, value: u32) -> Result<(), SaveError> {
        self.out.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn write_len(&mut self, len: usize, what: &'static str) -> Result<(), SaveError> {
        let len = u32::try_from(len).map_err(|_| SaveError::TooLarge { what })?;
        self.write_u32(len)
    }

    fn write_str(&mut self, value: &str) -> Result<(), SaveError> {
        self.write_len(value.len(), "string")?;
        self.out.write_all(value.as_bytes())?;
        Ok(())
    }
}
