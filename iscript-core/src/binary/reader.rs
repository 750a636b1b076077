//! ISCR reader
//!
//! Everything is validated while reading; a `Program` is only returned once
//! the whole stream has been checked.

use super::{kind, LoadError, MAGIC, VERSION};
use crate::compiler::ast::FunctionKind;
use crate::compiler::instruction::{Instruction, Opcode, Operand, REGISTER_COUNT};
use crate::compiler::symbol::{FunctionSymbol, Symbol, SymbolId, SymbolKind};
use crate::program::Program;
use iscript_log::{debug, Logger};
use std::io::{ErrorKind, Read};
use std::sync::Arc;

/// Upper bound for pre-allocation; counts come from untrusted input
const MAX_PREALLOCATE: usize = 4096;

pub struct BinaryReader<'r, R: Read> {
    input: &'r mut R,
    logger: Arc<Logger>,
}

impl<'r, R: Read> BinaryReader<'r, R> {
    pub fn new(input: &'r mut R) -> Self {
        Self {
            input,
            logger: Logger::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn read_program(mut self) -> Result<Program, LoadError> {
        let mut magic = [0u8; 4];
        self.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(LoadError::BadSignature(magic));
        }
        let version = self.read_u8()?;
        if version > VERSION {
            return Err(LoadError::UnsupportedVersion {
                found: version,
                supported: VERSION,
            });
        }

        let instruction_count = self.read_u32()?;
        let symbol_count = self.read_u32()?;
        let is_class = self.read_bool("class flag")?;
        let class_name = self.read_string()?;
        let base_name = self.read_string()?;
        let initial_file = self.read_string()?;
        let global_count = self.read_u32()?;
        let function_table_size = self.read_u32()?;

        let mut symbols = Vec::with_capacity((symbol_count as usize).min(MAX_PREALLOCATE));
        for _ in 0..symbol_count {
            symbols.push(self.read_symbol(symbol_count, instruction_count)?);
        }

        let mut instructions =
            Vec::with_capacity((instruction_count as usize).min(MAX_PREALLOCATE));
        for index in 0..instruction_count {
            instructions.push(self.read_instruction(index, symbol_count, instruction_count)?);
        }

        validate_states(&symbols)?;
        validate_slots(&symbols, &instructions, global_count)?;

        debug!(
            self.logger,
            "loaded {} symbols, {} instructions from '{}'",
            symbols.len(),
            instructions.len(),
            initial_file
        );

        Ok(Program {
            symbols,
            instructions,
            class_name: is_class.then_some(class_name),
            base_name: (is_class && !base_name.is_empty()).then_some(base_name),
            initial_file,
            global_count,
            function_table_size,
        })
    }

    fn read_symbol(&mut self, symbol_count: u32, instruction_count: u32) -> Result<Symbol, LoadError> {
        let tag = self.read_u8()?;
        let name = self.read_string()?;
        let line = self.read_u32()?;
        let column = self.read_u32()?;

        let kind = match tag {
            kind::FUNCTION => {
                let entry = self.read_u32()?;
                if entry > instruction_count {
                    return Err(LoadError::OperandOutOfRange {
                        instruction: entry,
                        operand: format!("entry of function '{name}'"),
                    });
                }
                let params = self.read_u32()?;
                let locals = self.read_u32()?;
                if params > locals {
                    return Err(LoadError::Inconsistent(format!(
                        "function '{name}' has {params} parameters but {locals} locals"
                    )));
                }
                let state = match self.read_i32()? {
                    -1 => None,
                    s if s >= 0 && (s as u32) < symbol_count => Some(SymbolId(s as u32)),
                    s => {
                        return Err(LoadError::OperandOutOfRange {
                            instruction: 0,
                            operand: format!("state #{s} of function '{name}'"),
                        })
                    }
                };
                let subtype_tag = self.read_u8()?;
                let subtype = FunctionKind::from_u8(subtype_tag).ok_or(LoadError::InvalidTag {
                    what: "function subtype",
                    tag: subtype_tag,
                })?;
                let index = self.read_u32()?;
                let native = if self.read_bool("native flag")? {
                    Some(self.read_string()?)
                } else {
                    None
                };
                SymbolKind::Function(FunctionSymbol {
                    entry,
                    params,
                    locals,
                    state,
                    subtype,
                    index,
                    native,
                })
            }
            kind::VARIABLE => SymbolKind::Variable {
                slot: self.read_u32()?,
                global: self.read_bool("global flag")?,
                constant: self.read_bool("constant flag")?,
            },
            kind::STRING => SymbolKind::String {
                value: self.read_string()?,
            },
            kind::STATE => SymbolKind::State {
                default: self.read_bool("default flag")?,
            },
            tag => {
                return Err(LoadError::InvalidTag {
                    what: "symbol kind",
                    tag,
                })
            }
        };
        Ok(Symbol::new(name, line, column, kind))
    }

    fn read_instruction(
        &mut self,
        index: u32,
        symbol_count: u32,
        instruction_count: u32,
    ) -> Result<Instruction, LoadError> {
        let code = self.read_u8()?;
        let opcode = Opcode::from_u8(code).ok_or(LoadError::InvalidTag {
            what: "opcode",
            tag: code,
        })?;
        let count = self.read_u8()?;
        if count as usize > Instruction::MAX_OPERANDS {
            return Err(LoadError::OperandOutOfRange {
                instruction: index,
                operand: format!("operand count {count}"),
            });
        }
        let line = self.read_u32()?;
        let column = self.read_u32()?;

        let mut operands = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = self.read_u8()?;
            let operand = match tag {
                0 => Operand::Int(self.read_i64()?),
                1 => Operand::Float(f64::from_le_bytes(self.read_array()?)),
                2 => Operand::Register(self.read_u8()?),
                3 => Operand::Instruction(self.read_u32()?),
                4 => Operand::Stack(self.read_u32()?),
                5 => Operand::Symbol(self.read_u32()?),
                tag => {
                    return Err(LoadError::InvalidTag {
                        what: "operand",
                        tag,
                    })
                }
            };
            let in_range = match operand {
                Operand::Register(r) => (r as usize) < REGISTER_COUNT,
                Operand::Instruction(target) => target <= instruction_count,
                Operand::Symbol(symbol) => symbol < symbol_count,
                _ => true,
            };
            if !in_range {
                return Err(LoadError::OperandOutOfRange {
                    instruction: index,
                    operand: operand.to_string(),
                });
            }
            operands.push(operand);
        }

        Ok(Instruction {
            opcode,
            operands,
            line,
            column,
        })
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), LoadError> {
        self.input.read_exact(buf).map_err(|err| match err.kind() {
            ErrorKind::UnexpectedEof => LoadError::Truncated,
            _ => LoadError::Io(err),
        })
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], LoadError> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_u8(&mut self) -> Result<u8, LoadError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_bool(&mut self, what: &'static str) -> Result<bool, LoadError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(LoadError::InvalidTag { what, tag }),
        }
    }

    fn read_u32(&mut self) -> Result<u32, LoadError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_i32(&mut self) -> Result<i32, LoadError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64, LoadError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn read_string(&mut self) -> Result<String, LoadError> {
        let len = self.read_u32()? as usize;
        // read through `take` so a corrupt length cannot force a huge allocation
        let mut bytes = Vec::with_capacity(len.min(MAX_PREALLOCATE));
        let read = (&mut *self.input)
            .take(len as u64)
            .read_to_end(&mut bytes)
            .map_err(LoadError::Io)?;
        if read < len {
            return Err(LoadError::Truncated);
        }
        String::from_utf8(bytes).map_err(|_| LoadError::InvalidUtf8)
    }
}

/// Function state references must name `State` symbols
fn validate_states(symbols: &[Symbol]) -> Result<(), LoadError> {
    for symbol in symbols {
        if let Some(state) = symbol.as_function().and_then(|f| f.state) {
            let valid = symbols
                .get(state.index())
                .is_some_and(|s| matches!(s.kind, SymbolKind::State { .. }));
            if !valid {
                return Err(LoadError::OperandOutOfRange {
                    instruction: 0,
                    operand: format!("state #{} of function '{}'", state.0, symbol.name),
                });
            }
        }
    }
    Ok(())
}

/// Global slots must cover exactly the declared global variables, and every
/// `Stack` operand must fit the frame it addresses: the owning function's
/// locals for local access, the global table otherwise.
fn validate_slots(
    symbols: &[Symbol],
    instructions: &[Instruction],
    global_count: u32,
) -> Result<(), LoadError> {
    let mut globals = 0u32;
    for symbol in symbols {
        if let SymbolKind::Variable {
            slot, global: true, ..
        } = symbol.kind
        {
            if slot >= global_count {
                return Err(LoadError::Inconsistent(format!(
                    "global '{}' uses slot {slot} of {global_count}",
                    symbol.name
                )));
            }
            globals += 1;
        }
    }
    if globals != global_count {
        return Err(LoadError::Inconsistent(format!(
            "{global_count} global slots declared for {globals} global variables"
        )));
    }

    // bodies are laid out back to back after the global code
    let mut bodies: Vec<(u32, u32)> = symbols
        .iter()
        .filter_map(Symbol::as_function)
        .filter(|f| f.native.is_none())
        .map(|f| (f.entry, f.locals))
        .collect();
    bodies.sort_unstable();

    for (index, instruction) in instructions.iter().enumerate() {
        let index = index as u32;
        let limit = match instruction.opcode {
            Opcode::GetLocal | Opcode::SetLocal => bodies
                .iter()
                .rev()
                .find(|(entry, _)| *entry <= index)
                .map_or(0, |(_, locals)| *locals),
            Opcode::GetGlobal | Opcode::SetGlobal => global_count,
            _ => continue,
        };
        for operand in &instruction.operands {
            if let Operand::Stack(slot) = *operand {
                if slot >= limit {
                    return Err(LoadError::OperandOutOfRange {
                        instruction: index,
                        operand: operand.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}
