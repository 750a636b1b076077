//! Fetch-decode-execute loop

use super::Vm;
use crate::compiler::ast::TypeName;
use crate::compiler::instruction::{Instruction, Opcode, Operand, REGISTER_COUNT, REG_RETURN};
use crate::compiler::symbol::{SymbolId, SymbolKind};
use crate::runtime::context::{ContextStatus, ExecutionContext};
use crate::runtime::error::{RuntimeError, RuntimeErrorKind};
use crate::runtime::frame::FrameKind;
use crate::runtime::object::{DictKey, IteratorObject, IteratorSource, Object};
use crate::runtime::value::{FunctionRef, Value};
use indexmap::IndexMap;
use iscript_log::debug;
use std::sync::Arc;
use std::time::Instant;

/// How an `execute` call ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Outcome {
    /// The frame at `base` returned this value
    Completed(Value),
    /// A generator frame at `base` yielded this value
    Yielded(Value),
    OutOfBudget,
}

/// Instruction allowance of one time slice
pub(crate) struct Budget {
    remaining: u64,
    deadline: Option<Instant>,
    check_interval: u64,
    since_check: u64,
}

impl Budget {
    pub fn new(instructions: u64, deadline: Option<Instant>, check_interval: u64) -> Self {
        Self {
            remaining: instructions,
            deadline,
            check_interval: check_interval.max(1),
            since_check: 0,
        }
    }

    /// Consumes one instruction; `true` once the slice is used up. The clock
    /// is only read every `check_interval` instructions.
    pub fn exhausted(&mut self) -> bool {
        if self.remaining == 0 {
            return true;
        }
        if let Some(deadline) = self.deadline {
            self.since_check += 1;
            if self.since_check >= self.check_interval {
                self.since_check = 0;
                if Instant::now() >= deadline {
                    self.remaining = 0;
                    return true;
                }
            }
        }
        self.remaining -= 1;
        false
    }
}

enum Step {
    Continue,
    Return(Value),
    Yield(Value),
}

impl Vm {
    /// Runs `ctx` until the frame at depth `base` returns or yields, or the
    /// budget runs out
    pub(crate) fn execute(
        &mut self,
        ctx: &mut ExecutionContext,
        base: usize,
        mut budget: Option<&mut Budget>,
    ) -> Result<Outcome, RuntimeError> {
        self.nesting += 1;
        let previous = ctx.status;
        ctx.status = ContextStatus::Running;
        let result = self.execute_loop(ctx, base, &mut budget);
        if ctx.status == ContextStatus::Running {
            ctx.status = previous;
        }
        self.nesting -= 1;
        result
    }

    fn execute_loop(
        &mut self,
        ctx: &mut ExecutionContext,
        base: usize,
        budget: &mut Option<&mut Budget>,
    ) -> Result<Outcome, RuntimeError> {
        loop {
            if ctx.frames.len() <= base {
                return Ok(Outcome::Completed(Value::Null));
            }
            if let Some(budget) = budget.as_deref_mut() {
                if budget.exhausted() {
                    return Ok(Outcome::OutOfBudget);
                }
            }
            self.tick(ctx);

            let program = Arc::clone(&ctx.program);
            let Some(frame) = ctx.frames.last_mut() else {
                return Ok(Outcome::Completed(Value::Null));
            };
            let pc = frame.pc;
            let Some(instruction) = program.instructions.get(pc as usize) else {
                return Err(RuntimeError::new(RuntimeErrorKind::MalformedInstruction, "fetch")
                    .with_value(format!("pc {pc}")));
            };
            frame.pc += 1;

            #[cfg(feature = "trace_execution")]
            iscript_log::trace!(self.logger, "{} {:>5}  {}", ctx.id, pc, instruction);

            match self.step(ctx, instruction, base) {
                Ok(Step::Continue) => {}
                Ok(Step::Return(value)) => return Ok(Outcome::Completed(value)),
                Ok(Step::Yield(value)) => return Ok(Outcome::Yielded(value)),
                Err(err) => return Err(err.at(pc, instruction.line, instruction.column)),
            }
        }
    }

    /// Counts one instruction and runs the collections that are due. Only the
    /// outermost loop collects, so no value is ever held outside a root.
    fn tick(&mut self, ctx: &ExecutionContext) {
        self.ticks += 1;
        let interval = self.config.gc_interval;
        if self.nesting != 1 || interval == 0 || self.ticks % interval != 0 {
            return;
        }
        let factor = self.config.generation_factor.max(1);
        let mut generation = 0u8;
        let mut period = interval;
        while generation + 1 < self.heap.generations() {
            period = period.saturating_mul(factor);
            if self.ticks % period != 0 {
                break;
            }
            generation += 1;
        }
        self.collect_with(generation, Some(ctx));
    }

    fn step(
        &mut self,
        ctx: &mut ExecutionContext,
        ins: &Instruction,
        base: usize,
    ) -> Result<Step, RuntimeError> {
        let op = ins.opcode;
        match op {
            Opcode::Nop => {}

            // ===== loads and moves =====
            Opcode::LoadInt => {
                let value = int(ins, 1)?;
                ctx.set_register(reg(ins, 0)?, Value::Int(value));
            }
            Opcode::LoadFloat => {
                let value = match ins.operand(1) {
                    Some(Operand::Float(v)) => v,
                    Some(Operand::Int(v)) => v as f64,
                    _ => return Err(malformed(ins)),
                };
                ctx.set_register(reg(ins, 0)?, Value::Float(value));
            }
            Opcode::LoadString => {
                let value = self.load_string(ctx, symbol(ins, 1)?, ins)?;
                ctx.set_register(reg(ins, 0)?, value);
            }
            Opcode::LoadSymbol => {
                let name = string_symbol(ctx, symbol(ins, 1)?, ins)?.to_string();
                let id = self.intern(&name);
                ctx.set_register(reg(ins, 0)?, Value::Symbol(id));
            }
            Opcode::LoadNull => ctx.set_register(reg(ins, 0)?, Value::Null),
            Opcode::LoadFunction => {
                let id = symbol(ins, 1)?;
                let index = ctx
                    .program
                    .symbol(id)
                    .and_then(|s| s.as_function())
                    .map(|f| f.index)
                    .ok_or_else(|| malformed(ins))?;
                let value = Value::Function(FunctionRef {
                    context: ctx.id,
                    index,
                });
                ctx.set_register(reg(ins, 0)?, value);
            }
            Opcode::Move => {
                let value = ctx.register(reg(ins, 1)?);
                ctx.set_register(reg(ins, 0)?, value);
            }
            Opcode::GetLocal => {
                let slot = stack(ins, 1)?;
                let value = ctx
                    .frames
                    .last()
                    .and_then(|f| f.locals.get(slot))
                    .copied()
                    .ok_or_else(|| malformed(ins))?;
                ctx.set_register(reg(ins, 0)?, value);
            }
            Opcode::SetLocal => {
                let slot = stack(ins, 0)?;
                let value = ctx.register(reg(ins, 1)?);
                // frames are sized to the function's declared locals on entry
                let local = ctx
                    .frames
                    .last_mut()
                    .and_then(|f| f.locals.get_mut(slot))
                    .ok_or_else(|| malformed(ins))?;
                *local = value;
            }
            Opcode::GetGlobal => {
                let slot = stack(ins, 1)?;
                let value = *ctx.globals.get(slot).ok_or_else(|| malformed(ins))?;
                ctx.set_register(reg(ins, 0)?, value);
            }
            Opcode::SetGlobal => {
                let slot = stack(ins, 0)?;
                let value = ctx.register(reg(ins, 1)?);
                *ctx.globals.get_mut(slot).ok_or_else(|| malformed(ins))? = value;
            }

            // ===== operators =====
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::BitXor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::Less
            | Opcode::LessEqual
            | Opcode::Greater
            | Opcode::GreaterEqual => {
                let dest = reg(ins, 0)?;
                let a = ctx.register(reg(ins, 1)?);
                let b = ctx.register(reg(ins, 2)?);
                if let Some(function) = self.operator_function(ctx, op, a)? {
                    self.call_ref(ctx, function, vec![b], dest)?;
                } else {
                    let value = self.binary(op, a, b)?;
                    ctx.set_register(dest, value);
                }
            }
            Opcode::Negate | Opcode::Not | Opcode::BitNot | Opcode::Bool => {
                let value = self.unary(op, ctx.register(reg(ins, 1)?))?;
                ctx.set_register(reg(ins, 0)?, value);
            }
            Opcode::Inc | Opcode::Dec => {
                let r = reg(ins, 0)?;
                let delta = if op == Opcode::Inc { 1 } else { -1 };
                let value = match ctx.register(r) {
                    Value::Int(v) => Value::Int(v.wrapping_add(delta)),
                    Value::Float(v) => Value::Float(v + delta as f64),
                    other => return Err(self.type_error(op.name(), other)),
                };
                ctx.set_register(r, value);
            }

            // ===== control flow =====
            Opcode::Jump => jump(ctx, target(ins, 0)?),
            Opcode::JumpIfZero => {
                if !ctx.register(reg(ins, 0)?).is_truthy() {
                    jump(ctx, target(ins, 1)?);
                }
            }
            Opcode::JumpIfNotZero => {
                if ctx.register(reg(ins, 0)?).is_truthy() {
                    jump(ctx, target(ins, 1)?);
                }
            }

            // ===== containers =====
            Opcode::NewList => {
                let list = self.heap.alloc(Object::List(Vec::new()));
                ctx.set_register(reg(ins, 0)?, Value::Object(list));
            }
            Opcode::Append => {
                let list = ctx.register(reg(ins, 0)?);
                let value = ctx.register(reg(ins, 1)?);
                match list.as_object().and_then(|r| self.heap.get_mut(r)) {
                    Some(Object::List(items)) => items.push(value),
                    _ => return Err(self.type_error(op.name(), list)),
                }
            }
            Opcode::NewDict => {
                let dict = self.heap.alloc(Object::Dict(IndexMap::new()));
                ctx.set_register(reg(ins, 0)?, Value::Object(dict));
            }
            Opcode::DictInsert => {
                let dict = ctx.register(reg(ins, 0)?);
                let key = ctx.register(reg(ins, 1)?);
                let value = ctx.register(reg(ins, 2)?);
                let key = self.dict_key(key, op.name())?;
                match dict.as_object().and_then(|r| self.heap.get_mut(r)) {
                    Some(Object::Dict(entries)) => {
                        if entries.contains_key(&key) {
                            return Err(RuntimeError::new(RuntimeErrorKind::DuplicateKey, op.name())
                                .with_value(key.to_string()));
                        }
                        entries.insert(key, value);
                    }
                    _ => return Err(self.type_error(op.name(), dict)),
                }
            }
            Opcode::GetIndex => {
                let object = ctx.register(reg(ins, 1)?);
                let key = ctx.register(reg(ins, 2)?);
                let value = self.get_index(ctx, object, key)?;
                ctx.set_register(reg(ins, 0)?, value);
            }
            Opcode::SetIndex => {
                let object = ctx.register(reg(ins, 0)?);
                let key = ctx.register(reg(ins, 1)?);
                let value = ctx.register(reg(ins, 2)?);
                self.set_index(ctx, object, key, value)?;
            }
            Opcode::GetMember => {
                let object = ctx.register(reg(ins, 1)?);
                let name = string_symbol(ctx, symbol(ins, 2)?, ins)?.to_string();
                let value = self.get_member(ctx, object, &name, op.name())?;
                ctx.set_register(reg(ins, 0)?, value);
            }
            Opcode::SetMember => {
                let object = ctx.register(reg(ins, 0)?);
                let name = string_symbol(ctx, symbol(ins, 1)?, ins)?.to_string();
                let value = ctx.register(reg(ins, 2)?);
                self.set_member(ctx, object, &name, value, op.name())?;
            }

            // ===== iteration =====
            Opcode::Iter => {
                let source = ctx.register(reg(ins, 1)?);
                let iterator = self.make_iterator(source)?;
                ctx.set_register(reg(ins, 0)?, iterator);
            }
            Opcode::IterNext => {
                let dest = reg(ins, 0)?;
                let iterator = ctx.register(reg(ins, 1)?);
                self.iter_next(ctx, iterator, dest, op.name())?;
            }
            Opcode::IterDone => {
                let iterator = ctx.register(reg(ins, 1)?);
                let done = match iterator.as_object().and_then(|r| self.heap.get(r)) {
                    Some(Object::Iterator(it)) => it.done,
                    _ => return Err(self.not_iterable(op.name(), iterator)),
                };
                ctx.set_register(reg(ins, 0)?, Value::from_bool(done));
            }

            // ===== calls =====
            Opcode::Push => {
                let value = ctx.register(reg(ins, 0)?);
                ctx.params.push(value);
            }
            Opcode::Invoke => {
                let args = pop_args(ctx, ins)?;
                let index = ctx
                    .program
                    .symbol(symbol(ins, 0)?)
                    .and_then(|s| s.as_function())
                    .map(|f| f.index)
                    .ok_or_else(|| malformed(ins))?;
                self.invoke(ctx, index, args, REG_RETURN as usize)?;
            }
            Opcode::Call => {
                let callee = ctx.register(reg(ins, 0)?);
                let args = pop_args(ctx, ins)?;
                self.call_value(ctx, callee, args, REG_RETURN as usize, op.name())?;
            }
            Opcode::CallMethod => {
                let object = ctx.register(reg(ins, 0)?);
                let name = string_symbol(ctx, symbol(ins, 1)?, ins)?.to_string();
                let args = pop_args(ctx, ins)?;
                self.call_method(ctx, object, &name, args, REG_RETURN as usize)?;
            }
            Opcode::CallNative => {
                let id = symbol(ins, 0)?;
                let name = match ctx.program.symbol(id) {
                    Some(s) => match (&s.kind, s.as_function()) {
                        (_, Some(f)) => f.native.clone().unwrap_or_else(|| s.name.clone()),
                        (SymbolKind::String { value }, None) => value.clone(),
                        _ => return Err(malformed(ins)),
                    },
                    None => return Err(malformed(ins)),
                };
                let args = pop_args(ctx, ins)?;
                let value = self.call_native_named(ctx, &name, args)?;
                ctx.set_register(REG_RETURN as usize, value);
            }
            Opcode::CallEvent => {
                let name = ctx
                    .program
                    .symbol(symbol(ins, 0)?)
                    .map(|s| s.name.clone())
                    .ok_or_else(|| malformed(ins))?;
                let args = pop_args(ctx, ins)?;
                match ctx.event_handler(&name) {
                    Some(index) => self.invoke(ctx, index, args, REG_RETURN as usize)?,
                    None => {
                        debug!(self.logger, "{}: no handler for event '{}'", ctx.id, name);
                        ctx.set_register(REG_RETURN as usize, Value::Null);
                    }
                }
            }
            Opcode::GetNative => {
                let name = string_symbol(ctx, symbol(ins, 1)?, ins)?;
                let id = self.native_id(name).ok_or_else(|| {
                    RuntimeError::new(RuntimeErrorKind::UndefinedNative(name.to_string()), op.name())
                })?;
                ctx.set_register(reg(ins, 0)?, Value::Native(id));
            }
            Opcode::Return => return self.return_from_frame(ctx, base),
            Opcode::Yield => {
                let value = ctx.register(reg(ins, 0)?);
                return self.yield_from_frame(ctx, base, value, ins);
            }

            // ===== states and types =====
            Opcode::SetState => {
                let id = symbol(ins, 0)?;
                match ctx.program.symbol(id) {
                    Some(s) if matches!(s.kind, SymbolKind::State { .. }) => {
                        debug!(self.logger, "{}: entering state '{}'", ctx.id, s.name);
                        ctx.state = Some(SymbolId(id));
                    }
                    _ => return Err(malformed(ins)),
                }
            }
            Opcode::IsType => {
                let value = ctx.register(reg(ins, 1)?);
                let ty = type_operand(ins)?;
                let matches = self.type_name(value) == ty.name();
                ctx.set_register(reg(ins, 0)?, Value::from_bool(matches));
            }
            Opcode::Cast => {
                let value = ctx.register(reg(ins, 1)?);
                let ty = type_operand(ins)?;
                let value = self.cast(value, ty)?;
                ctx.set_register(reg(ins, 0)?, value);
            }
        }
        Ok(Step::Continue)
    }

    /// `LOADS`: one string object per string symbol and context
    fn load_string(
        &mut self,
        ctx: &mut ExecutionContext,
        id: u32,
        ins: &Instruction,
    ) -> Result<Value, RuntimeError> {
        if let Some(&r) = ctx.string_cache.get(&id) {
            if self.heap.contains(r) {
                return Ok(Value::Object(r));
            }
        }
        let text = string_symbol(ctx, id, ins)?.to_string();
        let r = self.heap.alloc(Object::String(text));
        ctx.string_cache.insert(id, r);
        Ok(Value::Object(r))
    }

    fn return_from_frame(
        &mut self,
        ctx: &mut ExecutionContext,
        base: usize,
    ) -> Result<Step, RuntimeError> {
        let Some(frame) = ctx.frames.pop() else {
            return Ok(Step::Return(Value::Null));
        };
        let (value, dest) = match frame.kind {
            FrameKind::Call { dest } => (frame.registers[REG_RETURN as usize], dest),
            FrameKind::Generator { iterator, dest } => {
                if let Some(Object::Iterator(it)) = self.heap.get_mut(iterator) {
                    it.done = true;
                    if let IteratorSource::Generator(state) = &mut it.source {
                        state.running = false;
                        state.frame = None;
                    }
                }
                (Value::Null, dest)
            }
        };
        if ctx.frames.len() <= base {
            return Ok(Step::Return(value));
        }
        ctx.set_register(dest as usize, value);
        Ok(Step::Continue)
    }

    /// Parks the generator frame in its iterator and hands `value` to
    /// whoever resumed it
    fn yield_from_frame(
        &mut self,
        ctx: &mut ExecutionContext,
        base: usize,
        value: Value,
        ins: &Instruction,
    ) -> Result<Step, RuntimeError> {
        let Some(FrameKind::Generator { iterator, dest }) = ctx.frames.last().map(|f| f.kind) else {
            return Err(malformed(ins));
        };
        let Some(frame) = ctx.frames.pop() else {
            return Err(malformed(ins));
        };
        match self.heap.get_mut(iterator) {
            Some(Object::Iterator(IteratorObject {
                source: IteratorSource::Generator(state),
                ..
            })) => {
                state.frame = Some(Box::new(frame));
                state.running = false;
            }
            _ => return Err(malformed(ins)),
        }
        if ctx.frames.len() <= base {
            return Ok(Step::Yield(value));
        }
        ctx.set_register(dest as usize, value);
        Ok(Step::Continue)
    }

    fn cast(&mut self, value: Value, ty: TypeName) -> Result<Value, RuntimeError> {
        const OP: &str = "CAST";
        let failed = |vm: &Vm| {
            RuntimeError::new(RuntimeErrorKind::TypeMismatch, OP)
                .with_value(format!("{} as {}", vm.display(value), ty.name()))
        };
        Ok(match ty {
            TypeName::Int => match value {
                Value::Int(v) => Value::Int(v),
                Value::Float(v) => Value::Int(v as i64),
                Value::Null => Value::Int(0),
                _ => match self.string_of(value).map(|s| s.trim().parse::<i64>()) {
                    Some(Ok(v)) => Value::Int(v),
                    _ => return Err(failed(self)),
                },
            },
            TypeName::Float => match value {
                Value::Int(v) => Value::Float(v as f64),
                Value::Float(v) => Value::Float(v),
                Value::Null => Value::Float(0.0),
                _ => match self.string_of(value).map(|s| s.trim().parse::<f64>()) {
                    Some(Ok(v)) => Value::Float(v),
                    _ => return Err(failed(self)),
                },
            },
            TypeName::String => {
                if self.string_of(value).is_some() {
                    value
                } else {
                    let text = self.display(value);
                    self.alloc_string(text)
                }
            }
            _ => return Err(failed(self)),
        })
    }

    pub(crate) fn dict_key(&self, value: Value, operation: &str) -> Result<DictKey, RuntimeError> {
        match value {
            Value::Int(v) => Ok(DictKey::Int(v)),
            _ => match self.string_of(value) {
                Some(s) => Ok(DictKey::Str(s.to_string())),
                None => Err(self.type_error(operation, value)),
            },
        }
    }

    pub(crate) fn type_error(&self, operation: &str, value: Value) -> RuntimeError {
        RuntimeError::new(RuntimeErrorKind::TypeMismatch, operation.to_string())
            .with_value(self.display(value))
    }

    pub(crate) fn not_iterable(&self, operation: &str, value: Value) -> RuntimeError {
        RuntimeError::new(RuntimeErrorKind::NotIterable, operation.to_string())
            .with_value(self.display(value))
    }
}

// ===== operand decoding =====

fn malformed(ins: &Instruction) -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::MalformedInstruction, ins.opcode.name())
        .with_value(ins.to_string().trim_end().to_string())
}

fn reg(ins: &Instruction, i: usize) -> Result<usize, RuntimeError> {
    match ins.operand(i) {
        Some(Operand::Register(r)) if (r as usize) < REGISTER_COUNT => Ok(r as usize),
        _ => Err(malformed(ins)),
    }
}

fn int(ins: &Instruction, i: usize) -> Result<i64, RuntimeError> {
    match ins.operand(i) {
        Some(Operand::Int(v)) => Ok(v),
        _ => Err(malformed(ins)),
    }
}

fn symbol(ins: &Instruction, i: usize) -> Result<u32, RuntimeError> {
    match ins.operand(i) {
        Some(Operand::Symbol(s)) => Ok(s),
        _ => Err(malformed(ins)),
    }
}

fn stack(ins: &Instruction, i: usize) -> Result<usize, RuntimeError> {
    match ins.operand(i) {
        Some(Operand::Stack(s)) => Ok(s as usize),
        _ => Err(malformed(ins)),
    }
}

fn target(ins: &Instruction, i: usize) -> Result<u32, RuntimeError> {
    match ins.operand(i) {
        Some(Operand::Instruction(t)) => Ok(t),
        _ => Err(malformed(ins)),
    }
}

fn type_operand(ins: &Instruction) -> Result<TypeName, RuntimeError> {
    TypeName::from_code(int(ins, 2)?).ok_or_else(|| malformed(ins))
}

fn string_symbol<'c>(
    ctx: &'c ExecutionContext,
    id: u32,
    ins: &Instruction,
) -> Result<&'c str, RuntimeError> {
    ctx.program.string(id).ok_or_else(|| malformed(ins))
}

fn jump(ctx: &mut ExecutionContext, target: u32) {
    if let Some(frame) = ctx.frames.last_mut() {
        frame.pc = target;
    }
}

/// Takes the `argc` most recently pushed parameters, in push order
fn pop_args(ctx: &mut ExecutionContext, ins: &Instruction) -> Result<Vec<Value>, RuntimeError> {
    let argc = ins
        .operands
        .iter()
        .rev()
        .find_map(|o| match o {
            Operand::Int(v) => usize::try_from(*v).ok(),
            _ => None,
        })
        .ok_or_else(|| malformed(ins))?;
    if argc > ctx.params.len() {
        return Err(malformed(ins));
    }
    let at = ctx.params.len() - argc;
    Ok(ctx.params.split_off(at))
}
