//! Expression codegen. Every `emit_expression` call returns a freshly
//! allocated register that the caller owns and must release.

use super::Generator;
use crate::compiler::ast::{BinaryOp, FunctionKind, Literal, LogicalOp, NodeId, NodeKind, UnaryOp};
use crate::compiler::diagnostic::CompileResult;
use crate::compiler::instruction::{Opcode, Operand, REG_RETURN};
use crate::compiler::register::Register;
use crate::compiler::symbol::{SymbolId, SymbolKind};
use std::collections::HashSet;

/// An assignable location with its operands already evaluated
enum Place {
    Variable(SymbolId),
    Index { object: Register, key: Register },
    Member { object: Register, name: SymbolId },
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::BitAnd => Opcode::BitAnd,
        BinaryOp::BitOr => Opcode::BitOr,
        BinaryOp::BitXor => Opcode::BitXor,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
        BinaryOp::Equal => Opcode::Equal,
        BinaryOp::NotEqual => Opcode::NotEqual,
        BinaryOp::Less => Opcode::Less,
        BinaryOp::LessEqual => Opcode::LessEqual,
        BinaryOp::Greater => Opcode::Greater,
        BinaryOp::GreaterEqual => Opcode::GreaterEqual,
    }
}

impl<'a> Generator<'a> {
    pub(super) fn emit_expression(&mut self, id: NodeId) -> CompileResult<Register> {
        match self.ast.kind(id).clone() {
            NodeKind::Literal(literal) => self.emit_literal(id, &literal, false),
            NodeKind::Identifier { name } => {
                let symbol = self.resolve(id, &name)?;
                let register = self.allocate(id)?;
                self.load_symbol(symbol, register, id)?;
                Ok(register)
            }
            NodeKind::List { elements } => {
                let list = self.allocate(id)?;
                self.emit(Opcode::NewList, &[list.into()], id);
                for element in elements {
                    let value = self.emit_expression(element)?;
                    self.emit(Opcode::Append, &[list.into(), value.into()], element);
                    self.release(value);
                }
                Ok(list)
            }
            NodeKind::Dict { entries } => {
                let dict = self.allocate(id)?;
                self.emit(Opcode::NewDict, &[dict.into()], id);
                let mut seen = HashSet::new();
                for (key, value) in entries {
                    if let Some(constant) = self.constant_key(key) {
                        if !seen.insert(constant) {
                            return Err(self.error_at(key, "duplicate dictionary key"));
                        }
                    }
                    let k = self.emit_expression(key)?;
                    let v = self.emit_expression(value)?;
                    self.emit(Opcode::DictInsert, &[dict.into(), k.into(), v.into()], key);
                    self.release(v);
                    self.release(k);
                }
                Ok(dict)
            }
            NodeKind::Intrinsic { name } => {
                let register = self.allocate(id)?;
                let name = self.intern(&name);
                self.emit(Opcode::GetNative, &[register.into(), Operand::Symbol(name.0)], id);
                Ok(register)
            }
            NodeKind::Unary { op, operand } => self.emit_unary(id, op, operand),
            NodeKind::Binary { op, lhs, rhs } => {
                let left = self.emit_expression(lhs)?;
                let right = self.emit_expression(rhs)?;
                self.emit(
                    binary_opcode(op),
                    &[left.into(), left.into(), right.into()],
                    id,
                );
                self.release(right);
                Ok(left)
            }
            NodeKind::Logical { op, lhs, rhs } => {
                let end = self.extra_label(id, 0)?;
                let result = self.emit_expression(lhs)?;
                self.emit(Opcode::Bool, &[result.into(), result.into()], id);
                let shortcut = match op {
                    LogicalOp::And => Opcode::JumpIfZero,
                    LogicalOp::Or => Opcode::JumpIfNotZero,
                };
                self.jump(shortcut, Some(result), end, id);
                let right = self.emit_expression(rhs)?;
                self.emit(Opcode::Bool, &[result.into(), right.into()], id);
                self.release(right);
                self.bind(end);
                Ok(result)
            }
            NodeKind::Assign { op, target, value } => self.emit_assign(id, op, target, value),
            NodeKind::IncDec {
                increment,
                prefix,
                target,
            } => self.emit_inc_dec(id, increment, prefix, target),
            NodeKind::Ternary {
                condition,
                then_value,
                else_value,
            } => {
                let else_label = self.extra_label(id, 0)?;
                let end_label = self.extra_label(id, 1)?;
                let result = self.allocate(id)?;
                let test = self.emit_expression(condition)?;
                self.jump(Opcode::JumpIfZero, Some(test), else_label, id);
                self.release(test);
                let value = self.emit_expression(then_value)?;
                self.emit(Opcode::Move, &[result.into(), value.into()], then_value);
                self.release(value);
                self.jump(Opcode::Jump, None, end_label, id);
                self.bind(else_label);
                let value = self.emit_expression(else_value)?;
                self.emit(Opcode::Move, &[result.into(), value.into()], else_value);
                self.release(value);
                self.bind(end_label);
                Ok(result)
            }
            NodeKind::Call { callee, args } => self.emit_call(id, callee, &args),
            NodeKind::Index { target, index } => {
                let object = self.emit_expression(target)?;
                let key = self.emit_expression(index)?;
                self.emit(
                    Opcode::GetIndex,
                    &[object.into(), object.into(), key.into()],
                    id,
                );
                self.release(key);
                Ok(object)
            }
            NodeKind::Member { target, name } => {
                let object = self.emit_expression(target)?;
                let name = self.intern(&name);
                self.emit(
                    Opcode::GetMember,
                    &[object.into(), object.into(), Operand::Symbol(name.0)],
                    id,
                );
                Ok(object)
            }
            NodeKind::Initializer { target, entries } => {
                let object = self.emit_expression(target)?;
                for (key, value) in entries {
                    let k = self.emit_expression(key)?;
                    let v = self.emit_expression(value)?;
                    self.emit(Opcode::SetIndex, &[object.into(), k.into(), v.into()], key);
                    self.release(v);
                    self.release(k);
                }
                Ok(object)
            }
            NodeKind::TypeCheck { operand, ty } => {
                let register = self.emit_expression(operand)?;
                self.emit(
                    Opcode::IsType,
                    &[register.into(), register.into(), Operand::Int(ty.code())],
                    id,
                );
                Ok(register)
            }
            NodeKind::Cast { operand, ty } => {
                let register = self.emit_expression(operand)?;
                self.emit(
                    Opcode::Cast,
                    &[register.into(), register.into(), Operand::Int(ty.code())],
                    id,
                );
                Ok(register)
            }
            other => Err(self.error_at(
                id,
                format!("internal error: {} is not an expression", other.name()),
            )),
        }
    }

    fn emit_literal(&mut self, id: NodeId, literal: &Literal, negate: bool) -> CompileResult<Register> {
        // the lexer hands out 2^63 as i64::MIN; it only fits negated
        if !negate && *literal == Literal::Int(i64::MIN) {
            return Err(self.error_at(
                id,
                format!("integer literal '{}' out of range", i64::MIN.unsigned_abs()),
            ));
        }
        let register = self.allocate(id)?;
        match literal {
            Literal::Null => {
                self.emit(Opcode::LoadNull, &[register.into()], id);
            }
            Literal::Int(v) => {
                let v = if negate { v.wrapping_neg() } else { *v };
                self.emit(Opcode::LoadInt, &[register.into(), Operand::Int(v)], id);
            }
            Literal::Float(v) => {
                let v = if negate { -v } else { *v };
                self.emit(Opcode::LoadFloat, &[register.into(), Operand::Float(v)], id);
            }
            Literal::Str(s) => {
                let symbol = self.intern(s);
                self.emit(
                    Opcode::LoadString,
                    &[register.into(), Operand::Symbol(symbol.0)],
                    id,
                );
            }
        }
        Ok(register)
    }

    fn emit_unary(&mut self, id: NodeId, op: UnaryOp, operand: NodeId) -> CompileResult<Register> {
        // `-5` and `-1.5` load a negative constant directly
        if op == UnaryOp::Negate {
            if let NodeKind::Literal(literal @ (Literal::Int(_) | Literal::Float(_))) =
                self.ast.kind(operand).clone()
            {
                return self.emit_literal(id, &literal, true);
            }
        }

        let register = self.emit_expression(operand)?;
        let opcode = match op {
            UnaryOp::Plus => return Ok(register),
            UnaryOp::Negate => Opcode::Negate,
            UnaryOp::Not => Opcode::Not,
            UnaryOp::BitNot => Opcode::BitNot,
        };
        self.emit(opcode, &[register.into(), register.into()], id);
        Ok(register)
    }

    fn emit_assign(
        &mut self,
        id: NodeId,
        op: Option<BinaryOp>,
        target: NodeId,
        value: NodeId,
    ) -> CompileResult<Register> {
        let place = self.place(target)?;
        let result = match op {
            None => self.emit_expression(value)?,
            Some(op) => {
                let current = self.allocate(id)?;
                self.load_place(&place, current, id)?;
                let rhs = self.emit_expression(value)?;
                self.emit(
                    binary_opcode(op),
                    &[current.into(), current.into(), rhs.into()],
                    id,
                );
                self.release(rhs);
                current
            }
        };
        self.store_place(&place, result, id);
        self.release_place(place);
        Ok(result)
    }

    fn emit_inc_dec(
        &mut self,
        id: NodeId,
        increment: bool,
        prefix: bool,
        target: NodeId,
    ) -> CompileResult<Register> {
        let place = self.place(target)?;
        let value = self.allocate(id)?;
        self.load_place(&place, value, id)?;

        let previous = if prefix {
            None
        } else {
            let copy = self.allocate(id)?;
            self.emit(Opcode::Move, &[copy.into(), value.into()], id);
            Some(copy)
        };
        let opcode = if increment { Opcode::Inc } else { Opcode::Dec };
        self.emit(opcode, &[value.into()], id);
        self.store_place(&place, value, id);
        self.release_place(place);

        match previous {
            Some(copy) => {
                self.release(value);
                Ok(copy)
            }
            None => Ok(value),
        }
    }

    fn emit_call(&mut self, id: NodeId, callee: NodeId, args: &[NodeId]) -> CompileResult<Register> {
        let argc = Operand::Int(args.len() as i64);

        match self.ast.kind(callee).clone() {
            NodeKind::Identifier { name } => {
                let resolved = self
                    .lookup(callee, &name)
                    .or_else(|| self.find_event(&name));
                match resolved.map(|s| self.symbol(s).kind.clone()) {
                    Some(SymbolKind::Function(function)) => {
                        let symbol = resolved.map(|s| s.0).unwrap_or_default();
                        self.push_arguments(args)?;
                        let opcode = if function.native.is_some() {
                            Opcode::CallNative
                        } else if function.subtype == FunctionKind::Event {
                            Opcode::CallEvent
                        } else {
                            Opcode::Invoke
                        };
                        self.emit(opcode, &[Operand::Symbol(symbol), argc], id);
                    }
                    Some(_) => {
                        let function = self.emit_expression(callee)?;
                        self.push_arguments(args)?;
                        self.emit(Opcode::Call, &[function.into(), argc], id);
                        self.release(function);
                    }
                    None => {
                        if !self.natives.contains(&name.to_ascii_lowercase()) {
                            return Err(
                                self.error_at(callee, format!("undefined identifier '{name}'"))
                            );
                        }
                        let symbol = self.intern(&name);
                        self.push_arguments(args)?;
                        self.emit(Opcode::CallNative, &[Operand::Symbol(symbol.0), argc], id);
                    }
                }
            }
            NodeKind::Member { target, name } => {
                let object = self.emit_expression(target)?;
                let method = self.intern(&name);
                self.push_arguments(args)?;
                self.emit(
                    Opcode::CallMethod,
                    &[object.into(), Operand::Symbol(method.0), argc],
                    id,
                );
                self.release(object);
            }
            _ => {
                let function = self.emit_expression(callee)?;
                self.push_arguments(args)?;
                self.emit(Opcode::Call, &[function.into(), argc], id);
                self.release(function);
            }
        }

        let result = self.allocate(id)?;
        self.emit(
            Opcode::Move,
            &[result.into(), Operand::Register(REG_RETURN)],
            id,
        );
        Ok(result)
    }

    /// Evaluates each argument and pushes it immediately
    fn push_arguments(&mut self, args: &[NodeId]) -> CompileResult<()> {
        for &arg in args {
            let value = self.emit_expression(arg)?;
            self.emit(Opcode::Push, &[value.into()], arg);
            self.release(value);
        }
        Ok(())
    }

    // ===== variables and places =====

    fn resolve(&self, id: NodeId, name: &str) -> CompileResult<SymbolId> {
        self.lookup(id, name)
            .ok_or_else(|| self.error_at(id, format!("undefined identifier '{name}'")))
    }

    pub(super) fn load_symbol(
        &mut self,
        symbol: SymbolId,
        register: Register,
        at: NodeId,
    ) -> CompileResult<()> {
        match self.symbol(symbol).kind.clone() {
            SymbolKind::Variable { slot, global, .. } => {
                let opcode = if global {
                    Opcode::GetGlobal
                } else {
                    Opcode::GetLocal
                };
                self.emit(opcode, &[register.into(), Operand::Stack(slot)], at);
                Ok(())
            }
            SymbolKind::Function(_) => {
                self.emit(
                    Opcode::LoadFunction,
                    &[register.into(), Operand::Symbol(symbol.0)],
                    at,
                );
                Ok(())
            }
            _ => Err(self.error_at(
                at,
                format!("'{}' cannot be used as a value", self.symbol(symbol).name),
            )),
        }
    }

    pub(super) fn store_variable(&mut self, symbol: SymbolId, register: Register, at: NodeId) {
        if let SymbolKind::Variable { slot, global, .. } = self.symbol(symbol).kind {
            let opcode = if global {
                Opcode::SetGlobal
            } else {
                Opcode::SetLocal
            };
            self.emit(opcode, &[Operand::Stack(slot), register.into()], at);
        }
    }

    /// Evaluates the object and key operands of an assignment target
    fn place(&mut self, target: NodeId) -> CompileResult<Place> {
        match self.ast.kind(target).clone() {
            NodeKind::Identifier { name } => {
                let symbol = self.resolve(target, &name)?;
                self.check_assignable(symbol, target)?;
                Ok(Place::Variable(symbol))
            }
            NodeKind::Index { target: object, index } => {
                let object = self.emit_expression(object)?;
                let key = self.emit_expression(index)?;
                Ok(Place::Index { object, key })
            }
            NodeKind::Member { target: object, name } => {
                let object = self.emit_expression(object)?;
                let name = self.intern(&name);
                Ok(Place::Member { object, name })
            }
            _ => Err(self.error_at(target, "invalid assignment target")),
        }
    }

    fn load_place(&mut self, place: &Place, register: Register, at: NodeId) -> CompileResult<()> {
        match *place {
            Place::Variable(symbol) => return self.load_symbol(symbol, register, at),
            Place::Index { object, key } => {
                self.emit(
                    Opcode::GetIndex,
                    &[register.into(), object.into(), key.into()],
                    at,
                );
            }
            Place::Member { object, name } => {
                self.emit(
                    Opcode::GetMember,
                    &[register.into(), object.into(), Operand::Symbol(name.0)],
                    at,
                );
            }
        }
        Ok(())
    }

    fn store_place(&mut self, place: &Place, value: Register, at: NodeId) {
        match *place {
            Place::Variable(symbol) => self.store_variable(symbol, value, at),
            Place::Index { object, key } => {
                self.emit(
                    Opcode::SetIndex,
                    &[object.into(), key.into(), value.into()],
                    at,
                );
            }
            Place::Member { object, name } => {
                self.emit(
                    Opcode::SetMember,
                    &[object.into(), Operand::Symbol(name.0), value.into()],
                    at,
                );
            }
        }
    }

    fn release_place(&mut self, place: Place) {
        match place {
            Place::Variable(_) => {}
            Place::Index { object, key } => {
                self.release(key);
                self.release(object);
            }
            Place::Member { object, .. } => self.release(object),
        }
    }
}
