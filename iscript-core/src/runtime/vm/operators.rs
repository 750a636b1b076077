//! Arithmetic, comparison and operator overloading

use super::index::Member;
use super::Vm;
use crate::compiler::instruction::Opcode;
use crate::runtime::context::ExecutionContext;
use crate::runtime::error::{RuntimeError, RuntimeErrorKind};
use crate::runtime::object::Object;
use crate::runtime::value::{FunctionRef, Value};

/// Source spelling of a binary operator opcode
fn operator_symbol(op: Opcode) -> Option<&'static str> {
    Some(match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Mod => "%",
        Opcode::BitAnd => "&",
        Opcode::BitOr => "|",
        Opcode::BitXor => "^",
        Opcode::Shl => "<<",
        Opcode::Shr => ">>",
        Opcode::Equal => "==",
        Opcode::NotEqual => "!=",
        Opcode::Less => "<",
        Opcode::LessEqual => "<=",
        Opcode::Greater => ">",
        Opcode::GreaterEqual => ">=",
        _ => return None,
    })
}

impl Vm {
    /// `operator<op>` of the instance `left`, if it declares one
    pub(crate) fn operator_function(
        &self,
        ctx: &ExecutionContext,
        op: Opcode,
        left: Value,
    ) -> Result<Option<FunctionRef>, RuntimeError> {
        let Value::Object(r) = left else {
            return Ok(None);
        };
        if !matches!(self.heap.get(r), Some(Object::Instance(_))) {
            return Ok(None);
        }
        let Some(symbol) = operator_symbol(op) else {
            return Ok(None);
        };
        let name = format!("operator{symbol}");
        Ok(match self.resolve_member(ctx, r, &name, op.name())? {
            Some(Member::Function(function)) => Some(function),
            _ => None,
        })
    }

    pub(crate) fn binary(&mut self, op: Opcode, a: Value, b: Value) -> Result<Value, RuntimeError> {
        match op {
            Opcode::Equal => Ok(Value::from_bool(self.values_equal(a, b))),
            Opcode::NotEqual => Ok(Value::from_bool(!self.values_equal(a, b))),
            Opcode::Less | Opcode::LessEqual | Opcode::Greater | Opcode::GreaterEqual => self
                .compare(op, a, b)
                .map(Value::from_bool)
                .ok_or_else(|| self.operand_error(op, a, b)),
            Opcode::Add => match self.concat(a, b) {
                Some(value) => Ok(value),
                None => self.arithmetic(op, a, b),
            },
            _ => self.arithmetic(op, a, b),
        }
    }

    fn arithmetic(&self, op: Opcode, a: Value, b: Value) -> Result<Value, RuntimeError> {
        if let (Value::Int(x), Value::Int(y)) = (a, b) {
            return int_op(op, x, y)
                .map(Value::Int)
                .ok_or_else(|| self.operand_error(op, a, b));
        }
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => float_op(op, x, y)
                .map(Value::Float)
                .ok_or_else(|| self.operand_error(op, a, b)),
            _ => Err(self.operand_error(op, a, b)),
        }
    }

    /// `+` on strings (either side) and on two lists
    fn concat(&mut self, a: Value, b: Value) -> Option<Value> {
        if self.string_of(a).is_some() || self.string_of(b).is_some() {
            let text = self.display(a) + &self.display(b);
            return Some(self.alloc_string(text));
        }
        let joined = {
            let left = self.list_items(a)?;
            let right = self.list_items(b)?;
            let mut joined = Vec::with_capacity(left.len() + right.len());
            joined.extend_from_slice(left);
            joined.extend_from_slice(right);
            joined
        };
        Some(Value::Object(self.heap.alloc(Object::List(joined))))
    }

    fn compare(&self, op: Opcode, a: Value, b: Value) -> Option<bool> {
        if let (Value::Int(x), Value::Int(y)) = (a, b) {
            return Some(ordered(op, &x, &y));
        }
        if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
            return Some(ordered(op, &x, &y));
        }
        let (x, y) = (self.string_of(a)?, self.string_of(b)?);
        Some(ordered(op, x, y))
    }

    /// Numbers compare by value across int and float, strings by content,
    /// everything else by identity
    pub(crate) fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Object(x), Value::Object(y)) => {
                x == y
                    || matches!(
                        (self.heap.get(x), self.heap.get(y)),
                        (Some(Object::String(s)), Some(Object::String(t))) if s == t
                    )
            }
            _ => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            },
        }
    }

    pub(crate) fn unary(&self, op: Opcode, value: Value) -> Result<Value, RuntimeError> {
        match (op, value) {
            (Opcode::Negate, Value::Int(v)) => Ok(Value::Int(v.wrapping_neg())),
            (Opcode::Negate, Value::Float(v)) => Ok(Value::Float(-v)),
            (Opcode::BitNot, Value::Int(v)) => Ok(Value::Int(!v)),
            (Opcode::Not, v) => Ok(Value::from_bool(!v.is_truthy())),
            (Opcode::Bool, v) => Ok(Value::from_bool(v.is_truthy())),
            _ => Err(self.type_error(op.name(), value)),
        }
    }

    fn operand_error(&self, op: Opcode, a: Value, b: Value) -> RuntimeError {
        if matches!(op, Opcode::Div | Opcode::Mod) && b == Value::Int(0) && a.as_int().is_some() {
            return RuntimeError::new(RuntimeErrorKind::DivisionByZero, op.name())
                .with_value(self.display(a));
        }
        RuntimeError::new(RuntimeErrorKind::TypeMismatch, op.name()).with_value(format!(
            "{} {} {}",
            self.display(a),
            operator_symbol(op).unwrap_or("?"),
            self.display(b)
        ))
    }
}

fn ordered<T: PartialOrd + ?Sized>(op: Opcode, x: &T, y: &T) -> bool {
    match op {
        Opcode::Less => x < y,
        Opcode::LessEqual => x <= y,
        Opcode::Greater => x > y,
        _ => x >= y,
    }
}

/// Integer arithmetic wraps; `None` for division by zero
fn int_op(op: Opcode, x: i64, y: i64) -> Option<i64> {
    Some(match op {
        Opcode::Add => x.wrapping_add(y),
        Opcode::Sub => x.wrapping_sub(y),
        Opcode::Mul => x.wrapping_mul(y),
        Opcode::Div if y != 0 => x.wrapping_div(y),
        Opcode::Mod if y != 0 => x.wrapping_rem(y),
        Opcode::BitAnd => x & y,
        Opcode::BitOr => x | y,
        Opcode::BitXor => x ^ y,
        Opcode::Shl => x.wrapping_shl((y & 63) as u32),
        Opcode::Shr => x.wrapping_shr((y & 63) as u32),
        _ => return None,
    })
}

fn float_op(op: Opcode, x: f64, y: f64) -> Option<f64> {
    Some(match op {
        Opcode::Add => x + y,
        Opcode::Sub => x - y,
        Opcode::Mul => x * y,
        Opcode::Div => x / y,
        Opcode::Mod => x % y,
        _ => return None,
    })
}
