//! Native functions
//!
//! Natives are host functions registered on the [`Vm`] under a
//! case-insensitive name. Script code reaches them through
//! `function f = native("name");` bindings, through calls to undeclared
//! names, or through `GETNATIVE` values. Each call gets a [`NativeCall`]
//! with typed parameter accessors and return setters.

use super::context::{ExecutionContext, QueuedEvent};
use super::error::{RuntimeError, RuntimeErrorKind};
use super::object::Object;
use super::value::{ContextId, Value};
use super::vm::Vm;
use std::sync::Arc;

pub type NativeFn = Arc<dyn Fn(&mut NativeCall<'_>) -> Result<(), RuntimeError>>;

pub(crate) struct NativeEntry {
    pub name: String,
    pub function: NativeFn,
}

/// One invocation of a native function
pub struct NativeCall<'a> {
    vm: &'a mut Vm,
    context: &'a mut ExecutionContext,
    name: &'a str,
    args: Vec<Value>,
    result: Value,
}

impl<'a> NativeCall<'a> {
    pub(crate) fn new(
        vm: &'a mut Vm,
        context: &'a mut ExecutionContext,
        name: &'a str,
        args: Vec<Value>,
    ) -> Self {
        Self {
            vm,
            context,
            name,
            args,
            result: Value::Null,
        }
    }

    pub(crate) fn into_result(self) -> Value {
        self.result
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn context_id(&self) -> ContextId {
        self.context.id
    }

    pub fn parameter_count(&self) -> usize {
        self.args.len()
    }

    pub fn parameters(&self) -> &[Value] {
        &self.args
    }

    fn error(&self, kind: RuntimeErrorKind) -> RuntimeError {
        RuntimeError::new(kind, self.name.to_string())
    }

    /// Fails unless exactly `count` parameters were passed
    pub fn expect_parameters(&self, count: usize) -> Result<(), RuntimeError> {
        self.expect_parameter_range(count, count)
    }

    pub fn expect_parameter_range(&self, min: usize, max: usize) -> Result<(), RuntimeError> {
        let found = self.args.len();
        if found < min || found > max {
            let expected = if found < min { min } else { max };
            return Err(self.error(RuntimeErrorKind::WrongParameterCount { expected, found }));
        }
        Ok(())
    }

    pub fn parameter(&self, index: usize) -> Result<Value, RuntimeError> {
        self.args.get(index).copied().ok_or_else(|| {
            self.error(RuntimeErrorKind::WrongParameterCount {
                expected: index + 1,
                found: self.args.len(),
            })
        })
    }

    pub fn get_int_parameter(&self, index: usize) -> Result<i64, RuntimeError> {
        match self.parameter(index)? {
            Value::Int(v) => Ok(v),
            other => Err(self.type_error(other)),
        }
    }

    /// Ints are accepted and widened
    pub fn get_float_parameter(&self, index: usize) -> Result<f64, RuntimeError> {
        let value = self.parameter(index)?;
        value.as_number().ok_or_else(|| self.type_error(value))
    }

    pub fn get_string_parameter(&self, index: usize) -> Result<String, RuntimeError> {
        let value = self.parameter(index)?;
        self.vm
            .string_of(value)
            .map(str::to_string)
            .ok_or_else(|| self.type_error(value))
    }

    pub fn type_error(&self, value: Value) -> RuntimeError {
        self.error(RuntimeErrorKind::TypeMismatch)
            .with_value(self.vm.display(value))
    }

    pub fn set_return_int(&mut self, value: i64) {
        self.result = Value::Int(value);
    }

    pub fn set_return_float(&mut self, value: f64) {
        self.result = Value::Float(value);
    }

    pub fn set_return_string(&mut self, value: impl Into<String>) {
        self.result = self.vm.alloc_string(value.into());
    }

    pub fn set_return_null(&mut self) {
        self.result = Value::Null;
    }

    pub fn set_return_value(&mut self, value: Value) {
        self.result = value;
    }

    pub fn new_list(&mut self, items: Vec<Value>) -> Value {
        Value::Object(self.vm.heap_mut().alloc(Object::List(items)))
    }

    pub fn new_string(&mut self, text: impl Into<String>) -> Value {
        self.vm.alloc_string(text.into())
    }

    pub fn display(&self, value: Value) -> String {
        self.vm.display(value)
    }

    pub fn type_name(&self, value: Value) -> &'static str {
        self.vm.type_name(value)
    }

    /// Captured by the VM; echoed to stdout when configured
    pub fn print(&mut self, text: impl Into<String>) {
        self.vm.print(text.into());
    }

    /// Queues an event on the calling context
    pub fn queue_event(&mut self, name: impl Into<String>, args: Vec<Value>) {
        self.context.events.push_back(QueuedEvent {
            name: name.into(),
            args,
        });
    }

    /// Items of a list parameter, copied out
    pub fn list_items(&self, value: Value) -> Result<Vec<Value>, RuntimeError> {
        match value.as_object().and_then(|r| self.vm.heap().get(r)) {
            Some(Object::List(items)) => Ok(items.clone()),
            _ => Err(self.type_error(value)),
        }
    }
}

/// Registers the standard natives
/// Natives installed by [`register_builtins`]
pub const BUILTIN_NAMES: [&str; 10] = [
    "print", "len", "typeof", "tostring", "abs", "sqrt", "floor", "min", "max", "range",
];

pub fn register_builtins(vm: &mut Vm) {
    vm.register_native("print", builtin_print);
    vm.register_native("len", builtin_len);
    vm.register_native("typeof", builtin_typeof);
    vm.register_native("tostring", builtin_tostring);
    vm.register_native("abs", builtin_abs);
    vm.register_native("sqrt", builtin_sqrt);
    vm.register_native("floor", builtin_floor);
    vm.register_native("min", |call: &mut NativeCall<'_>| extremum(call, |a, b| a < b));
    vm.register_native("max", |call: &mut NativeCall<'_>| extremum(call, |a, b| a > b));
    vm.register_native("range", builtin_range);
}

fn builtin_print(call: &mut NativeCall<'_>) -> Result<(), RuntimeError> {
    let text = call
        .parameters()
        .iter()
        .map(|v| call.display(*v))
        .collect::<Vec<_>>()
        .join(" ");
    call.print(text);
    Ok(())
}

fn builtin_len(call: &mut NativeCall<'_>) -> Result<(), RuntimeError> {
    call.expect_parameters(1)?;
    let value = call.parameter(0)?;
    let len = match value.as_object().and_then(|r| call.vm.heap().get(r)) {
        Some(Object::String(s)) => s.chars().count(),
        Some(Object::List(items)) => items.len(),
        Some(Object::Dict(entries)) => entries.len(),
        _ => return Err(call.type_error(value)),
    };
    call.set_return_int(len as i64);
    Ok(())
}

fn builtin_typeof(call: &mut NativeCall<'_>) -> Result<(), RuntimeError> {
    call.expect_parameters(1)?;
    let name = call.type_name(call.parameter(0)?);
    call.set_return_string(name);
    Ok(())
}

fn builtin_tostring(call: &mut NativeCall<'_>) -> Result<(), RuntimeError> {
    call.expect_parameters(1)?;
    let text = call.display(call.parameter(0)?);
    call.set_return_string(text);
    Ok(())
}

fn builtin_abs(call: &mut NativeCall<'_>) -> Result<(), RuntimeError> {
    call.expect_parameters(1)?;
    match call.parameter(0)? {
        Value::Int(v) => call.set_return_int(v.wrapping_abs()),
        Value::Float(v) => call.set_return_float(v.abs()),
        other => return Err(call.type_error(other)),
    }
    Ok(())
}

fn builtin_sqrt(call: &mut NativeCall<'_>) -> Result<(), RuntimeError> {
    call.expect_parameters(1)?;
    let v = call.get_float_parameter(0)?;
    call.set_return_float(v.sqrt());
    Ok(())
}

fn builtin_floor(call: &mut NativeCall<'_>) -> Result<(), RuntimeError> {
    call.expect_parameters(1)?;
    let v = call.get_float_parameter(0)?;
    call.set_return_int(v.floor() as i64);
    Ok(())
}

/// `min`/`max` over one or more numbers; the winning argument is returned
/// unchanged, so `min(1, 2.5)` is the int `1`
fn extremum(call: &mut NativeCall<'_>, better: fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
    call.expect_parameter_range(1, usize::MAX)?;
    let mut best = call.parameter(0)?;
    let mut best_number = best.as_number().ok_or_else(|| call.type_error(best))?;
    for &value in &call.parameters()[1..] {
        let number = value.as_number().ok_or_else(|| call.type_error(value))?;
        if better(number, best_number) {
            best = value;
            best_number = number;
        }
    }
    call.set_return_value(best);
    Ok(())
}

/// `range(end)`, `range(start, end)` or `range(start, end, step)`
fn builtin_range(call: &mut NativeCall<'_>) -> Result<(), RuntimeError> {
    call.expect_parameter_range(1, 3)?;
    let (start, end) = match call.parameter_count() {
        1 => (0, call.get_int_parameter(0)?),
        _ => (call.get_int_parameter(0)?, call.get_int_parameter(1)?),
    };
    let step = if call.parameter_count() == 3 {
        call.get_int_parameter(2)?
    } else {
        1
    };
    if step == 0 {
        return Err(call.error(RuntimeErrorKind::DivisionByZero).with_value("step 0"));
    }

    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        items.push(Value::Int(i));
        i = match i.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    let list = call.new_list(items);
    call.set_return_value(list);
    Ok(())
}
