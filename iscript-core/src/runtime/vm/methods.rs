//! Built-in methods of lists, dicts, strings and iterators, and method
//! calls on instances

use super::index::{resolve_index, Member};
use super::Vm;
use crate::runtime::context::ExecutionContext;
use crate::runtime::error::{RuntimeError, RuntimeErrorKind};
use crate::runtime::object::{DictKey, Object};
use crate::runtime::value::{ObjRef, Value};

const OP: &str = "CALLM";

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), RuntimeError> {
    if args.len() == expected {
        return Ok(());
    }
    Err(RuntimeError::new(
        RuntimeErrorKind::WrongParameterCount {
            expected,
            found: args.len(),
        },
        OP,
    )
    .with_value(name.to_string()))
}

impl Vm {
    /// `CALLM`: calls method `name` of `object` with its result in `dest`
    pub(crate) fn call_method(
        &mut self,
        ctx: &mut ExecutionContext,
        object: Value,
        name: &str,
        args: Vec<Value>,
        dest: usize,
    ) -> Result<(), RuntimeError> {
        let Some(r) = object.as_object() else {
            return Err(self.no_method(object, name));
        };
        let method = name.to_ascii_lowercase();
        let value = match self.heap.get(r) {
            Some(Object::Instance(_)) => {
                return match self.resolve_member(ctx, r, name, OP)? {
                    Some(Member::Function(function)) => self.call_ref(ctx, function, args, dest),
                    Some(Member::Global { context, slot, .. }) => {
                        let callee = self.read_global(ctx, context, slot);
                        self.call_value(ctx, callee, args, dest, OP)
                    }
                    None => Err(self.no_method(object, name)),
                };
            }
            Some(Object::Iterator(_)) => {
                return match method.as_str() {
                    "next" => {
                        arity(name, &args, 0)?;
                        self.iter_next(ctx, object, dest, OP)
                    }
                    "done" => {
                        arity(name, &args, 0)?;
                        let done = self.iterator_done(r);
                        ctx.set_register(dest, Value::from_bool(done));
                        Ok(())
                    }
                    _ => Err(self.no_method(object, name)),
                };
            }
            Some(Object::List(_)) => self.list_method(r, object, &method, name, &args)?,
            Some(Object::Dict(_)) => self.dict_method(r, object, &method, name, &args)?,
            Some(Object::String(_)) => self.string_method(r, object, &method, name, &args)?,
            None => {
                return Err(RuntimeError::new(RuntimeErrorKind::InvalidReference, OP)
                    .with_value(name.to_string()))
            }
        };
        ctx.set_register(dest, value);
        Ok(())
    }

    fn no_method(&self, object: Value, name: &str) -> RuntimeError {
        RuntimeError::new(RuntimeErrorKind::UndefinedMember(name.to_string()), OP)
            .with_value(self.type_name(object))
    }

    fn iterator_done(&self, r: ObjRef) -> bool {
        match self.heap.get(r) {
            Some(Object::Iterator(it)) => it.done,
            _ => true,
        }
    }

    fn list_method(
        &mut self,
        r: ObjRef,
        object: Value,
        method: &str,
        name: &str,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let len = self.list_items(object).map_or(0, <[Value]>::len);
        match method {
            "length" => {
                arity(name, args, 0)?;
                Ok(Value::Int(len as i64))
            }
            "contains" => {
                arity(name, args, 1)?;
                let items = self.list_items(object).unwrap_or_default();
                Ok(Value::from_bool(items.iter().any(|&item| self.values_equal(item, args[0]))))
            }
            "push" => {
                arity(name, args, 1)?;
                self.with_list(r, |items| items.push(args[0]));
                Ok(Value::Null)
            }
            "pop" => {
                arity(name, args, 0)?;
                Ok(self.with_list(r, Vec::pop).flatten().unwrap_or_default())
            }
            "insert" => {
                arity(name, args, 2)?;
                let index = args[0].as_int().ok_or_else(|| self.type_error(OP, args[0]))?;
                if index < 0 || index as usize > len {
                    return Err(RuntimeError::new(RuntimeErrorKind::IndexOutOfRange { index, len }, OP));
                }
                self.with_list(r, |items| items.insert(index as usize, args[1]));
                Ok(Value::Null)
            }
            "remove" => {
                arity(name, args, 1)?;
                let index = args[0].as_int().ok_or_else(|| self.type_error(OP, args[0]))?;
                let position = resolve_index(index, len).map_err(|kind| RuntimeError::new(kind, OP))?;
                Ok(self.with_list(r, |items| items.remove(position)).unwrap_or_default())
            }
            "clear" => {
                arity(name, args, 0)?;
                self.with_list(r, Vec::clear);
                Ok(Value::Null)
            }
            _ => Err(self.no_method(object, name)),
        }
    }

    fn with_list<T>(&mut self, r: ObjRef, f: impl FnOnce(&mut Vec<Value>) -> T) -> Option<T> {
        match self.heap.get_mut(r) {
            Some(Object::List(items)) => Some(f(items)),
            _ => None,
        }
    }

    fn dict_method(
        &mut self,
        r: ObjRef,
        object: Value,
        method: &str,
        name: &str,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let Some(Object::Dict(entries)) = self.heap.get(r) else {
            return Err(self.no_method(object, name));
        };
        match method {
            "length" => {
                arity(name, args, 0)?;
                Ok(Value::Int(entries.len() as i64))
            }
            "keys" => {
                arity(name, args, 0)?;
                let keys: Vec<_> = entries.keys().cloned().collect();
                let items = keys
                    .into_iter()
                    .map(|key| match key {
                        DictKey::Int(v) => Value::Int(v),
                        DictKey::Str(s) => self.alloc_string(s),
                    })
                    .collect();
                Ok(Value::Object(self.heap.alloc(Object::List(items))))
            }
            "values" => {
                arity(name, args, 0)?;
                let items = entries.values().copied().collect();
                Ok(Value::Object(self.heap.alloc(Object::List(items))))
            }
            "contains" => {
                arity(name, args, 1)?;
                let key = self.dict_key(args[0], OP)?;
                Ok(Value::from_bool(entries.contains_key(&key)))
            }
            "remove" => {
                arity(name, args, 1)?;
                let key = self.dict_key(args[0], OP)?;
                let removed = match self.heap.get_mut(r) {
                    Some(Object::Dict(entries)) => entries.shift_remove(&key),
                    _ => None,
                };
                Ok(removed.unwrap_or_default())
            }
            "clear" => {
                arity(name, args, 0)?;
                if let Some(Object::Dict(entries)) = self.heap.get_mut(r) {
                    entries.clear();
                }
                Ok(Value::Null)
            }
            _ => Err(self.no_method(object, name)),
        }
    }

    fn string_method(
        &mut self,
        r: ObjRef,
        object: Value,
        method: &str,
        name: &str,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let Some(Object::String(text)) = self.heap.get(r) else {
            return Err(self.no_method(object, name));
        };
        let text = text.clone();
        match method {
            "length" => {
                arity(name, args, 0)?;
                Ok(Value::Int(text.chars().count() as i64))
            }
            "upper" => {
                arity(name, args, 0)?;
                Ok(self.alloc_string(text.to_uppercase()))
            }
            "lower" => {
                arity(name, args, 0)?;
                Ok(self.alloc_string(text.to_lowercase()))
            }
            "contains" => {
                arity(name, args, 1)?;
                let needle = self.string_of(args[0]).ok_or_else(|| self.type_error(OP, args[0]))?;
                Ok(Value::from_bool(text.contains(needle)))
            }
            "substr" => {
                if args.is_empty() || args.len() > 2 {
                    arity(name, args, 2)?;
                }
                let len = text.chars().count();
                let start = args[0].as_int().ok_or_else(|| self.type_error(OP, args[0]))?;
                if start < 0 || start as usize > len {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::IndexOutOfRange { index: start, len },
                        OP,
                    ));
                }
                let count = match args.get(1) {
                    Some(&count) => count
                        .as_int()
                        .filter(|&c| c >= 0)
                        .ok_or_else(|| self.type_error(OP, count))? as usize,
                    None => len,
                };
                let slice: String = text.chars().skip(start as usize).take(count).collect();
                Ok(self.alloc_string(slice))
            }
            _ => Err(self.no_method(object, name)),
        }
    }
}
