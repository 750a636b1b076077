//! Indexing, members and iteration

use super::Vm;
use crate::runtime::context::ExecutionContext;
use crate::runtime::error::{RuntimeError, RuntimeErrorKind};
use crate::runtime::object::{DictKey, IteratorObject, IteratorSource, Object};
use crate::runtime::value::{ContextId, FunctionRef, ObjRef, Value};

/// Where an instance member lives
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Member {
    Global {
        context: ContextId,
        slot: usize,
        constant: bool,
    },
    Function(FunctionRef),
}

/// Element position of an int key; negative keys count from the end
pub(crate) fn resolve_index(index: i64, len: usize) -> Result<usize, RuntimeErrorKind> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(RuntimeErrorKind::IndexOutOfRange { index, len });
    }
    Ok(resolved as usize)
}

enum Cursor {
    Item(Value),
    Key(DictKey),
    Char(char),
}

impl Vm {
    /// Looks `name` up on the instance `object`: globals first, then
    /// functions, then the base instance. Names ignore case.
    pub(crate) fn resolve_member(
        &self,
        active: &ExecutionContext,
        object: ObjRef,
        name: &str,
        operation: &str,
    ) -> Result<Option<Member>, RuntimeError> {
        let mut current = Some(object);
        let mut depth = 0;
        while let Some(r) = current {
            let Some(Object::Instance(id)) = self.heap.get(r) else {
                return Err(RuntimeError::new(RuntimeErrorKind::InvalidReference, operation.to_string()));
            };
            let id = *id;
            let ctx = if id == active.id {
                active
            } else {
                self.loaded(id, operation)?
            };
            if let Some((slot, constant)) = ctx.global_slot(name) {
                return Ok(Some(Member::Global {
                    context: id,
                    slot: slot as usize,
                    constant,
                }));
            }
            if let Some(index) = ctx.global_function(name) {
                return Ok(Some(Member::Function(FunctionRef { context: id, index })));
            }
            current = ctx.base;
            depth += 1;
            if depth > self.config.max_nesting {
                break;
            }
        }
        Ok(None)
    }

    pub(crate) fn read_global(&self, active: &ExecutionContext, context: ContextId, slot: usize) -> Value {
        let globals = if context == active.id {
            Some(&active.globals)
        } else {
            self.loaded(context, "member").ok().map(|ctx| &ctx.globals)
        };
        globals.and_then(|g| g.get(slot)).copied().unwrap_or_default()
    }

    fn undefined_member(&self, name: &str, object: Value, operation: &str) -> RuntimeError {
        RuntimeError::new(RuntimeErrorKind::UndefinedMember(name.to_string()), operation.to_string())
            .with_value(self.display(object))
    }

    fn not_indexable(&self, object: Value, operation: &str) -> RuntimeError {
        RuntimeError::new(RuntimeErrorKind::NotIndexable, operation.to_string())
            .with_value(self.display(object))
    }

    /// `GETMEMBER`: instance members and string keys of dicts
    pub(crate) fn get_member(
        &self,
        active: &ExecutionContext,
        object: Value,
        name: &str,
        operation: &str,
    ) -> Result<Value, RuntimeError> {
        let Some(r) = object.as_object() else {
            return Err(self.not_indexable(object, operation));
        };
        match self.heap.get(r) {
            Some(Object::Instance(_)) => match self.resolve_member(active, r, name, operation)? {
                Some(Member::Global { context, slot, .. }) => Ok(self.read_global(active, context, slot)),
                Some(Member::Function(function)) => Ok(Value::Function(function)),
                None => Err(self.undefined_member(name, object, operation)),
            },
            Some(Object::Dict(entries)) => entries
                .get(&DictKey::Str(name.to_string()))
                .copied()
                .ok_or_else(|| {
                    RuntimeError::new(RuntimeErrorKind::KeyNotFound, operation.to_string())
                        .with_value(format!("{name:?}"))
                }),
            _ => Err(self.not_indexable(object, operation)),
        }
    }

    /// `SETMEMBER`: instance globals (not constants or functions) and dict
    /// keys
    pub(crate) fn set_member(
        &mut self,
        active: &mut ExecutionContext,
        object: Value,
        name: &str,
        value: Value,
        operation: &str,
    ) -> Result<(), RuntimeError> {
        let Some(r) = object.as_object() else {
            return Err(self.not_indexable(object, operation));
        };
        match self.heap.get(r) {
            Some(Object::Instance(_)) => match self.resolve_member(active, r, name, operation)? {
                Some(Member::Global {
                    constant: false,
                    context,
                    slot,
                }) => {
                    let globals = if context == active.id {
                        &mut active.globals
                    } else {
                        &mut self.loaded_mut(context, operation)?.globals
                    };
                    if let Some(target) = globals.get_mut(slot) {
                        *target = value;
                    }
                    Ok(())
                }
                Some(_) => Err(RuntimeError::new(RuntimeErrorKind::Immutable, operation.to_string())
                    .with_value(name.to_string())),
                None => Err(self.undefined_member(name, object, operation)),
            },
            Some(Object::Dict(_)) => {
                if let Some(Object::Dict(entries)) = self.heap.get_mut(r) {
                    entries.insert(DictKey::Str(name.to_string()), value);
                }
                Ok(())
            }
            Some(Object::String(_)) => Err(RuntimeError::new(RuntimeErrorKind::Immutable, operation.to_string())
                .with_value(self.display(object))),
            _ => Err(self.not_indexable(object, operation)),
        }
    }

    /// `GETIDX`
    pub(crate) fn get_index(
        &mut self,
        active: &ExecutionContext,
        object: Value,
        key: Value,
    ) -> Result<Value, RuntimeError> {
        const OP: &str = "GETIDX";
        let Some(r) = object.as_object() else {
            return Err(self.not_indexable(object, OP));
        };
        match self.heap.get(r) {
            Some(Object::List(items)) => {
                let index = key.as_int().ok_or_else(|| self.type_error(OP, key))?;
                let position = resolve_index(index, items.len())
                    .map_err(|kind| RuntimeError::new(kind, OP))?;
                Ok(items[position])
            }
            Some(Object::Dict(entries)) => {
                let key = self.dict_key(key, OP)?;
                entries.get(&key).copied().ok_or_else(|| {
                    RuntimeError::new(RuntimeErrorKind::KeyNotFound, OP).with_value(key.to_string())
                })
            }
            Some(Object::String(s)) => {
                let index = key.as_int().ok_or_else(|| self.type_error(OP, key))?;
                let len = s.chars().count();
                let position = resolve_index(index, len).map_err(|kind| RuntimeError::new(kind, OP))?;
                let ch = s.chars().nth(position).unwrap_or_default();
                Ok(self.alloc_string(ch.to_string()))
            }
            Some(Object::Instance(_)) => {
                let name = self
                    .string_of(key)
                    .ok_or_else(|| self.type_error(OP, key))?
                    .to_string();
                self.get_member(active, object, &name, OP)
            }
            _ => Err(self.not_indexable(object, OP)),
        }
    }

    /// `SETIDX`: list elements, dict entries (inserted or overwritten) and
    /// instance members. Strings are immutable.
    pub(crate) fn set_index(
        &mut self,
        active: &mut ExecutionContext,
        object: Value,
        key: Value,
        value: Value,
    ) -> Result<(), RuntimeError> {
        const OP: &str = "SETIDX";
        let Some(r) = object.as_object() else {
            return Err(self.not_indexable(object, OP));
        };
        match self.heap.get(r) {
            Some(Object::List(items)) => {
                let index = key.as_int().ok_or_else(|| self.type_error(OP, key))?;
                let position = resolve_index(index, items.len())
                    .map_err(|kind| RuntimeError::new(kind, OP))?;
                if let Some(Object::List(items)) = self.heap.get_mut(r) {
                    items[position] = value;
                }
                Ok(())
            }
            Some(Object::Dict(_)) => {
                let key = self.dict_key(key, OP)?;
                if let Some(Object::Dict(entries)) = self.heap.get_mut(r) {
                    entries.insert(key, value);
                }
                Ok(())
            }
            Some(Object::String(_)) => {
                Err(RuntimeError::new(RuntimeErrorKind::Immutable, OP).with_value(self.display(object)))
            }
            Some(Object::Instance(_)) => {
                let name = self
                    .string_of(key)
                    .ok_or_else(|| self.type_error(OP, key))?
                    .to_string();
                self.set_member(active, object, &name, value, OP)
            }
            _ => Err(self.not_indexable(object, OP)),
        }
    }

    // ===== iteration =====

    /// `ITER`: lists, dict keys, string characters; iterators pass through
    pub(crate) fn make_iterator(&mut self, source: Value) -> Result<Value, RuntimeError> {
        const OP: &str = "ITER";
        let Some(r) = source.as_object() else {
            return Err(self.not_iterable(OP, source));
        };
        let cursor = match self.heap.get(r) {
            Some(Object::List(_)) => IteratorSource::List { list: r, position: 0 },
            Some(Object::Dict(_)) => IteratorSource::Dict { dict: r, position: 0 },
            Some(Object::String(_)) => IteratorSource::Str { string: r, position: 0 },
            Some(Object::Iterator(_)) => return Ok(source),
            _ => return Err(self.not_iterable(OP, source)),
        };
        Ok(Value::Object(self.heap.alloc(Object::Iterator(IteratorObject::new(cursor)))))
    }

    /// `ITERNEXT`: delivers the next element to `dest`, or null once the
    /// iterator is exhausted. A generator of the running context is resumed
    /// inline, so its value arrives in `dest` when it yields.
    pub(crate) fn iter_next(
        &mut self,
        ctx: &mut ExecutionContext,
        iterator: Value,
        dest: usize,
        operation: &str,
    ) -> Result<(), RuntimeError> {
        let Some(r) = iterator.as_object() else {
            return Err(self.not_iterable(operation, iterator));
        };
        let generator = match self.heap.get(r) {
            Some(Object::Iterator(it)) => match &it.source {
                IteratorSource::Generator(state) => Some(state.context),
                _ => None,
            },
            _ => return Err(self.not_iterable(operation, iterator)),
        };

        match generator {
            None => {
                let value = self.advance_cursor(r, operation)?.unwrap_or_default();
                ctx.set_register(dest, value);
            }
            Some(context) if context == ctx.id => match self.take_parked_frame(r, dest, operation)? {
                Some(frame) => {
                    if ctx.frames.len() >= self.config.max_call_depth {
                        return Err(RuntimeError::new(RuntimeErrorKind::StackOverflow, operation.to_string()));
                    }
                    ctx.frames.push(frame);
                }
                None => ctx.set_register(dest, Value::Null),
            },
            Some(context) => {
                let value = match self.resume_in_context(context, r)? {
                    super::Resume::Yielded(value) => value,
                    super::Resume::Done => Value::Null,
                };
                ctx.set_register(dest, value);
            }
        }
        Ok(())
    }

    /// Steps a list, dict or string iterator. `None` marks it done.
    pub(crate) fn advance_cursor(
        &mut self,
        iterator: ObjRef,
        operation: &str,
    ) -> Result<Option<Value>, RuntimeError> {
        let (target, position) = match self.heap.get(iterator) {
            Some(Object::Iterator(it)) if it.done => return Ok(None),
            Some(Object::Iterator(it)) => match it.source {
                IteratorSource::List { list, position } => (list, position),
                IteratorSource::Dict { dict, position } => (dict, position),
                IteratorSource::Str { string, position } => (string, position),
                IteratorSource::Generator(_) => {
                    return Err(RuntimeError::new(RuntimeErrorKind::NotIterable, operation.to_string()))
                }
            },
            _ => {
                return Err(RuntimeError::new(RuntimeErrorKind::NotIterable, operation.to_string()))
            }
        };

        let next = match self.heap.get(target) {
            Some(Object::List(items)) => items.get(position).copied().map(Cursor::Item),
            Some(Object::Dict(entries)) => entries.get_index(position).map(|(k, _)| Cursor::Key(k.clone())),
            Some(Object::String(s)) => s.chars().nth(position).map(Cursor::Char),
            _ => None,
        };

        if let Some(Object::Iterator(it)) = self.heap.get_mut(iterator) {
            match (&next, &mut it.source) {
                (None, _) => it.done = true,
                (
                    Some(_),
                    IteratorSource::List { position, .. }
                    | IteratorSource::Dict { position, .. }
                    | IteratorSource::Str { position, .. },
                ) => *position += 1,
                (Some(_), IteratorSource::Generator(_)) => {}
            }
        }

        Ok(next.map(|cursor| match cursor {
            Cursor::Item(value) => value,
            Cursor::Key(DictKey::Int(v)) => Value::Int(v),
            Cursor::Key(DictKey::Str(s)) => self.alloc_string(s),
            Cursor::Char(c) => self.alloc_string(c.to_string()),
        }))
    }
}
