//! Heap objects

use super::frame::CallFrame;
use super::value::{ContextId, ObjRef, Value};
use indexmap::IndexMap;
use std::fmt;

/// Dictionary key; only ints and strings can be keys
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Int(i64),
    Str(String),
}

impl fmt::Display for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictKey::Int(v) => write!(f, "{v}"),
            DictKey::Str(s) => write!(f, "{s:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Immutable text
    String(String),
    List(Vec<Value>),
    Dict(IndexMap<DictKey, Value>),
    /// Class instance backed by its own execution context
    Instance(ContextId),
    Iterator(IteratorObject),
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::String(_) => "string",
            Object::List(_) => "list",
            Object::Dict(_) => "dict",
            Object::Instance(_) => "object",
            Object::Iterator(_) => "iterator",
        }
    }

    /// Pushes every object handle this object references
    pub fn trace(&self, out: &mut Vec<Value>) {
        match self {
            Object::String(_) | Object::Instance(_) => {}
            Object::List(items) => out.extend(items.iter().copied()),
            Object::Dict(entries) => out.extend(entries.values().copied()),
            Object::Iterator(iterator) => iterator.trace(out),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IteratorObject {
    pub source: IteratorSource,
    /// Set once a step found the sequence exhausted
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IteratorSource {
    List { list: ObjRef, position: usize },
    /// Walks the keys in insertion order
    Dict { dict: ObjRef, position: usize },
    /// Walks characters, not bytes
    Str { string: ObjRef, position: usize },
    Generator(GeneratorState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorState {
    /// Context whose program holds the generator body
    pub context: ContextId,
    /// Instance object owning that context, kept alive by the iterator
    pub owner: Option<ObjRef>,
    /// The suspended body; `None` while it runs or once it has finished
    pub frame: Option<Box<CallFrame>>,
    pub running: bool,
}

impl IteratorObject {
    pub fn new(source: IteratorSource) -> Self {
        Self {
            source,
            done: false,
        }
    }

    fn trace(&self, out: &mut Vec<Value>) {
        match &self.source {
            IteratorSource::List { list: target, .. }
            | IteratorSource::Dict { dict: target, .. }
            | IteratorSource::Str { string: target, .. } => out.push(Value::Object(*target)),
            IteratorSource::Generator(generator) => {
                if let Some(owner) = generator.owner {
                    out.push(Value::Object(owner));
                }
                if let Some(frame) = &generator.frame {
                    out.extend(frame.values().copied());
                }
            }
        }
    }

    pub fn is_generator(&self) -> bool {
        matches!(self.source, IteratorSource::Generator(_))
    }
}
