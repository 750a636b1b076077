//! Virtual machine
//!
//! The VM owns one heap, the native table, the registered classes and every
//! loaded execution context. Contexts are multiplexed cooperatively: `run`
//! hands each runnable context a bounded slice of instructions, and a context
//! that runs out simply keeps its frames until the next `run`.
//!
//! While a context executes it is taken out of its slot (the slot reads
//! `Running`), which is how re-entrant calls into a busy context are
//! detected.

mod call;
mod execution;
mod index;
mod methods;
mod operators;
mod scheduler;

use super::context::{ContextStatus, ExecutionContext, QueuedEvent};
use super::error::{RuntimeError, RuntimeErrorKind};
use super::heap::{CollectStats, Heap, HeapStats};
use super::native::{self, NativeCall, NativeEntry, NativeFn};
use super::object::{IteratorSource, Object};
use super::value::{format_float, ContextId, NativeId, ObjRef, Value};
use crate::program::Program;
use iscript_config::VmConfig;
use iscript_log::{debug, info, Logger};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub use scheduler::RunStats;

/// Result of resuming an iterator from the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resume {
    Yielded(Value),
    Done,
}

pub(crate) enum ContextSlot {
    Vacant,
    Loaded(Box<ExecutionContext>),
    /// Taken out while it executes
    Running,
}

pub struct Vm {
    config: VmConfig,
    logger: Arc<Logger>,
    heap: Heap,
    contexts: Vec<ContextSlot>,
    natives: Vec<NativeEntry>,
    native_names: HashMap<String, NativeId>,
    /// Class programs by lowercase class name
    classes: HashMap<String, Arc<Program>>,
    /// Interned class names referenced by `Value::Symbol`
    names: Vec<String>,
    name_ids: HashMap<String, u32>,
    output: Vec<String>,
    /// Depth of nested `execute` calls; GC only runs at depth 1
    nesting: usize,
    /// Instructions executed since creation
    ticks: u64,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        Self {
            heap: Heap::new(config.generations),
            config,
            logger: Logger::noop(),
            contexts: Vec::new(),
            natives: Vec::new(),
            native_names: HashMap::new(),
            classes: HashMap::new(),
            names: Vec::new(),
            name_ids: HashMap::new(),
            output: Vec::new(),
            nesting: 0,
            ticks: 0,
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.heap = Heap::new(self.config.generations).with_logger(logger.clone());
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    /// Instructions executed so far
    pub fn instructions_executed(&self) -> u64 {
        self.ticks
    }

    // ===== natives =====

    /// Registers `function` under `name`, case-insensitively. Registering a
    /// name again replaces the function but keeps its id.
    pub fn register_native<F>(&mut self, name: &str, function: F) -> NativeId
    where
        F: Fn(&mut NativeCall<'_>) -> Result<(), RuntimeError> + 'static,
    {
        let function: NativeFn = Arc::new(function);
        let key = name.to_ascii_lowercase();
        if let Some(&id) = self.native_names.get(&key) {
            self.natives[id.0 as usize].function = function;
            return id;
        }
        let id = NativeId(self.natives.len() as u32);
        self.natives.push(NativeEntry {
            name: name.to_string(),
            function,
        });
        self.native_names.insert(key, id);
        debug!(self.logger, "registered native '{}'", name);
        id
    }

    pub fn register_builtins(&mut self) {
        native::register_builtins(self);
    }

    pub fn native_id(&self, name: &str) -> Option<NativeId> {
        self.native_names.get(&name.to_ascii_lowercase()).copied()
    }

    // ===== loading =====

    /// Makes a class program instantiable through `using Name;`
    pub fn register_class(&mut self, program: impl Into<Arc<Program>>) -> Result<(), RuntimeError> {
        let program = program.into();
        let name = program.class_name.clone().ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::UndefinedClass(String::new()), "register_class")
                .with_value(program.initial_file.clone())
        })?;
        info!(self.logger, "registered class '{}'", name);
        self.classes.insert(name.to_ascii_lowercase(), program);
        Ok(())
    }

    /// Creates a context for `program` with its global code queued to run.
    /// Class programs are registered as well.
    pub fn load(&mut self, program: impl Into<Arc<Program>>) -> Result<ContextId, RuntimeError> {
        let program = program.into();
        if program.is_class() {
            self.register_class(Arc::clone(&program))?;
        }
        let id = ContextId(self.contexts.len() as u32);
        let mut ctx = ExecutionContext::new(id, program, false);
        ctx.push_global_frame();
        info!(
            self.logger,
            "loaded {} from '{}' ({} instructions)",
            id,
            ctx.program.initial_file,
            ctx.program.instructions.len()
        );
        self.contexts.push(ContextSlot::Loaded(Box::new(ctx)));
        Ok(id)
    }

    /// Releases a context. Its objects become garbage unless still
    /// referenced elsewhere.
    pub fn unload(&mut self, id: ContextId) -> Result<(), RuntimeError> {
        match self.contexts.get_mut(id.index()) {
            Some(slot) if matches!(slot, ContextSlot::Loaded(_)) => {
                *slot = ContextSlot::Vacant;
                info!(self.logger, "unloaded {}", id);
                Ok(())
            }
            Some(ContextSlot::Running) => Err(context_error(RuntimeErrorKind::ContextBusy, "unload", id)),
            _ => Err(context_error(RuntimeErrorKind::InvalidReference, "unload", id)),
        }
    }

    pub(crate) fn take_context(
        &mut self,
        id: ContextId,
        operation: &str,
    ) -> Result<Box<ExecutionContext>, RuntimeError> {
        let slot = self
            .contexts
            .get_mut(id.index())
            .ok_or_else(|| context_error(RuntimeErrorKind::InvalidReference, operation, id))?;
        match std::mem::replace(slot, ContextSlot::Running) {
            ContextSlot::Loaded(ctx) if ctx.is_terminated() => {
                *slot = ContextSlot::Loaded(ctx);
                Err(context_error(RuntimeErrorKind::ContextTerminated, operation, id))
            }
            ContextSlot::Loaded(ctx) => Ok(ctx),
            ContextSlot::Running => Err(context_error(RuntimeErrorKind::ContextBusy, operation, id)),
            ContextSlot::Vacant => {
                *slot = ContextSlot::Vacant;
                Err(context_error(RuntimeErrorKind::InvalidReference, operation, id))
            }
        }
    }

    pub(crate) fn put_context(&mut self, ctx: Box<ExecutionContext>) {
        if let Some(slot) = self.contexts.get_mut(ctx.id.index()) {
            *slot = ContextSlot::Loaded(ctx);
        }
    }

    pub(crate) fn loaded(&self, id: ContextId, operation: &str) -> Result<&ExecutionContext, RuntimeError> {
        match self.contexts.get(id.index()) {
            Some(ContextSlot::Loaded(ctx)) => Ok(ctx),
            Some(ContextSlot::Running) => Err(context_error(RuntimeErrorKind::ContextBusy, operation, id)),
            _ => Err(context_error(RuntimeErrorKind::InvalidReference, operation, id)),
        }
    }

    pub(crate) fn loaded_mut(
        &mut self,
        id: ContextId,
        operation: &str,
    ) -> Result<&mut ExecutionContext, RuntimeError> {
        match self.contexts.get_mut(id.index()) {
            Some(ContextSlot::Loaded(ctx)) => Ok(ctx),
            Some(ContextSlot::Running) => Err(context_error(RuntimeErrorKind::ContextBusy, operation, id)),
            _ => Err(context_error(RuntimeErrorKind::InvalidReference, operation, id)),
        }
    }

    /// Terminates `ctx` after a runtime error
    pub(crate) fn fail(&mut self, ctx: &mut ExecutionContext, err: RuntimeError) {
        iscript_log::error!(self.logger, "{} terminated: {}", ctx.id, err);
        ctx.status = ContextStatus::Terminated;
        ctx.frames.clear();
        ctx.params.clear();
        ctx.events.clear();
        ctx.last_error = Some(err);
    }

    // ===== host calls =====

    /// Runs the global-scope function `name` in context `id` to completion
    pub fn call_function(
        &mut self,
        id: ContextId,
        name: &str,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let index = self
            .loaded(id, "call_function")?
            .global_function(name)
            .ok_or_else(|| {
                RuntimeError::new(RuntimeErrorKind::UndefinedMember(name.to_string()), "call_function")
            })?;
        self.call_in_context(id, index, args.to_vec())
    }

    /// Dispatches event `name` through the active state and runs the handler
    /// to completion. Without a handler this is a no-op returning null.
    pub fn call_event(
        &mut self,
        id: ContextId,
        name: &str,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        match self.loaded(id, "call_event")?.event_handler(name) {
            Some(index) => self.call_in_context(id, index, args.to_vec()),
            None => {
                debug!(self.logger, "{}: no handler for event '{}'", id, name);
                Ok(Value::Null)
            }
        }
    }

    /// Queues event `name`; it runs during a later `run`
    pub fn queue_event(
        &mut self,
        id: ContextId,
        name: &str,
        args: Vec<Value>,
    ) -> Result<(), RuntimeError> {
        let ctx = self.loaded_mut(id, "queue_event")?;
        if ctx.is_terminated() {
            return Err(context_error(RuntimeErrorKind::ContextTerminated, "queue_event", id));
        }
        ctx.events.push_back(QueuedEvent {
            name: name.to_string(),
            args,
        });
        Ok(())
    }

    /// Advances `iterator` on behalf of context `id`. Generators run until
    /// their next `yield` or until they finish.
    pub fn resume(&mut self, id: ContextId, iterator: Value) -> Result<Resume, RuntimeError> {
        if self.loaded(id, "resume")?.is_terminated() {
            return Err(context_error(RuntimeErrorKind::ContextTerminated, "resume", id));
        }
        let r = match iterator {
            Value::Object(r) => r,
            other => {
                return Err(RuntimeError::new(RuntimeErrorKind::NotIterable, "resume")
                    .with_value(self.display(other)))
            }
        };
        let generator = match self.heap.get(r) {
            Some(Object::Iterator(it)) => match &it.source {
                IteratorSource::Generator(state) if !it.done => Some(state.context),
                _ => None,
            },
            _ => {
                return Err(RuntimeError::new(RuntimeErrorKind::NotIterable, "resume")
                    .with_value(self.display(iterator)))
            }
        };
        match generator {
            Some(context) => self.resume_in_context(context, r),
            None => Ok(match self.advance_cursor(r, "resume")? {
                Some(value) => Resume::Yielded(value),
                None => Resume::Done,
            }),
        }
    }

    // ===== inspection =====

    pub fn global(&self, id: ContextId, name: &str) -> Option<Value> {
        let ctx = self.loaded(id, "global").ok()?;
        let (slot, _) = ctx.global_slot(name)?;
        ctx.globals.get(slot as usize).copied()
    }

    pub fn set_global(&mut self, id: ContextId, name: &str, value: Value) -> Result<(), RuntimeError> {
        let ctx = self.loaded_mut(id, "set_global")?;
        match ctx.global_slot(name) {
            Some((_, true)) => Err(RuntimeError::new(RuntimeErrorKind::Immutable, "set_global")
                .with_value(name.to_string())),
            Some((slot, false)) => {
                if let Some(target) = ctx.globals.get_mut(slot as usize) {
                    *target = value;
                }
                Ok(())
            }
            None => Err(RuntimeError::new(
                RuntimeErrorKind::UndefinedMember(name.to_string()),
                "set_global",
            )),
        }
    }

    /// Global variables of context `id`, ordered by slot
    pub fn globals(&self, id: ContextId) -> Vec<(String, Value)> {
        let Ok(ctx) = self.loaded(id, "globals") else {
            return Vec::new();
        };
        ctx.program
            .global_names()
            .into_iter()
            .filter_map(|(slot, name)| {
                ctx.globals
                    .get(slot as usize)
                    .map(|value| (name.to_string(), *value))
            })
            .collect()
    }

    pub fn status(&self, id: ContextId) -> Option<ContextStatus> {
        match self.contexts.get(id.index())? {
            ContextSlot::Loaded(ctx) => Some(ctx.status),
            ContextSlot::Running => Some(ContextStatus::Running),
            ContextSlot::Vacant => None,
        }
    }

    pub fn last_error(&self, id: ContextId) -> Option<&RuntimeError> {
        self.loaded(id, "last_error").ok()?.last_error.as_ref()
    }

    /// Name of the active state
    pub fn state(&self, id: ContextId) -> Option<&str> {
        self.loaded(id, "state").ok()?.state_name()
    }

    /// Number of occupied context slots, instances included
    pub fn context_count(&self) -> usize {
        self.contexts
            .iter()
            .filter(|slot| !matches!(slot, ContextSlot::Vacant))
            .count()
    }

    // ===== heap =====

    pub(crate) fn heap(&self) -> &Heap {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Collects `generation` and younger with every loaded context as a root
    pub fn collect_garbage(&mut self, generation: u8) -> CollectStats {
        self.collect_with(generation, None)
    }

    pub(crate) fn collect_with(
        &mut self,
        generation: u8,
        active: Option<&ExecutionContext>,
    ) -> CollectStats {
        let mut roots = Vec::new();
        let mut visited = HashSet::new();
        for slot in &self.contexts {
            if let ContextSlot::Loaded(ctx) = slot {
                if !ctx.instance {
                    ctx.roots(&mut roots);
                    visited.insert(ctx.id);
                }
            }
        }
        if let Some(ctx) = active {
            ctx.roots(&mut roots);
            visited.insert(ctx.id);
        }

        let contexts = &self.contexts;
        let (stats, swept) = self.heap.collect(generation, roots, |id, pending| {
            if visited.insert(id) {
                if let Some(ContextSlot::Loaded(ctx)) = contexts.get(id.index()) {
                    ctx.roots(pending);
                }
            }
        });

        for id in swept {
            if let Some(slot) = self.contexts.get_mut(id.index()) {
                if matches!(slot, ContextSlot::Loaded(_)) {
                    *slot = ContextSlot::Vacant;
                    debug!(self.logger, "unloaded unreachable instance {}", id);
                }
            }
        }
        stats
    }

    pub fn alloc_string(&mut self, text: impl Into<String>) -> Value {
        Value::Object(self.heap.alloc(Object::String(text.into())))
    }

    pub fn string_of(&self, value: Value) -> Option<&str> {
        match value.as_object().and_then(|r| self.heap.get(r)) {
            Some(Object::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn list_items(&self, value: Value) -> Option<&[Value]> {
        match value.as_object().and_then(|r| self.heap.get(r)) {
            Some(Object::List(items)) => Some(items),
            _ => None,
        }
    }

    // ===== names and output =====

    /// Interns a class name for `Value::Symbol`
    pub(crate) fn intern(&mut self, name: &str) -> u32 {
        let key = name.to_ascii_lowercase();
        if let Some(&id) = self.name_ids.get(&key) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.name_ids.insert(key, id);
        id
    }

    pub(crate) fn name(&self, id: u32) -> &str {
        self.names.get(id as usize).map_or("?", String::as_str)
    }

    pub(crate) fn print(&mut self, text: String) {
        if self.config.echo_print {
            println!("{text}");
        }
        debug!(self.logger, "print: {}", text);
        self.output.push(text);
    }

    /// Drains everything printed so far
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub fn type_name(&self, value: Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Object(r) => self.heap.get(r).map_or("null", Object::type_name),
            Value::Symbol(_) => "class",
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    /// Human-readable rendering; top-level strings are not quoted
    pub fn display(&self, value: Value) -> String {
        let mut seen = HashSet::new();
        self.render(value, false, &mut seen)
    }

    fn render(&self, value: Value, quoted: bool, seen: &mut HashSet<ObjRef>) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format_float(v),
            Value::Symbol(id) => format!("<class {}>", self.name(id)),
            Value::Native(id) => {
                let name = self.natives.get(id.0 as usize).map_or("?", |n| n.name.as_str());
                format!("<native {name}>")
            }
            Value::Function(f) => match self.contexts.get(f.context.index()) {
                Some(ContextSlot::Loaded(ctx)) => format!("<function {}>", ctx.function_name(f.index)),
                _ => "<function>".to_string(),
            },
            Value::Object(r) => {
                if !seen.insert(r) {
                    return "...".to_string();
                }
                let text = match self.heap.get(r) {
                    None => "<freed>".to_string(),
                    Some(Object::String(s)) if quoted => format!("{s:?}"),
                    Some(Object::String(s)) => s.clone(),
                    Some(Object::List(items)) => {
                        let parts: Vec<String> =
                            items.iter().map(|v| self.render(*v, true, seen)).collect();
                        format!("[{}]", parts.join(", "))
                    }
                    Some(Object::Dict(entries)) => {
                        let parts: Vec<String> = entries
                            .iter()
                            .map(|(k, v)| format!("{k}: {}", self.render(*v, true, seen)))
                            .collect();
                        format!("{{{}}}", parts.join(", "))
                    }
                    Some(Object::Instance(id)) => match self.contexts.get(id.index()) {
                        Some(ContextSlot::Loaded(ctx)) => format!(
                            "<{} instance>",
                            ctx.program.class_name.as_deref().unwrap_or("?")
                        ),
                        _ => "<instance>".to_string(),
                    },
                    Some(Object::Iterator(_)) => "<iterator>".to_string(),
                };
                seen.remove(&r);
                text
            }
        }
    }
}

fn context_error(kind: RuntimeErrorKind, operation: &str, id: ContextId) -> RuntimeError {
    RuntimeError::new(kind, operation.to_string()).with_value(id.to_string())
}

#[cfg(test)]
mod tests;
