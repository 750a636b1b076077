//! Execution contexts
//!
//! A context is one loaded program with its own globals, call stack,
//! parameter stack, active state and event queue. Host-loaded contexts are
//! GC roots; class instances are only reachable through their instance
//! object.

use super::error::RuntimeError;
use super::frame::{CallFrame, FrameKind};
use super::value::{ContextId, ObjRef, Value};
use crate::compiler::ast::FunctionKind;
use crate::compiler::symbol::{FunctionSymbol, SymbolId, SymbolKind};
use crate::program::Program;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextStatus {
    /// No frames; waiting for a call or an event
    Idle,
    /// Executing right now
    Running,
    /// Frames remain after a time slice ran out
    Suspended,
    /// Hit a runtime error or was unloaded; never runs again
    Terminated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub name: String,
    pub args: Vec<Value>,
}

pub struct ExecutionContext {
    pub id: ContextId,
    pub program: Arc<Program>,
    pub globals: Vec<Value>,
    pub frames: Vec<CallFrame>,
    /// Arguments pushed by `PUSH` and not yet consumed by a call
    pub params: Vec<Value>,
    /// Active state symbol
    pub state: Option<SymbolId>,
    pub status: ContextStatus,
    pub events: VecDeque<QueuedEvent>,
    /// String symbol to the string object already created for it
    pub string_cache: HashMap<u32, ObjRef>,
    pub instance: bool,
    /// Instance object backing this context
    pub self_ref: Option<ObjRef>,
    /// Instance of the base class
    pub base: Option<ObjRef>,
    pub last_error: Option<RuntimeError>,
    /// Function-table index to symbol
    functions: Vec<SymbolId>,
}

impl ExecutionContext {
    pub fn new(id: ContextId, program: Arc<Program>, instance: bool) -> Self {
        let functions = program.function_table();
        Self {
            id,
            globals: vec![Value::Null; program.global_count as usize],
            frames: Vec::new(),
            params: Vec::new(),
            state: program.default_state(),
            status: ContextStatus::Idle,
            events: VecDeque::new(),
            string_cache: HashMap::new(),
            instance,
            self_ref: None,
            base: None,
            last_error: None,
            functions,
            program,
        }
    }

    /// Pushes the frame running the program's global code
    pub fn push_global_frame(&mut self) {
        self.frames
            .push(CallFrame::new(None, 0, 0, FrameKind::Call { dest: 2 }));
        self.status = ContextStatus::Suspended;
    }

    /// Register of the innermost frame
    pub fn register(&self, r: usize) -> Value {
        self.frames
            .last()
            .and_then(|f| f.registers.get(r))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_register(&mut self, r: usize, value: Value) {
        if let Some(slot) = self.frames.last_mut().and_then(|f| f.registers.get_mut(r)) {
            *slot = value;
        }
    }

    /// Status after execution stopped: suspended while frames remain
    pub fn settle(&mut self) {
        if !self.is_terminated() {
            self.status = if self.frames.is_empty() {
                ContextStatus::Idle
            } else {
                ContextStatus::Suspended
            };
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.status == ContextStatus::Terminated
    }

    /// Has work for the scheduler
    pub fn is_runnable(&self) -> bool {
        !self.is_terminated() && (!self.frames.is_empty() || !self.events.is_empty())
    }

    pub fn function(&self, index: u32) -> Option<&FunctionSymbol> {
        let symbol = self.functions.get(index as usize)?;
        self.program.symbols.get(symbol.index())?.as_function()
    }

    pub fn function_name(&self, index: u32) -> &str {
        self.functions
            .get(index as usize)
            .and_then(|s| self.program.symbols.get(s.index()))
            .map_or("?", |s| s.name.as_str())
    }

    /// Function-table index of a global-scope function
    pub fn global_function(&self, name: &str) -> Option<u32> {
        self.program.global_function(name).map(|(_, f)| f.index)
    }

    /// Handler for event `name`: the active state's event first, then a
    /// global-scope event
    pub fn event_handler(&self, name: &str) -> Option<u32> {
        let events = || {
            self.program
                .functions_named(name)
                .filter(|(_, f)| f.subtype == FunctionKind::Event)
        };
        self.state
            .and_then(|state| events().find(|(_, f)| f.state == Some(state)))
            .or_else(|| events().find(|(_, f)| f.state.is_none()))
            .map(|(_, f)| f.index)
    }

    pub fn global_slot(&self, name: &str) -> Option<(u32, bool)> {
        self.program.symbols.iter().find_map(|s| match s.kind {
            SymbolKind::Variable {
                slot,
                global: true,
                constant,
            } if s.matches(name) => Some((slot, constant)),
            _ => None,
        })
    }

    pub fn state_name(&self) -> Option<&str> {
        self.state
            .and_then(|s| self.program.symbols.get(s.index()))
            .map(|s| s.name.as_str())
    }

    /// Everything this context keeps alive
    pub fn roots(&self, out: &mut Vec<Value>) {
        out.extend(self.globals.iter().copied());
        out.extend(self.params.iter().copied());
        for frame in &self.frames {
            out.extend(frame.values().copied());
            if let FrameKind::Generator { iterator, .. } = frame.kind {
                out.push(Value::Object(iterator));
            }
        }
        for event in &self.events {
            out.extend(event.args.iter().copied());
        }
        out.extend(self.string_cache.values().map(|r| Value::Object(*r)));
        out.extend(self.self_ref.map(Value::Object));
        out.extend(self.base.map(Value::Object));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::context::CompileContext;
    use iscript_config::CompilerConfig;

    fn context(source: &str) -> ExecutionContext {
        let mut compile = CompileContext::new(source, CompilerConfig::default());
        assert!(compile.compile(), "{}", compile.render_diagnostics());
        let program = compile.program().expect("program");
        ExecutionContext::new(ContextId(0), Arc::new(program), false)
    }

    #[test]
    fn test_new_context_is_idle_with_null_globals() {
        let ctx = context("var a = 1; var b;");
        assert_eq!(ctx.status, ContextStatus::Idle);
        assert_eq!(ctx.globals, vec![Value::Null, Value::Null]);
        assert!(!ctx.is_runnable());
    }

    #[test]
    fn test_event_handler_prefers_active_state() {
        let mut ctx = context(
            r#"
            event hit() {}
            state Calm as default { event hit() {} }
            state Angry { event other() {} }
            "#,
        );
        let calm = ctx.event_handler("HIT").expect("handler");
        assert_eq!(ctx.state_name(), Some("Calm"));
        assert!(ctx.function(calm).and_then(|f| f.state).is_some());

        ctx.state = ctx
            .program
            .symbols
            .iter()
            .position(|s| s.name == "Angry")
            .map(|i| SymbolId(i as u32));
        let global = ctx.event_handler("hit").expect("global fallback");
        assert!(ctx.function(global).is_some_and(|f| f.state.is_none()));
        assert_eq!(ctx.event_handler("missing"), None);
    }

    #[test]
    fn test_roots_cover_frames_and_queue() {
        let mut ctx = context("var a;");
        ctx.globals[0] = Value::Object(ObjRef(1));
        ctx.push_global_frame();
        ctx.frames[0].registers[5] = Value::Object(ObjRef(2));
        ctx.events.push_back(QueuedEvent {
            name: "tick".into(),
            args: vec![Value::Object(ObjRef(3))],
        });
        let mut roots = Vec::new();
        ctx.roots(&mut roots);
        for r in 1..=3 {
            assert!(roots.contains(&Value::Object(ObjRef(r))));
        }
        assert!(ctx.is_runnable());
    }
}
