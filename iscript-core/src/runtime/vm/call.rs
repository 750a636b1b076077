//! Calls: script functions, natives, generators, cross-context calls and
//! class instantiation

use super::execution::Outcome;
use super::{ContextSlot, Resume, Vm};
use crate::compiler::ast::FunctionKind;
use crate::compiler::instruction::REG_RETURN;
use crate::compiler::symbol::FunctionSymbol;
use crate::runtime::context::ExecutionContext;
use crate::runtime::error::{RuntimeError, RuntimeErrorKind};
use crate::runtime::frame::{CallFrame, FrameKind};
use crate::runtime::native::NativeCall;
use crate::runtime::object::{GeneratorState, IteratorObject, IteratorSource, Object};
use crate::runtime::value::{ContextId, FunctionRef, NativeId, ObjRef, Value};
use iscript_log::debug;
use std::sync::Arc;

impl Vm {
    /// Calls function `index` of `ctx` for an instruction. Script bodies get
    /// a new frame whose return value lands in `dest`; natives and generator
    /// creation complete immediately.
    pub(crate) fn invoke(
        &mut self,
        ctx: &mut ExecutionContext,
        index: u32,
        args: Vec<Value>,
        dest: usize,
    ) -> Result<(), RuntimeError> {
        if let Some(value) = self.enter(ctx, index, args, dest)? {
            ctx.set_register(dest, value);
        }
        Ok(())
    }

    /// Pushes the frame for function `index`, or returns the result directly
    /// when no frame is needed
    pub(crate) fn enter(
        &mut self,
        ctx: &mut ExecutionContext,
        index: u32,
        args: Vec<Value>,
        dest: usize,
    ) -> Result<Option<Value>, RuntimeError> {
        let function = ctx.function(index).cloned().ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::InvalidReference, "call")
                .with_value(format!("function #{index} in {}", ctx.id))
        })?;
        let name = ctx.function_name(index).to_string();

        if let Some(native) = &function.native {
            return self.call_native_named(ctx, native, args).map(Some);
        }
        if args.len() != function.params as usize {
            return Err(RuntimeError::new(
                RuntimeErrorKind::WrongParameterCount {
                    expected: function.params as usize,
                    found: args.len(),
                },
                name,
            ));
        }
        if function.subtype == FunctionKind::Generator {
            let owner = ctx.self_ref;
            return Ok(Some(self.new_generator(ctx.id, owner, index, &function, &args)));
        }
        if ctx.frames.len() >= self.config.max_call_depth {
            return Err(RuntimeError::new(RuntimeErrorKind::StackOverflow, name)
                .with_value(format!("{} frames", ctx.frames.len())));
        }
        ctx.frames.push(CallFrame::with_args(
            index,
            function.entry,
            function.locals as usize,
            &args,
            FrameKind::Call { dest: dest as u8 },
        ));
        Ok(None)
    }

    /// Runs function `index` of `ctx` to completion on top of its current
    /// frames
    pub(crate) fn run_function(
        &mut self,
        ctx: &mut ExecutionContext,
        index: u32,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let base = ctx.frames.len();
        if let Some(value) = self.enter(ctx, index, args, REG_RETURN as usize)? {
            return Ok(value);
        }
        match self.execute(ctx, base, None) {
            Ok(Outcome::Completed(value)) => Ok(value),
            Ok(_) => Err(RuntimeError::new(RuntimeErrorKind::MalformedInstruction, "call")
                .with_value(ctx.function_name(index).to_string())),
            Err(err) => {
                ctx.frames.truncate(base);
                Err(err)
            }
        }
    }

    /// Calls `function` with its result in `dest`. Functions of the running
    /// context get an inline frame; functions of other contexts run
    /// synchronously.
    pub(crate) fn call_ref(
        &mut self,
        ctx: &mut ExecutionContext,
        function: FunctionRef,
        args: Vec<Value>,
        dest: usize,
    ) -> Result<(), RuntimeError> {
        if function.context == ctx.id {
            return self.invoke(ctx, function.index, args, dest);
        }
        let value = self.call_in_context(function.context, function.index, args)?;
        ctx.set_register(dest, value);
        Ok(())
    }

    /// `CALL`: function and native references, and class references, which
    /// instantiate the class
    pub(crate) fn call_value(
        &mut self,
        ctx: &mut ExecutionContext,
        callee: Value,
        args: Vec<Value>,
        dest: usize,
        operation: &str,
    ) -> Result<(), RuntimeError> {
        match callee {
            Value::Function(function) => self.call_ref(ctx, function, args, dest),
            Value::Native(id) => {
                let value = self.call_native_id(ctx, id, args)?;
                ctx.set_register(dest, value);
                Ok(())
            }
            Value::Symbol(name) => {
                if !args.is_empty() {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::WrongParameterCount {
                            expected: 0,
                            found: args.len(),
                        },
                        operation.to_string(),
                    )
                    .with_value(self.name(name).to_string()));
                }
                let class = self.name(name).to_string();
                let instance = self.instantiate(&class, 0)?;
                ctx.set_register(dest, Value::Object(instance));
                Ok(())
            }
            other => Err(RuntimeError::new(RuntimeErrorKind::NotCallable, operation.to_string())
                .with_value(self.display(other))),
        }
    }

    /// Runs function `index` of another context synchronously. Errors
    /// terminate that context and propagate to the caller.
    pub(crate) fn call_in_context(
        &mut self,
        target: ContextId,
        index: u32,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        if self.nesting >= self.config.max_nesting {
            return Err(RuntimeError::new(RuntimeErrorKind::StackOverflow, "call")
                .with_value(format!("{} nested contexts", self.nesting)));
        }
        let mut ctx = self.take_context(target, "call")?;
        let result = self.run_function(&mut ctx, index, args);
        match &result {
            Ok(_) => ctx.settle(),
            Err(err) => self.fail(&mut ctx, err.clone()),
        }
        self.put_context(ctx);
        result
    }

    // ===== natives =====

    pub(crate) fn call_native_named(
        &mut self,
        ctx: &mut ExecutionContext,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let id = self.native_id(name).ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::UndefinedNative(name.to_string()), "CALLNATIVE")
        })?;
        self.call_native_id(ctx, id, args)
    }

    pub(crate) fn call_native_id(
        &mut self,
        ctx: &mut ExecutionContext,
        id: NativeId,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let entry = self.natives.get(id.0 as usize).ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::InvalidReference, "CALLNATIVE")
                .with_value(format!("native #{}", id.0))
        })?;
        let function = Arc::clone(&entry.function);
        let name = entry.name.clone();
        let mut call = NativeCall::new(self, ctx, &name, args);
        function(&mut call)?;
        Ok(call.into_result())
    }

    // ===== generators =====

    /// Iterator over a fresh generator body, parked at its entry
    fn new_generator(
        &mut self,
        context: ContextId,
        owner: Option<ObjRef>,
        index: u32,
        function: &FunctionSymbol,
        args: &[Value],
    ) -> Value {
        let iterator = self.heap.alloc(Object::Iterator(IteratorObject::new(
            IteratorSource::Generator(GeneratorState {
                context,
                owner,
                frame: None,
                running: false,
            }),
        )));
        let frame = CallFrame::with_args(
            index,
            function.entry,
            function.locals as usize,
            args,
            FrameKind::Generator {
                iterator,
                dest: REG_RETURN,
            },
        );
        if let Some(Object::Iterator(IteratorObject {
            source: IteratorSource::Generator(state),
            ..
        })) = self.heap.get_mut(iterator)
        {
            state.frame = Some(Box::new(frame));
        }
        Value::Object(iterator)
    }

    /// Takes the parked frame out of a generator iterator so it can run,
    /// retargeted at `dest`. `None` once the generator has finished.
    pub(crate) fn take_parked_frame(
        &mut self,
        iterator: ObjRef,
        dest: usize,
        operation: &str,
    ) -> Result<Option<CallFrame>, RuntimeError> {
        let Some(Object::Iterator(it)) = self.heap.get_mut(iterator) else {
            return Err(RuntimeError::new(RuntimeErrorKind::InvalidReference, operation.to_string()));
        };
        if it.done {
            return Ok(None);
        }
        let IteratorSource::Generator(state) = &mut it.source else {
            return Err(RuntimeError::new(RuntimeErrorKind::NotIterable, operation.to_string()));
        };
        if state.running {
            return Err(RuntimeError::new(RuntimeErrorKind::ContextBusy, operation.to_string())
                .with_value("generator is already running"));
        }
        match state.frame.take() {
            Some(mut frame) => {
                frame.kind = FrameKind::Generator {
                    iterator,
                    dest: dest as u8,
                };
                state.running = true;
                Ok(Some(*frame))
            }
            None => {
                it.done = true;
                Ok(None)
            }
        }
    }

    /// Resumes a generator whose body lives in context `context` and runs it
    /// to its next `yield`
    pub(crate) fn resume_in_context(
        &mut self,
        context: ContextId,
        iterator: ObjRef,
    ) -> Result<Resume, RuntimeError> {
        if self.nesting >= self.config.max_nesting {
            return Err(RuntimeError::new(RuntimeErrorKind::StackOverflow, "resume")
                .with_value(format!("{} nested contexts", self.nesting)));
        }
        let mut ctx = self.take_context(context, "resume")?;
        let result = self.resume_generator(&mut ctx, iterator);
        match &result {
            Ok(_) => ctx.settle(),
            Err(err) => self.fail(&mut ctx, err.clone()),
        }
        self.put_context(ctx);
        result
    }

    fn resume_generator(
        &mut self,
        ctx: &mut ExecutionContext,
        iterator: ObjRef,
    ) -> Result<Resume, RuntimeError> {
        let Some(frame) = self.take_parked_frame(iterator, REG_RETURN as usize, "resume")? else {
            return Ok(Resume::Done);
        };
        if ctx.frames.len() >= self.config.max_call_depth {
            return Err(RuntimeError::new(RuntimeErrorKind::StackOverflow, "resume"));
        }
        let base = ctx.frames.len();
        ctx.frames.push(frame);
        match self.execute(ctx, base, None)? {
            Outcome::Yielded(value) => Ok(Resume::Yielded(value)),
            Outcome::Completed(_) => Ok(Resume::Done),
            Outcome::OutOfBudget => Err(RuntimeError::new(
                RuntimeErrorKind::MalformedInstruction,
                "resume",
            )),
        }
    }

    // ===== classes =====

    /// Creates an instance of class `name`: the base instance first, then a
    /// new context whose global code runs to completion
    pub(crate) fn instantiate(&mut self, name: &str, depth: usize) -> Result<ObjRef, RuntimeError> {
        if depth > self.config.max_nesting {
            return Err(RuntimeError::new(RuntimeErrorKind::StackOverflow, "instantiate")
                .with_value(name.to_string()));
        }
        let program = self
            .classes
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                RuntimeError::new(RuntimeErrorKind::UndefinedClass(name.to_string()), "instantiate")
            })?;
        let base = match program.base_name.clone() {
            Some(base) => Some(self.instantiate(&base, depth + 1)?),
            None => None,
        };

        let id = ContextId(self.contexts.len() as u32);
        self.contexts.push(ContextSlot::Running);
        let object = self.heap.alloc(Object::Instance(id));
        let mut ctx = Box::new(ExecutionContext::new(id, program, true));
        ctx.self_ref = Some(object);
        ctx.base = base;
        ctx.push_global_frame();
        debug!(self.logger, "instantiated class '{}' as {}", name, id);

        let result = self.execute(&mut ctx, 0, None);
        match &result {
            Ok(_) => ctx.settle(),
            Err(err) => self.fail(&mut ctx, err.clone()),
        }
        self.put_context(ctx);
        result.map(|_| object)
    }
}
