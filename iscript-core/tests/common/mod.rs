//! Shared helpers for the end-to-end tests

#![allow(dead_code)]

use iscript_core::{CompileContext, CompilerConfig, ContextId, Program, Severity, Value, Vm, VmConfig};

/// Compiles `source`, failing the test with the rendered diagnostics
pub fn compile_ok(source: &str) -> Program {
    let mut ctx = CompileContext::new(source, CompilerConfig::default());
    assert!(ctx.compile(), "{}", ctx.render_diagnostics());
    ctx.program().expect("compiled program")
}

/// Compiles `source`, which must fail, and returns the first fatal message
pub fn compile_err(source: &str) -> String {
    let mut ctx = CompileContext::new(source, CompilerConfig::default());
    assert!(!ctx.compile(), "expected a compile error for:\n{source}");
    assert_eq!(ctx.error_count(Severity::Fatal), 1);
    ctx.diagnostics()
        .iter()
        .find(|d| d.severity == Severity::Fatal)
        .map(|d| d.message.clone())
        .unwrap_or_default()
}

/// A VM with the built-in natives and `source` loaded and run to idle
pub struct Run {
    pub vm: Vm,
    pub id: ContextId,
}

pub fn run_code(source: &str) -> Run {
    run_with(source, VmConfig::default())
}

pub fn run_with(source: &str, config: VmConfig) -> Run {
    let mut vm = Vm::new(config);
    vm.register_builtins();
    let id = vm.load(compile_ok(source)).expect("load");
    vm.run_until_idle(64);
    Run { vm, id }
}

impl Run {
    pub fn global(&self, name: &str) -> Value {
        self.vm
            .global(self.id, name)
            .unwrap_or_else(|| panic!("no global '{name}'"))
    }

    pub fn global_int(&self, name: &str) -> i64 {
        let value = self.global(name);
        value
            .as_int()
            .unwrap_or_else(|| panic!("global '{name}' is {value:?}, not an int"))
    }

    pub fn global_string(&self, name: &str) -> String {
        let value = self.global(name);
        self.vm
            .string_of(value)
            .unwrap_or_else(|| panic!("global '{name}' is {value:?}, not a string"))
            .to_string()
    }

    pub fn display(&self, name: &str) -> String {
        self.vm.display(self.global(name))
    }

    /// Panics with the runtime error if the context terminated
    pub fn assert_ok(&self) {
        if let Some(err) = self.vm.last_error(self.id) {
            panic!("runtime error: {err}");
        }
    }
}
