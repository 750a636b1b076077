//! Generator: AST to symbol table and register bytecode
//!
//! Two passes over the tree:
//!
//! 1. The symbol pass walks depth-first and lets each node register what it
//!    introduces: variables get a slot (local to the enclosing function, or
//!    global), functions get a function-table index, loops and branches get
//!    jump-target symbols on their `labels`.
//! 2. The instruction pass emits every global-scope statement first, in
//!    source order, closed by `RET`. Function and state-event bodies follow,
//!    each recording its entry index. Jump targets are bound while emitting
//!    and rewritten to plain instruction indices at the end.

mod expr;
mod stmt;

use super::ast::{Ast, FunctionBody, Labels, NodeId, NodeKind, Param};
use super::diagnostic::{CompileResult, Diagnostic};
use super::instruction::{Instruction, Opcode, Operand, REG_RETURN};
use super::register::{Register, RegisterPool};
use super::symbol::{FunctionSymbol, Symbol, SymbolId, SymbolKind};
use super::token::Token;
use crate::runtime::native::BUILTIN_NAMES;
use iscript_log::{debug, trace, Logger};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Program-level facts collected by the symbol pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramInfo {
    pub class_name: Option<String>,
    pub base_name: Option<String>,
    pub global_count: u32,
    pub function_table_size: u32,
}

/// Everything the generator produces
#[derive(Debug, Clone)]
pub struct Generated {
    pub symbols: Vec<Symbol>,
    pub instructions: Vec<Instruction>,
    pub info: ProgramInfo,
    pub warnings: Vec<Diagnostic>,
}

pub struct Generator<'a> {
    ast: &'a mut Ast,
    symbols: Vec<Symbol>,
    instructions: Vec<Instruction>,
    warnings: Vec<Diagnostic>,
    warn_pointless: bool,
    /// Declaring node to the symbol it introduced
    declared: HashMap<NodeId, SymbolId>,
    /// Interned string literals and member names
    strings: HashMap<String, SymbolId>,
    /// Lowercased natives callable without a declaration
    natives: HashSet<String>,
    info: ProgramInfo,
    pool: RegisterPool,
    /// Function whose body is being emitted; `None` for global code
    function: Option<NodeId>,
    logger: Arc<Logger>,
}

impl<'a> Generator<'a> {
    pub fn new(ast: &'a mut Ast) -> Self {
        Self {
            ast,
            symbols: Vec::new(),
            instructions: Vec::new(),
            warnings: Vec::new(),
            warn_pointless: true,
            declared: HashMap::new(),
            strings: HashMap::new(),
            natives: BUILTIN_NAMES.iter().map(|n| n.to_string()).collect(),
            info: ProgramInfo::default(),
            pool: RegisterPool::new(),
            function: None,
            logger: Logger::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_pointless_warnings(mut self, enabled: bool) -> Self {
        self.warn_pointless = enabled;
        self
    }

    /// Host natives that undeclared calls may resolve to
    pub fn with_natives<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.natives
            .extend(names.into_iter().map(|n| n.as_ref().to_ascii_lowercase()));
        self
    }

    pub fn generate(mut self) -> CompileResult<Generated> {
        let root = self
            .ast
            .root()
            .ok_or_else(|| Diagnostic::fatal("empty syntax tree", 1, 1))?;

        self.declare_tree(root)?;
        debug!(
            self.logger,
            "symbol pass: {} symbols, {} globals, {} functions",
            self.symbols.len(),
            self.info.global_count,
            self.info.function_table_size
        );

        for stmt in self.ast.children(root).to_vec() {
            self.emit_statement(stmt)?;
        }
        self.emit(Opcode::LoadNull, &[Operand::Register(REG_RETURN)], root);
        self.emit(Opcode::Return, &[], root);

        for function in self.function_nodes(root) {
            self.emit_function(function)?;
        }

        self.resolve_jumps()?;
        debug!(
            self.logger,
            "generated {} instructions",
            self.instructions.len()
        );

        Ok(Generated {
            symbols: self.symbols,
            instructions: self.instructions,
            info: self.info,
            warnings: self.warnings,
        })
    }

    // ===== symbol pass =====

    fn declare_tree(&mut self, id: NodeId) -> CompileResult<()> {
        self.declare_node(id)?;
        for child in self.ast.children(id).to_vec() {
            self.declare_tree(child)?;
        }
        Ok(())
    }

    fn declare_node(&mut self, id: NodeId) -> CompileResult<()> {
        let token = self.ast.token(id).clone();
        match self.ast.kind(id).clone() {
            NodeKind::Var { name, constant, .. } => {
                let scope = self.scope_of(id);
                self.declare_variable(id, scope, &name, constant, &token)?;
            }
            NodeKind::Using { name } => {
                let scope = self.scope_of(id);
                self.declare_variable(id, scope, &name, true, &token)?;
            }
            NodeKind::Function {
                name,
                kind,
                params,
                body,
            } => self.declare_function(id, &name, kind, &params, &body, &token)?,
            NodeKind::State { name, default } => {
                let scope = self.scope_of(id);
                let symbol = self.define(scope, &name, &token, SymbolKind::State { default })?;
                self.declared.insert(id, symbol);
            }
            NodeKind::Class { name, base } => {
                self.info.class_name = Some(name);
                self.info.base_name = base;
            }
            NodeKind::For { .. } | NodeKind::Do { .. } => {
                self.loop_labels(id, &token);
                let top = self.label("top", &token);
                self.ast.node_mut(id).labels.extra.push(top);
            }
            NodeKind::While { .. } => self.loop_labels(id, &token),
            NodeKind::Foreach {
                variable, declare, ..
            } => {
                if declare {
                    self.declare_variable(id, id, &variable, false, &token)?;
                }
                self.loop_labels(id, &token);
            }
            NodeKind::Switch { .. } => {
                let label = self.label("break", &token);
                self.ast.node_mut(id).labels.break_label = Some(label);
            }
            NodeKind::If { .. } | NodeKind::Ternary { .. } => {
                let else_label = self.label("else", &token);
                let end_label = self.label("end", &token);
                self.ast.node_mut(id).labels.extra = vec![else_label, end_label];
            }
            NodeKind::Case { .. } | NodeKind::Default => {
                let label = self.label("case", &token);
                self.ast.node_mut(id).labels.extra.push(label);
            }
            NodeKind::Logical { .. } => {
                let label = self.label("end", &token);
                self.ast.node_mut(id).labels.extra.push(label);
            }
            _ => {}
        }
        Ok(())
    }

    fn declare_variable(
        &mut self,
        id: NodeId,
        scope: NodeId,
        name: &str,
        constant: bool,
        token: &Token,
    ) -> CompileResult<()> {
        let (slot, global) = match self.ast.enclosing_function(id) {
            Some(function) => (self.next_local(function), false),
            None => {
                self.info.global_count += 1;
                (self.info.global_count - 1, true)
            }
        };
        let symbol = self.define(
            scope,
            name,
            token,
            SymbolKind::Variable {
                slot,
                global,
                constant,
            },
        )?;
        self.declared.insert(id, symbol);
        Ok(())
    }

    fn declare_function(
        &mut self,
        id: NodeId,
        name: &str,
        kind: super::ast::FunctionKind,
        params: &[Param],
        body: &FunctionBody,
        token: &Token,
    ) -> CompileResult<()> {
        let scope = self.scope_of(id);
        let state = match self.ast.kind(scope) {
            NodeKind::State { .. } => self.declared.get(&scope).copied(),
            _ => None,
        };
        let native = match body {
            FunctionBody::Native(binding) => Some(binding.clone()),
            FunctionBody::Block(_) => None,
        };

        let index = self.info.function_table_size;
        self.info.function_table_size += 1;
        let symbol = self.define(
            scope,
            name,
            token,
            SymbolKind::Function(FunctionSymbol {
                entry: 0,
                params: params.len() as u32,
                locals: params.len() as u32,
                state,
                subtype: kind,
                index,
                native,
            }),
        )?;
        self.declared.insert(id, symbol);

        for (slot, param) in params.iter().enumerate() {
            self.define(
                id,
                &param.name,
                &param.token,
                SymbolKind::Variable {
                    slot: slot as u32,
                    global: false,
                    constant: false,
                },
            )?;
        }
        Ok(())
    }

    fn loop_labels(&mut self, id: NodeId, token: &Token) {
        let break_label = self.label("break", token);
        let continue_label = self.label("continue", token);
        let labels = &mut self.ast.node_mut(id).labels;
        labels.break_label = Some(break_label);
        labels.continue_label = Some(continue_label);
    }

    fn label(&mut self, name: &str, token: &Token) -> SymbolId {
        self.push_symbol(Symbol::new(
            name,
            token.line,
            token.column,
            SymbolKind::JumpTarget { target: None },
        ))
    }

    /// Adds a value symbol to `scope`; a case-insensitive clash in the same
    /// scope is a redefinition
    fn define(
        &mut self,
        scope: NodeId,
        name: &str,
        token: &Token,
        kind: SymbolKind,
    ) -> CompileResult<SymbolId> {
        let existing = self
            .ast
            .node(scope)
            .symbols
            .iter()
            .map(|s| &self.symbols[s.index()])
            .find(|s| s.matches(name));
        if let Some(first) = existing {
            return Err(Diagnostic::fatal(
                format!(
                    "redefinition of '{name}' (first defined at {}:{})",
                    first.line, first.column
                ),
                token.line,
                token.column,
            ));
        }

        let id = self.push_symbol(Symbol::new(name, token.line, token.column, kind));
        self.ast.node_mut(scope).symbols.push(id);
        trace!(self.logger, "declared {}", self.symbols[id.index()].describe());
        Ok(id)
    }

    fn push_symbol(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol);
        id
    }

    /// Next free local slot of `function`
    fn next_local(&mut self, function: NodeId) -> u32 {
        let Some(&symbol) = self.declared.get(&function) else {
            return 0;
        };
        match self.symbols[symbol.index()].as_function_mut() {
            Some(f) => {
                f.locals += 1;
                f.locals - 1
            }
            None => 0,
        }
    }

    /// Nearest enclosing scope, excluding `id` itself
    fn scope_of(&self, id: NodeId) -> NodeId {
        self.ast
            .ancestors(id)
            .skip(1)
            .find(|&n| self.ast.kind(n).is_scope())
            .unwrap_or(NodeId(0))
    }

    /// Resolves `name` from `from` outward through the enclosing scopes
    fn lookup(&self, from: NodeId, name: &str) -> Option<SymbolId> {
        self.ast
            .ancestors(from)
            .filter(|&n| self.ast.kind(n).is_scope())
            .find_map(|scope| {
                self.ast
                    .node(scope)
                    .symbols
                    .iter()
                    .copied()
                    .find(|s| self.symbols[s.index()].matches(name))
            })
    }

    /// Any event function with this name, in any state or at global scope
    fn find_event(&self, name: &str) -> Option<SymbolId> {
        self.symbols
            .iter()
            .position(|s| {
                s.matches(name)
                    && s.as_function()
                        .is_some_and(|f| f.subtype == super::ast::FunctionKind::Event)
            })
            .map(|i| SymbolId(i as u32))
    }

    fn find_state(&self, name: &str) -> Option<SymbolId> {
        self.symbols
            .iter()
            .position(|s| s.matches(name) && matches!(s.kind, SymbolKind::State { .. }))
            .map(|i| SymbolId(i as u32))
    }

    // ===== instruction pass =====

    /// Function declarations in source order: top level, then inside states
    fn function_nodes(&self, root: NodeId) -> Vec<NodeId> {
        let mut functions = Vec::new();
        for &child in self.ast.children(root) {
            match self.ast.kind(child) {
                NodeKind::Function { .. } => functions.push(child),
                NodeKind::State { .. } => functions.extend(
                    self.ast
                        .children(child)
                        .iter()
                        .copied()
                        .filter(|&n| matches!(self.ast.kind(n), NodeKind::Function { .. })),
                ),
                _ => {}
            }
        }
        functions
    }

    fn emit_function(&mut self, id: NodeId) -> CompileResult<()> {
        let NodeKind::Function {
            name,
            body: FunctionBody::Block(body),
            ..
        } = self.ast.kind(id).clone()
        else {
            // native bindings have no body
            return Ok(());
        };

        let entry = self.instructions.len() as u32;
        if let Some(&symbol) = self.declared.get(&id) {
            if let Some(function) = self.symbols[symbol.index()].as_function_mut() {
                function.entry = entry;
            }
        }

        self.pool = RegisterPool::new();
        self.function = Some(id);
        self.emit_statement(body)?;
        self.emit(Opcode::LoadNull, &[Operand::Register(REG_RETURN)], body);
        self.emit(Opcode::Return, &[], body);
        self.function = None;

        trace!(self.logger, "function '{}' emitted at @{}", name, entry);
        Ok(())
    }

    /// Rewrites every jump-target operand to the instruction index it was bound to
    fn resolve_jumps(&mut self) -> CompileResult<()> {
        for instruction in &mut self.instructions {
            for operand in &mut instruction.operands {
                let Operand::JumpTarget(label) = *operand else {
                    continue;
                };
                match self.symbols.get(label as usize).map(|s| &s.kind) {
                    Some(SymbolKind::JumpTarget {
                        target: Some(target),
                    }) => *operand = Operand::Instruction(*target),
                    _ => {
                        return Err(Diagnostic::fatal(
                            format!("internal error: jump target #{label} was never bound"),
                            instruction.line,
                            instruction.column,
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    // ===== emission helpers =====

    fn emit(&mut self, opcode: Opcode, operands: &[Operand], at: NodeId) -> u32 {
        let token = self.ast.token(at);
        let index = self.instructions.len() as u32;
        self.instructions.push(Instruction::new(
            opcode,
            operands.to_vec(),
            token.line,
            token.column,
        ));
        index
    }

    fn jump(&mut self, opcode: Opcode, condition: Option<Register>, label: SymbolId, at: NodeId) {
        let target = Operand::JumpTarget(label.0);
        match condition {
            Some(register) => self.emit(opcode, &[register.into(), target], at),
            None => self.emit(opcode, &[target], at),
        };
    }

    /// Binds `label` to the next instruction index
    fn bind(&mut self, label: SymbolId) {
        let here = self.instructions.len() as u32;
        if let SymbolKind::JumpTarget { target } = &mut self.symbols[label.index()].kind {
            *target = Some(here);
        }
    }

    fn labels(&self, id: NodeId) -> &Labels {
        &self.ast.node(id).labels
    }

    /// Label from the symbol pass; missing ones are an internal error
    fn required_label(&self, label: Option<SymbolId>, id: NodeId) -> CompileResult<SymbolId> {
        label.ok_or_else(|| {
            self.error_at(
                id,
                format!("internal error: {} has no jump target", self.ast.kind(id).name()),
            )
        })
    }

    fn extra_label(&self, id: NodeId, index: usize) -> CompileResult<SymbolId> {
        self.required_label(self.labels(id).extra.get(index).copied(), id)
    }

    fn allocate(&mut self, at: NodeId) -> CompileResult<Register> {
        self.pool
            .allocate()
            .map_err(|_| self.error_at(at, "register pool exhausted"))
    }

    fn release(&mut self, register: Register) {
        self.pool.release(register);
    }

    fn intern(&mut self, value: &str) -> SymbolId {
        if let Some(&id) = self.strings.get(value) {
            return id;
        }
        let id = self.push_symbol(Symbol::new(
            "",
            0,
            0,
            SymbolKind::String {
                value: value.to_string(),
            },
        ));
        self.strings.insert(value.to_string(), id);
        id
    }

    fn error_at(&self, id: NodeId, message: impl Into<String>) -> Diagnostic {
        let token = self.ast.token(id);
        Diagnostic::fatal(message, token.line, token.column)
    }

    fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser::Parser;

    fn generate(source: &str) -> CompileResult<Generated> {
        let tokens = Lexer::new(source).analyze()?;
        let mut ast = Parser::new(&tokens).parse()?;
        Generator::new(&mut ast).generate()
    }

    fn generate_ok(source: &str) -> Generated {
        match generate(source) {
            Ok(generated) => generated,
            Err(err) => panic!("generation failed: {err}"),
        }
    }

    fn opcodes(generated: &Generated) -> Vec<Opcode> {
        generated.instructions.iter().map(|i| i.opcode).collect()
    }

    fn function<'g>(generated: &'g Generated, name: &str) -> &'g FunctionSymbol {
        generated
            .symbols
            .iter()
            .find(|s| s.matches(name) && s.as_function().is_some())
            .and_then(|s| s.as_function())
            .unwrap_or_else(|| panic!("no function {name}"))
    }

    #[test]
    fn test_global_code_comes_first() {
        let generated = generate_ok(
            r#"
            var a = 1;
            function f() { return 2; }
            var b = 3;
            "#,
        );
        let ops = opcodes(&generated);
        // LOADI, SETG, LOADI, SETG, LOADNULL, RET, then f's body
        assert_eq!(
            &ops[..6],
            &[
                Opcode::LoadInt,
                Opcode::SetGlobal,
                Opcode::LoadInt,
                Opcode::SetGlobal,
                Opcode::LoadNull,
                Opcode::Return
            ]
        );
        assert_eq!(function(&generated, "f").entry, 6);
        assert_eq!(generated.info.global_count, 2);
        assert_eq!(generated.info.function_table_size, 1);
    }

    #[test]
    fn test_locals_follow_params() {
        let generated = generate_ok("function f(a, b) { var c; for (var i = 0; i < 2; i++) {} }");
        let f = function(&generated, "f");
        assert_eq!((f.params, f.locals), (2, 4));
    }

    #[test]
    fn test_jumps_are_resolved() {
        let generated = generate_ok(
            r#"
            var n = 0;
            while (n < 10) { if (n == 5) break; n++; }
            switch (n) { case 1: n = 2; default: n = 3; }
            "#,
        );
        let count = generated.instructions.len() as u32;
        for ins in &generated.instructions {
            for operand in &ins.operands {
                assert!(!matches!(operand, Operand::JumpTarget(_)), "unresolved: {ins}");
                if let Operand::Instruction(target) = operand {
                    assert!(*target <= count);
                }
            }
        }
    }

    #[test]
    fn test_redefinition_reports_second_location() {
        let err = generate("var a;\nvar A = 2;").expect_err("redefinition");
        assert!(err.message.contains("redefinition of 'A'"), "{}", err.message);
        assert_eq!((err.line, err.column), (2, 5));
    }

    #[test]
    fn test_same_name_in_nested_scope_is_allowed() {
        generate_ok("var a; function f(a) { var b; } function g() { var b; }");
    }

    #[test]
    fn test_undefined_identifier() {
        let err = generate("var a = b;").expect_err("undefined");
        assert!(err.message.contains("undefined identifier 'b'"));
    }

    #[test]
    fn test_undeclared_call_needs_a_known_native() {
        let err = generate("undefinedFn(1);").expect_err("undefined call");
        assert!(err.message.contains("undefined identifier 'undefinedFn'"));

        let tokens = Lexer::new("Spawn(2); print(1);").analyze().expect("lex");
        let mut ast = Parser::new(&tokens).parse().expect("parse");
        let generated = Generator::new(&mut ast)
            .with_natives(["spawn"])
            .generate()
            .expect("generate");
        assert_eq!(
            opcodes(&generated)
                .iter()
                .filter(|&&op| op == Opcode::CallNative)
                .count(),
            2
        );
    }

    #[test]
    fn test_duplicate_constant_dict_key() {
        let err = generate("var d = {\"a\": 1, \"a\": 2};").expect_err("duplicate key");
        assert!(err.message.contains("duplicate dictionary key"));
        assert_eq!(err.column, 18);
    }

    #[test]
    fn test_assign_to_constant() {
        let err = generate("const X = 1; X = 2;").expect_err("constant");
        assert!(err.message.contains("cannot assign to constant 'X'"));
    }

    #[test]
    fn test_register_pool_exhaustion() {
        let deep = format!("var x = {}1{};", "(1 + ".repeat(30), ")".repeat(30));
        let err = generate(&deep).expect_err("exhaustion");
        assert!(err.message.contains("register pool exhausted"));

        let shallow = format!("var x = {}1{};", "(1 + ".repeat(10), ")".repeat(10));
        generate_ok(&shallow);
    }

    #[test]
    fn test_negative_literal_is_folded() {
        let generated = generate_ok("var x = -5;");
        assert_eq!(generated.instructions[0].opcode, Opcode::LoadInt);
        assert_eq!(generated.instructions[0].operand(1), Some(Operand::Int(-5)));
    }

    #[test]
    fn test_call_shapes() {
        let generated = generate_ok(
            r#"
            function add(a, b) { return a + b; }
            function out(x) = native("print");
            event onHit(d) {}
            var r = add(2, 3);
            out(r);
            onHit(1);
            typeof(r);
            "#,
        );
        let ops = opcodes(&generated);
        assert!(ops.contains(&Opcode::Invoke));
        assert!(ops.contains(&Opcode::CallEvent));
        assert_eq!(ops.iter().filter(|&&op| op == Opcode::CallNative).count(), 2);
        assert_eq!(ops.iter().filter(|&&op| op == Opcode::Push).count(), 5);
    }

    #[test]
    fn test_pointless_statement_warning() {
        let generated = generate_ok("var a; a; 1 + 2;");
        assert_eq!(generated.warnings.len(), 1);
        assert!(generated.warnings[0].message.contains("no effect"));
    }

    #[test]
    fn test_state_events_record_owner() {
        let generated = generate_ok(
            r#"
            state Idle as default { event tick() {} }
            state Busy { event tick() {} }
            "#,
        );
        let owners: Vec<Option<SymbolId>> = generated
            .symbols
            .iter()
            .filter_map(|s| s.as_function())
            .map(|f| f.state)
            .collect();
        assert_eq!(owners.len(), 2);
        assert!(owners.iter().all(Option::is_some));
        assert_ne!(owners[0], owners[1]);
    }

    #[test]
    fn test_undefined_state() {
        let err = generate("function f() { gotostate Nowhere; }").expect_err("state");
        assert!(err.message.contains("undefined state 'Nowhere'"));
    }
}
