use super::Generator;
use crate::compiler::ast::{Literal, NodeId, NodeKind};
use crate::compiler::diagnostic::{CompileResult, Diagnostic};
use crate::compiler::instruction::{Opcode, Operand, REG_COMPARE, REG_RETURN};
use crate::compiler::symbol::SymbolKind;

impl<'a> Generator<'a> {
    pub(super) fn emit_statement(&mut self, id: NodeId) -> CompileResult<()> {
        match self.ast.kind(id).clone() {
            NodeKind::Program | NodeKind::Block => {
                for child in self.ast.children(id).to_vec() {
                    self.emit_statement(child)?;
                }
            }
            // declarations without global-code effects
            NodeKind::Function { .. } | NodeKind::State { .. } | NodeKind::Class { .. } => {}
            NodeKind::Var { init, .. } => self.emit_var(id, init)?,
            NodeKind::Using { name } => {
                let symbol = self.declared_symbol(id)?;
                let name = self.intern(&name);
                let register = self.allocate(id)?;
                self.emit(
                    Opcode::LoadSymbol,
                    &[register.into(), Operand::Symbol(name.0)],
                    id,
                );
                self.store_variable(symbol, register, id);
                self.release(register);
            }
            NodeKind::Expression { expr } => {
                if self.warn_pointless
                    && matches!(
                        self.ast.kind(expr),
                        NodeKind::Literal(_) | NodeKind::Identifier { .. }
                    )
                {
                    let token = self.ast.token(id);
                    self.warnings.push(Diagnostic::warning(
                        "expression statement has no effect",
                        token.line,
                        token.column,
                    ));
                }
                let register = self.emit_expression(expr)?;
                self.release(register);
            }
            NodeKind::For {
                init,
                condition,
                step,
                body,
            } => self.emit_for(id, init, condition, step, body)?,
            NodeKind::Foreach {
                variable,
                declare,
                iterable,
                body,
            } => self.emit_foreach(id, &variable, declare, iterable, body)?,
            NodeKind::While { condition, body } => {
                let break_label = self.required_label(self.labels(id).break_label, id)?;
                let continue_label = self.required_label(self.labels(id).continue_label, id)?;
                self.bind(continue_label);
                let test = self.emit_expression(condition)?;
                self.jump(Opcode::JumpIfZero, Some(test), break_label, id);
                self.release(test);
                self.emit_statement(body)?;
                self.jump(Opcode::Jump, None, continue_label, id);
                self.bind(break_label);
            }
            NodeKind::Do { body, condition } => {
                let break_label = self.required_label(self.labels(id).break_label, id)?;
                let continue_label = self.required_label(self.labels(id).continue_label, id)?;
                let top = self.extra_label(id, 0)?;
                self.bind(top);
                self.emit_statement(body)?;
                self.bind(continue_label);
                match condition {
                    Some(condition) => {
                        let test = self.emit_expression(condition)?;
                        self.jump(Opcode::JumpIfNotZero, Some(test), top, id);
                        self.release(test);
                    }
                    None => self.jump(Opcode::Jump, None, top, id),
                }
                self.bind(break_label);
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let else_label = self.extra_label(id, 0)?;
                let end_label = self.extra_label(id, 1)?;
                let test = self.emit_expression(condition)?;
                self.jump(Opcode::JumpIfZero, Some(test), else_label, id);
                self.release(test);
                self.emit_statement(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.jump(Opcode::Jump, None, end_label, id);
                    self.bind(else_label);
                    self.emit_statement(else_branch)?;
                } else {
                    self.bind(else_label);
                }
                self.bind(end_label);
            }
            NodeKind::Switch {
                subject,
                cases,
                default,
            } => self.emit_switch(id, subject, &cases, default)?,
            NodeKind::Case { values } => {
                for stmt in self.ast.children(id)[values.len()..].to_vec() {
                    self.emit_statement(stmt)?;
                }
            }
            NodeKind::Default => {
                for stmt in self.ast.children(id).to_vec() {
                    self.emit_statement(stmt)?;
                }
            }
            NodeKind::Break { target, .. } => {
                let label = self.required_label(self.labels(target).break_label, target)?;
                self.jump(Opcode::Jump, None, label, id);
            }
            NodeKind::Continue { target, .. } => {
                let label = self.required_label(self.labels(target).continue_label, target)?;
                self.jump(Opcode::Jump, None, label, id);
            }
            NodeKind::Return { value } => {
                match value {
                    Some(value) => {
                        let result = self.emit_expression(value)?;
                        self.emit(
                            Opcode::Move,
                            &[Operand::Register(REG_RETURN), result.into()],
                            id,
                        );
                        self.release(result);
                    }
                    None => {
                        self.emit(Opcode::LoadNull, &[Operand::Register(REG_RETURN)], id);
                    }
                }
                self.emit(Opcode::Return, &[], id);
            }
            NodeKind::Yield { value } => {
                let register = self.emit_expression(value)?;
                self.emit(Opcode::Yield, &[register.into()], id);
                self.release(register);
            }
            NodeKind::GotoState { name } => {
                let state = self
                    .find_state(&name)
                    .ok_or_else(|| self.error_at(id, format!("undefined state '{name}'")))?;
                self.emit(Opcode::SetState, &[Operand::Symbol(state.0)], id);
            }
            other => {
                return Err(self.error_at(
                    id,
                    format!("internal error: {} is not a statement", other.name()),
                ))
            }
        }
        Ok(())
    }

    /// `var x = init;` stores the initializer, `var x;` resets the slot to null
    fn emit_var(&mut self, id: NodeId, init: Option<NodeId>) -> CompileResult<()> {
        let symbol = self.declared_symbol(id)?;
        let register = match init {
            Some(init) => self.emit_expression(init)?,
            None => {
                let register = self.allocate(id)?;
                self.emit(Opcode::LoadNull, &[register.into()], id);
                register
            }
        };
        self.store_variable(symbol, register, id);
        self.release(register);
        Ok(())
    }

    fn emit_for(
        &mut self,
        id: NodeId,
        init: Option<NodeId>,
        condition: Option<NodeId>,
        step: Option<NodeId>,
        body: NodeId,
    ) -> CompileResult<()> {
        let break_label = self.required_label(self.labels(id).break_label, id)?;
        let continue_label = self.required_label(self.labels(id).continue_label, id)?;
        let top = self.extra_label(id, 0)?;

        if let Some(init) = init {
            if matches!(self.ast.kind(init), NodeKind::Var { .. }) {
                self.emit_statement(init)?;
            } else {
                let register = self.emit_expression(init)?;
                self.release(register);
            }
        }

        self.bind(top);
        if let Some(condition) = condition {
            let test = self.emit_expression(condition)?;
            self.jump(Opcode::JumpIfZero, Some(test), break_label, id);
            self.release(test);
        }
        self.emit_statement(body)?;
        self.bind(continue_label);
        if let Some(step) = step {
            let register = self.emit_expression(step)?;
            self.release(register);
        }
        self.jump(Opcode::Jump, None, top, id);
        self.bind(break_label);
        Ok(())
    }

    fn emit_foreach(
        &mut self,
        id: NodeId,
        variable: &str,
        declare: bool,
        iterable: NodeId,
        body: NodeId,
    ) -> CompileResult<()> {
        let break_label = self.required_label(self.labels(id).break_label, id)?;
        let continue_label = self.required_label(self.labels(id).continue_label, id)?;
        let target = if declare {
            self.declared_symbol(id)?
        } else {
            let symbol = self
                .lookup(id, variable)
                .ok_or_else(|| self.error_at(id, format!("undefined identifier '{variable}'")))?;
            self.check_assignable(symbol, id)?;
            symbol
        };

        let source = self.emit_expression(iterable)?;
        let iterator = self.allocate(id)?;
        self.emit(Opcode::Iter, &[iterator.into(), source.into()], id);
        self.release(source);

        self.bind(continue_label);
        let value = self.allocate(id)?;
        self.emit(Opcode::IterNext, &[value.into(), iterator.into()], id);
        self.emit(
            Opcode::IterDone,
            &[Operand::Register(REG_COMPARE), iterator.into()],
            id,
        );
        self.emit(
            Opcode::JumpIfNotZero,
            &[
                Operand::Register(REG_COMPARE),
                Operand::JumpTarget(break_label.0),
            ],
            id,
        );
        self.store_variable(target, value, id);
        self.release(value);

        self.emit_statement(body)?;
        self.jump(Opcode::Jump, None, continue_label, id);
        self.bind(break_label);
        self.release(iterator);
        Ok(())
    }

    /// Compares the subject against every case value in order, then jumps to
    /// `default` or out. Case bodies end with a jump to `break`, so control
    /// never falls into the next arm.
    fn emit_switch(
        &mut self,
        id: NodeId,
        subject: NodeId,
        cases: &[NodeId],
        default: Option<NodeId>,
    ) -> CompileResult<()> {
        let break_label = self.required_label(self.labels(id).break_label, id)?;

        let value = self.emit_expression(subject)?;
        for &case in cases {
            let body = self.extra_label(case, 0)?;
            let NodeKind::Case { values } = self.ast.kind(case).clone() else {
                continue;
            };
            for candidate in values {
                let register = self.emit_expression(candidate)?;
                self.emit(
                    Opcode::Equal,
                    &[
                        Operand::Register(REG_COMPARE),
                        value.into(),
                        register.into(),
                    ],
                    candidate,
                );
                self.release(register);
                self.emit(
                    Opcode::JumpIfNotZero,
                    &[Operand::Register(REG_COMPARE), Operand::JumpTarget(body.0)],
                    candidate,
                );
            }
        }
        self.release(value);
        let fallback = match default {
            Some(default) => self.extra_label(default, 0)?,
            None => break_label,
        };
        self.jump(Opcode::Jump, None, fallback, id);

        for &case in cases {
            let body = self.extra_label(case, 0)?;
            self.bind(body);
            self.emit_statement(case)?;
            self.jump(Opcode::Jump, None, break_label, case);
        }
        if let Some(default) = default {
            let body = self.extra_label(default, 0)?;
            self.bind(body);
            self.emit_statement(default)?;
        }
        self.bind(break_label);
        Ok(())
    }

    pub(super) fn declared_symbol(
        &self,
        id: NodeId,
    ) -> CompileResult<crate::compiler::symbol::SymbolId> {
        self.declared.get(&id).copied().ok_or_else(|| {
            self.error_at(
                id,
                format!("internal error: {} declared no symbol", self.ast.kind(id).name()),
            )
        })
    }

    /// Variables only, and never constants
    pub(super) fn check_assignable(
        &self,
        symbol: crate::compiler::symbol::SymbolId,
        at: NodeId,
    ) -> CompileResult<()> {
        let sym = self.symbol(symbol);
        match sym.kind {
            SymbolKind::Variable { constant: false, .. } => Ok(()),
            SymbolKind::Variable { constant: true, .. } => Err(self.error_at(
                at,
                format!("cannot assign to constant '{}'", sym.name),
            )),
            _ => Err(self.error_at(at, format!("cannot assign to '{}'", sym.name))),
        }
    }

    /// Constant keys of a dict literal, used to reject duplicates at compile time
    pub(super) fn constant_key(&self, id: NodeId) -> Option<String> {
        match self.ast.kind(id) {
            NodeKind::Literal(Literal::Int(v)) => Some(format!("i{v}")),
            NodeKind::Literal(Literal::Str(s)) => Some(format!("s{s}")),
            _ => None,
        }
    }
}
