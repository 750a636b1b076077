use super::Parser;
use crate::compiler::ast::{BinaryOp, FunctionBody, FunctionKind, NodeId, NodeKind, Param};
use crate::compiler::diagnostic::CompileResult;
use crate::compiler::token::TokenKind;

impl<'t> Parser<'t> {
    /// Parses one statement and appends it at the current insertion point
    pub(super) fn parse_statement(&mut self) -> CompileResult<()> {
        if self.in_state && self.function.is_none() && !self.check(TokenKind::Event) {
            return Err(self.error_here(format!(
                "only events may be declared inside a state, found '{}'",
                self.current()
            )));
        }

        match self.current().kind {
            TokenKind::Semicolon => {
                self.advance();
            }
            TokenKind::LeftBrace => {
                let block = self.parse_block()?;
                self.append(block);
            }
            TokenKind::Var | TokenKind::Const => {
                for var in self.parse_var_declaration()? {
                    self.append(var);
                }
            }
            TokenKind::Function | TokenKind::Generator | TokenKind::Event | TokenKind::Operator => {
                let function = self.parse_function()?;
                self.append(function);
            }
            _ => {
                let stmt = match self.current().kind {
                    TokenKind::For => self.parse_for()?,
                    TokenKind::Foreach => self.parse_foreach()?,
                    TokenKind::While => self.parse_while()?,
                    TokenKind::Do => self.parse_do()?,
                    TokenKind::If => self.parse_if()?,
                    TokenKind::Switch => self.parse_switch()?,
                    TokenKind::Break | TokenKind::Continue => self.parse_jump()?,
                    TokenKind::Return => self.parse_return()?,
                    TokenKind::Yield => self.parse_yield()?,
                    TokenKind::Using => self.parse_using()?,
                    TokenKind::Class => self.parse_class()?,
                    TokenKind::State => self.parse_state()?,
                    TokenKind::GotoState => self.parse_gotostate()?,
                    _ => self.parse_expression_statement()?,
                };
                self.append(stmt);
            }
        }
        Ok(())
    }

    /// `{ statements }`
    pub(super) fn parse_block(&mut self) -> CompileResult<NodeId> {
        let open = self.expect(TokenKind::LeftBrace, "to open block")?;
        let block = self.reserve(open);
        self.scopes.push(block);
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.parse_statement()?;
        }
        self.scopes.pop();
        self.expect(TokenKind::RightBrace, "to close block")?;
        Ok(block)
    }

    /// Loop and branch bodies: a block, or a single statement wrapped in one
    fn parse_body(&mut self) -> CompileResult<NodeId> {
        if self.check(TokenKind::LeftBrace) {
            return self.parse_block();
        }
        let token = self.current().clone();
        let block = self.reserve(token);
        self.scopes.push(block);
        let result = self.parse_statement();
        self.scopes.pop();
        result.map(|_| block)
    }

    // ===== declarations =====

    fn parse_var_declaration(&mut self) -> CompileResult<Vec<NodeId>> {
        let keyword = self.advance();
        let constant = keyword.kind == TokenKind::Const;
        let mut vars = vec![self.parse_declarator(constant)?];
        while self.match_token(TokenKind::Comma) {
            vars.push(self.parse_declarator(constant)?);
        }
        self.expect(TokenKind::Semicolon, "after variable declaration")?;
        Ok(vars)
    }

    /// `name [= expr]`
    fn parse_declarator(&mut self, constant: bool) -> CompileResult<NodeId> {
        let name = self.expect_identifier("in variable declaration")?;
        let init = if self.match_token(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        if constant && init.is_none() {
            return Err(self.error_at(
                &name,
                format!("constant '{}' requires an initializer", name.text),
            ));
        }
        let children: Vec<NodeId> = init.into_iter().collect();
        Ok(self.ast.add(
            NodeKind::Var {
                name: name.text.clone(),
                constant,
                init,
            },
            name,
            &children,
        ))
    }

    fn parse_function(&mut self) -> CompileResult<NodeId> {
        let keyword = self.advance();
        let kind = match keyword.kind {
            TokenKind::Generator => FunctionKind::Generator,
            TokenKind::Event => FunctionKind::Event,
            TokenKind::Operator => FunctionKind::Operator,
            _ => FunctionKind::Normal,
        };

        if self.function.is_some() {
            return Err(self.error_at(&keyword, "functions cannot be nested"));
        }
        let in_state_body = self.in_state && self.scopes.len() == 2;
        if !self.at_global_scope() && !in_state_body {
            return Err(self.error_at(
                &keyword,
                format!("'{}' is only allowed at global scope", keyword.text),
            ));
        }

        let (name, name_token) = if kind == FunctionKind::Operator {
            let symbol = self.advance();
            match BinaryOp::from_symbol(&symbol.text) {
                Some(op) => (format!("operator{}", op.symbol()), symbol),
                None => {
                    return Err(self.error_at(
                        &symbol,
                        format!("'{symbol}' is not an overloadable operator"),
                    ))
                }
            }
        } else {
            let token = self.expect_identifier(&format!("after '{}'", keyword.text))?;
            (token.text.clone(), token)
        };

        let has_params = self.check(TokenKind::LeftParen);
        let params = if has_params { self.parse_params()? } else { Vec::new() };

        if self.match_token(TokenKind::Assign) {
            if self.match_token(TokenKind::Native) {
                self.expect(TokenKind::LeftParen, "after 'native'")?;
                let binding = self.expect(TokenKind::String, "naming the native function")?;
                self.expect(TokenKind::RightParen, "after native name")?;
                self.expect(TokenKind::Semicolon, "after native binding")?;
                return Ok(self.ast.add(
                    NodeKind::Function {
                        name,
                        kind,
                        params,
                        body: FunctionBody::Native(binding.as_str().unwrap_or_default().to_string()),
                    },
                    name_token,
                    &[],
                ));
            }
            if has_params || kind != FunctionKind::Normal {
                return Err(self.error_here("expected 'native' binding after '='"));
            }
            // `function alias = expr;` binds a constant
            let value = self.parse_expression()?;
            self.expect(TokenKind::Semicolon, "after function alias")?;
            return Ok(self.ast.add(
                NodeKind::Var {
                    name,
                    constant: true,
                    init: Some(value),
                },
                name_token,
                &[value],
            ));
        }

        let saved_breaks = std::mem::take(&mut self.break_targets);
        let saved_continues = std::mem::take(&mut self.continue_targets);
        self.function = Some(kind);
        let body = self.parse_block();
        self.function = None;
        self.break_targets = saved_breaks;
        self.continue_targets = saved_continues;
        let body = body?;

        Ok(self.ast.add(
            NodeKind::Function {
                name,
                kind,
                params,
                body: FunctionBody::Block(body),
            },
            name_token,
            &[body],
        ))
    }

    fn parse_params(&mut self) -> CompileResult<Vec<Param>> {
        self.expect(TokenKind::LeftParen, "before parameters")?;
        let mut params = Vec::new();
        if self.match_token(TokenKind::RightParen) {
            return Ok(params);
        }
        loop {
            let token = self.expect_identifier("in parameter list")?;
            params.push(Param {
                name: token.text.clone(),
                token,
            });
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "after parameters")?;
        Ok(params)
    }

    fn parse_using(&mut self) -> CompileResult<NodeId> {
        let keyword = self.advance();
        self.require_global(&keyword.text, &keyword)?;
        let name = self.expect_identifier("after 'using'")?;
        self.expect(TokenKind::Semicolon, "after 'using' declaration")?;
        Ok(self.ast.add(
            NodeKind::Using {
                name: name.text.clone(),
            },
            name,
            &[],
        ))
    }

    fn parse_class(&mut self) -> CompileResult<NodeId> {
        let keyword = self.advance();
        self.require_global(&keyword.text, &keyword)?;
        if self.class_declared {
            return Err(self.error_at(&keyword, "only one class declaration is allowed"));
        }
        self.class_declared = true;

        let name = self.expect_identifier("after 'class'")?;
        let base = if self.match_token(TokenKind::Extends) {
            Some(self.expect_identifier("after 'extends'")?.text)
        } else {
            None
        };
        self.expect(TokenKind::Semicolon, "after class declaration")?;
        Ok(self.ast.add(
            NodeKind::Class {
                name: name.text.clone(),
                base,
            },
            name,
            &[],
        ))
    }

    fn parse_state(&mut self) -> CompileResult<NodeId> {
        let keyword = self.advance();
        self.require_global(&keyword.text, &keyword)?;
        let name = self.expect_identifier("after 'state'")?;

        let default = if self.match_token(TokenKind::As) {
            self.expect(TokenKind::Default, "after 'as' in state declaration")?;
            if self.default_state_declared {
                return Err(self.error_at(&name, "only one state may be the default"));
            }
            self.default_state_declared = true;
            true
        } else {
            false
        };

        self.expect(TokenKind::LeftBrace, "to open state body")?;
        let state = self.reserve(name.clone());
        self.scopes.push(state);
        self.in_state = true;
        let mut result = Ok(());
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            result = self.parse_statement();
            if result.is_err() {
                break;
            }
        }
        self.in_state = false;
        self.scopes.pop();
        result?;
        self.expect(TokenKind::RightBrace, "to close state body")?;

        Ok(self.finish(
            state,
            NodeKind::State {
                name: name.text,
                default,
            },
            &[],
        ))
    }

    fn require_global(&self, what: &str, at: &crate::compiler::token::Token) -> CompileResult<()> {
        if self.at_global_scope() {
            Ok(())
        } else {
            Err(self.error_at(at, format!("'{what}' is only allowed at global scope")))
        }
    }

    // ===== loops =====

    fn parse_for(&mut self) -> CompileResult<NodeId> {
        let keyword = self.advance();
        self.expect(TokenKind::LeftParen, "after 'for'")?;
        let node = self.reserve(keyword);
        // the loop itself scopes a `var` declared in its initializer
        self.scopes.push(node);
        let result = self.parse_for_parts(node);
        self.scopes.pop();
        result
    }

    fn parse_for_parts(&mut self, node: NodeId) -> CompileResult<NodeId> {
        let init = if self.check(TokenKind::Semicolon) {
            None
        } else if self.match_token(TokenKind::Var) {
            Some(self.parse_declarator(false)?)
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon, "after loop initializer")?;

        let condition = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon, "after loop condition")?;

        let step = if self.check(TokenKind::RightParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::RightParen, "after loop clauses")?;

        let body = self.parse_loop_body(node)?;
        let children: Vec<NodeId> = [init, condition, step, Some(body)]
            .into_iter()
            .flatten()
            .collect();
        Ok(self.finish(
            node,
            NodeKind::For {
                init,
                condition,
                step,
                body,
            },
            &children,
        ))
    }

    fn parse_foreach(&mut self) -> CompileResult<NodeId> {
        self.advance();
        self.expect(TokenKind::LeftParen, "after 'foreach'")?;
        let declare = self.match_token(TokenKind::Var);
        let variable = self.expect_identifier("as loop variable")?;
        self.expect(TokenKind::In, "after loop variable")?;
        let iterable = self.parse_expression()?;
        self.expect(TokenKind::RightParen, "after iterated expression")?;

        let node = self.reserve(variable.clone());
        self.scopes.push(node);
        let body = self.parse_loop_body(node);
        self.scopes.pop();
        let body = body?;

        Ok(self.finish(
            node,
            NodeKind::Foreach {
                variable: variable.text,
                declare,
                iterable,
                body,
            },
            &[iterable, body],
        ))
    }

    fn parse_while(&mut self) -> CompileResult<NodeId> {
        let keyword = self.advance();
        self.expect(TokenKind::LeftParen, "after 'while'")?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RightParen, "after loop condition")?;

        let node = self.reserve(keyword);
        let body = self.parse_loop_body(node)?;
        Ok(self.finish(node, NodeKind::While { condition, body }, &[condition, body]))
    }

    fn parse_do(&mut self) -> CompileResult<NodeId> {
        let keyword = self.advance();
        let node = self.reserve(keyword);
        let body = self.parse_loop_body(node)?;

        let condition = if self.match_token(TokenKind::Forever) {
            None
        } else {
            self.expect(TokenKind::While, "or 'forever' after 'do' body")?;
            self.expect(TokenKind::LeftParen, "after 'while'")?;
            let condition = self.parse_expression()?;
            self.expect(TokenKind::RightParen, "after loop condition")?;
            Some(condition)
        };
        self.expect(TokenKind::Semicolon, "after 'do' loop")?;

        let children: Vec<NodeId> = std::iter::once(body).chain(condition).collect();
        Ok(self.finish(node, NodeKind::Do { body, condition }, &children))
    }

    /// Body of a loop; `break` and `continue` inside resolve to `node`
    fn parse_loop_body(&mut self, node: NodeId) -> CompileResult<NodeId> {
        self.break_targets.push(node);
        self.continue_targets.push(node);
        let body = self.parse_body();
        self.break_targets.pop();
        self.continue_targets.pop();
        body
    }

    // ===== branches =====

    fn parse_if(&mut self) -> CompileResult<NodeId> {
        let keyword = self.advance();
        self.expect(TokenKind::LeftParen, "after 'if'")?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RightParen, "after condition")?;
        let then_branch = self.parse_body()?;
        let else_branch = if self.match_token(TokenKind::Else) {
            Some(self.parse_body()?)
        } else {
            None
        };

        let children: Vec<NodeId> = [Some(condition), Some(then_branch), else_branch]
            .into_iter()
            .flatten()
            .collect();
        Ok(self.ast.add(
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            },
            keyword,
            &children,
        ))
    }

    fn parse_switch(&mut self) -> CompileResult<NodeId> {
        let keyword = self.advance();
        self.expect(TokenKind::LeftParen, "after 'switch'")?;
        let subject = self.parse_expression()?;
        self.expect(TokenKind::RightParen, "after switch subject")?;
        self.expect(TokenKind::LeftBrace, "to open switch body")?;

        let node = self.reserve(keyword);
        self.break_targets.push(node);
        let arms = self.parse_switch_arms();
        self.break_targets.pop();
        let (cases, default) = arms?;
        self.expect(TokenKind::RightBrace, "to close switch body")?;

        let children: Vec<NodeId> = std::iter::once(subject)
            .chain(cases.iter().copied())
            .chain(default)
            .collect();
        Ok(self.finish(
            node,
            NodeKind::Switch {
                subject,
                cases,
                default,
            },
            &children,
        ))
    }

    fn parse_switch_arms(&mut self) -> CompileResult<(Vec<NodeId>, Option<NodeId>)> {
        let mut cases = Vec::new();
        let mut default = None;

        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            let arm = match self.current().kind {
                TokenKind::Case => {
                    let keyword = self.advance();
                    let mut values = vec![self.parse_expression()?];
                    while self.match_token(TokenKind::Comma) {
                        values.push(self.parse_expression()?);
                    }
                    self.expect(TokenKind::Colon, "after case value")?;
                    let arm = self.reserve(keyword);
                    // values come first in the children, statements follow
                    self.finish(arm, NodeKind::Case { values: values.clone() }, &values);
                    cases.push(arm);
                    arm
                }
                TokenKind::Default => {
                    let keyword = self.advance();
                    self.expect(TokenKind::Colon, "after 'default'")?;
                    if default.is_some() {
                        return Err(self.error_at(&keyword, "multiple 'default' labels in switch"));
                    }
                    let arm = self.ast.add(NodeKind::Default, keyword, &[]);
                    default = Some(arm);
                    arm
                }
                _ => {
                    return Err(self.error_here(format!(
                        "expected 'case' or 'default' in switch, found '{}'",
                        self.current()
                    )))
                }
            };

            self.scopes.push(arm);
            while !matches!(
                self.current().kind,
                TokenKind::Case | TokenKind::Default | TokenKind::RightBrace | TokenKind::Eof
            ) {
                if let Err(err) = self.parse_statement() {
                    self.scopes.pop();
                    return Err(err);
                }
            }
            self.scopes.pop();
        }
        Ok((cases, default))
    }

    // ===== jumps =====

    /// `break [n];` and `continue [n];`
    fn parse_jump(&mut self) -> CompileResult<NodeId> {
        let keyword = self.advance();
        let is_break = keyword.kind == TokenKind::Break;

        let levels = if self.check(TokenKind::Integer) {
            let count = self.advance();
            count.as_int().unwrap_or(0)
        } else {
            1
        };
        if levels < 1 {
            return Err(self.error_at(
                &keyword,
                format!("{} level must be at least 1", keyword.text),
            ));
        }

        let targets = if is_break {
            &self.break_targets
        } else {
            &self.continue_targets
        };
        if targets.is_empty() {
            let context = if is_break { "a loop or switch" } else { "a loop" };
            return Err(self.error_at(
                &keyword,
                format!("'{}' outside of {context}", keyword.text),
            ));
        }
        let depth = targets.len();
        if levels as usize > depth {
            return Err(self.error_at(
                &keyword,
                format!(
                    "{} level {levels} exceeds nesting depth {depth}",
                    keyword.text.to_ascii_lowercase()
                ),
            ));
        }
        let target = targets[depth - levels as usize];
        self.expect(TokenKind::Semicolon, &format!("after '{}'", keyword.text))?;

        let levels = levels as u32;
        let kind = if is_break {
            NodeKind::Break { levels, target }
        } else {
            NodeKind::Continue { levels, target }
        };
        Ok(self.ast.add(kind, keyword, &[]))
    }

    fn parse_return(&mut self) -> CompileResult<NodeId> {
        let keyword = self.advance();
        if self.function.is_none() {
            return Err(self.error_at(&keyword, "'return' outside of a function"));
        }
        let value = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon, "after 'return'")?;
        let children: Vec<NodeId> = value.into_iter().collect();
        Ok(self.ast.add(NodeKind::Return { value }, keyword, &children))
    }

    fn parse_yield(&mut self) -> CompileResult<NodeId> {
        let keyword = self.advance();
        if self.function != Some(FunctionKind::Generator) {
            return Err(self.error_at(&keyword, "'yield' outside of a generator"));
        }
        let value = self.parse_expression()?;
        self.expect(TokenKind::Semicolon, "after 'yield'")?;
        Ok(self.ast.add(NodeKind::Yield { value }, keyword, &[value]))
    }

    /// `gotostate Name;` or `gotostate(Name);`
    fn parse_gotostate(&mut self) -> CompileResult<NodeId> {
        self.advance();
        let parenthesized = self.match_token(TokenKind::LeftParen);
        let name = self.expect_identifier("after 'gotostate'")?;
        if parenthesized {
            self.expect(TokenKind::RightParen, "after state name")?;
        }
        self.expect(TokenKind::Semicolon, "after 'gotostate'")?;
        Ok(self.ast.add(
            NodeKind::GotoState {
                name: name.text.clone(),
            },
            name,
            &[],
        ))
    }

    fn parse_expression_statement(&mut self) -> CompileResult<NodeId> {
        let expr = self.parse_expression()?;
        self.expect(TokenKind::Semicolon, "after expression")?;
        let token = self.ast.token(expr).clone();
        Ok(self.ast.add(NodeKind::Expression { expr }, token, &[expr]))
    }
}
