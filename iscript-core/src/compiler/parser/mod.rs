//! Parser: tokens to AST
//!
//! Statements are parsed by recursive descent, expressions by precedence
//! climbing over ten explicit levels (see `expr.rs`). The parser keeps a
//! scope stack holding the current insertion point, plus separate break and
//! continue target stacks so `break 2;` resolves to the right construct.
//! Context rules (where `return`, `yield`, functions and events may appear)
//! are enforced here; any violation is fatal.

mod expr;
mod stmt;

use super::ast::{Ast, FunctionKind, NodeId, NodeKind};
use super::diagnostic::{CompileResult, Diagnostic};
use super::token::{Token, TokenKind};
use iscript_log::{debug, Logger};
use std::sync::Arc;

pub struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    /// Returned once the cursor runs past the last token
    eof: Token,
    ast: Ast,
    /// Current insertion points; the root is always at the bottom
    scopes: Vec<NodeId>,
    /// Loops and switches, innermost last
    break_targets: Vec<NodeId>,
    /// Loops only, innermost last
    continue_targets: Vec<NodeId>,
    /// Kind of the function whose body is being parsed
    function: Option<FunctionKind>,
    /// Directly inside a `state { ... }` block
    in_state: bool,
    class_declared: bool,
    default_state_declared: bool,
    logger: Arc<Logger>,
}

impl<'t> Parser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            eof: Token::new(TokenKind::Eof, "", 1, 1),
            ast: Ast::new(),
            scopes: Vec::new(),
            break_targets: Vec::new(),
            continue_targets: Vec::new(),
            function: None,
            in_state: false,
            class_declared: false,
            default_state_declared: false,
            logger: Logger::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Parses the whole token stream into a tree rooted at an implicit
    /// `Program` node.
    pub fn parse(mut self) -> CompileResult<Ast> {
        let root_token = self.current().clone();
        let root = self.ast.add(NodeKind::Program, root_token, &[]);
        self.scopes.push(root);

        while !self.check(TokenKind::Eof) {
            self.parse_statement()?;
        }

        debug!(self.logger, "parsed {} nodes", self.ast.len());
        Ok(self.ast)
    }

    // ===== token cursor =====

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consumes `kind` or fails with "expected X <context>, found Y"
    fn expect(&mut self, kind: TokenKind, context: &str) -> CompileResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!(
                "expected '{}' {}, found '{}'",
                kind.describe(),
                context,
                self.current()
            )))
        }
    }

    fn expect_identifier(&mut self, context: &str) -> CompileResult<Token> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!(
                "expected identifier {}, found '{}'",
                context,
                self.current()
            )))
        }
    }

    fn error_here(&self, message: impl Into<String>) -> Diagnostic {
        let token = self.current();
        Diagnostic::fatal(message, token.line, token.column)
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> Diagnostic {
        Diagnostic::fatal(message, token.line, token.column)
    }

    // ===== tree building =====

    /// Reserves a node before its children exist, so nested statements can
    /// refer to it (break targets, insertion scope).
    fn reserve(&mut self, token: Token) -> NodeId {
        self.ast.add(NodeKind::Block, token, &[])
    }

    /// Fills in a reserved node and adopts its children in order
    fn finish(&mut self, id: NodeId, kind: NodeKind, children: &[NodeId]) -> NodeId {
        self.ast.node_mut(id).kind = kind;
        for &child in children {
            self.ast.adopt(id, child);
        }
        id
    }

    fn current_scope(&self) -> NodeId {
        self.scopes.last().copied().unwrap_or(NodeId(0))
    }

    /// Appends a finished statement at the current insertion point
    fn append(&mut self, node: NodeId) {
        let scope = self.current_scope();
        self.ast.adopt(scope, node);
    }

    fn at_global_scope(&self) -> bool {
        self.scopes.len() == 1 && self.function.is_none() && !self.in_state
    }
}
