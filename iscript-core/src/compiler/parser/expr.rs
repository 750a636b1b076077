//! Expression parsing, loosest level first:
//!
//! | level | operators                      | assoc |
//! |-------|--------------------------------|-------|
//! | 0     | `is` `as`                      | left  |
//! | 1     | `=` and compound assignment    | right |
//! | 2     | `?:`                           | right |
//! | 3     | `&&` `\|\|`                    | left  |
//! | 4     | `&` `\|` `^` `<<` `>>`         | left  |
//! | 5     | `<` `<=` `>` `>=` `==` `!=`    | left  |
//! | 6     | `+` `-`                        | left  |
//! | 7     | `*` `/` `%`                    | left  |
//! | 8     | prefix `-` `+` `!` `~` `++` `--` | right |
//! | 9     | call, index, member, postfix `++` `--`, initializer | left |
//! | 10    | primary                        |       |

use super::Parser;
use crate::compiler::ast::{BinaryOp, Literal, LogicalOp, NodeId, NodeKind, TypeName, UnaryOp};
use crate::compiler::diagnostic::CompileResult;
use crate::compiler::token::{TokenKind, TokenValue};

const LOGICAL_LEVEL: u8 = 3;
const MULTIPLICATIVE_LEVEL: u8 = 7;

enum Infix {
    Logical(LogicalOp),
    Binary(BinaryOp),
}

fn infix_operator(kind: TokenKind, level: u8) -> Option<Infix> {
    use TokenKind as T;
    let op = match (level, kind) {
        (3, T::AndAnd) => return Some(Infix::Logical(LogicalOp::And)),
        (3, T::OrOr) => return Some(Infix::Logical(LogicalOp::Or)),
        (4, T::Amp) => BinaryOp::BitAnd,
        (4, T::Pipe) => BinaryOp::BitOr,
        (4, T::Caret) => BinaryOp::BitXor,
        (4, T::Shl) => BinaryOp::Shl,
        (4, T::Shr) => BinaryOp::Shr,
        (5, T::Less) => BinaryOp::Less,
        (5, T::LessEqual) => BinaryOp::LessEqual,
        (5, T::Greater) => BinaryOp::Greater,
        (5, T::GreaterEqual) => BinaryOp::GreaterEqual,
        (5, T::EqualEqual) => BinaryOp::Equal,
        (5, T::BangEqual) => BinaryOp::NotEqual,
        (6, T::Plus) => BinaryOp::Add,
        (6, T::Minus) => BinaryOp::Sub,
        (7, T::Star) => BinaryOp::Mul,
        (7, T::Slash) => BinaryOp::Div,
        (7, T::Percent) => BinaryOp::Mod,
        _ => return None,
    };
    Some(Infix::Binary(op))
}

/// `Some(None)` is plain `=`
fn assignment_operator(kind: TokenKind) -> Option<Option<BinaryOp>> {
    use TokenKind as T;
    let op = match kind {
        T::Assign => return Some(None),
        T::PlusAssign => BinaryOp::Add,
        T::MinusAssign => BinaryOp::Sub,
        T::StarAssign => BinaryOp::Mul,
        T::SlashAssign => BinaryOp::Div,
        T::PercentAssign => BinaryOp::Mod,
        T::AmpAssign => BinaryOp::BitAnd,
        T::PipeAssign => BinaryOp::BitOr,
        T::CaretAssign => BinaryOp::BitXor,
        T::ShlAssign => BinaryOp::Shl,
        T::ShrAssign => BinaryOp::Shr,
        _ => return None,
    };
    Some(Some(op))
}

impl<'t> Parser<'t> {
    pub(super) fn parse_expression(&mut self) -> CompileResult<NodeId> {
        self.parse_type_test()
    }

    fn is_assignable(&self, node: NodeId) -> bool {
        matches!(
            self.ast.kind(node),
            NodeKind::Identifier { .. } | NodeKind::Index { .. } | NodeKind::Member { .. }
        )
    }

    // level 0
    fn parse_type_test(&mut self) -> CompileResult<NodeId> {
        let mut operand = self.parse_assignment()?;
        loop {
            let is_check = match self.current().kind {
                TokenKind::Is => true,
                TokenKind::As => false,
                _ => return Ok(operand),
            };
            let keyword = self.advance();
            let type_token = self.current().clone();
            let ty = self.parse_type_name(&keyword.text)?;
            let kind = if is_check {
                NodeKind::TypeCheck { operand, ty }
            } else {
                if !ty.is_castable() {
                    return Err(self.error_at(
                        &type_token,
                        format!("cannot cast to '{}'", ty.name()),
                    ));
                }
                NodeKind::Cast { operand, ty }
            };
            operand = self.ast.add(kind, keyword, &[operand]);
        }
    }

    fn parse_type_name(&mut self, after: &str) -> CompileResult<TypeName> {
        let token = self.current().clone();
        let ty = match token.kind {
            TokenKind::Null => Some(TypeName::Null),
            TokenKind::Function => Some(TypeName::Function),
            TokenKind::Identifier => TypeName::from_name(&token.text),
            _ => None,
        };
        match ty {
            Some(ty) => {
                self.advance();
                Ok(ty)
            }
            None => Err(self.error_at(
                &token,
                format!("expected type name after '{after}', found '{token}'"),
            )),
        }
    }

    // level 1
    fn parse_assignment(&mut self) -> CompileResult<NodeId> {
        let target = self.parse_ternary()?;
        let Some(op) = assignment_operator(self.current().kind) else {
            return Ok(target);
        };
        let token = self.advance();
        if !self.is_assignable(target) {
            return Err(self.error_at(&token, "invalid assignment target"));
        }
        let value = self.parse_expression()?;
        Ok(self
            .ast
            .add(NodeKind::Assign { op, target, value }, token, &[target, value]))
    }

    // level 2
    fn parse_ternary(&mut self) -> CompileResult<NodeId> {
        let condition = self.parse_binary(LOGICAL_LEVEL)?;
        if !self.check(TokenKind::Question) {
            return Ok(condition);
        }
        let token = self.advance();
        let then_value = self.parse_expression()?;
        self.expect(TokenKind::Colon, "in conditional expression")?;
        let else_value = self.parse_ternary()?;
        Ok(self.ast.add(
            NodeKind::Ternary {
                condition,
                then_value,
                else_value,
            },
            token,
            &[condition, then_value, else_value],
        ))
    }

    // levels 3 to 7
    fn parse_binary(&mut self, level: u8) -> CompileResult<NodeId> {
        if level > MULTIPLICATIVE_LEVEL {
            return self.parse_prefix();
        }
        let mut lhs = self.parse_binary(level + 1)?;
        while let Some(infix) = infix_operator(self.current().kind, level) {
            let token = self.advance();
            let rhs = self.parse_binary(level + 1)?;
            let kind = match infix {
                Infix::Logical(op) => NodeKind::Logical { op, lhs, rhs },
                Infix::Binary(op) => NodeKind::Binary { op, lhs, rhs },
            };
            lhs = self.ast.add(kind, token, &[lhs, rhs]);
        }
        Ok(lhs)
    }

    // level 8
    fn parse_prefix(&mut self) -> CompileResult<NodeId> {
        let op = match self.current().kind {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Tilde => UnaryOp::BitNot,
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let token = self.advance();
                let target = self.parse_prefix()?;
                if !self.is_assignable(target) {
                    return Err(self.error_at(&token, "invalid increment target"));
                }
                return Ok(self.ast.add(
                    NodeKind::IncDec {
                        increment: token.kind == TokenKind::PlusPlus,
                        prefix: true,
                        target,
                    },
                    token,
                    &[target],
                ));
            }
            _ => return self.parse_postfix(),
        };
        let token = self.advance();
        let operand = self.parse_prefix()?;
        Ok(self
            .ast
            .add(NodeKind::Unary { op, operand }, token, &[operand]))
    }

    // level 9
    fn parse_postfix(&mut self) -> CompileResult<NodeId> {
        let mut expr = self.parse_primary()?;
        loop {
            expr = match self.current().kind {
                TokenKind::LeftParen => {
                    let token = self.advance();
                    let args = self.parse_arguments(TokenKind::RightParen, "after arguments")?;
                    let children: Vec<NodeId> =
                        std::iter::once(expr).chain(args.iter().copied()).collect();
                    self.ast
                        .add(NodeKind::Call { callee: expr, args }, token, &children)
                }
                TokenKind::LeftBracket => {
                    let token = self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RightBracket, "after index")?;
                    self.ast.add(
                        NodeKind::Index {
                            target: expr,
                            index,
                        },
                        token,
                        &[expr, index],
                    )
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_identifier("after '.'")?;
                    self.ast.add(
                        NodeKind::Member {
                            target: expr,
                            name: name.text.clone(),
                        },
                        name,
                        &[expr],
                    )
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let token = self.advance();
                    if !self.is_assignable(expr) {
                        return Err(self.error_at(&token, "invalid increment target"));
                    }
                    self.ast.add(
                        NodeKind::IncDec {
                            increment: token.kind == TokenKind::PlusPlus,
                            prefix: false,
                            target: expr,
                        },
                        token,
                        &[expr],
                    )
                }
                TokenKind::LeftBrace => {
                    let token = self.advance();
                    let entries = self.parse_dict_entries()?;
                    let children = flatten_entries(expr, &entries);
                    self.ast.add(
                        NodeKind::Initializer {
                            target: expr,
                            entries,
                        },
                        token,
                        &children,
                    )
                }
                _ => return Ok(expr),
            };
        }
    }

    // level 10
    fn parse_primary(&mut self) -> CompileResult<NodeId> {
        let token = self.current().clone();
        let kind = match token.kind {
            TokenKind::Integer => NodeKind::Literal(Literal::Int(token.as_int().unwrap_or(0))),
            TokenKind::Float => match token.value {
                TokenValue::Float(v) => NodeKind::Literal(Literal::Float(v)),
                _ => NodeKind::Literal(Literal::Float(0.0)),
            },
            TokenKind::String => {
                NodeKind::Literal(Literal::Str(token.as_str().unwrap_or_default().to_string()))
            }
            TokenKind::True => NodeKind::Literal(Literal::Int(1)),
            TokenKind::False => NodeKind::Literal(Literal::Int(0)),
            TokenKind::Null => NodeKind::Literal(Literal::Null),
            TokenKind::Identifier => NodeKind::Identifier {
                name: token.text.clone(),
            },
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RightParen, "to close parenthesized expression")?;
                return Ok(inner);
            }
            TokenKind::LeftBracket => {
                self.advance();
                let elements = self.parse_arguments(TokenKind::RightBracket, "to close list")?;
                return Ok(self.ast.add(
                    NodeKind::List {
                        elements: elements.clone(),
                    },
                    token,
                    &elements,
                ));
            }
            TokenKind::LeftBrace => {
                self.advance();
                let entries = self.parse_dict_entries()?;
                let children: Vec<NodeId> = entries.iter().flat_map(|&(k, v)| [k, v]).collect();
                return Ok(self.ast.add(NodeKind::Dict { entries }, token, &children));
            }
            TokenKind::Native => {
                self.advance();
                self.expect(TokenKind::LeftParen, "after 'native'")?;
                let name = self.expect(TokenKind::String, "naming the native function")?;
                self.expect(TokenKind::RightParen, "after native name")?;
                return Ok(self.ast.add(
                    NodeKind::Intrinsic {
                        name: name.as_str().unwrap_or_default().to_string(),
                    },
                    token,
                    &[],
                ));
            }
            _ => {
                return Err(self.error_here(format!("expected expression, found '{token}'")));
            }
        };
        self.advance();
        Ok(self.ast.add(kind, token, &[]))
    }

    /// Comma-separated expressions up to `close`; the opening bracket is consumed
    fn parse_arguments(&mut self, close: TokenKind, context: &str) -> CompileResult<Vec<NodeId>> {
        let mut items = Vec::new();
        if self.match_token(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expression()?);
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(close, context)?;
        Ok(items)
    }

    /// `key: value, ...}`; the opening brace is consumed
    fn parse_dict_entries(&mut self) -> CompileResult<Vec<(NodeId, NodeId)>> {
        let mut entries = Vec::new();
        if self.match_token(TokenKind::RightBrace) {
            return Ok(entries);
        }
        loop {
            let key = self.parse_expression()?;
            self.expect(TokenKind::Colon, "after dictionary key")?;
            let value = self.parse_expression()?;
            entries.push((key, value));
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace, "to close dictionary")?;
        Ok(entries)
    }
}

fn flatten_entries(target: NodeId, entries: &[(NodeId, NodeId)]) -> Vec<NodeId> {
    std::iter::once(target)
        .chain(entries.iter().flat_map(|&(k, v)| [k, v]))
        .collect()
}
