//! Lexer: source text to tokens
//!
//! Consumes the source one character at a time with single-character
//! lookahead, plus explicit multi-character lookahead for compound operators
//! and long strings. Lexing stops at the first error.

use super::diagnostic::{CompileResult, Diagnostic};
use super::token::{keyword, Token, TokenKind, TokenValue, OPERATOR_TABLE};
use iscript_log::{debug, trace, Logger};
use std::sync::Arc;

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    /// Position of the token being scanned
    start: (usize, u32, u32),
    logger: Arc<Logger>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            start: (0, 1, 1),
            logger: Logger::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Lexes the whole input. The returned sequence always ends with `Eof`.
    pub fn analyze(mut self) -> CompileResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            trace!(
                self.logger,
                "[{}:{}] {:?} '{}'",
                token.line,
                token.column,
                token.kind,
                token.text
            );
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        debug!(self.logger, "lexed {} tokens", tokens.len());
        Ok(tokens)
    }

    // ===== cursor =====

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn starts_with(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn advance_by(&mut self, count: usize) {
        for _ in 0..count {
            self.advance();
        }
    }

    fn mark_start(&mut self) {
        self.start = (self.pos, self.line, self.column);
    }

    fn lexeme(&self) -> String {
        self.chars[self.start.0..self.pos].iter().collect()
    }

    fn make(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.lexeme(), self.start.1, self.start.2)
    }

    fn error_at_start(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::fatal(message, self.start.1, self.start.2)
    }

    fn error_here(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::fatal(message, self.line, self.column)
    }

    // ===== dispatch =====

    fn next_token(&mut self) -> CompileResult<Token> {
        self.skip_whitespace_and_comments()?;
        self.mark_start();

        let Some(c) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, "", self.line, self.column));
        };

        match c {
            '"' if self.starts_with("\"\"\"") => self.scan_long_string(),
            '"' | '\'' => self.scan_string(c),
            '@' if self.peek_at(1) == Some('"') => self.scan_raw_string(),
            '0'..='9' => self.scan_number(),
            '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.scan_number(),
            c if is_identifier_start(c) => Ok(self.scan_identifier_or_keyword()),
            _ => self.scan_operator(c),
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> CompileResult<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    /// Block comments nest: `/* a /* b */ c */` is one comment.
    fn skip_block_comment(&mut self) -> CompileResult<()> {
        self.mark_start();
        self.advance_by(2);
        let mut depth = 1usize;

        while depth > 0 {
            if self.starts_with("/*") {
                self.advance_by(2);
                depth += 1;
            } else if self.starts_with("*/") {
                self.advance_by(2);
                depth -= 1;
            } else if self.advance().is_none() {
                return Err(self.error_at_start("unterminated block comment"));
            }
        }
        Ok(())
    }

    fn scan_operator(&mut self, c: char) -> CompileResult<Token> {
        // the table is ordered longest first, so the first hit is the maximal munch
        let matched = OPERATOR_TABLE
            .iter()
            .find(|(text, _)| self.starts_with(text))
            .map(|(text, kind)| (text.chars().count(), *kind));

        match matched {
            Some((length, kind)) => {
                self.advance_by(length);
                Ok(self.make(kind))
            }
            None => {
                self.advance();
                Err(self.error_at_start(format!("unexpected character '{c}'")))
            }
        }
    }

    fn scan_identifier_or_keyword(&mut self) -> Token {
        while self.peek().is_some_and(is_identifier_continue) {
            self.advance();
        }
        let text = self.lexeme();
        match keyword(&text) {
            Some(kind) => self.make(kind),
            None => self.make(TokenKind::Identifier),
        }
    }

    // ===== numbers =====

    fn scan_number(&mut self) -> CompileResult<Token> {
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            return self.scan_hex();
        }

        let mut is_float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        if matches!(self.peek(), Some('e' | 'E')) {
            let digits_at = match self.peek_at(1) {
                Some('+' | '-') => 2,
                _ => 1,
            };
            if self.peek_at(digits_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.advance_by(digits_at);
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.advance();
                return Err(self.error_at_start(format!(
                    "malformed exponent in number '{}'",
                    self.lexeme()
                )));
            }
        }

        if self.peek().is_some_and(is_identifier_start) {
            self.advance();
            return Err(self.error_at_start(format!("invalid number '{}'", self.lexeme())));
        }

        let text = self.lexeme();
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error_at_start(format!("invalid number '{text}'")))?;
            Ok(self.make(TokenKind::Float).with_value(TokenValue::Float(value)))
        } else {
            let value = text
                .parse::<u64>()
                .ok()
                .and_then(|v| match i64::try_from(v) {
                    Ok(v) => Some(v),
                    // only valid under a unary minus, which the generator checks
                    Err(_) if v == i64::MIN.unsigned_abs() => Some(i64::MIN),
                    Err(_) => None,
                })
                .ok_or_else(|| self.error_at_start(format!("integer literal '{text}' out of range")))?;
            Ok(self.make(TokenKind::Integer).with_value(TokenValue::Int(value)))
        }
    }

    fn scan_hex(&mut self) -> CompileResult<Token> {
        self.advance_by(2);
        let digits_start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            self.advance();
        }
        if self.pos == digits_start || self.peek().is_some_and(is_identifier_continue) {
            self.advance();
            return Err(self.error_at_start(format!(
                "invalid hexadecimal literal '{}'",
                self.lexeme()
            )));
        }

        let digits: String = self.chars[digits_start..self.pos].iter().collect();
        let value = u64::from_str_radix(&digits, 16)
            .ok()
            .and_then(|v| i64::try_from(v).ok())
            .ok_or_else(|| {
                self.error_at_start(format!("integer literal '{}' out of range", self.lexeme()))
            })?;
        Ok(self.make(TokenKind::Integer).with_value(TokenValue::Int(value)))
    }

    // ===== strings =====

    fn scan_string(&mut self, quote: char) -> CompileResult<Token> {
        self.advance();
        let mut value = String::new();

        loop {
            match self.peek() {
                None | Some('\n') => return Err(self.error_at_start("unterminated string")),
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    value.push(self.parse_escape()?);
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }

        Ok(self.make(TokenKind::String).with_value(TokenValue::Str(value)))
    }

    /// Parses the character after a backslash
    fn parse_escape(&mut self) -> CompileResult<char> {
        let escape_line = self.line;
        let escape_column = self.column.saturating_sub(1);
        let invalid = |what: String| Diagnostic::fatal(what, escape_line, escape_column);

        match self.advance() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('0') => Ok('\0'),
            Some('\\') => Ok('\\'),
            Some('\'') => Ok('\''),
            Some('"') => Ok('"'),
            Some('x') => {
                let mut code = 0u32;
                for _ in 0..2 {
                    let digit = self
                        .peek()
                        .and_then(|c| c.to_digit(16))
                        .ok_or_else(|| invalid("invalid \\x escape, expected two hex digits".into()))?;
                    self.advance();
                    code = code * 16 + digit;
                }
                char::from_u32(code).ok_or_else(|| invalid(format!("invalid escape \\x{code:02x}")))
            }
            Some(c) => Err(invalid(format!("invalid escape sequence '\\{c}'"))),
            None => Err(self.error_here("unterminated string")),
        }
    }

    /// `@"..."`: no escape processing, may span lines
    fn scan_raw_string(&mut self) -> CompileResult<Token> {
        self.advance_by(2);
        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error_at_start("unterminated raw string")),
                Some('"') => break,
                Some(c) => value.push(c),
            }
        }
        Ok(self.make(TokenKind::String).with_value(TokenValue::Str(value)))
    }

    /// `"""..."""`: raw, may span lines
    fn scan_long_string(&mut self) -> CompileResult<Token> {
        self.advance_by(3);
        let mut value = String::new();
        loop {
            if self.starts_with("\"\"\"") {
                self.advance_by(3);
                break;
            }
            match self.advance() {
                None => return Err(self.error_at_start("unterminated long string")),
                Some(c) => value.push(c),
            }
        }
        Ok(self.make(TokenKind::String).with_value(TokenValue::Str(value)))
    }
}

pub fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

pub fn is_identifier_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use iscript_log::{Level, LogRingBuffer};

    fn lex(source: &str) -> Vec<Token> {
        Lexer::new(source).analyze().expect("lexing should succeed")
    }

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    fn lex_err(source: &str) -> Diagnostic {
        Lexer::new(source).analyze().expect_err("lexing should fail")
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        use TokenKind::*;
        assert_eq!(
            kinds("VAR Function GotoState foo"),
            vec![Var, Function, GotoState, Identifier, Eof]
        );
    }

    #[test]
    fn test_maximal_munch() {
        use TokenKind::*;
        assert_eq!(
            kinds("a <<= b >> c <= d < e"),
            vec![
                Identifier, ShlAssign, Identifier, Shr, Identifier, LessEqual, Identifier, Less,
                Identifier, Eof
            ]
        );
        assert_eq!(kinds("i++ + ++j"), vec![Identifier, PlusPlus, Plus, PlusPlus, Identifier, Eof]);
        assert_eq!(kinds("a&&b||!c"), vec![Identifier, AndAnd, Identifier, OrOr, Bang, Identifier, Eof]);
    }

    #[test]
    fn test_numbers() {
        let tokens = lex("42 0x1F 1.5 .25 2e3 7.5e-1");
        assert_eq!(tokens[0].value, TokenValue::Int(42));
        assert_eq!(tokens[1].value, TokenValue::Int(31));
        assert_eq!(tokens[2].value, TokenValue::Float(1.5));
        assert_eq!(tokens[3].value, TokenValue::Float(0.25));
        assert_eq!(tokens[4].value, TokenValue::Float(2000.0));
        assert_eq!(tokens[5].value, TokenValue::Float(0.75));
    }

    #[test]
    fn test_minus_is_never_fused() {
        use TokenKind::*;
        assert_eq!(kinds("a -1"), vec![Identifier, Minus, Integer, Eof]);
        assert_eq!(kinds("-1"), vec![Minus, Integer, Eof]);
    }

    #[test]
    fn test_min_int_magnitude_is_kept_for_negation() {
        let tokens = Lexer::new("-9223372036854775808").analyze().unwrap();
        assert_eq!(tokens[1].value, TokenValue::Int(i64::MIN));
        assert!(lex_err("9223372036854775809").message.contains("out of range"));
    }

    #[test]
    fn test_member_access_on_integer_is_not_float() {
        use TokenKind::*;
        assert_eq!(kinds("1.x"), vec![Integer, Dot, Identifier, Eof]);
    }

    #[test]
    fn test_string_forms() {
        let tokens = lex(r#""a\tb\x41" 'it\'s' @"C:\raw\n" """multi
line""""#);
        assert_eq!(tokens[0].as_str(), Some("a\tbA"));
        assert_eq!(tokens[1].as_str(), Some("it's"));
        assert_eq!(tokens[2].as_str(), Some("C:\\raw\\n"));
        assert_eq!(tokens[3].as_str(), Some("multi\nline"));
        assert_eq!(tokens[4].kind, TokenKind::Eof);
    }

    #[test]
    fn test_nested_block_comment() {
        use TokenKind::*;
        assert_eq!(
            kinds("a /* outer /* inner */ still comment */ b // tail\nc"),
            vec![Identifier, Identifier, Identifier, Eof]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = lex("var x;\n  x = 1;");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (1, 5));
        assert_eq!((tokens[3].line, tokens[3].column), (2, 3));
        assert_eq!((tokens[5].line, tokens[5].column), (2, 7));
    }

    #[test]
    fn test_errors() {
        let unterminated = lex_err("var s = \"abc");
        assert!(unterminated.message.contains("unterminated string"));
        assert_eq!((unterminated.line, unterminated.column), (1, 9));

        assert!(lex_err("/* never closed").message.contains("unterminated block comment"));
        assert!(lex_err("\"bad \\q\"").message.contains("invalid escape"));
        assert!(lex_err("var a = 1 # 2;").message.contains("unexpected character '#'"));
        assert!(lex_err("99999999999999999999").message.contains("out of range"));
        assert!(lex_err("12abc").message.contains("invalid number"));
        assert!(lex_err("\"line\nbreak\"").message.contains("unterminated string"));
    }

    #[test]
    fn test_logs_token_count() {
        let ring = LogRingBuffer::new(64);
        let logger = Logger::new(Level::Debug).with_sink(ring.clone());
        Lexer::new("var a;").with_logger(logger).analyze().unwrap();
        assert!(ring.contains_message("lexed 4 tokens"));
    }
}
