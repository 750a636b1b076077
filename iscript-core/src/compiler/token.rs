//! Token model and the static keyword / operator tables

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    // ===== keywords =====
    Var,
    Const,
    Function,
    Generator,
    Event,
    Operator,
    Native,
    For,
    Foreach,
    In,
    While,
    Do,
    Forever,
    If,
    Else,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Return,
    Yield,
    Using,
    Class,
    Extends,
    State,
    As,
    Is,
    GotoState,
    True,
    False,
    Null,

    // ===== literals =====
    Identifier,
    Integer,
    Float,
    String,

    // ===== operators =====
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Shl,
    Shr,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    EqualEqual,
    BangEqual,
    AndAnd,
    OrOr,
    PlusPlus,
    MinusMinus,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    ShlAssign,
    ShrAssign,
    Question,
    Colon,
    Semicolon,
    Comma,
    Dot,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,

    Eof,
}

/// Keyword table, matched against the lowercased identifier text.
pub static KEYWORD_TABLE: &[(&str, TokenKind)] = &[
    ("var", TokenKind::Var),
    ("const", TokenKind::Const),
    ("function", TokenKind::Function),
    ("generator", TokenKind::Generator),
    ("event", TokenKind::Event),
    ("operator", TokenKind::Operator),
    ("native", TokenKind::Native),
    ("for", TokenKind::For),
    ("foreach", TokenKind::Foreach),
    ("in", TokenKind::In),
    ("while", TokenKind::While),
    ("do", TokenKind::Do),
    ("forever", TokenKind::Forever),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("switch", TokenKind::Switch),
    ("case", TokenKind::Case),
    ("default", TokenKind::Default),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("return", TokenKind::Return),
    ("yield", TokenKind::Yield),
    ("using", TokenKind::Using),
    ("class", TokenKind::Class),
    ("extends", TokenKind::Extends),
    ("state", TokenKind::State),
    ("as", TokenKind::As),
    ("is", TokenKind::Is),
    ("gotostate", TokenKind::GotoState),
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("null", TokenKind::Null),
];

/// Operator table grouped by length; the lexer tries longer entries first.
pub static OPERATOR_TABLE: &[(&str, TokenKind)] = &[
    ("<<=", TokenKind::ShlAssign),
    (">>=", TokenKind::ShrAssign),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("<=", TokenKind::LessEqual),
    (">=", TokenKind::GreaterEqual),
    ("==", TokenKind::EqualEqual),
    ("!=", TokenKind::BangEqual),
    ("&&", TokenKind::AndAnd),
    ("||", TokenKind::OrOr),
    ("++", TokenKind::PlusPlus),
    ("--", TokenKind::MinusMinus),
    ("+=", TokenKind::PlusAssign),
    ("-=", TokenKind::MinusAssign),
    ("*=", TokenKind::StarAssign),
    ("/=", TokenKind::SlashAssign),
    ("%=", TokenKind::PercentAssign),
    ("&=", TokenKind::AmpAssign),
    ("|=", TokenKind::PipeAssign),
    ("^=", TokenKind::CaretAssign),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("&", TokenKind::Amp),
    ("|", TokenKind::Pipe),
    ("^", TokenKind::Caret),
    ("~", TokenKind::Tilde),
    ("!", TokenKind::Bang),
    ("<", TokenKind::Less),
    (">", TokenKind::Greater),
    ("=", TokenKind::Assign),
    ("?", TokenKind::Question),
    (":", TokenKind::Colon),
    (";", TokenKind::Semicolon),
    (",", TokenKind::Comma),
    (".", TokenKind::Dot),
    ("(", TokenKind::LeftParen),
    (")", TokenKind::RightParen),
    ("{", TokenKind::LeftBrace),
    ("}", TokenKind::RightBrace),
    ("[", TokenKind::LeftBracket),
    ("]", TokenKind::RightBracket),
];

/// Case-insensitive keyword lookup
pub fn keyword(text: &str) -> Option<TokenKind> {
    KEYWORD_TABLE
        .iter()
        .find(|(word, _)| word.eq_ignore_ascii_case(text))
        .map(|(_, kind)| *kind)
}

impl TokenKind {
    pub fn is_keyword(&self) -> bool {
        KEYWORD_TABLE.iter().any(|(_, kind)| kind == self)
    }

    /// Source spelling of operators and keywords, a descriptive name otherwise
    pub fn describe(&self) -> &'static str {
        if let Some((text, _)) = KEYWORD_TABLE
            .iter()
            .chain(OPERATOR_TABLE.iter())
            .find(|(_, kind)| kind == self)
        {
            return text;
        }
        match self {
            TokenKind::Identifier => "identifier",
            TokenKind::Integer => "integer literal",
            TokenKind::Float => "float literal",
            TokenKind::String => "string literal",
            TokenKind::Eof => "end of file",
            _ => "token",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Decoded literal payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TokenValue {
    None,
    Int(i64),
    Float(f64),
    Str(String),
}

/// A lexed token; immutable once produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Exact source text
    pub text: String,
    pub value: TokenValue,
    /// 1-based line
    pub line: u32,
    /// 1-based column, counted in characters
    pub column: u32,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            value: TokenValue::None,
            line,
            column,
        }
    }

    pub fn with_value(mut self, value: TokenValue) -> Self {
        self.value = value;
        self
    }

    /// Placeholder token for synthesized nodes
    pub fn synthetic(line: u32, column: u32) -> Self {
        Self::new(TokenKind::Eof, "", line, column)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.value {
            TokenValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            TokenValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => f.write_str("end of file"),
            TokenKind::String => write!(f, "\"{}\"", self.as_str().unwrap_or(&self.text)),
            _ => f.write_str(&self.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup_ignores_case() {
        assert_eq!(keyword("GotoState"), Some(TokenKind::GotoState));
        assert_eq!(keyword("FOREACH"), Some(TokenKind::Foreach));
        assert_eq!(keyword("player"), None);
    }

    #[test]
    fn test_operator_table_is_longest_first() {
        let lengths: Vec<usize> = OPERATOR_TABLE.iter().map(|(t, _)| t.len()).collect();
        assert!(lengths.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_describe() {
        assert_eq!(TokenKind::ShlAssign.describe(), "<<=");
        assert_eq!(TokenKind::While.describe(), "while");
        assert_eq!(TokenKind::Identifier.to_string(), "identifier");
    }
}
