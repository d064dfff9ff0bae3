use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a token or node in the source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub offset: usize,
    pub line: usize,
    pub col: usize,
}

impl Span {
    pub fn new(offset: usize, line: usize, col: usize) -> Self {
        Self { offset, line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TokenType {
    ADD,
    SUB,
    MUL,
    DIV,
    MOD,
    EQ,
    COMPEQ,
    COMPNE,
    COMPGT,
    COMPGE,
    COMPLT,
    COMPLE,
    LOGNOT,
    LITERAL(VarType),
    LPAREN,
    RPAREN,
    LBRACE,
    RBRACE,
    COMMA,
    SEMICOLON,
    IF,
    ELSE,
    WHILE,
    RETURN,
    CHAR,
    IDENT,
    Type(VarType),
    EOF,
}

/// The coarse token categories downstream consumers dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    IntLiteral,
    StringLiteral,
    Keyword,
    Punctuation,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Literal {
    Int(i64),
    Str(String),
}

/// The closed set of value categories. `Str` covers every pointer type,
/// which in this language only ever points at character data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VarType {
    Int,
    Str,
    Void,
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarType::Int => write!(f, "int"),
            VarType::Str => write!(f, "char *"),
            VarType::Void => write!(f, "void"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub token: TokenType,
    pub value: Option<Literal>,
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        match self.token {
            TokenType::IDENT => TokenKind::Identifier,
            TokenType::LITERAL(VarType::Str) => TokenKind::StringLiteral,
            TokenType::LITERAL(_) => TokenKind::IntLiteral,
            TokenType::IF
            | TokenType::ELSE
            | TokenType::WHILE
            | TokenType::RETURN
            | TokenType::CHAR
            | TokenType::Type(_) => TokenKind::Keyword,
            TokenType::EOF => TokenKind::Eof,
            _ => TokenKind::Punctuation,
        }
    }

    pub fn ident(&self) -> Option<&str> {
        match (&self.token, &self.value) {
            (TokenType::IDENT, Some(Literal::Str(name))) => Some(name),
            _ => None,
        }
    }

    /// Human-readable rendering used in diagnostics.
    pub fn describe(&self) -> String {
        match self.token {
            TokenType::EOF => "end of input".to_string(),
            _ => format!("'{}'", self.lexeme),
        }
    }
}
