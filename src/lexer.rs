use std::{iter::Peekable, str::CharIndices};

use log::{debug, trace};
use thiserror::Error;

use crate::token::{Literal, Span, Token, TokenType, VarType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unexpected character '{found}' at {span}")]
    UnexpectedChar { found: char, span: Span },
    #[error("unterminated string literal starting at {span}")]
    UnterminatedString { span: Span },
    #[error("unterminated block comment starting at {span}")]
    UnterminatedComment { span: Span },
    #[error("unknown escape sequence '\\{found}' at {span}")]
    InvalidEscape { found: char, span: Span },
    #[error("integer literal out of range at {span}")]
    InvalidNumber { span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedChar { span, .. }
            | LexError::UnterminatedString { span }
            | LexError::UnterminatedComment { span }
            | LexError::InvalidEscape { span, .. }
            | LexError::InvalidNumber { span } => *span,
        }
    }

    pub fn offset(&self) -> usize {
        self.span().offset
    }

    /// The character that could not begin or continue a token, if there is one.
    pub fn found(&self) -> Option<char> {
        match self {
            LexError::UnexpectedChar { found, .. } | LexError::InvalidEscape { found, .. } => {
                Some(*found)
            }
            LexError::UnterminatedString { .. } => Some('"'),
            LexError::UnterminatedComment { .. } => Some('/'),
            LexError::InvalidNumber { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
    tok: Token,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            chars: src.char_indices().peekable(),
            tok: Token {
                token: TokenType::EOF,
                value: None,
                lexeme: String::new(),
                span: Span::new(0, 1, 1),
            },
            line: 1,
            col: 1,
        }
    }

    fn current(&mut self) -> char {
        self.chars.peek().map(|&(_, c)| c).unwrap_or('\0')
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map(|&(i, _)| i).unwrap_or(self.src.len())
    }

    fn here(&mut self) -> Span {
        Span::new(self.offset(), self.line, self.col)
    }

    fn rest(&mut self) -> &'a str {
        let offset = self.offset();
        let src = self.src;
        &src[offset..]
    }

    fn is_eof(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn bump(&mut self) {
        if let Some((_, c)) = self.chars.next() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn skip_spaces(&mut self) -> Result<(), LexError> {
        loop {
            if self.current().is_ascii_whitespace() && !self.is_eof() {
                self.bump();
            } else if self.rest().starts_with("//") {
                while !self.is_eof() && self.current() != '\n' {
                    self.bump();
                }
            } else if self.rest().starts_with("/*") {
                let start = self.here();
                self.bump();
                self.bump();
                loop {
                    if self.is_eof() {
                        return Err(LexError::UnterminatedComment { span: start });
                    }
                    if self.rest().starts_with("*/") {
                        self.bump();
                        self.bump();
                        break;
                    }
                    self.bump();
                }
            } else {
                return Ok(());
            }
        }
    }

    fn parse_number(&mut self, start: Span) -> Result<i64, LexError> {
        let mut value: i64 = 0;
        while self.current().is_ascii_digit() {
            let digit = i64::from(self.current() as u8 - b'0');
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit))
                .ok_or(LexError::InvalidNumber { span: start })?;
            self.bump();
        }
        Ok(value)
    }

    fn parse_ident(&mut self) -> String {
        let mut ident = String::new();
        while self.current().is_ascii_alphanumeric() || self.current() == '_' {
            ident.push(self.current());
            self.bump();
        }
        ident
    }

    fn parse_string(&mut self, start: Span) -> Result<String, LexError> {
        self.bump();
        let mut s = String::new();
        loop {
            if self.is_eof() {
                return Err(LexError::UnterminatedString { span: start });
            }
            match self.current() {
                '"' => {
                    self.bump();
                    return Ok(s);
                }
                '\n' => return Err(LexError::UnterminatedString { span: start }),
                '\\' => {
                    let escape = self.here();
                    self.bump();
                    if self.is_eof() {
                        return Err(LexError::UnterminatedString { span: start });
                    }
                    let c = match self.current() {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        '\\' => '\\',
                        '"' => '"',
                        '\'' => '\'',
                        other => {
                            return Err(LexError::InvalidEscape {
                                found: other,
                                span: escape,
                            });
                        }
                    };
                    s.push(c);
                    self.bump();
                }
                c => {
                    s.push(c);
                    self.bump();
                }
            }
        }
    }

    fn finish(&mut self, token: TokenType, value: Option<Literal>, start: Span) {
        let end = self.offset();
        self.tok = Token {
            token,
            value,
            lexeme: self.src[start.offset..end].to_string(),
            span: start,
        };
    }

    /// Consumes one character and emits `single`, or two characters and
    /// emits `double` when the second one is `second`.
    fn one_or_two(&mut self, second: char, double: TokenType, single: TokenType, start: Span) {
        self.bump();
        if self.current() == second && !self.is_eof() {
            self.bump();
            self.finish(double, None, start);
        } else {
            self.finish(single, None, start);
        }
    }

    pub fn next_token(&mut self) -> Result<(), LexError> {
        self.skip_spaces()?;
        let start = self.here();

        if self.is_eof() {
            self.finish(TokenType::EOF, None, start);
            return Ok(());
        }

        let c = self.current();
        if c.is_ascii_digit() {
            let n = self.parse_number(start)?;
            self.finish(
                TokenType::LITERAL(VarType::Int),
                Some(Literal::Int(n)),
                start,
            );
            return Ok(());
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let ident = self.parse_ident();
            let (token, value) = match ident.as_str() {
                "int" => (TokenType::Type(VarType::Int), None),
                "void" => (TokenType::Type(VarType::Void), None),
                "char" => (TokenType::CHAR, None),
                "if" => (TokenType::IF, None),
                "else" => (TokenType::ELSE, None),
                "while" => (TokenType::WHILE, None),
                "return" => (TokenType::RETURN, None),
                _ => (TokenType::IDENT, Some(Literal::Str(ident))),
            };
            self.finish(token, value, start);
            return Ok(());
        }

        if c == '"' {
            let s = self.parse_string(start)?;
            self.finish(
                TokenType::LITERAL(VarType::Str),
                Some(Literal::Str(s)),
                start,
            );
            return Ok(());
        }

        match c {
            '=' => self.one_or_two('=', TokenType::COMPEQ, TokenType::EQ, start),
            '!' => self.one_or_two('=', TokenType::COMPNE, TokenType::LOGNOT, start),
            '<' => self.one_or_two('=', TokenType::COMPLE, TokenType::COMPLT, start),
            '>' => self.one_or_two('=', TokenType::COMPGE, TokenType::COMPGT, start),
            _ => {
                let token = match c {
                    '+' => TokenType::ADD,
                    '-' => TokenType::SUB,
                    '*' => TokenType::MUL,
                    '/' => TokenType::DIV,
                    '%' => TokenType::MOD,
                    '(' => TokenType::LPAREN,
                    ')' => TokenType::RPAREN,
                    '{' => TokenType::LBRACE,
                    '}' => TokenType::RBRACE,
                    ',' => TokenType::COMMA,
                    ';' => TokenType::SEMICOLON,
                    found => {
                        return Err(LexError::UnexpectedChar { found, span: start });
                    }
                };
                self.bump();
                self.finish(token, None, start);
            }
        }
        Ok(())
    }

    pub fn curr_tok(&self) -> Token {
        self.tok.clone()
    }
}

/// Scans the whole buffer. The returned sequence always ends with an EOF token.
pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    loop {
        lexer.next_token()?;
        let tok = lexer.curr_tok();
        trace!("token {:?} at {}", tok.token, tok.span);
        let done = tok.token == TokenType::EOF;
        tokens.push(tok);
        if done {
            break;
        }
    }
    debug!("lexed {} tokens", tokens.len());
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenKind;

    fn types(src: &str) -> Vec<TokenType> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn scans_function_header() {
        assert_eq!(
            types("int main(void) {"),
            vec![
                TokenType::Type(VarType::Int),
                TokenType::IDENT,
                TokenType::LPAREN,
                TokenType::Type(VarType::Void),
                TokenType::RPAREN,
                TokenType::LBRACE,
                TokenType::EOF,
            ]
        );
    }

    #[test]
    fn maximal_munch_on_comparisons() {
        assert_eq!(
            types("a<=b==c!=d>=e<f>g=h!i"),
            vec![
                TokenType::IDENT,
                TokenType::COMPLE,
                TokenType::IDENT,
                TokenType::COMPEQ,
                TokenType::IDENT,
                TokenType::COMPNE,
                TokenType::IDENT,
                TokenType::COMPGE,
                TokenType::IDENT,
                TokenType::COMPLT,
                TokenType::IDENT,
                TokenType::COMPGT,
                TokenType::IDENT,
                TokenType::EQ,
                TokenType::IDENT,
                TokenType::LOGNOT,
                TokenType::IDENT,
                TokenType::EOF,
            ]
        );
    }

    #[test]
    fn string_escapes_are_decoded() {
        let tokens = tokenize(r#""a\n\"b\\""#).unwrap();
        assert_eq!(tokens[0].value, Some(Literal::Str("a\n\"b\\".to_string())));
        assert_eq!(tokens[0].kind(), TokenKind::StringLiteral);
        assert_eq!(tokens[0].lexeme, r#""a\n\"b\\""#);
    }

    #[test]
    fn comments_are_skipped() {
        let src = "// line\nint /* block\n spanning */ x";
        assert_eq!(
            types(src),
            vec![
                TokenType::Type(VarType::Int),
                TokenType::IDENT,
                TokenType::EOF
            ]
        );
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let tokens = tokenize("int\n  x;").unwrap();
        assert_eq!(tokens[1].span, Span::new(6, 2, 3));
        assert_eq!(tokens[2].span, Span::new(7, 2, 4));
    }

    #[test]
    fn empty_input_yields_eof() {
        let tokens = tokenize("   ").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind(), TokenKind::Eof);
    }

    #[test]
    fn unterminated_string_reports_opening_quote() {
        let err = tokenize("int x = \"abc").unwrap_err();
        assert_eq!(err, LexError::UnterminatedString { span: Span::new(8, 1, 9) });
        assert_eq!(err.found(), Some('"'));
    }

    #[test]
    fn unterminated_comment_reports_comment_start() {
        let err = tokenize("int /* never closed").unwrap_err();
        assert_eq!(err.offset(), 4);
        assert!(matches!(err, LexError::UnterminatedComment { .. }));
    }

    #[test]
    fn illegal_symbol_is_rejected() {
        let err = tokenize("int x = 1 @ 2;").unwrap_err();
        assert_eq!(
            err,
            LexError::UnexpectedChar {
                found: '@',
                span: Span::new(10, 1, 11)
            }
        );
    }

    #[test]
    fn bad_escape_is_rejected() {
        let err = tokenize(r#""\q""#).unwrap_err();
        assert!(matches!(err, LexError::InvalidEscape { found: 'q', .. }));
    }

    #[test]
    fn oversized_integer_is_rejected() {
        let err = tokenize("99999999999999999999").unwrap_err();
        assert!(matches!(err, LexError::InvalidNumber { .. }));
    }

    #[test]
    fn keywords_are_classified() {
        let tokens = tokenize("while whilex char return").unwrap();
        assert_eq!(tokens[0].kind(), TokenKind::Keyword);
        assert_eq!(tokens[1].ident(), Some("whilex"));
        assert_eq!(tokens[2].token, TokenType::CHAR);
        assert_eq!(tokens[3].token, TokenType::RETURN);
    }
}
