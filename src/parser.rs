use log::debug;
use thiserror::Error;

use crate::{
    ast::{
        Assign, BinOp, BinaryOperator, Block, Expr, ExprKind, FuncCall, FuncDecl, If, Param,
        Program, Return, Stmt, UnaryOp, UnaryOperator, Var, VarDecl, While,
    },
    token::{Literal, Span, Token, TokenType, VarType},
};

const ASSIGN_PREC: u8 = 1;

/// Deepest statement or expression nesting accepted. Later stages walk the
/// tree recursively, so nothing deeper may leave the parser.
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected {} at {}, expected {expected}", .found.describe(), .found.span)]
pub struct ParseError {
    pub found: Token,
    pub expected: String,
}

impl ParseError {
    fn new(found: &Token, expected: impl Into<String>) -> Self {
        Self {
            found: found.clone(),
            expected: expected.into(),
        }
    }

    pub fn span(&self) -> Span {
        self.found.span
    }
}

fn binary_op(token: &TokenType) -> Option<(u8, BinaryOperator)> {
    let entry = match token {
        TokenType::COMPEQ => (2, BinaryOperator::Eq),
        TokenType::COMPNE => (2, BinaryOperator::Ne),
        TokenType::COMPLT => (3, BinaryOperator::Lt),
        TokenType::COMPLE => (3, BinaryOperator::Le),
        TokenType::COMPGT => (3, BinaryOperator::Gt),
        TokenType::COMPGE => (3, BinaryOperator::Ge),
        TokenType::ADD => (4, BinaryOperator::Add),
        TokenType::SUB => (4, BinaryOperator::Sub),
        TokenType::MUL => (5, BinaryOperator::Mul),
        TokenType::DIV => (5, BinaryOperator::Div),
        TokenType::MOD => (5, BinaryOperator::Mod),
        _ => return None,
    };
    Some(entry)
}

#[derive(Debug)]
pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    pub fn parse(&mut self) -> Result<Program, ParseError> {
        match self.tokens.last() {
            Some(last) if last.token == TokenType::EOF => {}
            Some(last) => return Err(ParseError::new(last, "an end-of-input token")),
            None => {
                let eof = Token {
                    token: TokenType::EOF,
                    value: None,
                    lexeme: String::new(),
                    span: Span::new(0, 1, 1),
                };
                return Err(ParseError::new(&eof, "an end-of-input token"));
            }
        }

        let mut functions = Vec::new();
        while self.curr_tok().token != TokenType::EOF {
            functions.push(self.func_decl()?);
        }
        debug!("parsed {} function declarations", functions.len());
        Ok(Program { functions })
    }

    fn curr_tok(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_tok(&self) -> &Token {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.curr_tok().clone();
        if tok.token != TokenType::EOF {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, token: &TokenType) -> bool {
        self.curr_tok().token == *token
    }

    fn expect(&mut self, token: TokenType, expected: &str) -> Result<Token, ParseError> {
        if self.check(&token) {
            Ok(self.advance())
        } else {
            Err(ParseError::new(self.curr_tok(), expected))
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::new(
                self.curr_tok(),
                format!("nesting depth below {}", MAX_DEPTH),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        self.enter()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn get_ident(&mut self) -> Result<(String, Span), ParseError> {
        let tok = self.curr_tok();
        match tok.ident() {
            Some(name) => {
                let result = (name.to_string(), tok.span);
                self.advance();
                Ok(result)
            }
            None => Err(ParseError::new(tok, "an identifier")),
        }
    }

    fn is_type_start(&self) -> bool {
        matches!(self.curr_tok().token, TokenType::Type(_) | TokenType::CHAR)
    }

    fn var_type(&mut self) -> Result<VarType, ParseError> {
        let base = match self.curr_tok().token {
            TokenType::Type(typ) => typ,
            TokenType::CHAR => VarType::Int,
            _ => return Err(ParseError::new(self.curr_tok(), "a type")),
        };
        self.advance();
        let mut typ = base;
        while self.check(&TokenType::MUL) {
            self.advance();
            typ = VarType::Str;
        }
        Ok(typ)
    }

    fn func_decl(&mut self) -> Result<FuncDecl, ParseError> {
        let span = self.curr_tok().span;
        let ret_type = self.var_type()?;
        let (name, _) = self.get_ident()?;
        self.expect(TokenType::LPAREN, "'('")?;
        let params = self.params()?;
        self.expect(TokenType::RPAREN, "')'")?;

        let body = if self.check(&TokenType::SEMICOLON) {
            self.advance();
            None
        } else if self.check(&TokenType::LBRACE) {
            Some(self.block()?)
        } else {
            return Err(ParseError::new(self.curr_tok(), "'{' or ';'"));
        };

        Ok(FuncDecl {
            name,
            params,
            ret_type,
            body,
            span,
            symbol: None,
        })
    }

    fn params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        if self.check(&TokenType::RPAREN) {
            return Ok(params);
        }
        if self.check(&TokenType::Type(VarType::Void)) && self.peek_tok().token == TokenType::RPAREN
        {
            self.advance();
            return Ok(params);
        }

        loop {
            let type_tok = self.curr_tok().clone();
            let typ = self.var_type()?;
            if typ == VarType::Void {
                return Err(ParseError::new(&type_tok, "a parameter type other than 'void'"));
            }
            let (name, span) = self.get_ident()?;
            params.push(Param {
                name,
                typ,
                span,
                symbol: None,
            });
            if !self.check(&TokenType::COMMA) {
                break;
            }
            self.advance();
        }
        Ok(params)
    }

    fn block(&mut self) -> Result<Block, ParseError> {
        let open = self.expect(TokenType::LBRACE, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(&TokenType::RBRACE) {
            if self.check(&TokenType::EOF) {
                return Err(ParseError::new(self.curr_tok(), "'}'"));
            }
            stmts.push(self.stmt()?);
        }
        self.advance();
        Ok(Block {
            stmts,
            span: open.span,
        })
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        self.nested(Self::stmt_kind)
    }

    fn stmt_kind(&mut self) -> Result<Stmt, ParseError> {
        if self.is_type_start() {
            return self.var_decl();
        }
        let span = self.curr_tok().span;
        match self.curr_tok().token {
            TokenType::LBRACE => Ok(Stmt::Block(self.block()?)),
            TokenType::RETURN => {
                self.advance();
                let value = if self.check(&TokenType::SEMICOLON) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(TokenType::SEMICOLON, "';'")?;
                Ok(Stmt::Return(Return { value, span }))
            }
            TokenType::IF => {
                self.advance();
                self.expect(TokenType::LPAREN, "'('")?;
                let condition = self.expr()?;
                self.expect(TokenType::RPAREN, "')'")?;
                let then = Box::new(self.stmt()?);
                let else_branch = if self.check(&TokenType::ELSE) {
                    self.advance();
                    Some(Box::new(self.stmt()?))
                } else {
                    None
                };
                Ok(Stmt::If(If {
                    condition,
                    then,
                    else_branch,
                    span,
                }))
            }
            TokenType::WHILE => {
                self.advance();
                self.expect(TokenType::LPAREN, "'('")?;
                let condition = self.expr()?;
                self.expect(TokenType::RPAREN, "')'")?;
                let body = Box::new(self.stmt()?);
                Ok(Stmt::While(While {
                    condition,
                    body,
                    span,
                }))
            }
            _ => {
                let expr = self.expr()?;
                self.expect(TokenType::SEMICOLON, "';'")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn var_decl(&mut self) -> Result<Stmt, ParseError> {
        let type_tok = self.curr_tok().clone();
        let typ = self.var_type()?;
        if typ == VarType::Void {
            return Err(ParseError::new(&type_tok, "a variable type other than 'void'"));
        }
        let (name, span) = self.get_ident()?;
        let init = if self.check(&TokenType::EQ) {
            self.advance();
            Some(self.expr()?)
        } else {
            None
        };
        self.expect(TokenType::SEMICOLON, "';'")?;
        Ok(Stmt::VarDecl(VarDecl {
            name,
            typ,
            init,
            span,
            symbol: None,
        }))
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.expr_prec(ASSIGN_PREC)
    }

    /// Precedence climbing. Everything is left-associative except `=`.
    fn expr_prec(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        self.enter()?;
        let base = self.depth;
        let left = self.climb(min_prec);
        self.depth = base - 1;
        left
    }

    /// Every operator folded into `left` adds one level of depth, released
    /// when `expr_prec` returns.
    fn climb(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        loop {
            let tok = self.curr_tok().clone();
            if tok.token == TokenType::EQ {
                if min_prec > ASSIGN_PREC {
                    break;
                }
                self.enter()?;
                self.advance();
                let value = self.expr_prec(ASSIGN_PREC)?;
                let name = match left.kind {
                    ExprKind::Identifier(var) => var.name,
                    _ => {
                        return Err(ParseError::new(
                            &tok,
                            "an identifier on the left-hand side of '='",
                        ));
                    }
                };
                left = Expr::new(
                    ExprKind::Assignment(Assign {
                        name,
                        value: Box::new(value),
                        symbol: None,
                    }),
                    tok.span,
                );
                continue;
            }

            let Some((prec, operator)) = binary_op(&tok.token) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.enter()?;
            self.advance();
            let right = self.expr_prec(prec + 1)?;
            left = Expr::new(
                ExprKind::BinOp(BinOp {
                    left: Box::new(left),
                    right: Box::new(right),
                    operator,
                }),
                tok.span,
            );
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let operator = match self.curr_tok().token {
            TokenType::SUB => UnaryOperator::Neg,
            TokenType::LOGNOT => UnaryOperator::Not,
            _ => return self.factor(),
        };
        let tok = self.advance();
        let argument = self.nested(Self::unary)?;
        Ok(Expr::new(
            ExprKind::UnaryOp(UnaryOp {
                argument: Box::new(argument),
                operator,
            }),
            tok.span,
        ))
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let tok = self.curr_tok().clone();
        match (&tok.token, &tok.value) {
            (TokenType::LITERAL(_), Some(Literal::Int(n))) => {
                self.advance();
                Ok(Expr::new(ExprKind::IntLiteral(*n), tok.span))
            }
            (TokenType::LITERAL(_), Some(Literal::Str(s))) => {
                self.advance();
                Ok(Expr::new(ExprKind::StringLiteral(s.clone()), tok.span))
            }
            (TokenType::IDENT, _) => {
                let (name, span) = self.get_ident()?;
                if !self.check(&TokenType::LPAREN) {
                    return Ok(Expr::new(
                        ExprKind::Identifier(Var { name, symbol: None }),
                        span,
                    ));
                }
                self.advance();
                let args = self.args()?;
                self.expect(TokenType::RPAREN, "')'")?;
                Ok(Expr::new(
                    ExprKind::Call(FuncCall {
                        name,
                        args,
                        symbol: None,
                    }),
                    span,
                ))
            }
            (TokenType::LPAREN, _) => {
                self.advance();
                let expr = self.expr()?;
                self.expect(TokenType::RPAREN, "')'")?;
                Ok(expr)
            }
            _ => Err(ParseError::new(&tok, "an expression")),
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.check(&TokenType::RPAREN) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if !self.check(&TokenType::COMMA) {
                break;
            }
            self.advance();
        }
        Ok(args)
    }
}

/// Parses a complete token sequence. The first error aborts parsing.
pub fn parse(tokens: &[Token]) -> Result<Program, ParseError> {
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_src(src: &str) -> Result<Program, ParseError> {
        parse(&tokenize(src).unwrap())
    }

    fn body(program: &Program) -> &[Stmt] {
        &program.functions[0].body.as_ref().unwrap().stmts
    }

    fn return_expr(src: &str) -> Expr {
        let program = parse_src(src).unwrap();
        match &body(&program)[0] {
            Stmt::Return(Return { value: Some(e), .. }) => e.clone(),
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn parses_minimal_main() {
        let program = parse_src("int main(void) { return 0; }").unwrap();
        assert_eq!(program.functions.len(), 1);
        let main = &program.functions[0];
        assert_eq!(main.name, "main");
        assert!(main.params.is_empty());
        assert_eq!(main.ret_type, VarType::Int);
        assert_eq!(body(&program).len(), 1);
    }

    #[test]
    fn parses_typed_parameters_and_prototypes() {
        let program = parse_src("int puts(char *s); int add(int a, int b) { return a + b; }").unwrap();
        assert!(program.functions[0].body.is_none());
        assert_eq!(program.functions[0].params[0].typ, VarType::Str);
        let add = &program.functions[1];
        assert_eq!(
            add.params.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let e = return_expr("int f(void) { return 1 + 2 * 3; }");
        let ExprKind::BinOp(add) = e.kind else {
            panic!("expected binop")
        };
        assert_eq!(add.operator, BinaryOperator::Add);
        assert!(matches!(
            add.right.kind,
            ExprKind::BinOp(BinOp {
                operator: BinaryOperator::Mul,
                ..
            })
        ));
    }

    #[test]
    fn subtraction_is_left_associative() {
        let e = return_expr("int f(void) { return 8 - 4 - 2; }");
        let ExprKind::BinOp(outer) = e.kind else {
            panic!("expected binop")
        };
        assert!(matches!(outer.right.kind, ExprKind::IntLiteral(2)));
        assert!(matches!(outer.left.kind, ExprKind::BinOp(_)));
    }

    #[test]
    fn assignment_is_right_associative() {
        let e = return_expr("int f(int a, int b) { return a = b = 3; }");
        let ExprKind::Assignment(outer) = e.kind else {
            panic!("expected assignment")
        };
        assert_eq!(outer.name, "a");
        let ExprKind::Assignment(inner) = outer.value.kind else {
            panic!("expected nested assignment")
        };
        assert_eq!(inner.name, "b");
    }

    #[test]
    fn relational_binds_tighter_than_equality() {
        let e = return_expr("int f(int a) { return a < 1 == 0; }");
        let ExprKind::BinOp(eq) = e.kind else {
            panic!("expected binop")
        };
        assert_eq!(eq.operator, BinaryOperator::Eq);
    }

    #[test]
    fn parses_control_flow() {
        let program = parse_src(
            "int f(int n) { while (n > 0) { n = n - 1; } if (n) return 1; else return 2; }",
        )
        .unwrap();
        let stmts = body(&program);
        assert!(matches!(stmts[0], Stmt::While(_)));
        let Stmt::If(i) = &stmts[1] else {
            panic!("expected if")
        };
        assert!(i.else_branch.is_some());
    }

    #[test]
    fn call_arguments_are_comma_separated() {
        let e = return_expr(r#"int f(void) { return printf("%d %d", 1, 2 + 3); }"#);
        let ExprKind::Call(call) = e.kind else {
            panic!("expected call")
        };
        assert_eq!(call.name, "printf");
        assert_eq!(call.args.len(), 3);
    }

    #[test]
    fn missing_semicolon_names_expectation() {
        let err = parse_src("int main(void) { return 0 }").unwrap_err();
        assert_eq!(err.expected, "';'");
        assert_eq!(err.found.token, TokenType::RBRACE);
    }

    #[test]
    fn assignment_to_non_identifier_fails() {
        let err = parse_src("int main(void) { 1 = 2; }").unwrap_err();
        assert_eq!(err.found.token, TokenType::EQ);
    }

    #[test]
    fn unclosed_block_fails_at_eof() {
        let err = parse_src("int main(void) { return 0;").unwrap_err();
        assert_eq!(err.found.token, TokenType::EOF);
        assert_eq!(err.expected, "'}'");
    }

    #[test]
    fn void_variable_is_rejected() {
        let err = parse_src("int main(void) { void x; }").unwrap_err();
        assert_eq!(err.found.token, TokenType::Type(VarType::Void));
    }

    #[test]
    fn empty_token_sequence_is_rejected() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn deep_parentheses_fail_instead_of_overflowing() {
        let src = format!(
            "int main(void) {{ return {}1{}; }}",
            "(".repeat(400),
            ")".repeat(400)
        );
        let err = parse_src(&src).unwrap_err();
        assert_eq!(err.found.token, TokenType::LPAREN);
        assert_eq!(err.expected, format!("nesting depth below {}", MAX_DEPTH));

        let shallow = format!(
            "int main(void) {{ return {}1{}; }}",
            "(".repeat(40),
            ")".repeat(40)
        );
        assert!(parse_src(&shallow).is_ok());
    }

    #[test]
    fn deep_statements_and_unary_chains_are_bounded() {
        let blocks = format!(
            "int main(void) {{ {} {} return 0; }}",
            "{".repeat(300),
            "}".repeat(300)
        );
        assert!(parse_src(&blocks).is_err());

        let ifs = format!("void f(int a) {{ {} a = 1; }}", "if (a) ".repeat(300));
        assert!(parse_src(&ifs).is_err());

        let negations = format!("int f(void) {{ return {}1; }}", "-".repeat(300));
        assert!(parse_src(&negations).is_err());
    }

    #[test]
    fn long_operator_chains_are_bounded() {
        let long = format!("int f(void) {{ return {}1; }}", "1 + ".repeat(300));
        let err = parse_src(&long).unwrap_err();
        assert_eq!(err.found.token, TokenType::ADD);

        let short = format!("int f(void) {{ return {}1; }}", "1 + ".repeat(60));
        assert!(parse_src(&short).is_ok());
    }
}
