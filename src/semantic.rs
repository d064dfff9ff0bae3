use log::debug;
use thiserror::Error;

use crate::{
    ast::{Block, Expr, ExprKind, FuncDecl, Program, Stmt, UnaryOperator},
    symbol::{FuncSig, Symbol, SymbolId, SymbolKind, SymbolTable},
    token::{Span, VarType},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemanticError {
    #[error("duplicate declaration of '{name}' at {second} (first declared at {first})")]
    DuplicateDeclaration {
        name: String,
        first: Span,
        second: Span,
    },
    #[error("undeclared identifier '{name}' at {span}")]
    UndeclaredIdentifier { name: String, span: Span },
    #[error("invalid call to '{name}' at {span}: {reason}")]
    InvalidCall {
        name: String,
        span: Span,
        reason: String,
    },
    #[error("type mismatch at {span}: {message}")]
    TypeMismatch { span: Span, message: String },
    #[error("return type mismatch in '{function}' at {span}: expected {expected}, found {found}")]
    ReturnTypeMismatch {
        function: String,
        span: Span,
        expected: VarType,
        found: VarType,
    },
    #[error("control reaches the end of non-void function '{function}' declared at {span}")]
    MissingReturn { function: String, span: Span },
}

/// Which rule a rejected program violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticErrorKind {
    DuplicateDeclaration,
    UndeclaredIdentifier,
    InvalidCall,
    TypeMismatch,
    ReturnTypeMismatch,
    MissingReturn,
}

impl SemanticError {
    pub fn kind(&self) -> SemanticErrorKind {
        match self {
            SemanticError::DuplicateDeclaration { .. } => SemanticErrorKind::DuplicateDeclaration,
            SemanticError::UndeclaredIdentifier { .. } => SemanticErrorKind::UndeclaredIdentifier,
            SemanticError::InvalidCall { .. } => SemanticErrorKind::InvalidCall,
            SemanticError::TypeMismatch { .. } => SemanticErrorKind::TypeMismatch,
            SemanticError::ReturnTypeMismatch { .. } => SemanticErrorKind::ReturnTypeMismatch,
            SemanticError::MissingReturn { .. } => SemanticErrorKind::MissingReturn,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            SemanticError::DuplicateDeclaration { second: span, .. }
            | SemanticError::UndeclaredIdentifier { span, .. }
            | SemanticError::InvalidCall { span, .. }
            | SemanticError::TypeMismatch { span, .. }
            | SemanticError::ReturnTypeMismatch { span, .. }
            | SemanticError::MissingReturn { span, .. } => *span,
        }
    }

    fn mismatch(span: Span, message: impl Into<String>) -> Self {
        SemanticError::TypeMismatch {
            span,
            message: message.into(),
        }
    }
}

/// An AST whose expressions carry types and whose names carry symbols,
/// together with the arena those symbols live in.
#[derive(Debug, Clone)]
pub struct Analyzed {
    pub program: Program,
    pub symbols: SymbolTable,
}

impl Analyzed {
    pub fn symbol_of(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id)
    }
}

/// External routines every program may call without declaring them.
const RUNTIME: &[(&str, &[VarType], bool)] = &[
    ("printf", &[VarType::Str], true),
    ("puts", &[VarType::Str], false),
    ("putchar", &[VarType::Int], false),
];

pub struct Analyzer {
    symbols: SymbolTable,
    fn_name: String,
    ret_type: VarType,
    next_slot: usize,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            symbols: SymbolTable::new(),
            fn_name: String::new(),
            ret_type: VarType::Void,
            next_slot: 0,
        }
    }

    pub fn analyze(mut self, mut program: Program) -> Result<Analyzed, SemanticError> {
        for func in program.functions.iter_mut() {
            self.collect_signature(func)?;
        }
        self.declare_runtime()?;

        for func in program.functions.iter_mut() {
            if func.body.is_some() {
                self.analyze_fn(func)?;
            }
        }

        debug!(
            "semantic analysis finished: {} functions, {} symbols",
            program.functions.len(),
            self.symbols.len()
        );
        Ok(Analyzed {
            program,
            symbols: self.symbols,
        })
    }

    fn collect_signature(&mut self, func: &mut FuncDecl) -> Result<(), SemanticError> {
        let sig = FuncSig {
            params: func.params.iter().map(|p| p.typ).collect(),
            ret_type: func.ret_type,
            variadic: false,
            defined: func.body.is_some(),
            frame_slots: 0,
        };

        if let Some(id) = self.symbols.lookup(&func.name) {
            let Some(existing) = self.symbols.get_mut(id) else {
                return Err(SemanticError::UndeclaredIdentifier {
                    name: func.name.clone(),
                    span: func.span,
                });
            };
            let first = existing.span;
            if let SymbolKind::Function(prev) = &mut existing.kind {
                if prev.same_shape(&sig) && !(prev.defined && sig.defined) {
                    prev.defined |= sig.defined;
                    func.symbol = Some(id);
                    return Ok(());
                }
            }
            return Err(SemanticError::DuplicateDeclaration {
                name: func.name.clone(),
                first,
                second: func.span,
            });
        }

        let id = self.symbols.declare(
            &func.name,
            SymbolKind::Function(sig),
            func.ret_type,
            func.span,
        )?;
        func.symbol = Some(id);
        Ok(())
    }

    fn declare_runtime(&mut self) -> Result<(), SemanticError> {
        for (name, params, variadic) in RUNTIME {
            if self.symbols.lookup(name).is_some() {
                continue;
            }
            let sig = FuncSig {
                params: params.to_vec(),
                ret_type: VarType::Int,
                variadic: *variadic,
                defined: false,
                frame_slots: 0,
            };
            self.symbols.declare(
                name,
                SymbolKind::Function(sig),
                VarType::Int,
                Span::default(),
            )?;
        }
        Ok(())
    }

    fn analyze_fn(&mut self, func: &mut FuncDecl) -> Result<(), SemanticError> {
        self.fn_name = func.name.clone();
        self.ret_type = func.ret_type;
        self.next_slot = 0;

        self.symbols.enter_scope();
        for (index, param) in func.params.iter_mut().enumerate() {
            let slot = self.alloc_slot();
            let id = self.symbols.declare(
                &param.name,
                SymbolKind::Parameter { slot, index },
                param.typ,
                param.span,
            )?;
            param.symbol = Some(id);
        }

        let Some(body) = func.body.as_mut() else {
            self.symbols.exit_scope();
            return Ok(());
        };
        for stmt in body.stmts.iter_mut() {
            self.stmt(stmt)?;
        }
        self.symbols.exit_scope();

        if func.ret_type != VarType::Void && !block_returns(body) {
            return Err(SemanticError::MissingReturn {
                function: func.name.clone(),
                span: func.span,
            });
        }

        let frame_slots = self.next_slot;
        if let Some(SymbolKind::Function(sig)) = func
            .symbol
            .and_then(|id| self.symbols.get_mut(id))
            .map(|sym| &mut sym.kind)
        {
            sig.frame_slots = frame_slots;
        }
        debug!(
            "analyzed function '{}' ({} stack slots)",
            func.name, frame_slots
        );
        Ok(())
    }

    fn alloc_slot(&mut self) -> usize {
        self.next_slot += 1;
        self.next_slot - 1
    }

    fn scoped(&mut self, stmt: &mut Stmt) -> Result<(), SemanticError> {
        self.symbols.enter_scope();
        self.stmt(stmt)?;
        self.symbols.exit_scope();
        Ok(())
    }

    fn block(&mut self, block: &mut Block) -> Result<(), SemanticError> {
        self.symbols.enter_scope();
        for stmt in block.stmts.iter_mut() {
            self.stmt(stmt)?;
        }
        self.symbols.exit_scope();
        Ok(())
    }

    fn stmt(&mut self, stmt: &mut Stmt) -> Result<(), SemanticError> {
        match stmt {
            Stmt::VarDecl(decl) => {
                if let Some(init) = decl.init.as_mut() {
                    let ty = self.value_expr(init)?;
                    if ty != decl.typ {
                        return Err(SemanticError::mismatch(
                            init.span,
                            format!(
                                "cannot initialize '{}' of type {} with a value of type {}",
                                decl.name, decl.typ, ty
                            ),
                        ));
                    }
                }
                let slot = self.alloc_slot();
                let id = self.symbols.declare(
                    &decl.name,
                    SymbolKind::Variable { slot },
                    decl.typ,
                    decl.span,
                )?;
                decl.symbol = Some(id);
            }
            Stmt::Expr(expr) => {
                self.expr(expr)?;
            }
            Stmt::Return(ret) => {
                let found = match ret.value.as_mut() {
                    Some(value) => self.expr(value)?,
                    None => VarType::Void,
                };
                if found != self.ret_type {
                    return Err(SemanticError::ReturnTypeMismatch {
                        function: self.fn_name.clone(),
                        span: ret.span,
                        expected: self.ret_type,
                        found,
                    });
                }
                if self.ret_type == VarType::Void && ret.value.is_some() {
                    return Err(SemanticError::ReturnTypeMismatch {
                        function: self.fn_name.clone(),
                        span: ret.span,
                        expected: VarType::Void,
                        found,
                    });
                }
            }
            Stmt::If(i) => {
                self.value_expr(&mut i.condition)?;
                self.scoped(&mut i.then)?;
                if let Some(else_branch) = i.else_branch.as_mut() {
                    self.scoped(else_branch)?;
                }
            }
            Stmt::While(w) => {
                self.value_expr(&mut w.condition)?;
                self.scoped(&mut w.body)?;
            }
            Stmt::Block(block) => self.block(block)?,
        }
        Ok(())
    }

    /// Like [`Analyzer::expr`] but rejects `void` results.
    fn value_expr(&mut self, expr: &mut Expr) -> Result<VarType, SemanticError> {
        let ty = self.expr(expr)?;
        if ty == VarType::Void {
            return Err(SemanticError::mismatch(
                expr.span,
                "void value used where a value is required",
            ));
        }
        Ok(ty)
    }

    fn resolve_var(&self, name: &str, span: Span) -> Result<(SymbolId, VarType), SemanticError> {
        let id = self
            .symbols
            .lookup(name)
            .ok_or_else(|| SemanticError::UndeclaredIdentifier {
                name: name.to_string(),
                span,
            })?;
        match self.symbols.get(id) {
            Some(sym) if !sym.is_function() => Ok((id, sym.typ)),
            Some(_) => Err(SemanticError::mismatch(
                span,
                format!("function '{}' used as a value", name),
            )),
            None => Err(SemanticError::UndeclaredIdentifier {
                name: name.to_string(),
                span,
            }),
        }
    }

    fn expr(&mut self, expr: &mut Expr) -> Result<VarType, SemanticError> {
        let span = expr.span;
        let ty = match &mut expr.kind {
            ExprKind::IntLiteral(_) => VarType::Int,
            ExprKind::StringLiteral(_) => VarType::Str,
            ExprKind::Identifier(var) => {
                let (id, ty) = self.resolve_var(&var.name, span)?;
                var.symbol = Some(id);
                ty
            }
            ExprKind::Call(call) => {
                let id = self.symbols.lookup(&call.name).ok_or_else(|| {
                    SemanticError::UndeclaredIdentifier {
                        name: call.name.clone(),
                        span,
                    }
                })?;
                let sig = match self.symbols.get(id).and_then(|sym| sym.signature()) {
                    Some(sig) => sig.clone(),
                    None => {
                        return Err(SemanticError::InvalidCall {
                            name: call.name.clone(),
                            span,
                            reason: format!("'{}' is not a function", call.name),
                        });
                    }
                };

                let arity_ok = if sig.variadic {
                    call.args.len() >= sig.params.len()
                } else {
                    call.args.len() == sig.params.len()
                };
                if !arity_ok {
                    return Err(SemanticError::InvalidCall {
                        name: call.name.clone(),
                        span,
                        reason: format!(
                            "expected {}{} argument(s), found {}",
                            if sig.variadic { "at least " } else { "" },
                            sig.params.len(),
                            call.args.len()
                        ),
                    });
                }

                for (i, arg) in call.args.iter_mut().enumerate() {
                    let ty = self.value_expr(arg)?;
                    if let Some(&expected) = sig.params.get(i) {
                        if ty != expected {
                            return Err(SemanticError::mismatch(
                                arg.span,
                                format!(
                                    "argument {} of '{}' expects {}, found {}",
                                    i + 1,
                                    call.name,
                                    expected,
                                    ty
                                ),
                            ));
                        }
                    }
                }
                call.symbol = Some(id);
                sig.ret_type
            }
            ExprKind::BinOp(bin) => {
                let left = self.value_expr(&mut bin.left)?;
                let right = self.value_expr(&mut bin.right)?;
                let ok = if bin.operator.is_equality() {
                    left == right
                } else {
                    left == VarType::Int && right == VarType::Int
                };
                if !ok {
                    return Err(SemanticError::mismatch(
                        span,
                        format!(
                            "operator '{}' cannot be applied to {} and {}",
                            bin.operator.symbol(),
                            left,
                            right
                        ),
                    ));
                }
                VarType::Int
            }
            ExprKind::UnaryOp(unary) => {
                let ty = self.value_expr(&mut unary.argument)?;
                if unary.operator == UnaryOperator::Neg && ty != VarType::Int {
                    return Err(SemanticError::mismatch(
                        span,
                        format!("operator '-' cannot be applied to {}", ty),
                    ));
                }
                VarType::Int
            }
            ExprKind::Assignment(assign) => {
                let (id, var_ty) = self.resolve_var(&assign.name, span)?;
                let ty = self.value_expr(&mut assign.value)?;
                if ty != var_ty {
                    return Err(SemanticError::mismatch(
                        span,
                        format!(
                            "cannot assign a value of type {} to '{}' of type {}",
                            ty, assign.name, var_ty
                        ),
                    ));
                }
                assign.symbol = Some(id);
                var_ty
            }
        };
        expr.ty = Some(ty);
        Ok(ty)
    }
}

fn always_returns(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Return(_) => true,
        Stmt::Block(block) => block_returns(block),
        Stmt::If(i) => {
            always_returns(&i.then)
                && i.else_branch
                    .as_deref()
                    .is_some_and(always_returns)
        }
        Stmt::VarDecl(_) | Stmt::Expr(_) | Stmt::While(_) => false,
    }
}

/// A statement list returns on every path when any of its statements does.
fn block_returns(block: &Block) -> bool {
    block.stmts.iter().any(always_returns)
}

pub fn analyze(program: Program) -> Result<Analyzed, SemanticError> {
    Analyzer::new().analyze(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer::tokenize, parser::parse};

    fn check(src: &str) -> Result<Analyzed, SemanticError> {
        analyze(parse(&tokenize(src).unwrap()).unwrap())
    }

    fn kind_of(src: &str) -> SemanticErrorKind {
        check(src).unwrap_err().kind()
    }

    #[test]
    fn accepts_hello_world() {
        let analyzed = check(r#"int main(void) { printf("hello, world!\n"); return 0; }"#).unwrap();
        let main = &analyzed.program.functions[0];
        let Stmt::Expr(call) = &main.body.as_ref().unwrap().stmts[0] else {
            panic!("expected call statement")
        };
        assert_eq!(call.ty, Some(VarType::Int));
        let ExprKind::Call(call) = &call.kind else {
            panic!("expected call")
        };
        let callee = analyzed.symbol_of(call.symbol.unwrap()).unwrap();
        assert_eq!(callee.name, "printf");
        assert!(callee.signature().unwrap().variadic);
    }

    #[test]
    fn duplicate_in_same_scope_names_both_positions() {
        let err = check("int main(void) {\n  int x;\n  int x;\n  return 0;\n}").unwrap_err();
        match err {
            SemanticError::DuplicateDeclaration {
                name,
                first,
                second,
            } => {
                assert_eq!(name, "x");
                assert_eq!((first.line, first.col), (2, 7));
                assert_eq!((second.line, second.col), (3, 7));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn shadowing_in_nested_block_is_allowed() {
        assert!(check("int main(void) { int x = 1; { int x = 2; } return x; }").is_ok());
    }

    #[test]
    fn parameter_and_body_share_a_scope() {
        assert_eq!(
            kind_of("int f(int a) { int a; return 0; }"),
            SemanticErrorKind::DuplicateDeclaration
        );
    }

    #[test]
    fn infinite_loop_without_return_is_missing_return() {
        assert_eq!(
            kind_of("int main(void) { while (1) { } }"),
            SemanticErrorKind::MissingReturn
        );
    }

    #[test]
    fn if_without_else_does_not_cover_all_paths() {
        assert_eq!(
            kind_of("int f(int a) { if (a) return 1; }"),
            SemanticErrorKind::MissingReturn
        );
        assert!(check("int f(int a) { if (a) return 1; else { return 2; } }").is_ok());
    }

    #[test]
    fn void_function_may_fall_off_the_end() {
        assert!(check("void f(void) { } int main(void) { f(); return 0; }").is_ok());
    }

    #[test]
    fn undeclared_function_call() {
        let err = check("int main(void) { foo(); return 0; }").unwrap_err();
        assert_eq!(
            err,
            SemanticError::UndeclaredIdentifier {
                name: "foo".to_string(),
                span: crate::token::Span::new(17, 1, 18),
            }
        );
    }

    #[test]
    fn calling_a_variable_is_invalid_call() {
        assert_eq!(
            kind_of("int main(void) { int foo = 1; foo(); return 0; }"),
            SemanticErrorKind::InvalidCall
        );
    }

    #[test]
    fn wrong_arity_is_invalid_call() {
        assert_eq!(
            kind_of("int add(int a, int b) { return a + b; } int main(void) { return add(1); }"),
            SemanticErrorKind::InvalidCall
        );
        assert_eq!(
            kind_of("int main(void) { printf(); return 0; }"),
            SemanticErrorKind::InvalidCall
        );
    }

    #[test]
    fn forward_calls_resolve() {
        assert!(check("int main(void) { return twice(2); } int twice(int n) { return n * 2; }").is_ok());
    }

    #[test]
    fn string_arithmetic_is_type_mismatch() {
        assert_eq!(
            kind_of(r#"int main(void) { return "a" + 1; }"#),
            SemanticErrorKind::TypeMismatch
        );
    }

    #[test]
    fn initializer_must_match_declared_type() {
        assert_eq!(
            kind_of(r#"int main(void) { int x = "s"; return 0; }"#),
            SemanticErrorKind::TypeMismatch
        );
        assert!(check(r#"int main(void) { char *s = "s"; puts(s); return 0; }"#).is_ok());
    }

    #[test]
    fn void_call_cannot_be_used_as_value() {
        assert_eq!(
            kind_of("void f(void) { } int main(void) { return f() + 1; }"),
            SemanticErrorKind::TypeMismatch
        );
    }

    #[test]
    fn return_type_rules() {
        assert_eq!(
            kind_of("void f(void) { return 1; }"),
            SemanticErrorKind::ReturnTypeMismatch
        );
        assert_eq!(
            kind_of("int f(void) { return; }"),
            SemanticErrorKind::ReturnTypeMismatch
        );
        assert_eq!(
            kind_of(r#"int f(void) { return "s"; }"#),
            SemanticErrorKind::ReturnTypeMismatch
        );
    }

    #[test]
    fn conflicting_redefinition_is_duplicate() {
        assert_eq!(
            kind_of("int f(void) { return 0; } int f(void) { return 1; }"),
            SemanticErrorKind::DuplicateDeclaration
        );
        assert!(check("int f(int x); int f(int x) { return x; }").is_ok());
    }

    #[test]
    fn slots_follow_parameters_then_locals() {
        let analyzed =
            check("int f(int a, int b) { int c = a; { int d = b; } return c; }").unwrap();
        let func = &analyzed.program.functions[0];
        let sig = analyzed
            .symbol_of(func.symbol.unwrap())
            .unwrap()
            .signature()
            .unwrap();
        assert_eq!(sig.frame_slots, 4);
        let slot_of = |name: &str| {
            analyzed
                .symbols
                .iter()
                .find(|(_, s)| s.name == name)
                .and_then(|(_, s)| s.slot())
        };
        assert_eq!(slot_of("a"), Some(0));
        assert_eq!(slot_of("b"), Some(1));
        assert_eq!(slot_of("c"), Some(2));
        assert_eq!(slot_of("d"), Some(3));
    }

    #[test]
    fn identifiers_are_annotated_with_symbols() {
        let analyzed = check("int f(int n) { return n; }").unwrap();
        let body = analyzed.program.functions[0].body.as_ref().unwrap();
        let Stmt::Return(ret) = &body.stmts[0] else {
            panic!("expected return")
        };
        let value = ret.value.as_ref().unwrap();
        let ExprKind::Identifier(var) = &value.kind else {
            panic!("expected identifier")
        };
        let sym = analyzed.symbol_of(var.symbol.unwrap()).unwrap();
        assert_eq!(sym.name, "n");
        assert_eq!(sym.depth, 1);
        assert_eq!(value.ty, Some(VarType::Int));
    }
}
