use crate::{
    symbol::SymbolId,
    token::{Span, VarType},
};

#[derive(Debug, Clone)]
pub struct Program {
    pub functions: Vec<FuncDecl>,
}

#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret_type: VarType,
    /// `None` for a prototype (`int f(int x);`).
    pub body: Option<Block>,
    pub span: Span,
    pub symbol: Option<SymbolId>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub typ: VarType,
    pub span: Span,
    pub symbol: Option<SymbolId>,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    VarDecl(VarDecl),
    Expr(Expr),
    Return(Return),
    If(If),
    While(While),
    Block(Block),
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub typ: VarType,
    pub init: Option<Expr>,
    pub span: Span,
    pub symbol: Option<SymbolId>,
}

#[derive(Debug, Clone)]
pub struct Return {
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct If {
    pub condition: Expr,
    pub then: Box<Stmt>,
    pub else_branch: Option<Box<Stmt>>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct While {
    pub condition: Expr,
    pub body: Box<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Filled in by semantic analysis.
    pub ty: Option<VarType>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLiteral(i64),
    StringLiteral(String),
    Identifier(Var),
    Call(FuncCall),
    BinOp(BinOp),
    UnaryOp(UnaryOp),
    Assignment(Assign),
}

#[derive(Debug, Clone)]
pub struct Var {
    pub name: String,
    pub symbol: Option<SymbolId>,
}

#[derive(Debug, Clone)]
pub struct FuncCall {
    pub name: String,
    pub args: Vec<Expr>,
    pub symbol: Option<SymbolId>,
}

#[derive(Debug, Clone)]
pub struct BinOp {
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub operator: BinaryOperator,
}

#[derive(Debug, Clone)]
pub struct UnaryOp {
    pub argument: Box<Expr>,
    pub operator: UnaryOperator,
}

#[derive(Debug, Clone)]
pub struct Assign {
    pub name: String,
    pub value: Box<Expr>,
    pub symbol: Option<SymbolId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, BinaryOperator::Eq | BinaryOperator::Ne)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Neg,
    Not,
}

impl UnaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOperator::Neg => "-",
            UnaryOperator::Not => "!",
        }
    }
}
