use std::fmt::Write;

use crate::ast::{Block, Expr, ExprKind, FuncDecl, Program, Stmt};

const INDENT: &str = "    ";

/// Renders a program as an indented tree, one node per line. Spans are left
/// out; expression types appear after `:` once analysis has filled them in.
pub fn dump_ast(program: &Program) -> String {
    let mut out = String::new();
    out.push_str("Program\n");
    for func in &program.functions {
        dump_fn(&mut out, func, 1);
    }
    out
}

fn line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str(text);
    out.push('\n');
}

fn dump_fn(out: &mut String, func: &FuncDecl, depth: usize) {
    let params = func
        .params
        .iter()
        .map(|p| format!("{}: {}", p.name, p.typ))
        .collect::<Vec<_>>()
        .join(", ");
    let kind = if func.body.is_some() {
        "FuncDecl"
    } else {
        "FuncProto"
    };
    line(
        out,
        depth,
        &format!("{} {}({}) -> {}", kind, func.name, params, func.ret_type),
    );
    if let Some(body) = &func.body {
        dump_block(out, body, depth + 1);
    }
}

fn dump_block(out: &mut String, block: &Block, depth: usize) {
    line(out, depth, "Block");
    for stmt in &block.stmts {
        dump_stmt(out, stmt, depth + 1);
    }
}

fn dump_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    match stmt {
        Stmt::VarDecl(decl) => {
            line(out, depth, &format!("VarDecl {}: {}", decl.name, decl.typ));
            if let Some(init) = &decl.init {
                dump_expr(out, init, depth + 1);
            }
        }
        Stmt::Expr(expr) => {
            line(out, depth, "ExprStmt");
            dump_expr(out, expr, depth + 1);
        }
        Stmt::Return(ret) => {
            line(out, depth, "Return");
            if let Some(value) = &ret.value {
                dump_expr(out, value, depth + 1);
            }
        }
        Stmt::If(i) => {
            line(out, depth, "If");
            dump_expr(out, &i.condition, depth + 1);
            line(out, depth + 1, "Then");
            dump_stmt(out, &i.then, depth + 2);
            if let Some(else_branch) = &i.else_branch {
                line(out, depth + 1, "Else");
                dump_stmt(out, else_branch, depth + 2);
            }
        }
        Stmt::While(w) => {
            line(out, depth, "While");
            dump_expr(out, &w.condition, depth + 1);
            dump_stmt(out, &w.body, depth + 1);
        }
        Stmt::Block(block) => dump_block(out, block, depth),
    }
}

fn dump_expr(out: &mut String, expr: &Expr, depth: usize) {
    let head = match &expr.kind {
        ExprKind::IntLiteral(n) => format!("IntLiteral {}", n),
        ExprKind::StringLiteral(s) => format!("StringLiteral {:?}", s),
        ExprKind::Identifier(var) => format!("Identifier {}", var.name),
        ExprKind::Call(call) => format!("Call {}", call.name),
        ExprKind::BinOp(bin) => format!("BinOp {}", bin.operator.symbol()),
        ExprKind::UnaryOp(unary) => format!("UnaryOp {}", unary.operator.symbol()),
        ExprKind::Assignment(assign) => format!("Assign {}", assign.name),
    };
    match expr.ty {
        Some(ty) => line(out, depth, &format!("{} : {}", head, ty)),
        None => line(out, depth, &head),
    }

    match &expr.kind {
        ExprKind::Call(call) => {
            for arg in &call.args {
                dump_expr(out, arg, depth + 1);
            }
        }
        ExprKind::BinOp(bin) => {
            dump_expr(out, &bin.left, depth + 1);
            dump_expr(out, &bin.right, depth + 1);
        }
        ExprKind::UnaryOp(unary) => dump_expr(out, &unary.argument, depth + 1),
        ExprKind::Assignment(assign) => dump_expr(out, &assign.value, depth + 1),
        ExprKind::IntLiteral(_) | ExprKind::StringLiteral(_) | ExprKind::Identifier(_) => {}
    }
}

/// Writes a program back out as source text the parser accepts.
/// Every compound expression is parenthesized.
pub struct SourceWriter {
    out: String,
    depth: usize,
}

impl SourceWriter {
    pub fn new() -> Self {
        Self {
            out: String::new(),
            depth: 0,
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
    }

    pub fn program(&mut self, program: &Program) {
        for (i, func) in program.functions.iter().enumerate() {
            if i > 0 {
                self.out.push('\n');
            }
            self.func(func);
        }
    }

    fn func(&mut self, func: &FuncDecl) {
        let params = if func.params.is_empty() {
            "void".to_string()
        } else {
            func.params
                .iter()
                .map(|p| format!("{} {}", p.typ, p.name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let _ = write!(self.out, "{} {}({})", func.ret_type, func.name, params);
        match &func.body {
            Some(body) => {
                self.out.push(' ');
                self.block(body);
                self.out.push('\n');
            }
            None => self.out.push_str(";\n"),
        }
    }

    fn block(&mut self, block: &Block) {
        self.out.push_str("{\n");
        self.depth += 1;
        for stmt in &block.stmts {
            self.indent();
            self.stmt(stmt);
            self.out.push('\n');
        }
        self.depth -= 1;
        self.indent();
        self.out.push('}');
    }

    /// Writes a statement nested under `if`/`else`/`while`.
    fn body(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(block) => {
                self.out.push(' ');
                self.block(block);
            }
            _ => {
                self.out.push('\n');
                self.depth += 1;
                self.indent();
                self.stmt(stmt);
                self.depth -= 1;
            }
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl(decl) => {
                let _ = write!(self.out, "{} {}", decl.typ, decl.name);
                if let Some(init) = &decl.init {
                    self.out.push_str(" = ");
                    self.expr(init);
                }
                self.out.push(';');
            }
            Stmt::Expr(expr) => {
                self.expr(expr);
                self.out.push(';');
            }
            Stmt::Return(ret) => match &ret.value {
                Some(value) => {
                    self.out.push_str("return ");
                    self.expr(value);
                    self.out.push(';');
                }
                None => self.out.push_str("return;"),
            },
            Stmt::If(i) => {
                self.out.push_str("if (");
                self.expr(&i.condition);
                self.out.push(')');
                self.body(&i.then);
                if let Some(else_branch) = &i.else_branch {
                    if matches!(*i.then, Stmt::Block(_)) {
                        self.out.push(' ');
                    } else {
                        self.out.push('\n');
                        self.indent();
                    }
                    self.out.push_str("else");
                    self.body(else_branch);
                }
            }
            Stmt::While(w) => {
                self.out.push_str("while (");
                self.expr(&w.condition);
                self.out.push(')');
                self.body(&w.body);
            }
            Stmt::Block(block) => self.block(block),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::IntLiteral(n) => {
                let _ = write!(self.out, "{}", n);
            }
            ExprKind::StringLiteral(s) => {
                self.out.push('"');
                for c in s.chars() {
                    match c {
                        '\n' => self.out.push_str("\\n"),
                        '\t' => self.out.push_str("\\t"),
                        '\r' => self.out.push_str("\\r"),
                        '\0' => self.out.push_str("\\0"),
                        '\\' => self.out.push_str("\\\\"),
                        '"' => self.out.push_str("\\\""),
                        c => self.out.push(c),
                    }
                }
                self.out.push('"');
            }
            ExprKind::Identifier(var) => self.out.push_str(&var.name),
            ExprKind::Call(call) => {
                self.out.push_str(&call.name);
                self.out.push('(');
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(arg);
                }
                self.out.push(')');
            }
            ExprKind::BinOp(bin) => {
                self.out.push('(');
                self.expr(&bin.left);
                let _ = write!(self.out, " {} ", bin.operator.symbol());
                self.expr(&bin.right);
                self.out.push(')');
            }
            ExprKind::UnaryOp(unary) => {
                self.out.push('(');
                self.out.push_str(unary.operator.symbol());
                self.expr(&unary.argument);
                self.out.push(')');
            }
            ExprKind::Assignment(assign) => {
                let _ = write!(self.out, "({} = ", assign.name);
                self.expr(&assign.value);
                self.out.push(')');
            }
        }
    }
}

impl Default for SourceWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn to_source(program: &Program) -> String {
    let mut writer = SourceWriter::new();
    writer.program(program);
    writer.finish()
}
