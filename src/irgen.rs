use std::{
    collections::{BTreeMap, HashMap},
    mem::take,
};

use log::debug;
use thiserror::Error;

use crate::{
    ast::{BinaryOperator, Expr, ExprKind, FuncDecl, Stmt, UnaryOperator},
    ir::{IRConst, IRFunction, IRProgram, Instruction, Label, Local, Op, Operand, Temp},
    semantic::Analyzed,
    symbol::{FuncSig, SymbolId, SymbolTable},
    token::VarType,
};

/// Lowering failures. These only occur when the analyzer let through a
/// tree it should have annotated, so they indicate a compiler defect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IRGenError {
    #[error("internal error: '{name}' reached IR generation without a resolved symbol")]
    UnresolvedSymbol { name: String },
    #[error("internal error: symbol '{name}' has no stack slot")]
    MissingSlot { name: String },
    #[error("internal error: '{name}' is not a function")]
    NotAFunction { name: String },
    #[error("internal error: expression of type void used as a value in '{function}'")]
    VoidValue { function: String },
}

struct Context {
    pub function: String,
    pub instructions: Vec<Instruction>,
    pub tmp_cnt: usize,
    pub label_cnt: usize,
}

impl Context {
    pub fn new(function: &str) -> Self {
        Self {
            function: function.to_string(),
            instructions: Vec::new(),
            tmp_cnt: 0,
            label_cnt: 0,
        }
    }

    pub fn new_tmp(&mut self) -> Temp {
        self.tmp_cnt += 1;
        Temp(self.tmp_cnt - 1)
    }

    pub fn new_label(&mut self, hint: &str) -> Label {
        self.label_cnt += 1;
        Label {
            id: self.label_cnt - 1,
            hint: hint.to_string(),
        }
    }

    pub fn emit(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }
}

pub struct IRGen<'a> {
    symbols: &'a SymbolTable,
    functions: Vec<IRFunction>,
    entries: BTreeMap<String, usize>,
    strings: Vec<String>,
    string_pool: HashMap<String, usize>,
    externs: Vec<String>,
}

impl<'a> IRGen<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Self {
            symbols,
            functions: Vec::new(),
            entries: BTreeMap::new(),
            strings: Vec::new(),
            string_pool: HashMap::new(),
            externs: Vec::new(),
        }
    }

    pub fn compile(&mut self, analyzed: &Analyzed) -> Result<IRProgram, IRGenError> {
        for func in &analyzed.program.functions {
            if func.body.is_some() {
                self.compile_fn(func)?;
            }
        }

        let program = IRProgram {
            functions: take(&mut self.functions),
            entries: take(&mut self.entries),
            strings: take(&mut self.strings),
            externs: take(&mut self.externs),
        };
        debug!(
            "generated IR for {} functions ({} instructions, {} strings)",
            program.functions.len(),
            program
                .functions
                .iter()
                .map(|f| f.instructions.len())
                .sum::<usize>(),
            program.strings.len()
        );
        Ok(program)
    }

    fn intern(&mut self, s: &str) -> usize {
        if let Some(&index) = self.string_pool.get(s) {
            return index;
        }
        let index = self.strings.len();
        self.strings.push(s.to_string());
        self.string_pool.insert(s.to_string(), index);
        index
    }

    fn signature(&self, symbol: Option<SymbolId>, name: &str) -> Result<FuncSig, IRGenError> {
        let id = symbol.ok_or_else(|| IRGenError::UnresolvedSymbol {
            name: name.to_string(),
        })?;
        self.symbols
            .get(id)
            .and_then(|sym| sym.signature())
            .cloned()
            .ok_or_else(|| IRGenError::NotAFunction {
                name: name.to_string(),
            })
    }

    fn local(&self, symbol: Option<SymbolId>, name: &str) -> Result<Local, IRGenError> {
        let sym = symbol
            .and_then(|id| self.symbols.get(id))
            .ok_or_else(|| IRGenError::UnresolvedSymbol {
                name: name.to_string(),
            })?;
        let slot = sym.slot().ok_or_else(|| IRGenError::MissingSlot {
            name: name.to_string(),
        })?;
        Ok(Local {
            slot,
            name: name.to_string(),
        })
    }

    fn compile_fn(&mut self, decl: &FuncDecl) -> Result<(), IRGenError> {
        let sig = self.signature(decl.symbol, &decl.name)?;
        let params = decl
            .params
            .iter()
            .map(|p| self.local(p.symbol, &p.name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut ctx = Context::new(&decl.name);
        if let Some(body) = &decl.body {
            for stmt in &body.stmts {
                self.stmt(stmt, &mut ctx)?;
            }
        }

        let returns_value = sig.ret_type != VarType::Void;
        if !matches!(ctx.instructions.last(), Some(Instruction::Return(_))) {
            let value = returns_value.then_some(Operand::Const(IRConst::Int(0)));
            ctx.emit(Instruction::Return(value));
        }

        debug!(
            "lowered '{}': {} instructions, {} temporaries",
            decl.name,
            ctx.instructions.len(),
            ctx.tmp_cnt
        );
        self.entries
            .insert(decl.name.clone(), self.functions.len());
        self.functions.push(IRFunction {
            name: decl.name.clone(),
            params,
            frame_slots: sig.frame_slots,
            temp_count: ctx.tmp_cnt,
            instructions: ctx.instructions,
            returns_value,
        });
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt, ctx: &mut Context) -> Result<(), IRGenError> {
        match stmt {
            Stmt::VarDecl(decl) => {
                if let Some(init) = &decl.init {
                    let src = self.expr(init, ctx)?;
                    let var = self.local(decl.symbol, &decl.name)?;
                    ctx.emit(Instruction::StoreVar { var, src });
                }
            }
            Stmt::Expr(expr) => {
                self.lower(expr, ctx)?;
            }
            Stmt::Return(ret) => {
                let value = match &ret.value {
                    Some(value) => Some(self.expr(value, ctx)?),
                    None => None,
                };
                ctx.emit(Instruction::Return(value));
            }
            Stmt::If(i) => {
                let cond = self.expr(&i.condition, ctx)?;
                match &i.else_branch {
                    Some(else_branch) => {
                        let label_else = ctx.new_label("else");
                        let label_end = ctx.new_label("endif");
                        ctx.emit(Instruction::JumpIfFalse {
                            cond,
                            target: label_else.clone(),
                        });
                        self.stmt(&i.then, ctx)?;
                        ctx.emit(Instruction::Jump(label_end.clone()));
                        ctx.emit(Instruction::Label(label_else));
                        self.stmt(else_branch, ctx)?;
                        ctx.emit(Instruction::Label(label_end));
                    }
                    None => {
                        let label_end = ctx.new_label("endif");
                        ctx.emit(Instruction::JumpIfFalse {
                            cond,
                            target: label_end.clone(),
                        });
                        self.stmt(&i.then, ctx)?;
                        ctx.emit(Instruction::Label(label_end));
                    }
                }
            }
            Stmt::While(w) => {
                let label_start = ctx.new_label("while");
                let label_end = ctx.new_label("while_end");
                ctx.emit(Instruction::Label(label_start.clone()));
                let cond = self.expr(&w.condition, ctx)?;
                ctx.emit(Instruction::JumpIfFalse {
                    cond,
                    target: label_end.clone(),
                });
                self.stmt(&w.body, ctx)?;
                ctx.emit(Instruction::Jump(label_start));
                ctx.emit(Instruction::Label(label_end));
            }
            Stmt::Block(block) => {
                for stmt in &block.stmts {
                    self.stmt(stmt, ctx)?;
                }
            }
        }
        Ok(())
    }

    /// Lowers an expression whose value is required.
    fn expr(&mut self, expr: &Expr, ctx: &mut Context) -> Result<Operand, IRGenError> {
        self.lower(expr, ctx)?.ok_or_else(|| IRGenError::VoidValue {
            function: ctx.function.clone(),
        })
    }

    /// Forces an operand into a temporary, loading constants with LOAD_CONST.
    fn materialize(&mut self, operand: Operand, ctx: &mut Context) -> Temp {
        match operand {
            Operand::Temp(t) => t,
            Operand::Const(value) => {
                let dst = ctx.new_tmp();
                ctx.emit(Instruction::LoadConst { dst, value });
                dst
            }
        }
    }

    fn temp(&mut self, expr: &Expr, ctx: &mut Context) -> Result<Temp, IRGenError> {
        let operand = self.expr(expr, ctx)?;
        Ok(self.materialize(operand, ctx))
    }

    fn lower(&mut self, expr: &Expr, ctx: &mut Context) -> Result<Option<Operand>, IRGenError> {
        match &expr.kind {
            ExprKind::IntLiteral(n) => Ok(Some(Operand::Const(IRConst::Int(*n)))),
            ExprKind::StringLiteral(s) => {
                let idx = self.intern(s);
                Ok(Some(Operand::Const(IRConst::Str(idx))))
            }
            ExprKind::Identifier(var) => {
                let local = self.local(var.symbol, &var.name)?;
                let dst = ctx.new_tmp();
                ctx.emit(Instruction::LoadVar { dst, var: local });
                Ok(Some(Operand::Temp(dst)))
            }
            ExprKind::Call(call) => {
                let sig = self.signature(call.symbol, &call.name)?;
                let mut args = Vec::with_capacity(call.args.len());
                for arg in &call.args {
                    args.push(self.temp(arg, ctx)?);
                }
                if !sig.defined && !self.externs.contains(&call.name) {
                    self.externs.push(call.name.clone());
                }
                let dst = (sig.ret_type != VarType::Void).then(|| ctx.new_tmp());
                ctx.emit(Instruction::Call {
                    dst,
                    callee: call.name.clone(),
                    args,
                });
                Ok(dst.map(Operand::Temp))
            }
            ExprKind::BinOp(bin) => {
                let lhs = self.temp(&bin.left, ctx)?;
                let rhs = self.temp(&bin.right, ctx)?;
                let dst = ctx.new_tmp();
                let op = match bin.operator {
                    BinaryOperator::Add => Op::Add,
                    BinaryOperator::Sub => Op::Sub,
                    BinaryOperator::Mul => Op::Mul,
                    BinaryOperator::Div => Op::Div,
                    BinaryOperator::Mod => Op::Mod,
                    BinaryOperator::Eq => Op::Eq,
                    BinaryOperator::Ne => Op::Ne,
                    BinaryOperator::Lt => Op::Lt,
                    BinaryOperator::Le => Op::Le,
                    BinaryOperator::Gt => Op::Gt,
                    BinaryOperator::Ge => Op::Ge,
                };
                ctx.emit(Instruction::BinOp { dst, op, lhs, rhs });
                Ok(Some(Operand::Temp(dst)))
            }
            ExprKind::UnaryOp(unary) => {
                let argument = self.temp(&unary.argument, ctx)?;
                let zero = self.materialize(Operand::Const(IRConst::Int(0)), ctx);
                let dst = ctx.new_tmp();
                let inst = match unary.operator {
                    UnaryOperator::Neg => Instruction::BinOp {
                        dst,
                        op: Op::Sub,
                        lhs: zero,
                        rhs: argument,
                    },
                    UnaryOperator::Not => Instruction::BinOp {
                        dst,
                        op: Op::Eq,
                        lhs: argument,
                        rhs: zero,
                    },
                };
                ctx.emit(inst);
                Ok(Some(Operand::Temp(dst)))
            }
            ExprKind::Assignment(assign) => {
                let src = self.expr(&assign.value, ctx)?;
                let var = self.local(assign.symbol, &assign.name)?;
                ctx.emit(Instruction::StoreVar { var, src });
                Ok(Some(src))
            }
        }
    }
}

pub fn generate_ir(analyzed: &Analyzed) -> Result<IRProgram, IRGenError> {
    IRGen::new(&analyzed.symbols).compile(analyzed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::Opcode, lexer::tokenize, parser::parse, semantic::analyze};

    fn lower(src: &str) -> IRProgram {
        let analyzed = analyze(parse(&tokenize(src).unwrap()).unwrap()).unwrap();
        generate_ir(&analyzed).unwrap()
    }

    fn opcodes(func: &IRFunction) -> Vec<Opcode> {
        func.instructions.iter().map(|i| i.opcode()).collect()
    }

    #[test]
    fn return_zero_is_a_single_instruction() {
        let ir = lower("int main(void) { return 0; }");
        let main = ir.function("main").unwrap();
        assert_eq!(
            main.instructions,
            vec![Instruction::Return(Some(Operand::Const(IRConst::Int(0))))]
        );
        assert_eq!(main.temp_count, 0);
    }

    #[test]
    fn printf_call_takes_the_string_literal() {
        let ir = lower(r#"int main(void) { printf("hi"); return 0; }"#);
        let main = ir.function("main").unwrap();
        assert_eq!(
            opcodes(main),
            vec![Opcode::LoadConst, Opcode::Call, Opcode::Return]
        );
        assert_eq!(
            main.instructions[0],
            Instruction::LoadConst {
                dst: Temp(0),
                value: IRConst::Str(0)
            }
        );
        assert_eq!(ir.strings, vec!["hi".to_string()]);
        assert_eq!(ir.externs, vec!["printf".to_string()]);
    }

    #[test]
    fn while_lowering_shape() {
        let ir = lower("int f(int n) { while (n) { n = n - 1; } return n; }");
        let f = ir.function("f").unwrap();
        assert_eq!(
            opcodes(f),
            vec![
                Opcode::Label,
                Opcode::LoadVar,
                Opcode::JumpIfFalse,
                Opcode::LoadVar,
                Opcode::LoadConst,
                Opcode::BinOp,
                Opcode::StoreVar,
                Opcode::Jump,
                Opcode::Label,
                Opcode::LoadVar,
                Opcode::Return,
            ]
        );
        assert_eq!(f.instructions[7].jump_target(), Some(&Label { id: 0, hint: "while".to_string() }));
    }

    #[test]
    fn if_else_lowering_shape() {
        let ir = lower("int f(int a) { if (a < 2) return 1; else return 2; }");
        let f = ir.function("f").unwrap();
        assert_eq!(
            opcodes(f),
            vec![
                Opcode::LoadVar,
                Opcode::LoadConst,
                Opcode::BinOp,
                Opcode::JumpIfFalse,
                Opcode::Return,
                Opcode::Jump,
                Opcode::Label,
                Opcode::Return,
                Opcode::Label,
                Opcode::Return,
            ]
        );
    }

    #[test]
    fn if_without_else_jumps_to_end() {
        let ir = lower("void f(int a) { if (a) putchar(65); }");
        let f = ir.function("f").unwrap();
        let Instruction::JumpIfFalse { target, .. } = &f.instructions[1] else {
            panic!("expected conditional jump")
        };
        assert_eq!(target.hint, "endif");
        assert_eq!(f.instructions.last(), Some(&Instruction::Return(None)));
        assert!(!f.returns_value);
    }

    #[test]
    fn void_calls_have_no_destination() {
        let ir = lower("void g(void) { } int main(void) { g(); return 0; }");
        let main = ir.function("main").unwrap();
        assert_eq!(
            main.instructions[0],
            Instruction::Call {
                dst: None,
                callee: "g".to_string(),
                args: vec![]
            }
        );
        assert!(ir.externs.is_empty());
    }

    #[test]
    fn declaration_without_initializer_emits_nothing() {
        let ir = lower("int main(void) { int x; x = 3; return x; }");
        let main = ir.function("main").unwrap();
        assert_eq!(
            opcodes(main),
            vec![Opcode::StoreVar, Opcode::LoadVar, Opcode::Return]
        );
        assert_eq!(main.frame_slots, 1);
    }

    #[test]
    fn negation_subtracts_from_zero() {
        let ir = lower("int f(int a) { return -a; }");
        let f = ir.function("f").unwrap();
        assert_eq!(
            f.instructions[2],
            Instruction::BinOp {
                dst: Temp(2),
                op: Op::Sub,
                lhs: Temp(1),
                rhs: Temp(0)
            }
        );
    }

    #[test]
    fn identical_strings_are_interned_once() {
        let ir = lower(r#"int main(void) { puts("x"); puts("x"); puts("y"); return 0; }"#);
        assert_eq!(ir.strings, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn labels_are_unique_within_a_function() {
        let ir = lower(
            "int f(int a) { while (a) { if (a == 3) a = 1; a = a - 1; } while (a) a = 0; return a; }",
        );
        let f = ir.function("f").unwrap();
        let labels: Vec<&Label> = f
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Label(l) => Some(l),
                _ => None,
            })
            .collect();
        let mut ids: Vec<usize> = labels.iter().map(|l| l.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), labels.len());
        for inst in &f.instructions {
            if let Some(target) = inst.jump_target() {
                assert_eq!(labels.iter().filter(|l| **l == target).count(), 1, "{}", target);
            }
        }
    }

    #[test]
    fn entry_table_indexes_functions() {
        let ir = lower("int b(void) { return 1; } int a(void) { return b(); }");
        assert_eq!(ir.entries.get("b"), Some(&0));
        assert_eq!(ir.entries.get("a"), Some(&1));
        assert_eq!(ir.function("a").unwrap().name, "a");
    }
}
