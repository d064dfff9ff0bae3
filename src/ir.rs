use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// A virtual register, numbered per function and written exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Temp(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub id: usize,
    pub hint: String,
}

/// A named stack slot: a parameter or a local variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Local {
    pub slot: usize,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IRConst {
    Int(i64),
    /// Index into [`IRProgram::strings`].
    Str(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Temp(Temp),
    Const(IRConst),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    LoadConst,
    LoadVar,
    StoreVar,
    BinOp,
    Call,
    Label,
    Jump,
    JumpIfFalse,
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    LoadConst {
        dst: Temp,
        value: IRConst,
    },
    LoadVar {
        dst: Temp,
        var: Local,
    },
    StoreVar {
        var: Local,
        src: Operand,
    },
    BinOp {
        dst: Temp,
        op: Op,
        lhs: Temp,
        rhs: Temp,
    },
    Call {
        dst: Option<Temp>,
        callee: String,
        args: Vec<Temp>,
    },
    Label(Label),
    Jump(Label),
    JumpIfFalse {
        cond: Operand,
        target: Label,
    },
    Return(Option<Operand>),
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::LoadConst { .. } => Opcode::LoadConst,
            Instruction::LoadVar { .. } => Opcode::LoadVar,
            Instruction::StoreVar { .. } => Opcode::StoreVar,
            Instruction::BinOp { .. } => Opcode::BinOp,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::Label(_) => Opcode::Label,
            Instruction::Jump(_) => Opcode::Jump,
            Instruction::JumpIfFalse { .. } => Opcode::JumpIfFalse,
            Instruction::Return(_) => Opcode::Return,
        }
    }

    /// The temporary this instruction defines, if any.
    pub fn dst(&self) -> Option<Temp> {
        match self {
            Instruction::LoadConst { dst, .. }
            | Instruction::LoadVar { dst, .. }
            | Instruction::BinOp { dst, .. } => Some(*dst),
            Instruction::Call { dst, .. } => *dst,
            _ => None,
        }
    }

    /// Temporaries read by this instruction, in operand order.
    pub fn uses(&self) -> Vec<Temp> {
        let operand = |op: &Operand| match op {
            Operand::Temp(t) => Some(*t),
            Operand::Const(_) => None,
        };
        match self {
            Instruction::StoreVar { src, .. } => operand(src).into_iter().collect(),
            Instruction::BinOp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instruction::Call { args, .. } => args.clone(),
            Instruction::JumpIfFalse { cond, .. } => operand(cond).into_iter().collect(),
            Instruction::Return(Some(value)) => operand(value).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn jump_target(&self) -> Option<&Label> {
        match self {
            Instruction::Jump(target) | Instruction::JumpIfFalse { target, .. } => Some(target),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IRFunction {
    pub name: String,
    pub params: Vec<Local>,
    /// Slots for parameters and locals; temporaries come after them.
    pub frame_slots: usize,
    pub temp_count: usize,
    pub instructions: Vec<Instruction>,
    pub returns_value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IRProgram {
    pub functions: Vec<IRFunction>,
    /// Function name to index in `functions`.
    pub entries: BTreeMap<String, usize>,
    pub strings: Vec<String>,
    /// Called functions that have no body in this program, in first-use order.
    pub externs: Vec<String>,
}

impl IRProgram {
    pub fn function(&self, name: &str) -> Option<&IRFunction> {
        self.entries.get(name).and_then(|&i| self.functions.get(i))
    }
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.hint, self.id)
    }
}

impl fmt::Display for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.slot)
    }
}

impl fmt::Display for IRConst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IRConst::Int(n) => write!(f, "{}", n),
            IRConst::Str(idx) => write!(f, "s{}", idx),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Temp(t) => write!(f, "{}", t),
            Operand::Const(c) => write!(f, "{}", c),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Mod => "mod",
            Op::Eq => "eq",
            Op::Ne => "ne",
            Op::Lt => "lt",
            Op::Le => "le",
            Op::Gt => "gt",
            Op::Ge => "ge",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::LoadVar => "LOAD_VAR",
            Opcode::StoreVar => "STORE_VAR",
            Opcode::BinOp => "BINOP",
            Opcode::Call => "CALL",
            Opcode::Label => "LABEL",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfFalse => "JUMP_IF_FALSE",
            Opcode::Return => "RETURN",
        };
        write!(f, "{}", name)
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opcode = self.opcode();
        match self {
            Instruction::LoadConst { dst, value } => write!(f, "{} = {} {}", dst, opcode, value),
            Instruction::LoadVar { dst, var } => write!(f, "{} = {} {}", dst, opcode, var),
            Instruction::StoreVar { var, src } => write!(f, "{} {}, {}", opcode, var, src),
            Instruction::BinOp { dst, op, lhs, rhs } => {
                write!(f, "{} = {} {} {}, {}", dst, opcode, op, lhs, rhs)
            }
            Instruction::Call { dst, callee, args } => {
                if let Some(dst) = dst {
                    write!(f, "{} = ", dst)?;
                }
                write!(f, "{} {}({})", opcode, callee, join(args))
            }
            Instruction::Label(label) => write!(f, "{} {}", opcode, label),
            Instruction::Jump(label) => write!(f, "{} {}", opcode, label),
            Instruction::JumpIfFalse { cond, target } => {
                write!(f, "{} {}, {}", opcode, cond, target)
            }
            Instruction::Return(Some(value)) => write!(f, "{} {}", opcode, value),
            Instruction::Return(None) => write!(f, "{}", opcode),
        }
    }
}

impl fmt::Display for IRFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "function {}({}): frame={} temps={}",
            self.name,
            join(&self.params),
            self.frame_slots,
            self.temp_count
        )?;
        for inst in &self.instructions {
            writeln!(f, "  {}", inst)?;
        }
        Ok(())
    }
}

impl fmt::Display for IRProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.strings.is_empty() {
            writeln!(f, "strings:")?;
            for (i, s) in self.strings.iter().enumerate() {
                writeln!(f, "  s{} = {:?}", i, s)?;
            }
        }
        if !self.externs.is_empty() {
            writeln!(f, "externs: {}", self.externs.join(", "))?;
        }
        for func in &self.functions {
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

pub fn dump_ir(program: &IRProgram) -> String {
    program.to_string()
}
