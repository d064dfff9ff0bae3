use log::debug;

use crate::ir::{IRConst, IRFunction, IRProgram, Instruction, Label, Local, Op, Operand, Temp};

macro_rules! assemble {
    ($buf:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $buf.push_str(&format!(concat!($fmt, "\n") $(, $arg)*))
    };
}

const ARG_REG: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

/// Lowers an [`IRProgram`] to NASM x86-64 assembly for the System V ABI.
///
/// Every parameter, local and temporary lives in its own 8-byte slot below
/// `rbp`: locals first, temporaries after them.
pub struct CodeGen<'a> {
    program: &'a IRProgram,
    text: String,
    data: String,
    curr_fn: String,
    frame_slots: usize,
}

impl<'a> CodeGen<'a> {
    pub fn new(program: &'a IRProgram) -> Self {
        Self {
            program,
            text: String::new(),
            data: String::new(),
            curr_fn: String::new(),
            frame_slots: 0,
        }
    }

    pub fn compile(mut self) -> String {
        assemble!(self.data, "section .data");
        for (i, s) in self.program.strings.iter().enumerate() {
            let bytes = s
                .bytes()
                .map(|b| b.to_string())
                .chain(std::iter::once("0".to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            assemble!(self.data, "{} db {}", str_label(i), bytes);
        }

        let program = self.program;
        assemble!(self.text, "section .text");
        for name in &program.externs {
            assemble!(self.text, "extern {}", symbol(name));
        }
        for func in &program.functions {
            self.compile_fn(func);
        }
        assemble!(
            self.text,
            "section .note.GNU-stack noalloc noexec nowrite progbits"
        );

        let asm = self.data + &self.text;
        debug!("generated {} bytes of assembly", asm.len());
        asm
    }

    fn local_offset(&self, slot: usize) -> usize {
        (slot + 1) * 8
    }

    fn temp_offset(&self, temp: Temp) -> usize {
        (self.frame_slots + temp.0 + 1) * 8
    }

    fn label(&self, label: &Label) -> String {
        format!(".L_{}_{}_{}", self.curr_fn, label.hint, label.id)
    }

    fn compile_fn(&mut self, func: &IRFunction) {
        self.curr_fn = func.name.clone();
        self.frame_slots = func.frame_slots;

        let stack_size = ((func.frame_slots + func.temp_count) * 8 + 15) & !15;

        assemble!(self.text, "");
        assemble!(self.text, "global {}", symbol(&func.name));
        assemble!(self.text, "{}:", symbol(&func.name));
        assemble!(self.text, "push rbp");
        assemble!(self.text, "mov rbp, rsp");
        if stack_size > 0 {
            assemble!(self.text, "sub rsp, {}", stack_size);
        }

        for (i, param) in func.params.iter().enumerate() {
            let off = self.local_offset(param.slot);
            match ARG_REG.get(i) {
                Some(reg) => assemble!(self.text, "mov [rbp - {}], {}", off, reg),
                None => {
                    // Return address and saved rbp sit between rbp and the
                    // seventh argument.
                    let caller = 16 + (i - ARG_REG.len()) * 8;
                    assemble!(self.text, "mov rax, [rbp + {}]", caller);
                    assemble!(self.text, "mov [rbp - {}], rax", off);
                }
            }
        }

        for inst in &func.instructions {
            self.compile_code(inst);
        }
    }

    fn compile_code(&mut self, inst: &Instruction) {
        match inst {
            Instruction::LoadConst { dst, value } => {
                self.load(&Operand::Const(*value), "rax");
                self.store_temp(*dst);
            }
            Instruction::LoadVar { dst, var } => {
                self.load_local(var, "rax");
                self.store_temp(*dst);
            }
            Instruction::StoreVar { var, src } => {
                self.load(src, "rax");
                assemble!(self.text, "mov [rbp - {}], rax", self.local_offset(var.slot));
            }
            Instruction::BinOp { dst, op, lhs, rhs } => {
                self.load(&Operand::Temp(*lhs), "rax");
                self.load(&Operand::Temp(*rhs), "rcx");
                match op {
                    Op::Add => assemble!(self.text, "add rax, rcx"),
                    Op::Sub => assemble!(self.text, "sub rax, rcx"),
                    Op::Mul => assemble!(self.text, "imul rax, rcx"),
                    Op::Div => {
                        assemble!(self.text, "cqo");
                        assemble!(self.text, "idiv rcx");
                    }
                    Op::Mod => {
                        assemble!(self.text, "cqo");
                        assemble!(self.text, "idiv rcx");
                        assemble!(self.text, "mov rax, rdx");
                    }
                    Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                        let set = match op {
                            Op::Eq => "sete",
                            Op::Ne => "setne",
                            Op::Lt => "setl",
                            Op::Le => "setle",
                            Op::Gt => "setg",
                            _ => "setge",
                        };
                        assemble!(self.text, "cmp rax, rcx");
                        assemble!(self.text, "{} al", set);
                        assemble!(self.text, "movzx eax, al");
                    }
                }
                self.store_temp(*dst);
            }
            Instruction::Call { dst, callee, args } => self.compile_call(*dst, callee, args),
            Instruction::Label(label) => {
                assemble!(self.text, "{}:", self.label(label));
            }
            Instruction::Jump(label) => {
                assemble!(self.text, "jmp {}", self.label(label));
            }
            Instruction::JumpIfFalse { cond, target } => {
                self.load(cond, "rax");
                assemble!(self.text, "cmp rax, 0");
                assemble!(self.text, "je {}", self.label(target));
            }
            Instruction::Return(value) => {
                if let Some(value) = value {
                    self.load(value, "rax");
                }
                assemble!(self.text, "leave");
                assemble!(self.text, "ret");
            }
        }
    }

    fn compile_call(&mut self, dst: Option<Temp>, callee: &str, args: &[Temp]) {
        let on_stack = args.len().saturating_sub(ARG_REG.len());
        let padding = if on_stack % 2 == 1 { 8 } else { 0 };
        if padding > 0 {
            assemble!(self.text, "sub rsp, {}", padding);
        }
        for arg in args.iter().skip(ARG_REG.len()).rev() {
            assemble!(self.text, "push qword [rbp - {}]", self.temp_offset(*arg));
        }
        for (arg, reg) in args.iter().zip(ARG_REG) {
            self.load(&Operand::Temp(*arg), reg);
        }

        // Variadic callees read the vector register count from al.
        assemble!(self.text, "xor eax, eax");
        if self.program.externs.iter().any(|e| e == callee) {
            assemble!(self.text, "call {} wrt ..plt", symbol(callee));
        } else {
            assemble!(self.text, "call {}", symbol(callee));
        }

        let cleanup = on_stack * 8 + padding;
        if cleanup > 0 {
            assemble!(self.text, "add rsp, {}", cleanup);
        }
        if let Some(dst) = dst {
            self.store_temp(dst);
        }
    }

    fn load(&mut self, op: &Operand, reg: &str) {
        match op {
            Operand::Temp(t) => {
                assemble!(self.text, "mov {}, [rbp - {}]", reg, self.temp_offset(*t));
            }
            Operand::Const(IRConst::Int(n)) => {
                assemble!(self.text, "mov {}, {}", reg, n);
            }
            Operand::Const(IRConst::Str(idx)) => {
                assemble!(self.text, "lea {}, [rel {}]", reg, str_label(*idx));
            }
        }
    }

    fn load_local(&mut self, var: &Local, reg: &str) {
        assemble!(self.text, "mov {}, [rbp - {}]", reg, self.local_offset(var.slot));
    }

    fn store_temp(&mut self, temp: Temp) {
        assemble!(self.text, "mov [rbp - {}], rax", self.temp_offset(temp));
    }
}

/// Global symbols carry NASM's `$` prefix so names like `add` or `push` are
/// never read as instructions or registers.
fn symbol(name: &str) -> String {
    format!("${}", name)
}

fn str_label(idx: usize) -> String {
    format!("L.S.{}", idx)
}

pub fn generate_code(program: &IRProgram) -> String {
    CodeGen::new(program).compile()
}
