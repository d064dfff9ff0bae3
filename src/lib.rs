//! A compiler for a small C subset: functions, `int`/`char *` values,
//! `if`/`while`/`return`, arithmetic and comparisons, and calls to runtime
//! routines such as `printf`. Source text goes through five stages and comes
//! out as NASM x86-64 assembly.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod ir;
pub mod irgen;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod semantic;
pub mod serialize;
pub mod symbol;
pub mod token;

use log::info;

pub use codegen::generate_code;
pub use error::{CompileError, Stage};
pub use ir::{IRProgram, dump_ir};
pub use irgen::generate_ir;
pub use lexer::tokenize;
pub use parser::parse;
pub use semantic::{Analyzed, analyze};

/// Every artifact of a successful compilation.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub analyzed: Analyzed,
    pub ir: IRProgram,
    pub asm: String,
}

pub fn compile(source: &str) -> Result<Compilation, CompileError> {
    let tokens = tokenize(source)?;
    info!("lexed {} tokens", tokens.len());
    let program = parse(&tokens)?;
    info!("parsed {} functions", program.functions.len());
    let analyzed = analyze(program)?;
    let ir = generate_ir(&analyzed)?;
    info!("lowered {} function bodies", ir.functions.len());
    let asm = generate_code(&ir);
    info!("emitted {} lines of assembly", asm.lines().count());
    Ok(Compilation { analyzed, ir, asm })
}
