use std::fmt;

use thiserror::Error;

use crate::{
    irgen::IRGenError, lexer::LexError, parser::ParseError, semantic::SemanticError,
    token::Span,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lex,
    Parse,
    Semantic,
    IrGen,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Lex => "lexical analysis",
            Stage::Parse => "parsing",
            Stage::Semantic => "semantic analysis",
            Stage::IrGen => "IR generation",
        };
        write!(f, "{}", name)
    }
}

/// The first failure of a compilation, tagged with the stage that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("LexError: {0}")]
    Lex(#[from] LexError),
    #[error("SyntaxError: {0}")]
    Parse(#[from] ParseError),
    #[error("SemanticError: {0}")]
    Semantic(#[from] SemanticError),
    #[error("{0}")]
    IrGen(#[from] IRGenError),
}

impl CompileError {
    pub fn stage(&self) -> Stage {
        match self {
            CompileError::Lex(_) => Stage::Lex,
            CompileError::Parse(_) => Stage::Parse,
            CompileError::Semantic(_) => Stage::Semantic,
            CompileError::IrGen(_) => Stage::IrGen,
        }
    }

    /// True when the failure is a compiler defect rather than a problem in
    /// the input program.
    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::IrGen(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self.stage() {
            Stage::Lex => 1,
            Stage::Parse => 2,
            Stage::Semantic => 3,
            Stage::IrGen => 4,
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Lex(e) => Some(e.span()),
            CompileError::Parse(e) => Some(e.span()),
            CompileError::Semantic(e) => Some(e.span()),
            CompileError::IrGen(_) => None,
        }
    }

    /// Formats the error followed by the offending source line and a caret
    /// under the reported column.
    pub fn report(&self, source: &str) -> String {
        let mut out = format!("error: {}\n", self);
        let Some(span) = self.span() else {
            return out;
        };
        let Some(text) = source.lines().nth(span.line.saturating_sub(1)) else {
            return out;
        };

        let gutter = span.line.to_string().len();
        let pad: String = text
            .chars()
            .take(span.col.saturating_sub(1))
            .map(|c| if c == '\t' { '\t' } else { ' ' })
            .collect();
        out.push_str(&format!("{:w$}--> {}\n", "", span, w = gutter));
        out.push_str(&format!("{:w$} |\n", "", w = gutter));
        out.push_str(&format!("{} | {}\n", span.line, text));
        out.push_str(&format!("{:w$} | {}^\n", "", pad, w = gutter));
        out
    }
}
