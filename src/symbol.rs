use std::collections::HashMap;

use log::trace;

use crate::{
    semantic::SemanticError,
    token::{Span, VarType},
};

/// Index of a [`Symbol`] in its [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncSig {
    pub params: Vec<VarType>,
    pub ret_type: VarType,
    pub variadic: bool,
    /// Whether a body has been seen.
    pub defined: bool,
    /// Stack slots needed for parameters and locals, known once the body is analyzed.
    pub frame_slots: usize,
}

impl FuncSig {
    pub fn same_shape(&self, other: &FuncSig) -> bool {
        self.params == other.params
            && self.ret_type == other.ret_type
            && self.variadic == other.variadic
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    Variable { slot: usize },
    Parameter { slot: usize, index: usize },
    Function(FuncSig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub typ: VarType,
    pub depth: usize,
    pub span: Span,
}

impl Symbol {
    pub fn slot(&self) -> Option<usize> {
        match self.kind {
            SymbolKind::Variable { slot } | SymbolKind::Parameter { slot, .. } => Some(slot),
            SymbolKind::Function(_) => None,
        }
    }

    pub fn signature(&self) -> Option<&FuncSig> {
        match &self.kind {
            SymbolKind::Function(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, SymbolKind::Function(_))
    }
}

type Scope = HashMap<String, SymbolId>;

/// Arena of every symbol seen during analysis plus the chain of scopes
/// active at the current point. Scope 0 is program scope.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    scopes: Vec<Scope>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            symbols: Vec::new(),
            scopes: vec![Scope::new()],
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    /// Pops the innermost scope. Program scope is never popped.
    pub fn exit_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn declare(
        &mut self,
        name: &str,
        kind: SymbolKind,
        typ: VarType,
        span: Span,
    ) -> Result<SymbolId, SemanticError> {
        let depth = self.depth();
        let scope = &mut self.scopes[depth];
        if let Some(&existing) = scope.get(name) {
            return Err(SemanticError::DuplicateDeclaration {
                name: name.to_string(),
                first: self.symbols[existing.0].span,
                second: span,
            });
        }

        let id = SymbolId(self.symbols.len());
        scope.insert(name.to_string(), id);
        self.symbols.push(Symbol {
            name: name.to_string(),
            kind,
            typ,
            depth,
            span,
        });
        trace!("declared '{}' as {:?} at depth {}", name, id, depth);
        Ok(id)
    }

    /// Resolves `name` from the innermost scope outwards.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.0)
    }

    pub fn get_mut(&mut self, id: SymbolId) -> Option<&mut Symbol> {
        self.symbols.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, sym)| (SymbolId(i), sym))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(offset: usize) -> Span {
        Span::new(offset, 1, offset + 1)
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        let outer = table
            .declare("x", SymbolKind::Variable { slot: 0 }, VarType::Int, at(0))
            .unwrap();
        table.enter_scope();
        let inner = table
            .declare("x", SymbolKind::Variable { slot: 1 }, VarType::Str, at(5))
            .unwrap();
        assert_eq!(table.lookup("x"), Some(inner));
        assert_eq!(table.get(inner).unwrap().depth, 2);
        table.exit_scope();
        assert_eq!(table.lookup("x"), Some(outer));
    }

    #[test]
    fn same_scope_redeclaration_is_duplicate() {
        let mut table = SymbolTable::new();
        table
            .declare("x", SymbolKind::Variable { slot: 0 }, VarType::Int, at(0))
            .unwrap();
        let err = table
            .declare("x", SymbolKind::Variable { slot: 1 }, VarType::Int, at(7))
            .unwrap_err();
        assert_eq!(
            err,
            SemanticError::DuplicateDeclaration {
                name: "x".to_string(),
                first: at(0),
                second: at(7),
            }
        );
    }

    #[test]
    fn popped_scope_releases_names_but_keeps_records() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        let id = table
            .declare("tmp", SymbolKind::Variable { slot: 0 }, VarType::Int, at(0))
            .unwrap();
        table.exit_scope();
        assert_eq!(table.lookup("tmp"), None);
        assert_eq!(table.get(id).unwrap().name, "tmp");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn program_scope_is_never_popped() {
        let mut table = SymbolTable::new();
        table.exit_scope();
        table.exit_scope();
        assert_eq!(table.depth(), 0);
        assert!(
            table
                .declare("main", SymbolKind::Variable { slot: 0 }, VarType::Int, at(0))
                .is_ok()
        );
    }
}
