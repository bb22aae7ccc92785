use super::node::{ClassDef, FunctionDef, SlotTable, Stmt, StmtKind};

/// Parsed source file.
///
/// Top-level `def` and `class` statements become module functions and
/// classes; every other top-level statement belongs to the implicit main
/// function, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilationUnit {
    pub statements: Vec<Stmt>,

    /// Slot table of the implicit main function.
    pub main_slots: Option<SlotTable>,

    /// Whether the implicit main function can run off its end.
    pub main_falls_through: bool,
}

impl CompilationUnit {
    pub fn new(statements: Vec<Stmt>) -> Self {
        CompilationUnit {
            statements,
            main_slots: None,
            main_falls_through: true,
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.statements.iter().filter_map(|stmt| match &stmt.kind {
            StmtKind::FunctionDef(function) => Some(function),
            _ => None,
        })
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.statements.iter().filter_map(|stmt| match &stmt.kind {
            StmtKind::ClassDef(class) => Some(class),
            _ => None,
        })
    }

    /// Top-level statements that make up the implicit main function.
    pub fn main_statements(&self) -> impl Iterator<Item = &Stmt> {
        self.statements.iter().filter(|stmt| !is_declaration(stmt))
    }

    pub fn has_main(&self) -> bool {
        self.main_statements().next().is_some()
    }
}

pub fn is_declaration(stmt: &Stmt) -> bool {
    matches!(stmt.kind, StmtKind::FunctionDef(_) | StmtKind::ClassDef(_))
}
