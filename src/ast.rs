//! # Kiln Abstract Syntax Tree
//!
//! This module defines the Abstract Syntax Tree (AST) produced by the parser,
//! rewritten by the optimization passes and consumed by the bytecode
//! generator.
//!
//! ## Shape
//!
//! - Parents own their children (`Box`/`Vec`); there are no back references.
//! - Every node carries the [`Span`](node::Span) of its first token.
//! - A [`Binary`](node::ExprKind::Binary) always has exactly two operands.
//! - An [`If`](node::StmtKind::If) has a condition, a then-branch and an
//!   optional else-branch.
//!
//! Traversal goes through [`visit::Visitor`] (read-only) and
//! [`visit::Rewriter`] (consumes a subtree and returns its replacement).

pub mod node;
pub mod unit;
pub mod value;
pub mod visit;

pub use node::{
    BinaryOp, ClassDef, Expr, ExprKind, FieldDecl, FunctionDef, Parameter, SlotTable, Span,
    Stmt, StmtKind, UnaryOp,
};
pub use unit::CompilationUnit;
pub use value::Constant;
