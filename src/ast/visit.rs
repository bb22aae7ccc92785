//! Traversal protocol over the AST.
//!
//! [`Visitor`] walks by reference; each `visit_*` method defaults to the
//! matching `walk_*` function, so an implementor overrides only the nodes it
//! cares about and calls `walk_*` to keep descending.
//!
//! [`Rewriter`] takes ownership of a node and returns its replacement. The
//! default methods rebuild the node with rewritten children, which gives
//! bottom-up rewriting when an override calls the default first.

use super::node::{ClassDef, Expr, ExprKind, FieldDecl, FunctionDef, Stmt, StmtKind};

pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_function(&mut self, function: &FunctionDef) {
        walk_function(self, function);
    }

    fn visit_class(&mut self, class: &ClassDef) {
        walk_class(self, class);
    }

    fn visit_field(&mut self, field: &FieldDecl) {
        if let Some(init) = &field.initializer {
            self.visit_expr(init);
        }
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Expression(expr) => visitor.visit_expr(expr),
        StmtKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            visitor.visit_expr(condition);
            visitor.visit_stmt(then_branch);
            if let Some(else_branch) = else_branch {
                visitor.visit_stmt(else_branch);
            }
        }
        StmtKind::While { condition, body } => {
            visitor.visit_expr(condition);
            visitor.visit_stmt(body);
        }
        StmtKind::For {
            init,
            condition,
            update,
            body,
        } => {
            for clause in [init, condition, update].into_iter().flatten() {
                visitor.visit_expr(clause);
            }
            visitor.visit_stmt(body);
        }
        StmtKind::Block(statements) => {
            for stmt in statements {
                visitor.visit_stmt(stmt);
            }
        }
        StmtKind::FunctionDef(function) => visitor.visit_function(function),
        StmtKind::ClassDef(class) => visitor.visit_class(class),
        StmtKind::Field(field) => visitor.visit_field(field),
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Constant(_) | ExprKind::Variable(_) => {}
        ExprKind::Binary { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        ExprKind::Unary { operand, .. } => visitor.visit_expr(operand),
        ExprKind::Call { receiver, args, .. } => {
            if let Some(receiver) = receiver {
                visitor.visit_expr(receiver);
            }
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        ExprKind::Assign { value, .. } => visitor.visit_expr(value),
    }
}

pub fn walk_function<V: Visitor + ?Sized>(visitor: &mut V, function: &FunctionDef) {
    for stmt in &function.body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_class<V: Visitor + ?Sized>(visitor: &mut V, class: &ClassDef) {
    for member in &class.members {
        visitor.visit_stmt(member);
    }
}

pub trait Rewriter {
    fn rewrite_expr(&mut self, expr: Expr) -> Expr {
        rewrite_expr_children(self, expr)
    }

    fn rewrite_stmt(&mut self, stmt: Stmt) -> Stmt {
        rewrite_stmt_children(self, stmt)
    }
}

pub fn rewrite_expr_children<R: Rewriter + ?Sized>(rewriter: &mut R, expr: Expr) -> Expr {
    let Expr { kind, span } = expr;
    let kind = match kind {
        ExprKind::Binary { op, left, right } => ExprKind::Binary {
            op,
            left: Box::new(rewriter.rewrite_expr(*left)),
            right: Box::new(rewriter.rewrite_expr(*right)),
        },
        ExprKind::Unary { op, operand } => ExprKind::Unary {
            op,
            operand: Box::new(rewriter.rewrite_expr(*operand)),
        },
        ExprKind::Call {
            receiver,
            name,
            args,
        } => ExprKind::Call {
            receiver: receiver.map(|r| Box::new(rewriter.rewrite_expr(*r))),
            name,
            args: args
                .into_iter()
                .map(|arg| rewriter.rewrite_expr(arg))
                .collect(),
        },
        ExprKind::Assign { target, value } => ExprKind::Assign {
            target,
            value: Box::new(rewriter.rewrite_expr(*value)),
        },
        leaf @ (ExprKind::Constant(_) | ExprKind::Variable(_)) => leaf,
    };
    Expr { kind, span }
}

pub fn rewrite_stmt_children<R: Rewriter + ?Sized>(rewriter: &mut R, stmt: Stmt) -> Stmt {
    let Stmt { kind, span } = stmt;
    let kind = match kind {
        StmtKind::Expression(expr) => StmtKind::Expression(rewriter.rewrite_expr(expr)),
        StmtKind::Return(value) => StmtKind::Return(value.map(|v| rewriter.rewrite_expr(v))),
        StmtKind::If {
            condition,
            then_branch,
            else_branch,
        } => StmtKind::If {
            condition: rewriter.rewrite_expr(condition),
            then_branch: Box::new(rewriter.rewrite_stmt(*then_branch)),
            else_branch: else_branch.map(|e| Box::new(rewriter.rewrite_stmt(*e))),
        },
        StmtKind::While { condition, body } => StmtKind::While {
            condition: rewriter.rewrite_expr(condition),
            body: Box::new(rewriter.rewrite_stmt(*body)),
        },
        StmtKind::For {
            init,
            condition,
            update,
            body,
        } => StmtKind::For {
            init: init.map(|e| rewriter.rewrite_expr(e)),
            condition: condition.map(|e| rewriter.rewrite_expr(e)),
            update: update.map(|e| rewriter.rewrite_expr(e)),
            body: Box::new(rewriter.rewrite_stmt(*body)),
        },
        StmtKind::Block(statements) => StmtKind::Block(
            statements
                .into_iter()
                .map(|s| rewriter.rewrite_stmt(s))
                .collect(),
        ),
        StmtKind::FunctionDef(mut function) => {
            function.body = std::mem::take(&mut function.body)
                .into_iter()
                .map(|s| rewriter.rewrite_stmt(s))
                .collect();
            StmtKind::FunctionDef(function)
        }
        StmtKind::ClassDef(mut class) => {
            class.members = std::mem::take(&mut class.members)
                .into_iter()
                .map(|s| rewriter.rewrite_stmt(s))
                .collect();
            StmtKind::ClassDef(class)
        }
        StmtKind::Field(mut field) => {
            field.initializer = field.initializer.map(|e| rewriter.rewrite_expr(e));
            StmtKind::Field(field)
        }
    };
    Stmt { kind, span }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Constant, Span};

    fn int(n: i32) -> Expr {
        Expr::constant(Constant::Int(n), Span::default())
    }

    fn var(name: &str) -> Expr {
        Expr::new(ExprKind::Variable(name.to_string()), Span::default())
    }

    fn add(left: Expr, right: Expr) -> Expr {
        Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Add,
                left: Box::new(left),
                right: Box::new(right),
            },
            Span::default(),
        )
    }

    struct VariableCounter(Vec<String>);

    impl Visitor for VariableCounter {
        fn visit_expr(&mut self, expr: &Expr) {
            if let ExprKind::Variable(name) = &expr.kind {
                self.0.push(name.clone());
            }
            walk_expr(self, expr);
        }
    }

    #[test]
    fn test_visitor_reaches_nested_expressions() {
        let stmt = Stmt::new(
            StmtKind::While {
                condition: var("c"),
                body: Box::new(Stmt::new(
                    StmtKind::Block(vec![Stmt::new(
                        StmtKind::Return(Some(add(var("a"), add(int(1), var("b"))))),
                        Span::default(),
                    )]),
                    Span::default(),
                )),
            },
            Span::default(),
        );

        let mut counter = VariableCounter(Vec::new());
        counter.visit_stmt(&stmt);
        assert_eq!(counter.0, vec!["c", "a", "b"]);
    }

    struct RenameVariables;

    impl Rewriter for RenameVariables {
        fn rewrite_expr(&mut self, expr: Expr) -> Expr {
            match expr.kind {
                ExprKind::Variable(name) => Expr::new(
                    ExprKind::Variable(format!("{}_renamed", name)),
                    expr.span,
                ),
                _ => rewrite_expr_children(self, expr),
            }
        }
    }

    #[test]
    fn test_rewriter_rebuilds_children() {
        let stmt = Stmt::new(
            StmtKind::Expression(add(var("x"), int(2))),
            Span::default(),
        );
        let rewritten = RenameVariables.rewrite_stmt(stmt);
        assert_eq!(
            rewritten.kind,
            StmtKind::Expression(add(var("x_renamed"), int(2)))
        );
    }
}
