//! Dead-code elimination.
//!
//! A single backward sweep per block with a set of live names. Function
//! bodies start the sweep with nothing live; loops iterate their body to a
//! fixpoint first so that loop-carried variables stay live. Statements are
//! kept when they call something, write a field or a live name, return, or
//! contain kept statements. Statements after a terminating statement in the
//! same block are unreachable and dropped.
//!
//! The sweep also decides `falls_through` for every function and for the
//! implicit main.

use std::collections::HashSet;

use crate::ast::unit::is_declaration;
use crate::ast::visit::{Visitor, walk_expr};
use crate::ast::{ClassDef, CompilationUnit, Constant, Expr, ExprKind, FunctionDef, Span, Stmt, StmtKind};

type LiveSet = HashSet<String>;

pub fn eliminate_dead_code(unit: CompilationUnit) -> CompilationUnit {
    let CompilationUnit {
        statements,
        main_slots,
        ..
    } = unit;

    let mut sweep = Sweep::default();
    let mut live = LiveSet::new();
    let statements = sweep.block(statements, &mut live);
    let main_falls_through = !block_terminates(statements.iter().filter(|s| !is_declaration(s)));

    tracing::debug!(removed = sweep.removed, "dead code elimination done");
    CompilationUnit {
        statements,
        main_slots,
        main_falls_through,
    }
}

/// Whether control never continues past `stmt`.
pub fn terminates(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) => true,
        StmtKind::Block(statements) => block_terminates(statements),
        StmtKind::If {
            then_branch,
            else_branch: Some(else_branch),
            ..
        } => terminates(then_branch) && terminates(else_branch),
        _ => false,
    }
}

pub fn block_terminates<'a>(statements: impl IntoIterator<Item = &'a Stmt>) -> bool {
    statements.into_iter().any(terminates)
}

#[derive(Default, Clone)]
struct Sweep {
    /// Fields of the enclosing class that no parameter shadows.
    fields: HashSet<String>,
    removed: usize,
}

impl Sweep {
    fn block(&mut self, statements: Vec<Stmt>, live: &mut LiveSet) -> Vec<Stmt> {
        let statements = self.drop_unreachable(statements);

        let mut kept = Vec::with_capacity(statements.len());
        for stmt in statements.into_iter().rev() {
            match self.stmt(stmt, live) {
                Some(stmt) => kept.push(stmt),
                None => self.removed += 1,
            }
        }
        kept.reverse();
        kept
    }

    fn drop_unreachable(&mut self, mut statements: Vec<Stmt>) -> Vec<Stmt> {
        let Some(end) = statements.iter().position(terminates) else {
            return statements;
        };

        // Declarations are hoisted, so only executable statements go.
        let tail = statements.split_off(end + 1);
        let before = tail.len();
        statements.extend(tail.into_iter().filter(is_declaration));
        self.removed += before - (statements.len() - end - 1);
        statements
    }

    fn stmt(&mut self, stmt: Stmt, live: &mut LiveSet) -> Option<Stmt> {
        let span = stmt.span;
        let kind = match stmt.kind {
            StmtKind::Expression(expr) => {
                let usage = Usage::of(&expr);
                let writes_something_live = usage
                    .writes
                    .iter()
                    .any(|name| self.fields.contains(name) || live.contains(name));
                if !usage.calls && !writes_something_live {
                    return None;
                }
                for target in definite_writes(&expr) {
                    live.remove(target);
                }
                live.extend(usage.reads);
                StmtKind::Expression(expr)
            }

            StmtKind::Return(value) => {
                live.clear();
                if let Some(value) = &value {
                    live.extend(Usage::of(value).reads);
                }
                StmtKind::Return(value)
            }

            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if let Some(taken) = constant_truth(&condition) {
                    let branch = if taken {
                        Some(*then_branch)
                    } else {
                        else_branch.map(|b| *b)
                    };
                    return branch.and_then(|b| self.stmt(b, live));
                }
                return self.conditional(condition, *then_branch, else_branch.map(|b| *b), span, live);
            }

            StmtKind::While { condition, body } => {
                if constant_truth(&condition) == Some(false) {
                    return None;
                }
                let entry = self.loop_entry(live, &[&condition], &body);
                let mut body_live = entry.clone();
                let body = self.branch(*body, &mut body_live);
                *live = entry;
                StmtKind::While {
                    condition,
                    body: Box::new(body),
                }
            }

            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => {
                let header: Vec<&Expr> = condition.iter().chain(update.iter()).collect();
                let entry = self.loop_entry(live, &header, &body);
                let mut body_live = entry.clone();
                let body = self.branch(*body, &mut body_live);
                *live = entry;
                if let Some(init) = &init {
                    live.extend(Usage::of(init).reads);
                }
                StmtKind::For {
                    init,
                    condition,
                    update,
                    body: Box::new(body),
                }
            }

            StmtKind::Block(statements) => {
                let statements = self.block(statements, live);
                if statements.is_empty() {
                    return None;
                }
                StmtKind::Block(statements)
            }

            StmtKind::FunctionDef(mut function) => {
                self.function(&mut function, &HashSet::new());
                StmtKind::FunctionDef(function)
            }

            StmtKind::ClassDef(mut class) => {
                self.class(&mut class);
                StmtKind::ClassDef(class)
            }

            StmtKind::Field(field) => StmtKind::Field(field),
        };
        Some(Stmt::new(kind, span))
    }

    fn conditional(
        &mut self,
        condition: Expr,
        then_branch: Stmt,
        else_branch: Option<Stmt>,
        span: Span,
        live: &mut LiveSet,
    ) -> Option<Stmt> {
        let mut then_live = live.clone();
        let then_branch = self.branch(then_branch, &mut then_live);

        let mut else_live = live.clone();
        let else_branch = else_branch
            .map(|b| self.branch(b, &mut else_live))
            .filter(|b| !is_empty_block(b));

        let mut after_condition = then_live;
        after_condition.extend(else_live);

        let condition_usage = Usage::of(&condition);
        let writes_something_live = condition_usage
            .writes
            .iter()
            .any(|name| self.fields.contains(name) || after_condition.contains(name));
        if is_empty_block(&then_branch) && else_branch.is_none() && !condition_usage.calls && !writes_something_live {
            return None;
        }

        for target in definite_writes(&condition) {
            after_condition.remove(target);
        }
        *live = after_condition;
        live.extend(condition_usage.reads);
        Some(Stmt::new(
            StmtKind::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch: else_branch.map(Box::new),
            },
            span,
        ))
    }

    /// Sweeps the body of an `if` or loop. Always yields a statement; a
    /// branch whose content is all dead becomes an empty block.
    fn branch(&mut self, stmt: Stmt, live: &mut LiveSet) -> Stmt {
        let span = stmt.span;
        match stmt.kind {
            StmtKind::Block(statements) => Stmt::new(StmtKind::Block(self.block(statements, live)), span),
            kind => match self.stmt(Stmt::new(kind, span), live) {
                Some(stmt) => stmt,
                None => {
                    self.removed += 1;
                    Stmt::new(StmtKind::Block(Vec::new()), span)
                }
            },
        }
    }

    /// Live set at the head of a loop: what is live after the loop, plus the
    /// header's reads, plus whatever the body needs on the next iteration.
    fn loop_entry(&self, live_out: &LiveSet, header: &[&Expr], body: &Stmt) -> LiveSet {
        let mut base = live_out.clone();
        for expr in header {
            base.extend(Usage::of(expr).reads);
        }

        let mut entry = base.clone();
        loop {
            let mut probe = entry.clone();
            let mut dry_run = Sweep {
                fields: self.fields.clone(),
                removed: 0,
            };
            dry_run.branch(body.clone(), &mut probe);

            let mut next = base.clone();
            next.extend(probe);
            if next == entry {
                return entry;
            }
            entry = next;
        }
    }

    fn function(&mut self, function: &mut FunctionDef, fields: &HashSet<String>) {
        let mut inner = Sweep {
            fields: fields
                .iter()
                .filter(|field| !function.params.iter().any(|p| &p.name == *field))
                .cloned()
                .collect(),
            removed: 0,
        };

        let mut live = LiveSet::new();
        function.body = inner.block(std::mem::take(&mut function.body), &mut live);
        function.falls_through = !block_terminates(&function.body);
        self.removed += inner.removed;
    }

    fn class(&mut self, class: &mut ClassDef) {
        let fields: HashSet<String> = class.fields().map(|field| field.name.clone()).collect();
        for method in class.methods_mut() {
            self.function(method, &fields);
        }
    }
}

fn is_empty_block(stmt: &Stmt) -> bool {
    matches!(&stmt.kind, StmtKind::Block(statements) if statements.is_empty())
}

fn constant_truth(condition: &Expr) -> Option<bool> {
    match condition.as_constant()? {
        Constant::Bool(b) => Some(*b),
        Constant::Int(n) => Some(*n != 0),
        _ => None,
    }
}

/// Names assigned on every evaluation of `expr`, outermost first. The right
/// operand of `&&` and `||` may be skipped, so its writes are not counted.
fn definite_writes(expr: &Expr) -> Vec<&str> {
    let mut targets = Vec::new();
    collect_definite_writes(expr, &mut targets);
    targets
}

fn collect_definite_writes<'e>(expr: &'e Expr, targets: &mut Vec<&'e str>) {
    match &expr.kind {
        ExprKind::Constant(_) | ExprKind::Variable(_) => {}
        ExprKind::Assign { target, value } => {
            targets.push(target.as_str());
            collect_definite_writes(value, targets);
        }
        ExprKind::Binary { op, left, right } => {
            collect_definite_writes(left, targets);
            if !op.is_logical() {
                collect_definite_writes(right, targets);
            }
        }
        ExprKind::Unary { operand, .. } => collect_definite_writes(operand, targets),
        ExprKind::Call { receiver, args, .. } => {
            if let Some(receiver) = receiver {
                collect_definite_writes(receiver, targets);
            }
            for arg in args {
                collect_definite_writes(arg, targets);
            }
        }
    }
}

#[derive(Default)]
struct Usage {
    reads: HashSet<String>,
    writes: HashSet<String>,
    calls: bool,
}

impl Usage {
    fn of(expr: &Expr) -> Self {
        let mut usage = Usage::default();
        usage.visit_expr(expr);
        usage
    }
}

impl Visitor for Usage {
    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Variable(name) => {
                self.reads.insert(name.clone());
            }
            ExprKind::Assign { target, .. } => {
                self.writes.insert(target.clone());
            }
            ExprKind::Call { .. } => self.calls = true,
            _ => {}
        }
        walk_expr(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn parse(source: &str) -> CompilationUnit {
        let (unit, errors) = Parser::new(source).parse();
        assert!(errors.is_empty(), "{:?}", errors);
        unit
    }

    fn function<'a>(unit: &'a CompilationUnit, name: &str) -> &'a FunctionDef {
        unit.functions()
            .chain(unit.classes().flat_map(|c| c.methods()))
            .find(|f| f.name == name)
            .expect("function present")
    }

    fn assigned(stmt: &Stmt) -> Option<&str> {
        match &stmt.kind {
            StmtKind::Expression(expr) => definite_writes(expr).first().copied(),
            _ => None,
        }
    }

    #[test]
    fn test_unread_assignment_removed() {
        let unit = eliminate_dead_code(parse("def f(a) {\n x = 1\n y = a + 2\n return y\n}"));
        let body = &function(&unit, "f").body;
        assert_eq!(body.len(), 2);
        assert_eq!(assigned(&body[0]), Some("y"));
        assert!(matches!(body[1].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn test_calls_are_kept() {
        let unit = eliminate_dead_code(parse("def f() {\n x = g()\n g()\n 1 + 2\n return 1\n}"));
        let body = &function(&unit, "f").body;
        assert_eq!(body.len(), 3);
        assert_eq!(assigned(&body[0]), Some("x"));
    }

    #[test]
    fn test_code_after_return_removed() {
        let unit = eliminate_dead_code(parse("def f() {\n return 1\n g()\n}"));
        let f = function(&unit, "f");
        assert_eq!(f.body.len(), 1);
        assert!(!f.falls_through);
    }

    #[test]
    fn test_loop_carried_variables_live() {
        let source = "def sum(n) {\n i = 0\n s = 0\n while (i < n) {\n s = s + i\n i = i + 1\n }\n return s\n}";
        let unit = eliminate_dead_code(parse(source));
        let body = &function(&unit, "sum").body;
        assert_eq!(body.len(), 4);
        match &body[2].kind {
            StmtKind::While { body, .. } => match &body.kind {
                StmtKind::Block(inner) => assert_eq!(inner.len(), 2),
                other => panic!("expected block, got {:?}", other),
            },
            other => panic!("expected while, got {:?}", other),
        }
    }

    #[test]
    fn test_dead_loop_variable_removed() {
        let source = "def f(n) {\n i = 0\n t = 0\n while (i < n) {\n t = i\n i = i + 1\n }\n return 0\n}";
        let unit = eliminate_dead_code(parse(source));
        let body = &function(&unit, "f").body;
        assert_eq!(body.len(), 3);
        assert_eq!(assigned(&body[0]), Some("i"));
        match &body[1].kind {
            StmtKind::While { body, .. } => match &body.kind {
                StmtKind::Block(inner) => {
                    assert_eq!(inner.len(), 1);
                    assert_eq!(assigned(&inner[0]), Some("i"));
                }
                other => panic!("expected block, got {:?}", other),
            },
            other => panic!("expected while, got {:?}", other),
        }
    }

    #[test]
    fn test_field_writes_kept() {
        let unit = eliminate_dead_code(parse("class C {\n x = 0\n def set(v) {\n x = v\n }\n}"));
        assert_eq!(function(&unit, "set").body.len(), 1);
    }

    #[test]
    fn test_parameter_shadows_field() {
        let unit = eliminate_dead_code(parse("class C {\n x\n def set(x) {\n x = 1\n }\n}"));
        assert!(function(&unit, "set").body.is_empty());
    }

    #[test]
    fn test_falls_through() {
        let unit = eliminate_dead_code(parse(
            "def both(c) {\n if (c) { return 1 } else { return 2 }\n}\ndef one(c) {\n if (c) { return 1 }\n}",
        ));
        assert!(!function(&unit, "both").falls_through);
        assert!(function(&unit, "one").falls_through);
    }

    #[test]
    fn test_constant_condition_selects_branch() {
        let unit = eliminate_dead_code(parse("def f() {\n if (false) { g() }\n while (false) { g() }\n return 1\n}"));
        assert_eq!(function(&unit, "f").body.len(), 1);

        let unit = eliminate_dead_code(parse("def f() {\n if (1) { g() } else { h() }\n}"));
        let body = &function(&unit, "f").body;
        assert_eq!(body.len(), 1);
        assert!(matches!(body[0].kind, StmtKind::Block(_)));
    }

    #[test]
    fn test_empty_if_with_call_in_condition_kept() {
        let unit = eliminate_dead_code(parse("def f() {\n if (g()) { x = 1 }\n}"));
        let body = &function(&unit, "f").body;
        assert_eq!(body.len(), 1);
        assert!(matches!(&body[0].kind, StmtKind::If { then_branch, .. } if is_empty_block(then_branch)));
    }

    #[test]
    fn test_assignment_in_condition_kept() {
        let unit = eliminate_dead_code(parse("def f() {\n x = 1\n if ((x = 2) > 5) { }\n return x\n}"));
        let body = &function(&unit, "f").body;
        assert_eq!(body.len(), 2);
        assert!(matches!(&body[0].kind, StmtKind::If { then_branch, .. } if is_empty_block(then_branch)));

        let unit = eliminate_dead_code(parse("def f() {\n x = 1\n if ((x = 2) > 5) { y = 3 }\n return x\n}"));
        let body = &function(&unit, "f").body;
        assert_eq!(body.len(), 2);
        assert!(matches!(&body[0].kind, StmtKind::If { then_branch, else_branch: None, .. } if is_empty_block(then_branch)));
    }

    #[test]
    fn test_condition_assigning_dead_name_removed() {
        let unit = eliminate_dead_code(parse("def f() {\n if ((t = 2) > 5) { y = 3 }\n return 1\n}"));
        assert_eq!(function(&unit, "f").body.len(), 1);
    }

    #[test]
    fn test_main_statements() {
        let unit = eliminate_dead_code(parse("x = 1\ny = 2\nprint(x)\ndef f() { return 1 }"));
        let main: Vec<_> = unit.main_statements().collect();
        assert_eq!(main.len(), 2);
        assert_eq!(assigned(main[0]), Some("x"));
        assert!(unit.main_falls_through);
        assert_eq!(unit.functions().count(), 1);
    }

    #[test]
    fn test_return_in_main_keeps_later_declarations() {
        let unit = eliminate_dead_code(parse("return\nprint(1)\ndef f() { return 1 }"));
        assert_eq!(unit.main_statements().count(), 1);
        assert_eq!(unit.functions().count(), 1);
        assert!(!unit.main_falls_through);
    }

    #[test]
    fn test_idempotent() {
        let source = "\
def f(n, c) {
    a = 1
    b = 2
    i = 0
    while (i < n) {
        if (c) { a = a + i } else { b = i }
        i = i + 1
    }
    for (k = 0; k < n; k = k + 1) {
        unused = k
        g(k)
    }
    if (c) { return a } else { x = 3 }
    return 0
    g()
}
class P {
    v = 1
    def bump(d) {
        t = d * 2
        v = v + d
    }
}
y = f(3, true)
z = 4
print(y)";
        let once = eliminate_dead_code(parse(source));
        let twice = eliminate_dead_code(once.clone());
        assert_eq!(once, twice);
    }
}
