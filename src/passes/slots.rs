use std::collections::HashSet;

use crate::ast::visit::{Visitor, walk_expr};
use crate::ast::{ClassDef, CompilationUnit, Expr, ExprKind, FunctionDef, SlotTable, Stmt, StmtKind};

/// Annotates every function, method and the implicit main with its slot
/// table.
pub fn allocate_slots(mut unit: CompilationUnit) -> CompilationUnit {
    unit.main_slots = Some(allocate_main(&unit.statements));

    for stmt in &mut unit.statements {
        match &mut stmt.kind {
            StmtKind::FunctionDef(function) => {
                function.slots = Some(allocate_function(function, None));
            }
            StmtKind::ClassDef(class) => annotate_class(class),
            _ => {}
        }
    }
    unit
}

fn annotate_class(class: &mut ClassDef) {
    let fields: HashSet<String> = class.fields().map(|field| field.name.clone()).collect();
    for method in class.methods_mut() {
        method.slots = Some(allocate_function(method, Some(&fields)));
    }
}

/// Slot table for a function body.
///
/// Methods (`fields` is `Some`) reserve slot 0 for the receiver. Parameters
/// come next in declaration order, then every other assigned name in order of
/// first appearance. Assignments to a field of the enclosing class do not get
/// a slot unless a parameter shadows the field.
pub fn allocate_function(function: &FunctionDef, fields: Option<&HashSet<String>>) -> SlotTable {
    let mut table = SlotTable::new(fields.is_some());
    for param in &function.params {
        table.declare(&param.name);
    }

    let mut collector = LocalCollector {
        table,
        fields,
        params: function.params.iter().map(|p| p.name.as_str()).collect(),
    };
    for stmt in &function.body {
        collector.visit_stmt(stmt);
    }
    collector.table
}

/// Slot table for the top-level statements forming the implicit main.
pub fn allocate_main(statements: &[Stmt]) -> SlotTable {
    let mut collector = LocalCollector {
        table: SlotTable::new(false),
        fields: None,
        params: HashSet::new(),
    };
    for stmt in statements {
        collector.visit_stmt(stmt);
    }
    collector.table
}

struct LocalCollector<'a> {
    table: SlotTable,
    fields: Option<&'a HashSet<String>>,
    params: HashSet<&'a str>,
}

impl Visitor for LocalCollector<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Assign { target, .. } = &expr.kind {
            let is_field = self.fields.is_some_and(|fields| fields.contains(target))
                && !self.params.contains(target.as_str());
            if !is_field {
                self.table.declare(target);
            }
        }
        walk_expr(self, expr);
    }

    // Nested declarations get their own tables.
    fn visit_function(&mut self, _function: &FunctionDef) {}

    fn visit_class(&mut self, _class: &ClassDef) {}
}
