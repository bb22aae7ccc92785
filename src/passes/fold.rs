use crate::ast::visit::{Rewriter, rewrite_expr_children};
use crate::ast::{BinaryOp, CompilationUnit, Constant, Expr, ExprKind, UnaryOp};

/// Bottom-up constant folder.
///
/// Children are folded before their parent, so a whole constant subtree
/// collapses in one traversal. Anything that would fail at runtime (division
/// by a constant zero) is left in place for the runtime to report.
#[derive(Default)]
pub struct ConstantFolder {
    pub folded: usize,
}

impl Rewriter for ConstantFolder {
    fn rewrite_expr(&mut self, expr: Expr) -> Expr {
        let expr = rewrite_expr_children(self, expr);

        let folded = match &expr.kind {
            ExprKind::Binary { op, left, right } => match (left.as_constant(), right.as_constant()) {
                (Some(l), Some(r)) => fold_binary(*op, l, r),
                _ => None,
            },
            ExprKind::Unary { op, operand } => operand.as_constant().and_then(|v| fold_unary(*op, v)),
            _ => None,
        };

        match folded {
            Some(value) => {
                self.folded += 1;
                Expr::constant(value, expr.span)
            }
            None => expr,
        }
    }
}

pub fn fold_constants(unit: CompilationUnit) -> CompilationUnit {
    let mut folder = ConstantFolder::default();
    let CompilationUnit {
        statements,
        main_slots,
        main_falls_through,
    } = unit;

    let statements = statements
        .into_iter()
        .map(|stmt| folder.rewrite_stmt(stmt))
        .collect();

    tracing::debug!(folded = folder.folded, "constant folding done");
    CompilationUnit {
        statements,
        main_slots,
        main_falls_through,
    }
}

/// Evaluates `left op right` in the target's 32-bit wrapping domain.
/// Returns `None` when the operation cannot or must not be folded.
pub fn fold_binary(op: BinaryOp, left: &Constant, right: &Constant) -> Option<Constant> {
    use Constant::{Bool, Int, Str};

    let value = match (op, left, right) {
        (BinaryOp::Add, Int(a), Int(b)) => Int(a.wrapping_add(*b)),
        (BinaryOp::Sub, Int(a), Int(b)) => Int(a.wrapping_sub(*b)),
        (BinaryOp::Mul, Int(a), Int(b)) => Int(a.wrapping_mul(*b)),
        (BinaryOp::Div | BinaryOp::Rem, Int(_), Int(0)) => return None,
        (BinaryOp::Div, Int(a), Int(b)) => Int(a.wrapping_div(*b)),
        (BinaryOp::Rem, Int(a), Int(b)) => Int(a.wrapping_rem(*b)),

        (BinaryOp::Add, Str(a), Str(b)) => Str(format!("{}{}", a, b)),

        (BinaryOp::Eq, Int(a), Int(b)) => Bool(a == b),
        (BinaryOp::NotEq, Int(a), Int(b)) => Bool(a != b),
        (BinaryOp::Lt, Int(a), Int(b)) => Bool(a < b),
        (BinaryOp::Gt, Int(a), Int(b)) => Bool(a > b),
        (BinaryOp::LtEq, Int(a), Int(b)) => Bool(a <= b),
        (BinaryOp::GtEq, Int(a), Int(b)) => Bool(a >= b),

        (BinaryOp::Eq, Str(a), Str(b)) => Bool(a == b),
        (BinaryOp::NotEq, Str(a), Str(b)) => Bool(a != b),
        (BinaryOp::Eq, Bool(a), Bool(b)) => Bool(a == b),
        (BinaryOp::NotEq, Bool(a), Bool(b)) => Bool(a != b),

        (BinaryOp::And, Bool(a), Bool(b)) => Bool(*a && *b),
        (BinaryOp::Or, Bool(a), Bool(b)) => Bool(*a || *b),

        _ => return None,
    };
    Some(value)
}

pub fn fold_unary(op: UnaryOp, operand: &Constant) -> Option<Constant> {
    match (op, operand) {
        (UnaryOp::Neg, Constant::Int(n)) => Some(Constant::Int(n.wrapping_neg())),
        (UnaryOp::Not, Constant::Bool(b)) => Some(Constant::Bool(!b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::StmtKind;
    use crate::parser::Parser;

    fn fold_expr(source: &str) -> Expr {
        let (unit, errors) = Parser::new(source).parse();
        assert!(errors.is_empty(), "{:?}", errors);
        let unit = fold_constants(unit);
        match unit.statements.into_iter().next().map(|s| s.kind) {
            Some(StmtKind::Expression(expr)) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    fn folds_to(source: &str) -> Constant {
        match fold_expr(source).kind {
            ExprKind::Constant(value) => value,
            other => panic!("'{}' did not fold: {:?}", source, other),
        }
    }

    #[test]
    fn test_precedence_is_respected() {
        assert_eq!(folds_to("2 + 3 * 4"), Constant::Int(14));
        assert_eq!(folds_to("(2 + 3) * 4"), Constant::Int(20));
        assert_eq!(folds_to("100 - 10 - 1"), Constant::Int(89));
    }

    #[test]
    fn test_integer_division_truncates() {
        assert_eq!(folds_to("7 / 2"), Constant::Int(3));
        assert_eq!(folds_to("-7 / 2"), Constant::Int(-3));
        assert_eq!(folds_to("-7 % 3"), Constant::Int(-1));
    }

    #[test]
    fn test_wrapping_arithmetic() {
        assert_eq!(folds_to("2147483647 + 1"), Constant::Int(i32::MIN));
        assert_eq!(folds_to("65536 * 65536"), Constant::Int(0));
    }

    #[test]
    fn test_division_by_zero_is_left_alone() {
        let expr = fold_expr("1 + 6 / 0");
        match expr.kind {
            ExprKind::Binary { op, left, right } => {
                assert_eq!(op, BinaryOp::Add);
                assert_eq!(left.as_constant(), Some(&Constant::Int(1)));
                assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Div, .. }));
            }
            other => panic!("expected unfolded division, got {:?}", other),
        }
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(folds_to("1 + 1 == 2"), Constant::Bool(true));
        assert_eq!(folds_to("3 < 2 || 4 >= 4"), Constant::Bool(true));
        assert_eq!(folds_to("!(true && false)"), Constant::Bool(true));
        assert_eq!(folds_to("\"a\" != \"b\""), Constant::Bool(true));
    }

    #[test]
    fn test_unary_and_strings() {
        assert_eq!(folds_to("-(3 * 3)"), Constant::Int(-9));
        assert_eq!(folds_to("\"ab\" + \"c\""), Constant::Str("abc".to_string()));
    }

    #[test]
    fn test_partial_folding_keeps_variables() {
        let expr = fold_expr("x * (2 + 3)");
        match expr.kind {
            ExprKind::Binary { left, right, .. } => {
                assert!(matches!(left.kind, ExprKind::Variable(_)));
                assert_eq!(right.as_constant(), Some(&Constant::Int(5)));
            }
            other => panic!("expected binary, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_types_not_folded() {
        assert!(fold_expr("1 + \"a\"").as_constant().is_none());
        assert!(fold_expr("1.5 + 2").as_constant().is_none());
    }

    #[test]
    fn test_folds_inside_function_bodies() {
        let (unit, _) = Parser::new("def f() { return 6 * 7 }").parse();
        let unit = fold_constants(unit);
        let function = unit.functions().next().expect("function");
        match &function.body[0].kind {
            StmtKind::Return(Some(value)) => assert_eq!(value.as_constant(), Some(&Constant::Int(42))),
            other => panic!("expected return, got {:?}", other),
        }
    }
}
