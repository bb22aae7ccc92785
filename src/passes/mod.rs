//! AST-to-AST transformation passes.
//!
//! Each pass takes the unit by value and returns the transformed unit. They
//! run in a fixed order: folding first so that dead-code elimination sees
//! constant conditions, slot allocation last so that it only numbers the
//! names that survived.

pub mod dce;
pub mod fold;
pub mod slots;

pub use dce::eliminate_dead_code;
pub use fold::fold_constants;
pub use slots::allocate_slots;

use crate::ast::CompilationUnit;
use crate::config::CompilerConfig;

pub fn run_passes(unit: CompilationUnit, config: &CompilerConfig) -> CompilationUnit {
    let mut unit = unit;
    if config.fold_constants {
        unit = fold_constants(unit);
    }
    if config.eliminate_dead_code {
        unit = eliminate_dead_code(unit);
    }
    if config.annotate_slots {
        unit = allocate_slots(unit);
    }
    unit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn test_disabled_passes_leave_unit_untouched() {
        let (unit, _) = Parser::new("x = 1 + 2\ny = 3").parse();
        let config = CompilerConfig {
            fold_constants: false,
            eliminate_dead_code: false,
            annotate_slots: false,
            ..CompilerConfig::default()
        };
        assert_eq!(run_passes(unit.clone(), &config), unit);
    }

    #[test]
    fn test_folding_feeds_dead_code_elimination() {
        let (unit, _) = Parser::new("def f() {\n if (1 > 2) { g() }\n return 1\n}").parse();
        let unit = run_passes(unit, &CompilerConfig::default());
        let f = unit.functions().next().expect("f");
        assert_eq!(f.body.len(), 1);
        assert!(f.slots.is_some());
    }
}
