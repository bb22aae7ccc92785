//! # kiln
//!
//! Compiles a small class-based scripting language to bytecode for a stack
//! machine:
//!
//! ```text
//! source -> Lexer -> Parser -> AST -> fold -> dce -> slots
//!        -> resolve -> code generator -> binary artifact
//! ```
//!
//! [`CompileSession`] runs the whole pipeline for one unit at a time.

pub mod ast;
pub mod bytecode;
pub mod config;
pub mod diagnostics;
pub mod emit;
pub mod lexer;
pub mod parser;
pub mod parser_error;
pub mod passes;
pub mod resolve;
pub mod token;
pub mod token_dumper;

pub use bytecode::CompiledModule;
pub use config::CompilerConfig;
pub use diagnostics::Diagnostic;

use crate::ast::CompilationUnit;
use crate::bytecode::compile::compile_unit;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::resolve::DescriptorCache;
use crate::token::Token;

/// Result of compiling one unit.
#[derive(Debug)]
pub struct CompileOutput {
    /// `None` only when the module class itself could not be registered.
    pub module: Option<CompiledModule>,
    /// Lexical, then syntax, then generation diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutput {
    pub fn failed(&self) -> bool {
        self.module.is_none() || self.diagnostics.iter().any(Diagnostic::fails_unit)
    }
}

/// Owns the configuration and the descriptor cache shared by every unit
/// compiled through it.
pub struct CompileSession {
    config: CompilerConfig,
    cache: DescriptorCache,
}

impl Default for CompileSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CompileSession {
    pub fn new() -> Self {
        Self::with_config(CompilerConfig::default())
    }

    pub fn with_config(config: CompilerConfig) -> Self {
        CompileSession {
            config,
            cache: DescriptorCache::new(),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn descriptor_cache(&self) -> &DescriptorCache {
        &self.cache
    }

    /// Token stream of `source`, ending with `EndOfInput`.
    pub fn tokens(&self, source: &str) -> Vec<Token> {
        Lexer::new(source)
            .preserve_comments(self.config.preserve_comments)
            .tokenize()
    }

    /// Parses `source` without transforming it.
    pub fn parse(&self, source: &str) -> (CompilationUnit, Vec<Diagnostic>) {
        let lexer = Lexer::new(source).preserve_comments(self.config.preserve_comments);
        let mut parser = Parser::with_lexer(lexer);
        let (unit, syntax_errors) = parser.parse();

        let mut diagnostics: Vec<Diagnostic> = parser
            .take_lexical_errors()
            .into_iter()
            .map(Diagnostic::from)
            .collect();
        diagnostics.extend(syntax_errors.into_iter().map(Diagnostic::from));
        (unit, diagnostics)
    }

    /// Parses and runs the enabled passes.
    pub fn transform(&self, source: &str) -> (CompilationUnit, Vec<Diagnostic>) {
        let (unit, diagnostics) = self.parse(source);
        (passes::run_passes(unit, &self.config), diagnostics)
    }

    pub fn compile(&mut self, source: &str) -> CompileOutput {
        let (unit, mut diagnostics) = self.transform(source);

        let module = match compile_unit(&unit, &self.config, &mut self.cache) {
            Ok(output) => {
                diagnostics.extend(output.failures.into_iter().map(Diagnostic::from));
                #[cfg(debug_assertions)]
                if let Err((method, error)) = bytecode::stack_check::check_module(&output.module) {
                    tracing::warn!(%method, %error, "generated code fails the stack check");
                }
                Some(output.module)
            }
            Err(error) => {
                diagnostics.push(Diagnostic::Generation {
                    function: self.config.module_name.clone(),
                    error,
                });
                None
            }
        };

        tracing::debug!(
            diagnostics = diagnostics.len(),
            cached_descriptors = self.cache.len(),
            "unit compiled"
        );
        CompileOutput { module, diagnostics }
    }
}
