use crate::bytecode::compile::FunctionFailure;
use crate::bytecode::compile_error::GenerationError;
use crate::lexer::{LexicalError, LexicalErrorKind};
use crate::parser_error::SyntaxError;

/// Anything reported while compiling one unit.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Diagnostic {
    #[error("lexical error: {0}")]
    Lexical(#[from] LexicalError),

    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("in '{function}': {error}")]
    Generation { function: String, error: GenerationError },
}

impl Diagnostic {
    /// Whether this diagnostic makes the unit as a whole fail. An
    /// unterminated block comment only swallows the rest of the file.
    pub fn fails_unit(&self) -> bool {
        match self {
            Diagnostic::Lexical(error) => error.kind != LexicalErrorKind::UnterminatedComment,
            Diagnostic::Syntax(_) | Diagnostic::Generation { .. } => true,
        }
    }

    /// `(line, column)` when the diagnostic points into the source.
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            Diagnostic::Lexical(error) => Some((error.line, error.column)),
            Diagnostic::Syntax(error) => Some((error.line, error.column)),
            Diagnostic::Generation { error, .. } => error.span().map(|span| (span.line, span.column)),
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Diagnostic::Lexical(error) => match error.kind {
                LexicalErrorKind::UnterminatedString => Some("close the string with '\"' before the end of the line"),
                LexicalErrorKind::UnterminatedComment => Some("close the comment with '*/'"),
                LexicalErrorKind::MalformedLiteral(_) => Some("check the literal's digits; integers must fit in 32 bits"),
                LexicalErrorKind::UnrecognizedCharacter(_) => None,
            },
            Diagnostic::Syntax(_) => None,
            Diagnostic::Generation { error, .. } => error.hint(),
        }
    }
}

impl From<FunctionFailure> for Diagnostic {
    fn from(failure: FunctionFailure) -> Self {
        Diagnostic::Generation {
            function: failure.function,
            error: failure.error,
        }
    }
}
