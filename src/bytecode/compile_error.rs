use crate::ast::Span;

/// Failure while generating one method. The generator abandons the method
/// and moves on to the next one.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("{span}: undefined variable '{name}'")]
    UndefinedVariable { name: String, span: Span },

    #[error("{span}: cannot resolve call to '{name}' with {arity} argument(s)")]
    UnresolvedCall { name: String, arity: usize, span: Span },

    #[error("{span}: '{name}' returns no value")]
    VoidValue { name: String, span: Span },

    #[error("{span}: {what} is not supported")]
    Unsupported { what: String, span: Span },

    #[error("jump to a label that is never marked")]
    UnmarkedLabel,

    #[error("label marked twice")]
    LabelAlreadyMarked,

    #[error("jump from {from} to {to} does not fit a 16-bit offset")]
    JumpOutOfRange { from: usize, to: usize },

    #[error("constant pool is full")]
    PoolOverflow,

    #[error("{count} local slots exceed the limit of 256")]
    TooManyLocals { count: usize },

    #[error("method code is {size} bytes, the limit is 65535")]
    CodeTooLarge { size: usize },

    #[error("stack underflow at {address}")]
    StackUnderflow { address: usize },
}

impl GenerationError {
    pub fn unsupported(what: impl Into<String>, span: Span) -> Self {
        GenerationError::Unsupported {
            what: what.into(),
            span,
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            GenerationError::UndefinedVariable { .. } => {
                Some("assign the variable before reading it, or declare it as a field")
            }
            GenerationError::VoidValue { .. } => {
                Some("return a value from the function, or call it as a statement")
            }
            GenerationError::Unsupported { what, .. } if what.starts_with("floating") => {
                Some("the target machine only has integers and strings")
            }
            GenerationError::Unsupported { .. } => {
                Some("functions and classes must be declared at the top level")
            }
            GenerationError::TooManyLocals { .. } | GenerationError::CodeTooLarge { .. } => {
                Some("split the function into smaller functions")
            }
            _ => None,
        }
    }

    /// Source position, for errors tied to a node.
    pub fn span(&self) -> Option<Span> {
        match self {
            GenerationError::UndefinedVariable { span, .. }
            | GenerationError::UnresolvedCall { span, .. }
            | GenerationError::VoidValue { span, .. }
            | GenerationError::Unsupported { span, .. } => Some(*span),
            _ => None,
        }
    }
}
