/// A syntax error with source location.
///
/// `line` and `column` are 1-based and point at the offending token. For
/// errors at end of input the parser reports the `EndOfInput` token's
/// position, so locations are never `0:0`.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{line}:{column}: {message}")]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}
