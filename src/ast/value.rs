/// Literal value carried by a constant expression.
///
/// Integers use the 32-bit two's-complement domain of the target machine;
/// booleans are materialized as `0`/`1` by the generator.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// 32-bit signed integer.
    Int(i32),

    /// Floating-point literal. Lexed and parsed, but the target machine has
    /// no float support, so the generator rejects it.
    Float(f64),

    /// UTF-8 string.
    Str(String),

    /// `true` / `false`.
    Bool(bool),
}

impl Constant {
    pub fn type_name(&self) -> &'static str {
        match self {
            Constant::Int(_) => "integer",
            Constant::Float(_) => "float",
            Constant::Str(_) => "string",
            Constant::Bool(_) => "boolean",
        }
    }
}

impl std::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "{}", n),
            Constant::Float(n) => write!(f, "{}", n),
            Constant::Str(s) => write!(f, "{:?}", s),
            Constant::Bool(b) => write!(f, "{}", b),
        }
    }
}
