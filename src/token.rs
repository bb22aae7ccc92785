#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Keywords
    Class,
    Def,
    If,
    Else,
    For,
    While,
    Return,

    // Literals
    Identifier,
    Number,
    String,
    Boolean,

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    // Assignment & comparison
    Assign,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    // Logic
    Bang,
    AndAnd,
    OrOr,

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    Semicolon,
    Comma,
    Dot,

    // Special
    Comment,
    EndOfInput,
}

impl TokenKind {
    /// Maps an identifier-shaped lexeme onto its keyword kind, if it is one.
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        let kind = match ident {
            "class" => TokenKind::Class,
            "def" => TokenKind::Def,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "while" => TokenKind::While,
            "return" => TokenKind::Return,
            "true" | "false" => TokenKind::Boolean,
            _ => return None,
        };
        Some(kind)
    }

    /// Keywords the parser resynchronizes on after a syntax error.
    pub fn starts_statement(self) -> bool {
        matches!(
            self,
            TokenKind::Class
                | TokenKind::Def
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::For
                | TokenKind::While
                | TokenKind::Return
        )
    }

    /// True for tokens that may begin an expression.
    pub fn starts_expression(self) -> bool {
        matches!(
            self,
            TokenKind::Identifier
                | TokenKind::Number
                | TokenKind::String
                | TokenKind::Boolean
                | TokenKind::LParen
                | TokenKind::Minus
                | TokenKind::Bang
        )
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TokenKind::Class => "class",
            TokenKind::Def => "def",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::For => "for",
            TokenKind::While => "while",
            TokenKind::Return => "return",
            TokenKind::Identifier => "identifier",
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::Boolean => "boolean",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Assign => "=",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::Bang => "!",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Semicolon => ";",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Comment => "comment",
            TokenKind::EndOfInput => "end of input",
        };
        write!(f, "{}", text)
    }
}

/// A lexed token with its source position.
///
/// `line` and `column` are 1-based and point at the first character of the
/// lexeme (the opening quote for strings).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Self {
        Token {
            kind,
            text: text.into(),
            line,
            column,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TokenKind::String => write!(f, "\"{}\"", self.text),
            TokenKind::Identifier | TokenKind::Number | TokenKind::Boolean => {
                write!(f, "{}", self.text)
            }
            TokenKind::Comment => write!(f, "// {}", self.text),
            kind => write!(f, "{}", kind),
        }
    }
}
