use crate::token::{Token, TokenKind};

/// A problem found while scanning characters. Collected by the lexer, never
/// raised; scanning always continues.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{line}:{column}: {kind}")]
pub struct LexicalError {
    pub kind: LexicalErrorKind,
    pub line: usize,
    pub column: usize,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LexicalErrorKind {
    #[error("malformed literal: {0}")]
    MalformedLiteral(String),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error("unrecognized character '{0}'")]
    UnrecognizedCharacter(char),
}

/// On-demand tokenizer. Each call to [`Lexer::next_token`] scans exactly one
/// token; once the input is exhausted every further call yields
/// `EndOfInput`.
pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    preserve_comments: bool,
    errors: Vec<LexicalError>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            preserve_comments: false,
            errors: Vec::new(),
        }
    }

    /// Emit `Comment` tokens instead of discarding comments.
    pub fn preserve_comments(mut self, preserve: bool) -> Self {
        self.preserve_comments = preserve;
        self
    }

    pub fn errors(&self) -> &[LexicalError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<LexicalError> {
        std::mem::take(&mut self.errors)
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn error(&mut self, kind: LexicalErrorKind, line: usize, column: usize) {
        self.errors.push(LexicalError { kind, line, column });
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    pub fn next_token(&mut self) -> Token {
        loop {
            self.skip_whitespace();
            let (line, column) = (self.line, self.col);

            let Some(ch) = self.current() else {
                return Token::new(TokenKind::EndOfInput, "", line, column);
            };

            if ch == '/' {
                match self.peek() {
                    Some('/') => {
                        let body = self.read_line_comment();
                        if self.preserve_comments {
                            return Token::new(TokenKind::Comment, body, line, column);
                        }
                        continue;
                    }
                    Some('*') => {
                        let body = self.read_block_comment(line, column);
                        match body {
                            Some(body) if self.preserve_comments => {
                                return Token::new(TokenKind::Comment, body, line, column);
                            }
                            _ => continue,
                        }
                    }
                    _ => {}
                }
            }

            if let Some(kind) = self.read_operator() {
                return Token::new(kind, kind.to_string(), line, column);
            }

            if ch.is_ascii_digit() {
                return self.read_number(line, column);
            }

            if ch == '"' || ch == '\'' {
                match self.read_string(line, column) {
                    Some(token) => return token,
                    None => continue,
                }
            }

            if ch.is_alphabetic() || ch == '_' {
                return self.read_identifier(line, column);
            }

            // Hand the parser something it can recover from.
            self.advance();
            self.error(LexicalErrorKind::UnrecognizedCharacter(ch), line, column);
            return Token::new(TokenKind::Identifier, ch.to_string(), line, column);
        }
    }

    /// Scans the whole input. The last token is always `EndOfInput`.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.is(TokenKind::EndOfInput);
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    fn read_line_comment(&mut self) -> String {
        self.advance();
        self.advance();
        let mut comment = String::new();
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            comment.push(ch);
            self.advance();
        }
        comment.trim().to_string()
    }

    fn read_block_comment(&mut self, line: usize, column: usize) -> Option<String> {
        self.advance();
        self.advance();
        let mut comment = String::new();
        loop {
            match self.current() {
                Some('*') if self.peek() == Some('/') => {
                    self.advance();
                    self.advance();
                    return Some(comment.trim().to_string());
                }
                Some(ch) => {
                    comment.push(ch);
                    self.advance();
                }
                None => {
                    self.error(LexicalErrorKind::UnterminatedComment, line, column);
                    return None;
                }
            }
        }
    }

    /// Returns `None` for an unterminated literal. The cursor is then at end
    /// of input.
    fn read_string(&mut self, line: usize, column: usize) -> Option<Token> {
        let quote = self.advance()?;
        let mut string = String::new();

        loop {
            match self.current() {
                Some(ch) if ch == quote => {
                    self.advance();
                    return Some(Token::new(TokenKind::String, string, line, column));
                }
                Some('\\') => {
                    let (esc_line, esc_col) = (self.line, self.col);
                    self.advance();
                    let Some(ch) = self.current() else {
                        break;
                    };
                    let decoded = match ch {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '"' => '"',
                        '\'' => '\'',
                        '\\' => '\\',
                        'b' => '\u{8}',
                        'f' => '\u{c}',
                        other => {
                            self.error(
                                LexicalErrorKind::MalformedLiteral(format!(
                                    "unknown escape sequence '\\{}'",
                                    other
                                )),
                                esc_line,
                                esc_col,
                            );
                            other
                        }
                    };
                    string.push(decoded);
                    self.advance();
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
                None => break,
            }
        }

        self.error(LexicalErrorKind::UnterminatedString, line, column);
        None
    }

    fn read_digits(&mut self, text: &mut String) {
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self, line: usize, column: usize) -> Token {
        let mut text = String::new();
        let mut integral = true;

        self.read_digits(&mut text);

        // Only treat '.' as a decimal point if followed by a digit, so that
        // `1.toString()` style member access stays possible.
        if self.current() == Some('.') && self.peek().is_some_and(|c| c.is_ascii_digit()) {
            integral = false;
            text.push('.');
            self.advance();
            self.read_digits(&mut text);
        }

        if let Some(e @ ('e' | 'E')) = self.current() {
            integral = false;
            text.push(e);
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.current() {
                text.push(sign);
                self.advance();
            }
            if self.current().is_some_and(|c| c.is_ascii_digit()) {
                self.read_digits(&mut text);
            } else {
                self.error(
                    LexicalErrorKind::MalformedLiteral(format!("exponent has no digits in '{}'", text)),
                    line,
                    column,
                );
            }
        }

        if integral && text.parse::<i32>().is_err() && !is_i32_min_magnitude(&text) {
            self.error(
                LexicalErrorKind::MalformedLiteral(format!(
                    "integer literal {} does not fit in 32 bits",
                    text
                )),
                line,
                column,
            );
        }

        Token::new(TokenKind::Number, text, line, column)
    }

    fn read_identifier(&mut self, line: usize, column: usize) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let kind = TokenKind::keyword(&ident).unwrap_or(TokenKind::Identifier);
        Token::new(kind, ident, line, column)
    }

    fn read_operator(&mut self) -> Option<TokenKind> {
        let ch = self.current()?;
        let next = self.peek();

        let (kind, width) = match (ch, next) {
            ('=', Some('=')) => (TokenKind::EqEq, 2),
            ('!', Some('=')) => (TokenKind::NotEq, 2),
            ('<', Some('=')) => (TokenKind::LtEq, 2),
            ('>', Some('=')) => (TokenKind::GtEq, 2),
            ('&', Some('&')) => (TokenKind::AndAnd, 2),
            ('|', Some('|')) => (TokenKind::OrOr, 2),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('=', _) => (TokenKind::Assign, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            ('!', _) => (TokenKind::Bang, 1),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('{', _) => (TokenKind::LBrace, 1),
            ('}', _) => (TokenKind::RBrace, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            (';', _) => (TokenKind::Semicolon, 1),
            (',', _) => (TokenKind::Comma, 1),
            ('.', _) => (TokenKind::Dot, 1),
            _ => return None,
        };

        for _ in 0..width {
            self.advance();
        }
        Some(kind)
    }
}

/// `2147483648` is out of range on its own but is the magnitude of
/// `i32::MIN`; the parser accepts it only as the operand of unary minus.
pub fn is_i32_min_magnitude(text: &str) -> bool {
    text.parse::<i64>() == Ok(1_i64 << 31)
}
