use std::fmt::Write;

use crate::token::{Token, TokenKind};

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints the lexeme instead of the Debug form
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Token]) {
        print!("{}", self.render(tokens));
    }

    pub fn render(&self, tokens: &[Token]) -> String {
        let mut out = String::new();
        for token in tokens {
            self.render_one(&mut out, token);
        }
        out
    }

    fn render_one(&self, out: &mut String, token: &Token) {
        let kind = category(token.kind);
        let colr = if self.color { color(token.kind) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };
        let _ = write!(out, "[{:02}:{:02}] {}{:<8} ", token.line, token.column, colr, kind);

        if self.show_debug_repr {
            let _ = writeln!(out, "{:?} {:?}{}", token.kind, token.text, reset);
            return;
        }
        let _ = match token.kind {
            TokenKind::Comment => writeln!(out, "COMMENT: {}{}", token.text, reset),
            TokenKind::EndOfInput => writeln!(out, "EOF{}", reset),
            _ => writeln!(out, "{}{}", token, reset),
        };
    }
}

fn category(kind: TokenKind) -> &'static str {
    use TokenKind::*;
    match kind {
        Comment => "COMMENT",
        EndOfInput => "EOF",

        Number => "NUMBER",
        String => "STRING",
        Boolean => "BOOL",

        Identifier => "IDENT",

        LParen | RParen => "PAREN",
        LBracket | RBracket => "BRACKET",
        LBrace | RBrace => "BRACE",
        Semicolon | Comma | Dot => "PUNCT",

        Plus | Minus | Star | Slash | Percent | Assign => "OP",
        EqEq | NotEq | Lt | LtEq | Gt | GtEq => "CMP",
        Bang | AndAnd | OrOr => "LOGIC",

        Class | Def | If | Else | For | While | Return => "KEYWORD",
    }
}

fn color(kind: TokenKind) -> &'static str {
    use TokenKind::*;
    match kind {
        Comment | EndOfInput => TokenDumper::DIM,
        String => TokenDumper::GRN,
        Number | Boolean => TokenDumper::CYN,
        Identifier => TokenDumper::YEL,
        Plus | Minus | Star | Slash | Percent | Assign => TokenDumper::MAG,
        EqEq | NotEq | Lt | LtEq | Gt | GtEq | Bang | AndAnd | OrOr => TokenDumper::MAG,
        _ => TokenDumper::RESET,
    }
}
