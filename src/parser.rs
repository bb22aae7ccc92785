use crate::ast::{
    BinaryOp, ClassDef, CompilationUnit, Constant, Expr, ExprKind, FieldDecl, FunctionDef,
    Parameter, Span, Stmt, StmtKind, UnaryOp,
};
use crate::lexer::{Lexer, LexicalError, is_i32_min_magnitude};
use crate::parser_error::SyntaxError;
use crate::token::{Token, TokenKind};

/// Recursive-descent parser for Kiln.
///
/// The parser pulls tokens from the lexer one at a time and keeps exactly one
/// token of lookahead. Every precedence level of the expression grammar is a
/// dedicated method that parses operands of the next-higher level and folds
/// them into a left-associative chain.
///
/// Errors never abort the parse: a failing statement is recorded and the
/// token stream is resynchronized at the next statement keyword or `}`.
pub struct Parser {
    lexer: Lexer,
    current: Token,
    /// Number of tokens consumed so far; used to guarantee progress during
    /// error recovery.
    consumed: usize,
    errors: Vec<SyntaxError>,
}

impl Parser {
    pub fn new(source: &str) -> Self {
        Self::with_lexer(Lexer::new(source))
    }

    pub fn with_lexer(mut lexer: Lexer) -> Self {
        let current = Self::pull(&mut lexer);
        Parser {
            lexer,
            current,
            consumed: 0,
            errors: Vec::new(),
        }
    }

    /// Parses the whole unit, returning a best-effort tree and every syntax
    /// error found on the way.
    pub fn parse(&mut self) -> (CompilationUnit, Vec<SyntaxError>) {
        let mut statements = Vec::new();

        while !self.check(TokenKind::EndOfInput) {
            if self.eat(TokenKind::Semicolon) {
                continue;
            }
            if self.check(TokenKind::RBrace) {
                let err = self.error("unexpected '}' at top level");
                self.errors.push(err);
                self.advance();
                continue;
            }
            if let Some(stmt) = self.recover(Self::parse_statement) {
                statements.push(stmt);
            }
        }

        tracing::debug!(
            statements = statements.len(),
            errors = self.errors.len(),
            "parsed compilation unit"
        );
        (
            CompilationUnit::new(statements),
            std::mem::take(&mut self.errors),
        )
    }

    /// Lexical errors seen while parsing.
    pub fn take_lexical_errors(&mut self) -> Vec<LexicalError> {
        self.lexer.take_errors()
    }

    // =========================================================================
    // Token stream
    // =========================================================================

    /// Comments are meaningless to the grammar, even when the lexer keeps
    /// them.
    fn pull(lexer: &mut Lexer) -> Token {
        loop {
            let token = lexer.next_token();
            if !token.is(TokenKind::Comment) {
                return token;
            }
        }
    }

    fn peek(&self) -> TokenKind {
        self.current.kind
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn span(&self) -> Span {
        Span::new(self.current.line, self.current.column)
    }

    fn advance(&mut self) -> Token {
        if self.check(TokenKind::EndOfInput) {
            return self.current.clone();
        }
        let next = Self::pull(&mut self.lexer);
        self.consumed += 1;
        std::mem::replace(&mut self.current, next)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, SyntaxError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(&format!("expected {}", what)))
        }
    }

    /// Builds an error located at the current token.
    fn error(&self, message: &str) -> SyntaxError {
        let found = match self.current.kind {
            TokenKind::EndOfInput => "end of input".to_string(),
            TokenKind::String => format!("string \"{}\"", self.current.text),
            _ => format!("'{}'", self.current.text),
        };
        SyntaxError {
            message: format!("{}, found {}", message, found),
            line: self.current.line,
            column: self.current.column,
        }
    }

    // =========================================================================
    // Error recovery
    // =========================================================================

    /// Runs `parse`; on failure records the error and skips to the next
    /// synchronization point.
    fn recover<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, SyntaxError>) -> Option<T> {
        let start = self.consumed;
        match parse(self) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::trace!(%err, "recovering from syntax error");
                self.errors.push(err);
                if self.consumed == start {
                    self.advance();
                }
                self.synchronize();
                None
            }
        }
    }

    /// Discards tokens up to a statement keyword or a closing `}`.
    fn synchronize(&mut self) {
        while !self.check(TokenKind::EndOfInput) {
            if self.peek().starts_statement() || self.check(TokenKind::RBrace) {
                return;
            }
            self.advance();
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_statement(&mut self) -> Result<Stmt, SyntaxError> {
        let span = self.span();
        let kind = match self.peek() {
            TokenKind::Def => StmtKind::FunctionDef(self.parse_function()?),
            TokenKind::Class => StmtKind::ClassDef(self.parse_class()?),
            TokenKind::If => self.parse_if()?,
            TokenKind::While => self.parse_while()?,
            TokenKind::For => self.parse_for()?,
            TokenKind::Return => self.parse_return()?,
            TokenKind::LBrace => StmtKind::Block(self.parse_block()?),
            TokenKind::Else => return Err(self.error("'else' without a matching 'if'")),
            _ => StmtKind::Expression(self.parse_expression()?),
        };
        self.eat(TokenKind::Semicolon);
        Ok(Stmt::new(kind, span))
    }

    /// Parses `{ statements }`. A missing closing brace is recorded and the
    /// statements collected so far are kept.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect(TokenKind::LBrace, "'{'")?;

        let mut statements = Vec::new();
        loop {
            match self.peek() {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::EndOfInput => {
                    let err = self.error("expected '}' to close block");
                    self.errors.push(err);
                    break;
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                _ => {
                    if let Some(stmt) = self.recover(Self::parse_statement) {
                        statements.push(stmt);
                    }
                }
            }
        }
        Ok(statements)
    }

    /// Parses a function definition:
    ///
    /// ```text
    /// def <name> ( <param>, ... ) { <body> }
    /// ```
    fn parse_function(&mut self) -> Result<FunctionDef, SyntaxError> {
        let span = self.span();
        self.advance(); // consume 'def'

        let name = self.expect(TokenKind::Identifier, "function name after 'def'")?;
        self.expect(TokenKind::LParen, "'(' after function name")?;

        let mut params = Vec::new();
        while self.check(TokenKind::Identifier) {
            let param = self.advance();
            params.push(Parameter {
                span: Span::new(param.line, param.column),
                name: param.text,
            });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        if !self.eat(TokenKind::RParen) {
            let err = self.error("expected ')' after parameters");
            if self.check(TokenKind::LBrace) {
                // The body follows directly; treat the ')' as present.
                self.errors.push(err);
            } else {
                return Err(err);
            }
        }

        let body = self.parse_block()?;

        Ok(FunctionDef {
            name: name.text,
            params,
            body,
            span,
            falls_through: true,
            slots: None,
        })
    }

    /// Parses a class:
    ///
    /// ```text
    /// class <Name> {
    ///   <field> [= <expr>]
    ///   def <method>(...) { ... }
    /// }
    /// ```
    fn parse_class(&mut self) -> Result<ClassDef, SyntaxError> {
        let span = self.span();
        self.advance(); // consume 'class'

        let name = self.expect(TokenKind::Identifier, "class name after 'class'")?;
        self.expect(TokenKind::LBrace, "'{' after class name")?;

        let mut members = Vec::new();
        loop {
            match self.peek() {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::EndOfInput => {
                    let err = self.error("expected '}' to close class body");
                    self.errors.push(err);
                    break;
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                _ => {
                    if let Some(member) = self.recover(Self::parse_member) {
                        members.push(member);
                    }
                }
            }
        }

        Ok(ClassDef {
            name: name.text,
            members,
            span,
        })
    }

    fn parse_member(&mut self) -> Result<Stmt, SyntaxError> {
        let span = self.span();
        match self.peek() {
            TokenKind::Def => Ok(Stmt::new(
                StmtKind::FunctionDef(self.parse_function()?),
                span,
            )),
            TokenKind::Identifier => {
                let name = self.advance();
                let initializer = if self.eat(TokenKind::Assign) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                self.eat(TokenKind::Semicolon);
                Ok(Stmt::new(
                    StmtKind::Field(FieldDecl {
                        name: name.text,
                        initializer,
                        span,
                    }),
                    span,
                ))
            }
            _ => Err(self.error("expected field or method declaration in class body")),
        }
    }

    fn parse_parenthesized(&mut self, after: &str) -> Result<Expr, SyntaxError> {
        self.expect(TokenKind::LParen, &format!("'(' after '{}'", after))?;
        let expr = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')' after condition")?;
        Ok(expr)
    }

    fn parse_if(&mut self) -> Result<StmtKind, SyntaxError> {
        self.advance(); // consume 'if'
        let condition = self.parse_parenthesized("if")?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.eat(TokenKind::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self) -> Result<StmtKind, SyntaxError> {
        self.advance(); // consume 'while'
        let condition = self.parse_parenthesized("while")?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::While { condition, body })
    }

    /// `for (init; condition; update) body`, every clause optional.
    fn parse_for(&mut self) -> Result<StmtKind, SyntaxError> {
        self.advance(); // consume 'for'
        self.expect(TokenKind::LParen, "'(' after 'for'")?;

        let init = self.parse_optional_clause(TokenKind::Semicolon)?;
        self.expect(TokenKind::Semicolon, "';' after loop initializer")?;
        let condition = self.parse_optional_clause(TokenKind::Semicolon)?;
        self.expect(TokenKind::Semicolon, "';' after loop condition")?;
        let update = self.parse_optional_clause(TokenKind::RParen)?;
        self.expect(TokenKind::RParen, "')' after loop clauses")?;

        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::For {
            init,
            condition,
            update,
            body,
        })
    }

    fn parse_optional_clause(&mut self, terminator: TokenKind) -> Result<Option<Expr>, SyntaxError> {
        if self.check(terminator) {
            Ok(None)
        } else {
            self.parse_expression().map(Some)
        }
    }

    /// A value follows `return` only when it starts on the same line.
    fn parse_return(&mut self) -> Result<StmtKind, SyntaxError> {
        let keyword = self.advance();
        let value = if self.peek().starts_expression() && self.current.line == keyword.line {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(StmtKind::Return(value))
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    pub fn parse_expression(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_assignment()
    }

    /// `target = value`, right-associative.
    fn parse_assignment(&mut self) -> Result<Expr, SyntaxError> {
        let target = self.parse_or()?;
        if !self.check(TokenKind::Assign) {
            return Ok(target);
        }

        let assign = self.error("invalid assignment target");
        self.advance(); // consume '='
        let value = self.parse_assignment()?;

        match target.kind {
            ExprKind::Variable(name) => Ok(Expr::new(
                ExprKind::Assign {
                    target: name,
                    value: Box::new(value),
                },
                target.span,
            )),
            _ => Err(SyntaxError {
                message: "invalid assignment target".to_string(),
                ..assign
            }),
        }
    }

    fn parse_binary_level(
        &mut self,
        operand: fn(&mut Self) -> Result<Expr, SyntaxError>,
        operators: &[(TokenKind, BinaryOp)],
    ) -> Result<Expr, SyntaxError> {
        let mut left = operand(self)?;

        while let Some(op) = operators
            .iter()
            .find(|(kind, _)| self.check(*kind))
            .map(|(_, op)| *op)
        {
            self.advance();
            let right = operand(self)?;
            let span = left.span;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary_level(Self::parse_and, &[(TokenKind::OrOr, BinaryOp::Or)])
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary_level(Self::parse_equality, &[(TokenKind::AndAnd, BinaryOp::And)])
    }

    fn parse_equality(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary_level(
            Self::parse_relational,
            &[
                (TokenKind::EqEq, BinaryOp::Eq),
                (TokenKind::NotEq, BinaryOp::NotEq),
            ],
        )
    }

    fn parse_relational(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary_level(
            Self::parse_additive,
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::LtEq, BinaryOp::LtEq),
                (TokenKind::GtEq, BinaryOp::GtEq),
            ],
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary_level(
            Self::parse_multiplicative,
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Sub),
            ],
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary_level(
            Self::parse_unary,
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        let span = self.span();
        self.advance();
        if op == UnaryOp::Neg && self.check(TokenKind::Number) && is_i32_min_magnitude(&self.current.text) {
            self.advance();
            return Ok(Expr::constant(Constant::Int(i32::MIN), span));
        }
        let operand = self.parse_unary()?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    /// Method calls: `expr.name(args)`, chained left to right.
    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;

        while self.eat(TokenKind::Dot) {
            let name = self.expect(TokenKind::Identifier, "method name after '.'")?;
            let args = self.parse_arguments()?;
            let span = expr.span;
            expr = Expr::new(
                ExprKind::Call {
                    receiver: Some(Box::new(expr)),
                    name: name.text,
                    args,
                },
                span,
            );
        }

        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        self.expect(TokenKind::LParen, "'(' to open argument list")?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')' to close argument list")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();

        match self.peek() {
            TokenKind::Number => {
                let token = self.advance();
                if is_i32_min_magnitude(&token.text) {
                    return Err(SyntaxError {
                        message: format!("integer literal {} only fits in 32 bits when negated", token.text),
                        line: token.line,
                        column: token.column,
                    });
                }
                Ok(Expr::constant(number_constant(&token.text), span))
            }
            TokenKind::String => {
                let token = self.advance();
                Ok(Expr::constant(Constant::Str(token.text), span))
            }
            TokenKind::Boolean => {
                let token = self.advance();
                Ok(Expr::constant(Constant::Bool(token.text == "true"), span))
            }
            TokenKind::Identifier => {
                let name = self.advance().text;
                if self.check(TokenKind::LParen) {
                    let args = self.parse_arguments()?;
                    Ok(Expr::new(
                        ExprKind::Call {
                            receiver: None,
                            name,
                            args,
                        },
                        span,
                    ))
                } else {
                    Ok(Expr::new(ExprKind::Variable(name), span))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')' after expression")?;
                Ok(expr)
            }
            _ => Err(self.error("expected expression")),
        }
    }
}

/// Converts a number lexeme. Out-of-range integers were already reported by
/// the lexer and become `0`.
fn number_constant(text: &str) -> Constant {
    if text.contains(['.', 'e', 'E']) {
        Constant::Float(text.parse().unwrap_or(0.0))
    } else {
        Constant::Int(text.parse().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> CompilationUnit {
        let (unit, errors) = Parser::new(source).parse();
        assert!(errors.is_empty(), "unexpected syntax errors: {:?}", errors);
        unit
    }

    fn parse_errors(source: &str) -> (CompilationUnit, Vec<SyntaxError>) {
        Parser::new(source).parse()
    }

    fn expr(source: &str) -> Expr {
        let unit = parse(source);
        match unit.statements.into_iter().next().map(|s| s.kind) {
            Some(StmtKind::Expression(expr)) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    /// Renders an expression fully parenthesized to make shape assertions
    /// readable.
    fn sexpr(expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Constant(c) => c.to_string(),
            ExprKind::Variable(name) => name.clone(),
            ExprKind::Binary { op, left, right } => {
                format!("({} {} {})", sexpr(left), op, sexpr(right))
            }
            ExprKind::Unary { op, operand } => format!("({}{})", op, sexpr(operand)),
            ExprKind::Call {
                receiver,
                name,
                args,
            } => {
                let args: Vec<_> = args.iter().map(sexpr).collect();
                match receiver {
                    Some(r) => format!("{}.{}({})", sexpr(r), name, args.join(", ")),
                    None => format!("{}({})", name, args.join(", ")),
                }
            }
            ExprKind::Assign { target, value } => format!("({} = {})", target, sexpr(value)),
        }
    }

    #[test]
    fn test_function_definition() {
        let unit = parse("def add(a, b) { return a + b }");
        let function = unit.functions().next().expect("function");
        assert_eq!(function.name, "add");
        let params: Vec<_> = function.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(params, vec!["a", "b"]);
        assert_eq!(function.body.len(), 1);
        match &function.body[0].kind {
            StmtKind::Return(Some(value)) => assert_eq!(sexpr(value), "(a + b)"),
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(sexpr(&expr("x = 1 + 2 * 3")), "(x = (1 + (2 * 3)))");
        assert_eq!(sexpr(&expr("(1 + 2) * 3")), "((1 + 2) * 3)");
        assert_eq!(
            sexpr(&expr("a < b && c == d || e")),
            "(((a < b) && (c == d)) || e)"
        );
        assert_eq!(sexpr(&expr("a + b >= c % d")), "((a + b) >= (c % d))");
    }

    #[test]
    fn test_left_associativity() {
        assert_eq!(sexpr(&expr("a - b - c")), "((a - b) - c)");
        assert_eq!(sexpr(&expr("a / b * c")), "((a / b) * c)");
    }

    #[test]
    fn test_assignment_is_right_associative() {
        assert_eq!(sexpr(&expr("a = b = 3")), "(a = (b = 3))");
    }

    #[test]
    fn test_unary() {
        assert_eq!(sexpr(&expr("-x * !y")), "((-x) * (!y))");
        assert_eq!(sexpr(&expr("--1")), "(-(-1))");
    }

    #[test]
    fn test_smallest_integer_literal() {
        assert_eq!(expr("-2147483648").as_constant(), Some(&Constant::Int(i32::MIN)));
        assert_eq!(sexpr(&expr("1 - -2147483648")), "(1 - -2147483648)");

        let (_, errors) = parse_errors("x = 2147483648");
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert_eq!((errors[0].line, errors[0].column), (1, 5));
        assert!(errors[0].message.contains("when negated"));
    }

    #[test]
    fn test_calls() {
        assert_eq!(sexpr(&expr("f(1, g(x))")), "f(1, g(x))");
        assert_eq!(sexpr(&expr("p.move(1, 2)")), "p.move(1, 2)");
        assert_eq!(sexpr(&expr("a.b().c(d)")), "a.b().c(d)");
        assert_eq!(sexpr(&expr("f()")), "f()");
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            expr("\"hi\"").as_constant(),
            Some(&Constant::Str("hi".to_string()))
        );
        assert_eq!(expr("true").as_constant(), Some(&Constant::Bool(true)));
        assert_eq!(expr("2.5").as_constant(), Some(&Constant::Float(2.5)));
        assert_eq!(expr("17").as_constant(), Some(&Constant::Int(17)));
    }

    #[test]
    fn test_if_else_chain() {
        let unit = parse("if (a) { x = 1 } else if (b) x = 2 else { x = 3 }");
        match &unit.statements[0].kind {
            StmtKind::If {
                else_branch: Some(else_branch),
                ..
            } => assert!(matches!(
                else_branch.kind,
                StmtKind::If {
                    else_branch: Some(_),
                    ..
                }
            )),
            other => panic!("expected if/else, got {:?}", other),
        }
    }

    #[test]
    fn test_while_and_for() {
        let unit = parse("while (i < 10) { i = i + 1 }\nfor (i = 0; i < 3; i = i + 1) { f(i) }");
        assert!(matches!(unit.statements[0].kind, StmtKind::While { .. }));
        match &unit.statements[1].kind {
            StmtKind::For {
                init: Some(_),
                condition: Some(_),
                update: Some(_),
                ..
            } => {}
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_for_with_empty_clauses() {
        let unit = parse("def f() { for (;;) { return 1 } }");
        let function = unit.functions().next().expect("function");
        assert!(matches!(
            function.body[0].kind,
            StmtKind::For {
                init: None,
                condition: None,
                update: None,
                ..
            }
        ));
    }

    #[test]
    fn test_class_members() {
        let unit = parse("class Point {\n  x = 0\n  y;\n  def norm() { return x * x + y * y }\n}");
        let class = unit.classes().next().expect("class");
        assert_eq!(class.name, "Point");
        let fields: Vec<_> = class.fields().map(|f| f.name.as_str()).collect();
        assert_eq!(fields, vec!["x", "y"]);
        assert!(class.fields().next().is_some_and(|f| f.initializer.is_some()));
        assert_eq!(class.methods().count(), 1);
    }

    #[test]
    fn test_bare_return() {
        let unit = parse("def f() { return }\ndef g() {\n  return\n  x = 1\n}");
        let functions: Vec<_> = unit.functions().collect();
        assert!(matches!(functions[0].body[0].kind, StmtKind::Return(None)));
        assert!(matches!(functions[1].body[0].kind, StmtKind::Return(None)));
        assert_eq!(functions[1].body.len(), 2);
    }

    #[test]
    fn test_semicolons_are_optional() {
        let unit = parse("a = 1; b = 2;; c = 3\nd = 4");
        assert_eq!(unit.statements.len(), 4);
    }

    #[test]
    fn test_spans() {
        let unit = parse("\n  x = 1 + y");
        assert_eq!(unit.statements[0].span, Span::new(2, 3));
    }

    #[test]
    fn test_missing_parameter_close_reports_once() {
        let (unit, errors) = parse_errors("def f( { return 1 }");
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert_eq!((errors[0].line, errors[0].column), (1, 8));
        let function = unit.functions().next().expect("function kept");
        assert_eq!(function.name, "f");
        assert_eq!(function.body.len(), 1);
    }

    #[test]
    fn test_recovery_resumes_at_next_statement() {
        let (unit, errors) = parse_errors("x = ;\nreturn 2");
        assert_eq!(errors.len(), 1);
        assert_eq!((errors[0].line, errors[0].column), (1, 5));
        assert!(errors[0].message.contains("expected expression"));
        assert!(matches!(unit.statements[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn test_recovery_inside_block() {
        let (unit, errors) = parse_errors("def f() {\n  y = * 2\n  return 3\n}\ndef g() { }");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 2);
        let functions: Vec<_> = unit.functions().collect();
        assert_eq!(functions.len(), 2);
        assert!(matches!(functions[0].body[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let (_, errors) = parse_errors("a = )\nif (b { }\nreturn ]");
        assert!(errors.len() >= 2, "{:?}", errors);
    }

    #[test]
    fn test_invalid_assignment_target() {
        let (_, errors) = parse_errors("1 = 2");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.starts_with("invalid assignment target"));
        assert_eq!((errors[0].line, errors[0].column), (1, 3));
    }

    #[test]
    fn test_stray_closing_brace() {
        let (unit, errors) = parse_errors("}\nx = 1");
        assert_eq!(errors.len(), 1);
        assert_eq!(unit.statements.len(), 1);
    }

    #[test]
    fn test_else_without_if() {
        let (unit, errors) = parse_errors("else x = 1\nreturn");
        assert_eq!(errors.len(), 1);
        assert!(
            unit.statements
                .iter()
                .any(|s| matches!(s.kind, StmtKind::Return(None)))
        );
    }

    #[test]
    fn test_unclosed_block_at_end_of_input() {
        let (unit, errors) = parse_errors("def f() { return 1");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("end of input"));
        assert_eq!(unit.functions().count(), 1);
    }

    #[test]
    fn test_bad_class_member_recovers() {
        let (unit, errors) = parse_errors("class A { 42\n def m() { return 1 } }");
        assert_eq!(errors.len(), 1);
        let class = unit.classes().next().expect("class");
        assert_eq!(class.methods().count(), 1);
    }

    #[test]
    fn test_lexical_errors_are_available() {
        let mut parser = Parser::new("x = 1 @ 2");
        let _ = parser.parse();
        assert_eq!(parser.take_lexical_errors().len(), 1);
    }
}
