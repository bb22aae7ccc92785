use super::value::Constant;

/// 1-based source position of a node's first token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Span { line, column }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,

    // Comparison
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    // Logic (short-circuit)
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::LtEq
                | BinaryOp::GtEq
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::LtEq => "<=",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        write!(f, "{}", symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Not => write!(f, "!"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr { kind, span }
    }

    pub fn constant(value: Constant, span: Span) -> Self {
        Expr::new(ExprKind::Constant(value), span)
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match &self.kind {
            ExprKind::Constant(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Literal value.
    Constant(Constant),

    /// Read of a local variable or a field of the enclosing class.
    Variable(String),

    /// `left op right`.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `op operand`.
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// `name(args)` or `receiver.name(args)`.
    Call {
        receiver: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },

    /// `target = value`. Evaluates to the assigned value.
    Assign { target: String, value: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Stmt { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Expression evaluated for its effect; any value is discarded.
    Expression(Expr),

    /// `return` or `return expr`.
    Return(Option<Expr>),

    /// `if (condition) then_branch [else else_branch]`
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    /// `while (condition) body`
    While { condition: Expr, body: Box<Stmt> },

    /// `for (init; condition; update) body`. Every clause is optional; a
    /// missing condition loops until a `return`.
    For {
        init: Option<Expr>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },

    /// `{ statements }`
    Block(Vec<Stmt>),

    FunctionDef(FunctionDef),

    ClassDef(ClassDef),

    /// Field declaration; only appears among a class's members.
    Field(FieldDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub span: Span,
}

/// `def name(params) { body }`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Parameter>,
    pub body: Vec<Stmt>,
    pub span: Span,

    /// Whether control can reach the end of `body` without a `return`.
    /// The parser assumes it can; dead-code elimination refines it.
    pub falls_through: bool,

    /// Local slot assignment, filled in by slot allocation.
    pub slots: Option<SlotTable>,
}

impl FunctionDef {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// `class Name { members }`
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    /// `FunctionDef` and `Field` statements in source order.
    pub members: Vec<Stmt>,
    pub span: Span,
}

impl ClassDef {
    pub fn fields(&self) -> impl Iterator<Item = &FieldDecl> {
        self.members.iter().filter_map(|member| match &member.kind {
            StmtKind::Field(field) => Some(field),
            _ => None,
        })
    }

    pub fn methods(&self) -> impl Iterator<Item = &FunctionDef> {
        self.members.iter().filter_map(|member| match &member.kind {
            StmtKind::FunctionDef(function) => Some(function),
            _ => None,
        })
    }

    pub fn methods_mut(&mut self) -> impl Iterator<Item = &mut FunctionDef> {
        self.members.iter_mut().filter_map(|member| match &mut member.kind {
            StmtKind::FunctionDef(function) => Some(function),
            _ => None,
        })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields().any(|field| field.name == name)
    }
}

/// `name` or `name = initializer` inside a class body.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub initializer: Option<Expr>,
    pub span: Span,
}

/// Name-to-slot mapping for one function's activation.
///
/// Slots are handed out in order of first appearance and never reused.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotTable {
    names: Vec<String>,
}

impl SlotTable {
    /// Receiver name occupying slot 0 of instance methods.
    pub const RECEIVER: &'static str = "this";

    pub fn new(has_receiver: bool) -> Self {
        let mut table = SlotTable::default();
        if has_receiver {
            table.declare(Self::RECEIVER);
        }
        table
    }

    /// Returns the slot of `name`, allocating the next free one on first
    /// sight.
    pub fn declare(&mut self, name: &str) -> usize {
        if let Some(slot) = self.slot_of(name) {
            return slot;
        }
        self.names.push(name.to_string());
        self.names.len() - 1
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}
