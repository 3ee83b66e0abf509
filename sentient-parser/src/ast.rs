/// AST for the Sentient constraint language.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

#[derive(Clone, Debug)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

/// A declared type. `int` defaults to eight bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeSpec {
    Bool,
    Int { width: u32 },
    Array { length: usize, element: Box<TypeSpec> },
}

/// `=` or one of the compound assignment operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Clone, Debug)]
pub struct FunctionDecl {
    /// None for anonymous function literals.
    pub name: Option<String>,
    pub args: Vec<String>,
    /// `function^` resolves missed lookups through the caller's frame.
    pub dynamic: bool,
    pub body: Vec<Stmt>,
    pub returns: Vec<Expr>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Declaration {
        spec: TypeSpec,
        names: Vec<String>,
        span: Span,
    },
    /// `a, b = expr, expr` or a compound `a += expr`.
    Assignment {
        targets: Vec<String>,
        op: AssignOp,
        values: Vec<Expr>,
        span: Span,
    },
    Invariant {
        exprs: Vec<Expr>,
        span: Span,
    },
    /// Marks names whose solutions the caller wants surfaced.
    Vary {
        names: Vec<String>,
        span: Span,
    },
    Function(FunctionDecl),
    Expr(Expr),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Neq,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Clone, Debug)]
pub enum Expr {
    Integer {
        value: i64,
        span: Span,
    },
    Boolean {
        value: bool,
        span: Span,
    },
    Ident {
        name: String,
        span: Span,
    },
    Array {
        elements: Vec<Expr>,
        span: Span,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
        span: Span,
    },
    /// `f(args)` with a named callee.
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    /// `receiver.name(args)`; parens are optional for zero arguments.
    Method {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    /// `object[index]`.
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    Function(Box<FunctionDecl>),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Integer { span, .. }
            | Expr::Boolean { span, .. }
            | Expr::Ident { span, .. }
            | Expr::Array { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Ternary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Method { span, .. }
            | Expr::Index { span, .. } => *span,
            Expr::Function(decl) => decl.span,
        }
    }
}
