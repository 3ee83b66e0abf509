/// The Level 2 instruction set.
use std::fmt;

/// A literal constant handed down from Level 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Const {
    Boolean(bool),
    Integer(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// Declare a Boolean symbol backed by one fresh unconstrained bit.
    Boolean { symbol: String },
    /// Declare an integer symbol backed by `width` fresh unconstrained
    /// bits, MSB first.
    Integer { symbol: String, width: u32 },
    Push { symbol: String },
    /// Pop into `symbol`. A declared width truncates (or sign extends)
    /// the popped integer; this is the only place narrowing happens.
    Pop { symbol: String, width: Option<u32> },
    /// Push a fresh symbol holding the constant at its minimal width.
    Constant(Const),
    Not,
    And,
    Or,
    /// Booleans or integers; mixed operand kinds are a type error.
    Equal,
    Add,
    Subtract,
    Multiply,
    /// Truncating division: quotient toward zero.
    Divide,
    /// Remainder carrying the dividend's sign.
    Modulo,
    /// Pushes the quotient, then the remainder.
    Divmod,
    Negate,
    Absolute,
    LessThan,
    GreaterThan,
    LessEqual,
    GreaterEqual,
    Duplicate,
    Swap,
    /// Pops else, then, cond; pushes `cond ? then : else`.
    If,
    Invariant,
    /// Record the symbol's bit group in the exposed-variable dictionary
    /// and expose each constituent bit to Level 1.
    Variable { symbol: String },
    /// Pop `count` symbols into an array, first pushed first.
    Collect { count: usize },
    /// Pop an array and push its member at a fixed index.
    Fetch { index: usize },
    /// Pop an index and an array; push the selected member, with a
    /// bounds invariant on the index. A statically known out-of-range
    /// index fails at compile time.
    Get,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Boolean { symbol } => write!(f, "boolean {symbol}"),
            Instr::Integer { symbol, width } => {
                write!(f, "integer {symbol} width {width}")
            }
            Instr::Push { symbol } => write!(f, "push {symbol}"),
            Instr::Pop { symbol, width: None } => write!(f, "pop {symbol}"),
            Instr::Pop {
                symbol,
                width: Some(w),
            } => write!(f, "pop {symbol} width {w}"),
            Instr::Constant(Const::Boolean(b)) => write!(f, "constant {b}"),
            Instr::Constant(Const::Integer(i)) => write!(f, "constant {i}"),
            Instr::Not => write!(f, "not"),
            Instr::And => write!(f, "and"),
            Instr::Or => write!(f, "or"),
            Instr::Equal => write!(f, "equal"),
            Instr::Add => write!(f, "add"),
            Instr::Subtract => write!(f, "subtract"),
            Instr::Multiply => write!(f, "multiply"),
            Instr::Divide => write!(f, "divide"),
            Instr::Modulo => write!(f, "modulo"),
            Instr::Divmod => write!(f, "divmod"),
            Instr::Negate => write!(f, "negate"),
            Instr::Absolute => write!(f, "absolute"),
            Instr::LessThan => write!(f, "lessthan"),
            Instr::GreaterThan => write!(f, "greaterthan"),
            Instr::LessEqual => write!(f, "lessequal"),
            Instr::GreaterEqual => write!(f, "greaterequal"),
            Instr::Duplicate => write!(f, "duplicate"),
            Instr::Swap => write!(f, "swap"),
            Instr::If => write!(f, "if"),
            Instr::Invariant => write!(f, "invariant"),
            Instr::Variable { symbol } => write!(f, "variable {symbol}"),
            Instr::Collect { count } => write!(f, "collect {count}"),
            Instr::Fetch { index } => write!(f, "fetch {index}"),
            Instr::Get => write!(f, "get"),
        }
    }
}
