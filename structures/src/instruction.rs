/// The Level 3 instruction set.
use std::fmt;

pub use arith::Const;

/// A declared shape: scalars with widths, arrays of nested shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    Boolean,
    Integer { width: u32 },
    Array { length: usize, element: Box<TypeSpec> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// Declare a symbol with fresh unconstrained Level 2 backing.
    Typedef {
        symbol: String,
        spec: TypeSpec,
        /// Bind into the innermost frame rather than the context.
        local: bool,
    },
    Push {
        symbol: String,
    },
    /// Pop into `symbol`, truncating against any declared width. A
    /// `local` pop binds into the innermost frame unconditionally.
    Pop {
        symbol: String,
        local: bool,
    },
    Constant(Const),
    Not,
    And,
    Or,
    /// Structural over arrays, bitwise over scalars.
    Equal,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Divmod,
    Negate,
    Absolute,
    LessThan,
    GreaterThan,
    LessEqual,
    GreaterEqual,
    Duplicate,
    Swap,
    /// Pops else, then, cond; arrays select element-wise.
    If,
    Invariant,
    /// Expose a symbol: records its shape and exposes every scalar
    /// constituent to Level 2.
    Variable {
        symbol: String,
    },
    Collect {
        count: usize,
    },
    /// Static member access, bounds-checked at compile time.
    Fetch {
        index: usize,
    },
    /// Pop an index and an array; push the selected member.
    Get,
    /// Pop an array, push its length as a constant.
    Length,
    /// Begin collecting a function body; instructions stream in until
    /// the matching `Return`.
    Define {
        name: String,
        args: Vec<String>,
        dynamic: bool,
        immutable: bool,
    },
    /// Terminates a body, declaring how many values it leaves behind.
    Return {
        count: usize,
    },
    /// Inline the named function at this point in the stream.
    Call {
        name: String,
        argc: usize,
    },
    /// Push a first-class reference to the named function.
    Pointer {
        name: String,
    },
    /// Pop a pointer and an array; call once per element.
    Each,
    /// Pop a pointer and an array; call once per ordered pair.
    EachPair,
    /// Call once per k-combination, passed as an array argument.
    EachCombination {
        size: usize,
    },
    /// Call once per consecutive window, passed as an array argument.
    EachCons {
        size: usize,
    },
    /// Call once per chunk (the final chunk may be short).
    EachSlice {
        size: usize,
    },
    /// Fold the array through a two-argument function.
    Reduce {
        with_initial: bool,
    },
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Typedef { symbol, local, .. } => {
                if *local {
                    write!(f, "typedef {symbol} local")
                } else {
                    write!(f, "typedef {symbol}")
                }
            }
            Instr::Push { symbol } => write!(f, "push {symbol}"),
            Instr::Pop { symbol, local } => {
                if *local {
                    write!(f, "pop {symbol} local")
                } else {
                    write!(f, "pop {symbol}")
                }
            }
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
            Instr::Length => write!(f, "length"),
            Instr::Define { name, args, .. } => {
                write!(f, "define {name}/{}", args.len())
            }
            Instr::Return { count } => write!(f, "return {count}"),
            Instr::Call { name, argc } => write!(f, "call {name}/{argc}"),
            Instr::Pointer { name } => write!(f, "pointer {name}"),
            Instr::Each => write!(f, "each"),
            Instr::EachPair => write!(f, "eachpair"),
            Instr::EachCombination { size } => {
                write!(f, "eachcombination {size}")
            }
            Instr::EachCons { size } => write!(f, "eachcons {size}"),
            Instr::EachSlice { size } => write!(f, "eachslice {size}"),
            Instr::Reduce { with_initial } => {
                if *with_initial {
                    write!(f, "reduce initial")
                } else {
                    write!(f, "reduce")
                }
            }
        }
    }
}
