/// Level-tagged errors for the Level 2 machine.
use std::fmt;

#[derive(Debug, Clone)]
pub enum ErrorKind {
    StackUnderflow,
    UndefinedSymbol(String),
    /// An operand's type does not match what the instruction requires.
    TypeError {
        expected: &'static str,
        found: &'static str,
    },
    /// A statically known index falls outside the array bounds.
    IndexOutOfBounds {
        index: i64,
        length: usize,
    },
    /// A structured value is malformed (wrong arity, mixed element types).
    Structure(String),
    UnrepresentableConstant {
        value: i64,
        width: u32,
    },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::StackUnderflow => write!(f, "pop on empty stack"),
            ErrorKind::UndefinedSymbol(name) => {
                write!(f, "undefined symbol `{name}`")
            }
            ErrorKind::TypeError { expected, found } => {
                write!(f, "type error: expected {expected}, found {found}")
            }
            ErrorKind::IndexOutOfBounds { index, length } => {
                write!(
                    f,
                    "index {index} is out of bounds for an array of length {length}"
                )
            }
            ErrorKind::Structure(message) => write!(f, "{message}"),
            ErrorKind::UnrepresentableConstant { value, width } => {
                write!(f, "constant {value} does not fit in {width} bits")
            }
        }
    }
}

/// An error tagged with the instruction that raised it.
#[derive(Debug, Clone)]
pub struct Error {
    pub instruction: String,
    pub kind: ErrorKind,
}

impl Error {
    pub fn at(instruction: impl fmt::Display, kind: ErrorKind) -> Self {
        Self {
            instruction: instruction.to_string(),
            kind,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "level 2 failed on instruction `{}`: {}",
            self.instruction, self.kind
        )
    }
}

impl std::error::Error for Error {}
