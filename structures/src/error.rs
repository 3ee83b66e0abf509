/// Level-tagged errors for the Level 3 machine.
use std::fmt;

#[derive(Debug, Clone)]
pub enum ErrorKind {
    StackUnderflow,
    UndefinedSymbol(String),
    TypeError {
        expected: &'static str,
        found: &'static str,
    },
    UnknownFunction(String),
    /// An attempt to redefine a standard library function.
    ImmutableFunction(String),
    /// Carries the rendered call-chain trace.
    Recursion(String),
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
    },
    IndexOutOfBounds {
        index: usize,
        length: usize,
    },
    /// A structured value is malformed for the operation.
    Structure(String),
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
            ErrorKind::UnknownFunction(name) => {
                write!(f, "unknown function `{name}`")
            }
            ErrorKind::ImmutableFunction(name) => {
                write!(f, "cannot redefine the standard function `{name}`")
            }
            ErrorKind::Recursion(trace) => write!(f, "{trace}"),
            ErrorKind::ArityMismatch {
                function,
                expected,
                found,
            } => write!(
                f,
                "function `{function}` takes {expected} arguments but received {found}"
            ),
            ErrorKind::IndexOutOfBounds { index, length } => write!(
                f,
                "index {index} is out of bounds for an array of length {length}"
            ),
            ErrorKind::Structure(message) => write!(f, "{message}"),
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
            "level 3 failed on instruction `{}`: {}",
            self.instruction, self.kind
        )
    }
}

impl std::error::Error for Error {}
