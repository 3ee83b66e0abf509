/// Boundary errors, tagged with the variable being translated.
use std::fmt;

use cnf::Lit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    UnknownVariable,
    ShapeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    LengthMismatch {
        expected: usize,
        found: usize,
    },
    OutOfRange {
        value: i64,
        width: u32,
    },
    /// Metadata names a symbol the lower dictionaries never defined.
    DanglingSymbol(String),
    /// The solver assignment left an exposed literal undetermined.
    UnassignedLiteral(Lit),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnknownVariable => write!(f, "not an exposed variable"),
            ErrorKind::ShapeMismatch { expected, found } => {
                write!(f, "expected a {expected} value, found {found}")
            }
            ErrorKind::LengthMismatch { expected, found } => {
                write!(f, "expected {expected} element(s), found {found}")
            }
            ErrorKind::OutOfRange { value, width } => {
                write!(f, "{value} does not fit in {width} bit(s)")
            }
            ErrorKind::DanglingSymbol(symbol) => {
                write!(f, "symbol `{symbol}` is missing from the dictionaries")
            }
            ErrorKind::UnassignedLiteral(lit) => {
                write!(f, "literal {lit} is not covered by the assignment")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub variable: String,
    pub kind: ErrorKind,
}

impl Error {
    pub fn variable(name: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            variable: name.into(),
            kind,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot translate `{}`: {}", self.variable, self.kind)
    }
}

impl std::error::Error for Error {}
