/// Level-tagged errors for the Level 1 machine.
use std::fmt;

#[derive(Debug, Clone)]
pub enum ErrorKind {
    /// A pop was attempted on an empty stack.
    StackUnderflow,
    /// A symbol was referenced before anything bound it.
    UndefinedSymbol(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::StackUnderflow => write!(f, "pop on empty stack"),
            ErrorKind::UndefinedSymbol(name) => {
                write!(f, "undefined symbol `{name}`")
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
            "level 1 failed on instruction `{}`: {}",
            self.instruction, self.kind
        )
    }
}

impl std::error::Error for Error {}
