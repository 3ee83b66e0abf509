/// The Level 1 instruction set.
use std::fmt;

/// One machine-code instruction. Instructions are immutable once emitted;
/// the machine never mutates an instruction handed down from Level 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// Push a symbol onto the stack, allocating a fresh unconstrained
    /// literal (plus a tautological reservation clause) if it is unknown.
    Push(String),
    /// Pop the top of the stack and bind its literal to the given symbol.
    Pop(String),
    Not,
    And,
    Or,
    Equal,
    /// Push the memoized constant-true symbol.
    True,
    /// Push the memoized constant-false symbol.
    False,
    /// Record the symbol's literal in the exposed-variable dictionary.
    Variable(String),
    Duplicate,
    Swap,
    /// Pops else, then, cond; pushes `cond ? then : else`.
    If,
    /// Pop one symbol and emit a unit clause forcing it true.
    Invariant,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Push(s) => write!(f, "push {s}"),
            Instr::Pop(s) => write!(f, "pop {s}"),
            Instr::Not => write!(f, "not"),
            Instr::And => write!(f, "and"),
            Instr::Or => write!(f, "or"),
            Instr::Equal => write!(f, "equal"),
            Instr::True => write!(f, "true"),
            Instr::False => write!(f, "false"),
            Instr::Variable(s) => write!(f, "variable {s}"),
            Instr::Duplicate => write!(f, "duplicate"),
            Instr::Swap => write!(f, "swap"),
            Instr::If => write!(f, "if"),
            Instr::Invariant => write!(f, "invariant"),
        }
    }
}
