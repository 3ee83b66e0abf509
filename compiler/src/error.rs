/// Top-level error type for a whole compilation.
///
/// Syntax and lowering problems are Level 4's own; anything raised by
/// the machines below is wrapped and carries its level tag in the
/// inner message.
use std::fmt;

use sentient_parser::ParseError;

use crate::lowering::LoweringError;

#[derive(Debug)]
pub enum CompilerError {
    Syntax(ParseError),
    Lowering(LoweringError),
    Level3(structures::Error),
    Level2(arith::Error),
    Level1(cnf::Error),
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerError::Syntax(err) => err.fmt(f),
            CompilerError::Lowering(err) => err.fmt(f),
            CompilerError::Level3(err) => err.fmt(f),
            CompilerError::Level2(err) => err.fmt(f),
            CompilerError::Level1(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for CompilerError {}

impl From<ParseError> for CompilerError {
    fn from(err: ParseError) -> Self {
        CompilerError::Syntax(err)
    }
}

impl From<LoweringError> for CompilerError {
    fn from(err: LoweringError) -> Self {
        CompilerError::Lowering(err)
    }
}

impl From<structures::Error> for CompilerError {
    fn from(err: structures::Error) -> Self {
        CompilerError::Level3(err)
    }
}

impl From<arith::Error> for CompilerError {
    fn from(err: arith::Error) -> Self {
        CompilerError::Level2(err)
    }
}

impl From<cnf::Error> for CompilerError {
    fn from(err: cnf::Error) -> Self {
        CompilerError::Level1(err)
    }
}
