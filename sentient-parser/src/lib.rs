/// Hand-written lexer and recursive-descent parser for the Sentient
/// constraint language.
pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod token;

pub use error::ParseError;
pub use parser::parse_program;
