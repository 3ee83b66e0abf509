/// Level 4 of the Sentient pipeline.
///
/// Takes Sentient source text through the whole stack: parse, expand
/// the standard library and iteration macros into Level 3
/// instructions, then run the three machines below until DIMACS CNF
/// text falls out the bottom.
pub mod error;
pub mod lowering;
pub mod pipeline;
pub mod stdlib;

pub use error::CompilerError;
pub use lowering::LoweringError;
pub use pipeline::{compile, CompileOptions, CompiledProgram};
