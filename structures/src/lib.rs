/// Level 3 of the Sentient compiler pipeline.
///
/// Adds structured values and compile-time control flow on top of the
/// arithmetic machine: arrays, function definitions inlined at every
/// call site, dynamic scoping through hash frames, and the iteration
/// instructions that expand into per-element calls. Nothing here
/// survives into the CNF: by the time Level 2 runs, every call has been
/// flattened into straight-line arithmetic.
pub mod combinatorics;
pub mod error;
pub mod functions;
pub mod instruction;
pub mod machine;
pub mod value;

pub use error::{Error, ErrorKind};
pub use functions::{CallStack, Function, FunctionId, Functions};
pub use instruction::{Const, Instr, TypeSpec};
pub use machine::Machine;
pub use value::Value;
