/// Level 1 of the Sentient compiler pipeline.
///
/// A stack machine over single Boolean-valued symbols. Every gate
/// instruction pops its operands, mints one fresh symbol and one fresh
/// literal, and emits the Tseitin clauses that force the fresh literal to
/// equal the gate's truth table. The final artifact is DIMACS CNF text with
/// a structured metadata comment header.
pub mod error;
pub mod instruction;
pub mod machine;
pub mod metadata;
pub mod registry;
pub mod writer;

#[cfg(feature = "test-support")]
pub mod sim;

pub use error::{Error, ErrorKind};
pub use instruction::Instr;
pub use machine::{Machine, Output};
pub use metadata::{BitGroup, GroupKind, Metadata, Shape};
pub use registry::Registry;
pub use writer::Writer;

/// A signed, non-zero reference to a Boolean variable. The magnitude is a
/// 1-based variable index; the sign is the polarity. Zero never appears
/// inside a clause (it is the DIMACS terminator only).
pub type Lit = i32;

/// A disjunction of literals. Gate clauses carry at most three literals.
pub type Clause = smallvec::SmallVec<[Lit; 4]>;
