/// Level 2 of the Sentient compiler pipeline.
///
/// A typed stack machine over Booleans and two's-complement integers.
/// Integers are ordered lists of Level 1 bit symbols, most significant
/// first, with bit 0 the sign. Arithmetic widens so intermediates never
/// wrap: add and subtract grow one bit, multiply grows to the sum of the
/// operand widths, and truncation happens only when a value is popped
/// into a symbol with a declared width.
pub mod encoding;
pub mod error;
pub mod instruction;
pub mod machine;

pub use encoding::{decode, encode, width_for};
pub use error::{Error, ErrorKind};
pub use instruction::{Const, Instr};
pub use machine::Machine;
