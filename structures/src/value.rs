/// A Level 3 value bound in the context table.
use rustc_hash::FxHashMap;

use crate::functions::FunctionId;

#[derive(Debug, Clone)]
pub enum Value {
    /// A Boolean backed by one Level 2 symbol.
    Boolean { symbol: String },
    /// An integer backed by one Level 2 symbol. A declared width sticks
    /// to the binding and re-truncates every assignment.
    Integer {
        symbol: String,
        width: Option<u32>,
    },
    Array(Vec<Value>),
    /// A name-to-name table; function frames bind their arguments
    /// through one of these.
    Hash(FxHashMap<String, String>),
    /// A first-class reference to a defined function.
    Pointer(FunctionId),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Boolean { .. } => "a boolean",
            Value::Integer { .. } => "an integer",
            Value::Array(_) => "an array",
            Value::Hash(_) => "a hash",
            Value::Pointer(_) => "a function pointer",
        }
    }
}
