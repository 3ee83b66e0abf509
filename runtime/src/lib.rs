/// The runtime boundary around an external SAT solver.
///
/// `encode` turns named program values into the signed literals a
/// solver should assume; `decode` turns a satisfying assignment back
/// into named values. Both resolve names through the metadata's three
/// variable dictionaries, so they work on any compiled program without
/// re-running the pipeline.
mod error;

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use cnf::{Lit, Metadata, Shape};

pub use error::{Error, ErrorKind};

/// A concrete value crossing the solver boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Array(Vec<Value>),
}

/// Translate named values into the signed literals that pin them.
///
/// Names must be exposed (declared through `vary`); each value must
/// match its declared shape and fit its declared width.
pub fn encode(
    metadata: &Metadata,
    values: &BTreeMap<String, Value>,
) -> Result<Vec<Lit>, Error> {
    let mut literals = Vec::new();
    for (name, value) in values {
        let shape = metadata
            .level3_variables
            .get(name)
            .ok_or_else(|| Error::variable(name, ErrorKind::UnknownVariable))?;
        encode_shape(metadata, name, shape, value, &mut literals)?;
    }
    Ok(literals)
}

/// Translate a satisfying assignment back into every exposed value.
pub fn decode(metadata: &Metadata, assignment: &[Lit]) -> Result<BTreeMap<String, Value>, Error> {
    let mut polarity: FxHashMap<Lit, bool> = FxHashMap::default();
    for &lit in assignment {
        polarity.insert(lit.abs(), lit > 0);
    }

    let mut values = BTreeMap::new();
    for (name, shape) in &metadata.level3_variables {
        values.insert(name.clone(), decode_shape(metadata, name, shape, &polarity)?);
    }
    Ok(values)
}

fn encode_shape(
    metadata: &Metadata,
    name: &str,
    shape: &Shape,
    value: &Value,
    literals: &mut Vec<Lit>,
) -> Result<(), Error> {
    match (shape, value) {
        (Shape::Boolean { symbol }, Value::Boolean(b)) => {
            let bits = bit_literals(metadata, name, symbol)?;
            let &[lit] = bits.as_slice() else {
                return Err(Error::variable(name, ErrorKind::DanglingSymbol(symbol.clone())));
            };
            literals.push(if *b { lit } else { -lit });
            Ok(())
        }
        (Shape::Integer { symbol }, Value::Integer(v)) => {
            let bits = bit_literals(metadata, name, symbol)?;
            let width = bits.len() as u32;
            let encoded = arith::encode(*v, width).map_err(|_| {
                Error::variable(name, ErrorKind::OutOfRange { value: *v, width })
            })?;
            for (lit, bit) in bits.iter().zip(encoded) {
                literals.push(if bit { *lit } else { -lit });
            }
            Ok(())
        }
        (Shape::Array { elements }, Value::Array(members)) => {
            if elements.len() != members.len() {
                return Err(Error::variable(
                    name,
                    ErrorKind::LengthMismatch {
                        expected: elements.len(),
                        found: members.len(),
                    },
                ));
            }
            for (element, member) in elements.iter().zip(members) {
                encode_shape(metadata, name, element, member, literals)?;
            }
            Ok(())
        }
        (shape, value) => Err(Error::variable(
            name,
            ErrorKind::ShapeMismatch {
                expected: shape_name(shape),
                found: value_name(value),
            },
        )),
    }
}

fn decode_shape(
    metadata: &Metadata,
    name: &str,
    shape: &Shape,
    polarity: &FxHashMap<Lit, bool>,
) -> Result<Value, Error> {
    match shape {
        Shape::Boolean { symbol } => {
            let bits = bit_literals(metadata, name, symbol)?;
            let &[lit] = bits.as_slice() else {
                return Err(Error::variable(name, ErrorKind::DanglingSymbol(symbol.clone())));
            };
            Ok(Value::Boolean(read(polarity, name, lit)?))
        }
        Shape::Integer { symbol } => {
            let bits = bit_literals(metadata, name, symbol)?;
            let mut values = Vec::with_capacity(bits.len());
            for lit in bits {
                values.push(read(polarity, name, lit)?);
            }
            Ok(Value::Integer(arith::decode(&values)))
        }
        Shape::Array { elements } => {
            let mut members = Vec::with_capacity(elements.len());
            for element in elements {
                members.push(decode_shape(metadata, name, element, polarity)?);
            }
            Ok(Value::Array(members))
        }
    }
}

/// Resolve a Level 2 symbol to its literals, MSB first.
fn bit_literals(metadata: &Metadata, name: &str, symbol: &str) -> Result<Vec<Lit>, Error> {
    let group = metadata
        .level2_variables
        .get(symbol)
        .ok_or_else(|| Error::variable(name, ErrorKind::DanglingSymbol(symbol.to_string())))?;
    group
        .symbols
        .iter()
        .map(|bit| {
            metadata
                .level1_variables
                .get(bit)
                .copied()
                .ok_or_else(|| Error::variable(name, ErrorKind::DanglingSymbol(bit.clone())))
        })
        .collect()
}

fn read(polarity: &FxHashMap<Lit, bool>, name: &str, lit: Lit) -> Result<bool, Error> {
    polarity
        .get(&lit.abs())
        .copied()
        .ok_or_else(|| Error::variable(name, ErrorKind::UnassignedLiteral(lit.abs())))
}

fn shape_name(shape: &Shape) -> &'static str {
    match shape {
        Shape::Boolean { .. } => "boolean",
        Shape::Integer { .. } => "integer",
        Shape::Array { .. } => "array",
    }
}

fn value_name(value: &Value) -> &'static str {
    match value {
        Value::Boolean(_) => "boolean",
        Value::Integer(_) => "integer",
        Value::Array(_) => "array",
    }
}
