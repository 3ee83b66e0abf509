/// Metadata threaded through every compiler level into the CNF header.
///
/// Each level records how its exposed symbols map onto the level below:
/// Level 3 names resolve to Level 2 symbols, Level 2 symbols to ordered
/// Level 1 bit symbols, and Level 1 symbols to literals. The writer
/// flattens the three dictionaries into a single `variables` object so a
/// caller can go straight from a friendly name to literal indices.
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::Lit;

/// The shape of an exposed Level 3 value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Boolean { symbol: String },
    Integer { symbol: String },
    Array { elements: Vec<Shape> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Boolean,
    Integer,
}

/// A Level 2 symbol's constituent Level 1 bit symbols, MSB first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BitGroup {
    #[serde(rename = "type")]
    pub kind: GroupKind,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
    pub level3_variables: BTreeMap<String, Shape>,
    pub level2_variables: BTreeMap<String, BitGroup>,
    pub level1_variables: BTreeMap<String, Lit>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the full header object, including the flattened `variables`
    /// dictionary mapping each exposed name to its literal(s).
    pub fn to_json(&self) -> Value {
        let mut object = serde_json::Map::new();
        if let Some(title) = &self.title {
            object.insert("title".into(), json!(title));
        }
        if let Some(description) = &self.description {
            object.insert("description".into(), json!(description));
        }
        if let Some(author) = &self.author {
            object.insert("author".into(), json!(author));
        }
        if let Some(date) = &self.date {
            object.insert("date".into(), json!(date));
        }
        object.insert(
            "level3Variables".into(),
            serde_json::to_value(&self.level3_variables).unwrap_or(Value::Null),
        );
        object.insert(
            "level2Variables".into(),
            serde_json::to_value(&self.level2_variables).unwrap_or(Value::Null),
        );
        object.insert(
            "level1Variables".into(),
            serde_json::to_value(&self.level1_variables).unwrap_or(Value::Null),
        );

        let mut variables = serde_json::Map::new();
        for (name, shape) in &self.level3_variables {
            variables.insert(name.clone(), self.flatten(shape));
        }
        object.insert("variables".into(), Value::Object(variables));

        Value::Object(object)
    }

    /// Resolve a shape down to literal indices. Scalars flatten to a single
    /// literal (booleans) or an MSB-first literal array (integers); arrays
    /// nest. Dangling references render as null rather than panicking.
    fn flatten(&self, shape: &Shape) -> Value {
        match shape {
            Shape::Boolean { symbol } => match self.bit_literals(symbol) {
                Some(lits) if lits.len() == 1 => json!(lits[0]),
                Some(lits) => json!(lits),
                None => Value::Null,
            },
            Shape::Integer { symbol } => match self.bit_literals(symbol) {
                Some(lits) => json!(lits),
                None => Value::Null,
            },
            Shape::Array { elements } => {
                Value::Array(elements.iter().map(|e| self.flatten(e)).collect())
            }
        }
    }

    fn bit_literals(&self, level2_symbol: &str) -> Option<Vec<Lit>> {
        let group = self.level2_variables.get(level2_symbol)?;
        group
            .symbols
            .iter()
            .map(|bit| self.level1_variables.get(bit).copied())
            .collect()
    }
}
