//! The serializable wire tree
//!
//! Packed arguments travel as `(name_or_None, value_or_nested_tree)` pairs;
//! struct fields nest as lists of the same shape. Slots owned entirely by a
//! sync directive travel as `(None, None)`.

use super::values::Scalar;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    None,
    Scalar(Scalar),
    /// Copied array level
    Array(Vec<WireValue>),
    /// Struct field list, order significant
    List(Vec<WireEntry>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEntry {
    pub name: Option<String>,
    pub value: WireValue,
}

impl WireEntry {
    /// The `(None, None)` pair for slots handled by memory sync
    pub fn none() -> Self {
        Self {
            name: None,
            value: WireValue::None,
        }
    }

    pub fn scalar(name: Option<String>, value: Scalar) -> Self {
        Self {
            name,
            value: WireValue::Scalar(value),
        }
    }
}
