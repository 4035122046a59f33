//! Column value definitions.

use serde::{Deserialize, Serialize};
use sf_types::Value;

/// How a configured column or connection property gets its value.
///
/// In JSON either a literal scalar (`"x"`, `42`, `true`, `null`) or a
/// function reference (`{ "function": "lowercase" }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueDefinition {
    /// Computed by a script function.
    Function { function: String },

    /// A fixed value.
    Literal(Value),
}

impl ValueDefinition {
    /// Creates a function reference.
    pub fn function(name: impl Into<String>) -> Self {
        Self::Function {
            function: name.into(),
        }
    }

    /// Creates a literal.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// The referenced function, if any.
    pub fn function_name(&self) -> Option<&str> {
        match self {
            Self::Function { function } => Some(function),
            Self::Literal(_) => None,
        }
    }
}
