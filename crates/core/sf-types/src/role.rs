//! Calling conventions for script functions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role a script function is invoked in.
///
/// The role fixes the arguments the engine passes and how the result is
/// collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionRole {
    /// `f(column_name, row)` returning the new value of one column.
    ColumnTransform,

    /// `f(property_name)` returning a configuration string.
    ConnectionProperty,

    /// `f(row, emit)` emitting zero or more rows through `emit`.
    RowMapper,
}

impl FunctionRole {
    /// Number of parameters a function must declare to be used in this role.
    pub fn arity(self) -> usize {
        match self {
            Self::ColumnTransform => 2,
            Self::ConnectionProperty => 1,
            Self::RowMapper => 2,
        }
    }
}

impl fmt::Display for FunctionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColumnTransform => write!(f, "ColumnTransform"),
            Self::ConnectionProperty => write!(f, "ConnectionProperty"),
            Self::RowMapper => write!(f, "RowMapper"),
        }
    }
}
