//! Shared data types for scriptflow.
//!
//! This crate provides the types that cross the boundary between the host
//! pipeline and the script engine:
//! - [`Value`] - A scalar column value
//! - [`Row`] - An ordered mapping from column name to [`Value`]
//! - [`FunctionRole`] - The calling convention a script function is used with

mod role;
mod row;
mod value;

pub use role::FunctionRole;
pub use row::Row;
pub use value::Value;
