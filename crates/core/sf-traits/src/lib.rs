//! Interfaces between the scriptflow engine and its collaborators.
//!
//! - [`HostEnvironment`] - Host properties injected into scripts
//! - [`RowSource`] - Connectors producing input rows
//! - [`RowSink`] - Connectors consuming output rows

mod environment;
mod rows;

pub use environment::{HostEnvironment, StaticEnvironment, SystemEnvironment, USER_NAME_PROPERTY};
pub use rows::{CollectSink, IterSource, RowSink, RowSource};
