//! Embedded Rhai function execution engine.
//!
//! This crate loads user-authored Rhai documents once, resolves the
//! functions they define by name and calls them on behalf of a host in
//! one of three calling conventions:
//!
//! - **Column transform** `f(column_name, row)` returns the new value of
//!   one column
//! - **Connection property** `f(property_name)` returns a configuration
//!   string
//! - **Row mapper** `f(row, emit)` calls `emit.call(row)` zero or more times
//!
//! # Example script
//!
//! ```rhai
//! fn lowercase(column_name, row) {
//!     row.get(column_name).to_lower()
//! }
//!
//! fn password(name) {
//!     user_name() + "." + name
//! }
//!
//! fn explode(row, emit) {
//!     emit.call(row);
//!     emit.call(#{ id: row.id, copy: true });
//! }
//! ```
//!
//! # Available functions
//!
//! Besides Rhai's standard library, scripts can call `user_name()`,
//! `host_property(name)`, `uuid()`, `timestamp()`, `unix_timestamp()`,
//! `unix_timestamp_ms()`, `parse_int(s)`, `parse_float(s)`, `parse_bool(s)`,
//! `to_lowercase(s)`, `to_uppercase(s)`, `reverse(s)`, `str_contains(s, p)`,
//! `is_blank(s)`, `substring(s, start, len)` and `pad_left(s, width, fill)`.

mod builtin;
mod config;
mod context;
mod conversion;
mod emit;
mod host;
mod instance;
mod invocation;
mod registry;
mod row_view;
mod source;
mod stats;

pub use config::{DispatchMode, EngineConfig, EngineLimits, Routing, ScriptConfig};
pub use context::{CallOptions, EngineContext};
pub use conversion::{dynamic_to_value, map_to_row, row_to_map, value_to_dynamic};
pub use registry::{FunctionEntry, FunctionHandle, FunctionRegistry};
pub use row_view::RowView;
pub use source::{
    FunctionSignature, ScriptDocument, ScriptLibrary, ScriptSource, SourceDocument,
    NAMESPACE_SEPARATOR,
};
pub use stats::{EngineStats, EngineStatsSnapshot};
