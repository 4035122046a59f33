//! Row pipeline for scriptflow.
//!
//! Reads rows from a [`RowSource`](sf_traits::RowSource), optionally
//! expands each through a row mapper, computes configured columns from
//! literals or column transform functions, drops transient columns and
//! writes the result to a [`RowSink`](sf_traits::RowSink).

mod config;
mod ndjson;
mod pipeline;
mod stats;
mod value;

pub use config::{ErrorPolicy, PipelineConfig};
pub use ndjson::{JsonlSink, NdjsonSource};
pub use pipeline::RowPipeline;
pub use stats::{PipelineStats, PipelineStatsSnapshot};
pub use value::ValueDefinition;
