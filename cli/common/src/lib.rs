//! Shared utilities for scriptflow CLI binaries.

pub mod args;
pub mod format;
pub mod logging;

pub use args::LogLevel;
pub use format::{format_number, format_rate};
pub use logging::init_logging;
