//! Error types and classification for scriptflow.
//!
//! This crate provides:
//! - [`SfError`] - Top-level error enum for the engine and its host pipeline
//! - Domain-specific errors ([`ScriptError`], [`SourceError`])
//! - [`ErrorCategory`] for skip/abort/retry decision making
//! - Error classification logic based on error type and processing stage

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for scriptflow.
#[derive(Error, Debug)]
pub enum SfError {
    /// Script engine errors (load, lookup, execution)
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Row source/sink errors (I/O, decoding)
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors (wrapped anyhow)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SfError {
    /// Returns the script error, if this is one.
    pub fn as_script(&self) -> Option<&ScriptError> {
        match self {
            Self::Script(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors raised by the embedded script engine.
///
/// Every variant names the document or function involved so the caller can
/// log it and apply its own skip/abort policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    /// A script document could not be read, compiled or initialized.
    #[error("Failed to load script '{document}'{}: {message}", fmt_line(.line))]
    Load {
        document: String,
        message: String,
        line: Option<usize>,
    },

    /// The requested function is not registered.
    #[error("Function not found: {function}")]
    NotFound { function: String },

    /// The script raised an error while running.
    #[error("Error calling {function}: {cause}")]
    Execution { function: String, cause: String },

    /// The script passed something other than a row to `emit`.
    #[error("Invalid emit argument in {function}: {cause}")]
    InvalidEmitArgument { function: String, cause: String },

    /// The call exceeded its deadline.
    #[error("Call to {function} timed out after {timeout:?}")]
    Timeout { function: String, timeout: Duration },

    /// The function does not take the number of arguments its role passes.
    #[error("Function {function} used as {role} takes {found} parameter(s), expected {expected}")]
    Arity {
        function: String,
        role: String,
        expected: usize,
        found: usize,
    },

    /// The handle was resolved before the scripts were reloaded.
    #[error("Stale handle for {function}: scripts were reloaded")]
    StaleHandle { function: String },

    /// The engine context has been closed.
    #[error("Engine context is closed")]
    Closed,
}

fn fmt_line(line: &Option<usize>) -> String {
    match line {
        Some(line) => format!(" at line {line}"),
        None => String::new(),
    }
}

impl ScriptError {
    /// Returns the function name this error refers to, if any.
    pub fn function(&self) -> Option<&str> {
        match self {
            Self::NotFound { function }
            | Self::Execution { function, .. }
            | Self::InvalidEmitArgument { function, .. }
            | Self::Timeout { function, .. }
            | Self::Arity { function, .. }
            | Self::StaleHandle { function } => Some(function),
            Self::Load { .. } | Self::Closed => None,
        }
    }

    /// Returns true for per-row failures caused by the script itself.
    ///
    /// `InvalidEmitArgument` propagates like `Execution`, it is only kept
    /// apart for diagnostics.
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::Execution { .. } | Self::InvalidEmitArgument { .. })
    }
}

/// Row source and sink errors.
#[derive(Error, Debug)]
pub enum SourceError {
    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),

    /// I/O error during read or write
    #[error("I/O error: {0}")]
    Io(String),

    /// A record could not be decoded into a row
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// A row could not be encoded for output
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Error classification for pipeline decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient error - the same call may succeed on a fresh interpreter
    ///
    /// Examples: call deadline exceeded
    Transient,

    /// Permanent error - retrying cannot help, abort or fix configuration
    ///
    /// Examples: syntax error in a script, unknown function, unreadable file
    Permanent,

    /// Partial failure - the current row failed, the pipeline may skip it
    ///
    /// Examples: script exception, invalid emit argument
    Partial,
}

/// Processing stage for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Loading and compiling script documents
    ScriptLoad,

    /// Resolving function names
    Resolve,

    /// Running a script function
    Invoke,

    /// Reading input rows
    Read,

    /// Writing output rows
    Write,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScriptLoad => write!(f, "ScriptLoad"),
            Self::Resolve => write!(f, "Resolve"),
            Self::Invoke => write!(f, "Invoke"),
            Self::Read => write!(f, "Read"),
            Self::Write => write!(f, "Write"),
        }
    }
}

/// Classifies an error to determine skip/abort/retry behavior.
///
/// # Arguments
///
/// * `error` - The error to classify
/// * `stage` - The processing stage where the error occurred
pub fn classify_error(error: &SfError, stage: ProcessingStage) -> ErrorCategory {
    match error {
        SfError::Script(e) => classify_script_error(e),
        SfError::Source(e) => classify_source_error(e, stage),
        SfError::Config(_) => ErrorCategory::Permanent,
        SfError::Other(_) => match stage {
            ProcessingStage::Invoke => ErrorCategory::Partial,
            _ => ErrorCategory::Permanent,
        },
    }
}

fn classify_script_error(error: &ScriptError) -> ErrorCategory {
    match error {
        ScriptError::Load { .. } => ErrorCategory::Permanent,
        ScriptError::NotFound { .. } => ErrorCategory::Permanent,
        ScriptError::Execution { .. } => ErrorCategory::Partial,
        ScriptError::InvalidEmitArgument { .. } => ErrorCategory::Partial,
        ScriptError::Timeout { .. } => ErrorCategory::Transient,
        ScriptError::Arity { .. } => ErrorCategory::Permanent,
        ScriptError::StaleHandle { .. } => ErrorCategory::Transient,
        ScriptError::Closed => ErrorCategory::Permanent,
    }
}

fn classify_source_error(error: &SourceError, stage: ProcessingStage) -> ErrorCategory {
    match error {
        SourceError::NotFound(_) => ErrorCategory::Permanent,
        SourceError::Io(_) => ErrorCategory::Permanent,
        SourceError::InvalidRecord(_) => {
            // A single bad line only spoils that row
            if matches!(stage, ProcessingStage::Read) {
                ErrorCategory::Partial
            } else {
                ErrorCategory::Permanent
            }
        }
        SourceError::Encode(_) => ErrorCategory::Partial,
    }
}

/// Result type alias using SfError.
pub type Result<T> = std::result::Result<T, SfError>;
