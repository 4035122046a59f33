//! CLI argument definitions for sf-run.

use clap::Parser;
pub use sf_cli_common::LogLevel;
use std::path::PathBuf;

/// Run newline-delimited JSON rows through script functions.
///
/// Reads one JSON object per line, applies the mapper and column transforms
/// named in the pipeline configuration, and writes the resulting rows as
/// JSON lines to stdout.
///
/// ## Examples
///
/// Transform a file:
///   sf-run --config pipeline.json --input companies.ndjson > out.jsonl
///
/// Transform stdin on four threads:
///   cat companies.ndjson | sf-run -c pipeline.json -t 4
///
/// Print the resolved connection properties:
///   sf-run -c pipeline.json --resolve-connection
#[derive(Parser, Debug)]
#[command(name = "sf-run")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Pipeline configuration file (JSON)
    #[arg(short = 'c', long, env = "SF_CONFIG")]
    pub config: PathBuf,

    /// Input file, or "-" for stdin
    #[arg(short = 'i', long, default_value = "-")]
    pub input: String,

    /// Number of processing threads, overriding the configuration (must be >= 1)
    #[arg(short = 't', long, value_parser = parse_positive_usize)]
    pub threads: Option<usize>,

    /// Stop after this many input rows, overriding the configuration
    #[arg(long)]
    pub limit: Option<u64>,

    /// Resolve the connection properties, print them as JSON and exit
    #[arg(long)]
    pub resolve_connection: bool,

    /// Log level
    #[arg(short = 'l', long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

impl Cli {
    /// Returns true when rows are read from stdin.
    pub fn reads_stdin(&self) -> bool {
        self.input == "-"
    }
}

/// Parse a usize that must be >= 1.
fn parse_positive_usize(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid positive integer"))?;
    if value == 0 {
        return Err("value must be at least 1".to_string());
    }
    Ok(value)
}
