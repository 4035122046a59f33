//! sf-run CLI
//!
//! Runs newline-delimited JSON rows through scriptflow script functions.

use clap::Parser;
use sf_cli_common::{format_number, format_rate, init_logging};

mod args;
mod run;

use args::Cli;
use run::Outcome;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // Logs go to stderr, stdout carries the rows
    init_logging(args.log_level)?;

    let stats = match run::execute(args).await? {
        Outcome::Processed(stats) => stats,
        Outcome::Resolved => return Ok(()),
    };

    eprintln!();
    eprintln!("Run completed:");
    eprintln!("  Rows read:       {}", format_number(stats.rows_read));
    eprintln!("  Rows written:    {}", format_number(stats.rows_written));
    eprintln!("  Rows failed:     {}", format_number(stats.rows_failed));
    if stats.rows_passed_through > 0 {
        eprintln!(
            "  Passed through:  {}",
            format_number(stats.rows_passed_through)
        );
    }

    let secs = stats.duration().num_milliseconds() as f64 / 1000.0;
    eprintln!("  Duration:        {secs:.2}s");
    if secs > 0.0 && stats.rows_read > 0 {
        eprintln!(
            "  Throughput:      {}",
            format_rate(stats.rows_per_second(), "rows")
        );
    }

    if stats.has_failures() {
        std::process::exit(4); // Partial failure
    }

    Ok(())
}
