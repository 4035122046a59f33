//! Main execution logic for sf-run.

use anyhow::{Context, Result};
use sf_pipeline::{JsonlSink, NdjsonSource, PipelineConfig, PipelineStatsSnapshot, RowPipeline};
use sf_traits::SystemEnvironment;
use std::io::{BufReader, BufWriter, Write};
use std::sync::Arc;
use tracing::info;

use crate::args::Cli;

/// What a run produced.
pub enum Outcome {
    /// Rows were processed
    Processed(PipelineStatsSnapshot),
    /// Only the connection properties were printed
    Resolved,
}

/// Execute the pipeline with the provided arguments.
pub async fn execute(args: Cli) -> Result<Outcome> {
    let mut config = PipelineConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    if let Some(limit) = args.limit {
        config = config.with_limit(limit);
    }

    let pipeline = RowPipeline::from_config(&config, Arc::new(SystemEnvironment)).await?;
    info!(
        scripts = config.scripting.len(),
        functions = pipeline.engine().library().registry().len(),
        threads = config.threads,
        "Pipeline ready"
    );

    if args.resolve_connection {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        serde_json::to_writer_pretty(&mut out, pipeline.connection_properties())?;
        writeln!(out)?;
        pipeline.engine().close();
        return Ok(Outcome::Resolved);
    }

    // The pipeline blocks on script calls, keep it off the async workers
    let snapshot = tokio::task::spawn_blocking(move || -> Result<PipelineStatsSnapshot> {
        let mut sink = JsonlSink::new(BufWriter::new(std::io::stdout()));

        let snapshot = if args.reads_stdin() {
            let mut source = NdjsonSource::new(BufReader::new(std::io::stdin()));
            pipeline.run(&mut source, &mut sink)?
        } else {
            let mut source = NdjsonSource::open(&args.input)?;
            pipeline.run(&mut source, &mut sink)?
        };

        pipeline.engine().close();
        Ok(snapshot)
    })
    .await??;

    Ok(Outcome::Processed(snapshot))
}
