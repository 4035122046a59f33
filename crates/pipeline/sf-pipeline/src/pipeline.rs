//! RowPipeline - map, transform and write rows through script functions.

use crate::config::{ErrorPolicy, PipelineConfig};
use crate::stats::{PipelineStats, PipelineStatsSnapshot};
use crate::value::ValueDefinition;
use crossbeam_channel::{Receiver, Sender};
use hashbrown::HashSet;
use indexmap::IndexMap;
use sf_error::{classify_error, ErrorCategory, ProcessingStage, Result, SfError};
use sf_script::{CallOptions, EngineContext, FunctionHandle};
use sf_traits::{HostEnvironment, RowSink, RowSource};
use sf_types::{FunctionRole, Row, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rows buffered per worker thread between stages.
const CHANNEL_DEPTH_PER_THREAD: usize = 16;

#[derive(Debug)]
enum ColumnValue {
    Literal(Value),
    Function(FunctionHandle),
}

/// A configured row pipeline bound to an engine context.
///
/// For every input row: apply the row mapper if one is configured (each
/// emitted row is handled like an input row), compute every transform
/// column against the row as it was before any transform, drop transient
/// columns, write. Failures follow the [`ErrorPolicy`] and always apply to
/// the whole input row.
#[derive(Debug)]
pub struct RowPipeline {
    engine: Arc<EngineContext>,
    mapper: Option<FunctionHandle>,
    transforms: Vec<(String, ColumnValue)>,
    transient_columns: HashSet<String>,
    connection_properties: IndexMap<String, String>,
    error_policy: ErrorPolicy,
    limit: u64,
    threads: usize,
    options: CallOptions,
}

impl RowPipeline {
    /// Loads the configured scripts and builds the pipeline.
    pub async fn from_config(
        config: &PipelineConfig,
        host: Arc<dyn HostEnvironment>,
    ) -> Result<Self> {
        config.validate()?;
        let engine =
            EngineContext::from_configs(&config.scripting, config.engine.clone(), host).await?;
        Self::build(config, Arc::new(engine))
    }

    /// Builds the pipeline on an existing engine context.
    ///
    /// Every referenced function is resolved here, so an unknown name fails
    /// before any row is read. Connection properties are resolved once.
    pub fn build(config: &PipelineConfig, engine: Arc<EngineContext>) -> Result<Self> {
        config.validate()?;

        let mapper = config
            .map
            .as_deref()
            .map(|name| engine.resolve(name, FunctionRole::RowMapper))
            .transpose()?;

        let mut transforms = Vec::with_capacity(config.transform.len());
        for (column, definition) in &config.transform {
            let value = match definition {
                ValueDefinition::Literal(value) => ColumnValue::Literal(value.clone()),
                ValueDefinition::Function { function } => ColumnValue::Function(
                    engine.resolve(function, FunctionRole::ColumnTransform)?,
                ),
            };
            transforms.push((column.clone(), value));
        }

        let connection_properties = resolve_connection_properties(&engine, config)?;

        debug!(
            mapper = ?config.map,
            transforms = transforms.len(),
            transient = config.transient_columns.len(),
            "Built row pipeline"
        );

        Ok(Self {
            engine,
            mapper,
            transforms,
            transient_columns: config.transient_columns.iter().cloned().collect(),
            connection_properties,
            error_policy: config.error_policy,
            limit: config.limit,
            threads: config.threads.max(1),
            options: CallOptions::default(),
        })
    }

    /// Sets the worker thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// The engine context.
    pub fn engine(&self) -> &Arc<EngineContext> {
        &self.engine
    }

    /// Connection properties resolved at build time.
    pub fn connection_properties(&self) -> &IndexMap<String, String> {
        &self.connection_properties
    }

    /// Processes one input row into the rows to write.
    ///
    /// Returns an error only when the run must stop: under
    /// [`ErrorPolicy::Fail`], or for permanent errors under any policy.
    pub fn process_row(&self, row: Row, stats: &PipelineStats) -> Result<Vec<Row>> {
        let input = Arc::new(row);

        match self.apply(&input) {
            Ok(rows) => Ok(rows),
            Err(e) => {
                if classify_error(&e, ProcessingStage::Invoke) == ErrorCategory::Permanent {
                    return Err(e);
                }
                match self.error_policy {
                    ErrorPolicy::Fail => Err(e),
                    ErrorPolicy::Drop => {
                        warn!(error = %e, "Dropping row");
                        stats.record_failed();
                        Ok(Vec::new())
                    }
                    ErrorPolicy::Passthrough => {
                        warn!(error = %e, "Passing row through unchanged");
                        stats.record_failed();
                        stats.record_passed_through();
                        Ok(vec![Arc::try_unwrap(input).unwrap_or_else(|shared| (*shared).clone())])
                    }
                }
            }
        }
    }

    fn apply(&self, input: &Arc<Row>) -> Result<Vec<Row>> {
        let staged: Vec<Arc<Row>> = match &self.mapper {
            Some(mapper) => self
                .engine
                .call_row_mapper(mapper, Arc::clone(input), &self.options)?
                .into_iter()
                .map(Arc::new)
                .collect(),
            None => vec![Arc::clone(input)],
        };

        staged.into_iter().map(|row| self.transform(row)).collect()
    }

    fn transform(&self, row: Arc<Row>) -> Result<Row> {
        let mut values = Vec::with_capacity(self.transforms.len());
        for (column, value) in &self.transforms {
            let value = match value {
                ColumnValue::Literal(value) => value.clone(),
                ColumnValue::Function(handle) => self.engine.call_column_transform(
                    handle,
                    column,
                    Arc::clone(&row),
                    &self.options,
                )?,
            };
            values.push((column, value));
        }

        let mut out = Arc::try_unwrap(row).unwrap_or_else(|shared| (*shared).clone());
        for (column, value) in values {
            out.set(column.as_str(), value);
        }
        for column in &self.transient_columns {
            out.remove(column);
        }
        Ok(out)
    }

    /// Runs the pipeline until the source is exhausted or the limit is hit.
    ///
    /// With more than one thread rows are processed in parallel but still
    /// written in input order.
    pub fn run(
        &self,
        source: &mut dyn RowSource,
        sink: &mut dyn RowSink,
    ) -> Result<PipelineStatsSnapshot> {
        let stats = PipelineStats::new();

        if self.threads > 1 {
            self.run_parallel(source, sink, &stats)?;
        } else {
            while let Some(row) = self.next_input(source, &stats)? {
                let rows = self.process_row(row, &stats)?;
                write_rows(sink, rows, &stats)?;
            }
        }
        sink.flush()?;

        let snapshot = stats.snapshot();
        info!(
            read = snapshot.rows_read,
            written = snapshot.rows_written,
            failed = snapshot.rows_failed,
            "Pipeline run complete"
        );
        Ok(snapshot)
    }

    fn run_parallel(
        &self,
        source: &mut dyn RowSource,
        sink: &mut dyn RowSink,
        stats: &PipelineStats,
    ) -> Result<()> {
        let depth = self.threads * CHANNEL_DEPTH_PER_THREAD;
        let (work_tx, work_rx) = crossbeam_channel::bounded::<(u64, Row)>(depth);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<(u64, Result<Vec<Row>>)>(depth);

        std::thread::scope(|scope| {
            for _ in 0..self.threads {
                let work_rx = work_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for (seq, row) in work_rx.iter() {
                        let result = self.process_row(row, stats);
                        if done_tx.send((seq, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(work_rx);
            drop(done_tx);

            let writer = scope.spawn(move || write_in_order(done_rx, sink, stats));

            let read = self.feed(source, &work_tx, stats);
            drop(work_tx);

            let written = writer
                .join()
                .map_err(|_| SfError::Other(anyhow::anyhow!("writer thread panicked")))?;
            written?;
            read
        })
    }

    fn feed(
        &self,
        source: &mut dyn RowSource,
        work: &Sender<(u64, Row)>,
        stats: &PipelineStats,
    ) -> Result<()> {
        let mut seq = 0;
        while let Some(row) = self.next_input(source, stats)? {
            // Workers are gone once the writer stopped on an error
            if work.send((seq, row)).is_err() {
                break;
            }
            seq += 1;
        }
        Ok(())
    }

    fn next_input(&self, source: &mut dyn RowSource, stats: &PipelineStats) -> Result<Option<Row>> {
        loop {
            if self.limit > 0 && stats.rows_read() >= self.limit {
                return Ok(None);
            }

            match source.next_row() {
                Ok(Some(row)) => {
                    stats.record_read();
                    return Ok(Some(row));
                }
                Ok(None) => return Ok(None),
                Err(e) => {
                    let partial =
                        classify_error(&e, ProcessingStage::Read) == ErrorCategory::Partial;
                    if !partial || self.error_policy == ErrorPolicy::Fail {
                        return Err(e);
                    }
                    warn!(error = %e, "Skipping unreadable record");
                    stats.record_failed();
                }
            }
        }
    }
}

fn write_rows(sink: &mut dyn RowSink, rows: Vec<Row>, stats: &PipelineStats) -> Result<()> {
    let count = rows.len() as u64;
    for row in rows {
        sink.write_row(row)?;
    }
    stats.record_written(count);
    Ok(())
}

fn write_in_order(
    done: Receiver<(u64, Result<Vec<Row>>)>,
    sink: &mut dyn RowSink,
    stats: &PipelineStats,
) -> Result<()> {
    let mut pending = BTreeMap::new();
    let mut next = 0;

    for (seq, result) in done.iter() {
        pending.insert(seq, result);
        while let Some(result) = pending.remove(&next) {
            write_rows(sink, result?, stats)?;
            next += 1;
        }
    }
    Ok(())
}

fn resolve_connection_properties(
    engine: &EngineContext,
    config: &PipelineConfig,
) -> Result<IndexMap<String, String>> {
    let mut resolved = IndexMap::with_capacity(config.connection_properties.len());
    for (name, definition) in &config.connection_properties {
        let value = match definition {
            ValueDefinition::Literal(value) => value.to_string(),
            ValueDefinition::Function { function } => engine.connection_property(function, name)?,
        };
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}
