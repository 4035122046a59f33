//! Row source and sink traits.

use sf_error::Result;
use sf_types::Row;

/// Produces input rows, one at a time.
///
/// Implemented by source connectors (NDJSON files, stdin, databases).
pub trait RowSource: Send {
    /// Returns the next row, or `None` when the source is exhausted.
    fn next_row(&mut self) -> Result<Option<Row>>;
}

/// Consumes output rows.
pub trait RowSink: Send {
    /// Writes one row.
    fn write_row(&mut self, row: Row) -> Result<()>;

    /// Flushes buffered rows.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A source over any iterator of rows.
pub struct IterSource<I> {
    rows: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Row> + Send,
{
    /// Creates a source yielding the given rows.
    pub fn new(rows: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl<I> RowSource for IterSource<I>
where
    I: Iterator<Item = Row> + Send,
{
    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// A sink collecting rows in memory.
#[derive(Debug, Default)]
pub struct CollectSink {
    rows: Vec<Row>,
    flushes: usize,
}

impl CollectSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consumes the sink, returning the collected rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Number of times the sink was flushed.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl RowSink for CollectSink {
    fn write_row(&mut self, row: Row) -> Result<()> {
        self.rows.push(row);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}
