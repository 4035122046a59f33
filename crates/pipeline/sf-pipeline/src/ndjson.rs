//! Newline-delimited JSON row source and sink.

use sf_error::{Result, SourceError};
use sf_traits::{RowSink, RowSource};
use sf_types::Row;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Reads one JSON object per line.
///
/// Blank lines are skipped. A line that is not a flat object of scalars
/// fails with [`SourceError::InvalidRecord`] naming the line; reading can
/// continue past it.
pub struct NdjsonSource<R> {
    reader: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> NdjsonSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
        }
    }

    /// Lines consumed so far.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl NdjsonSource<BufReader<File>> {
    /// Opens a file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceError::NotFound(path.display().to_string()),
            _ => SourceError::Io(format!("Failed to open {}: {e}", path.display())),
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead + Send> RowSource for NdjsonSource<R> {
    fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_line(&mut self.buf)
                .map_err(|e| SourceError::Io(e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;

            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }

            return serde_json::from_str::<Row>(line).map(Some).map_err(|e| {
                SourceError::InvalidRecord(format!("line {}: {e}", self.line)).into()
            });
        }
    }
}

/// Writes one JSON object per line.
pub struct JsonlSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> RowSink for JsonlSink<W> {
    fn write_row(&mut self, row: Row) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &row)
            .map_err(|e| SourceError::Encode(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| SourceError::Io(e.to_string()))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| SourceError::Io(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_error::SfError;
    use sf_types::Value;
    use std::io::Cursor;

    #[test]
    fn test_reads_rows_and_skips_blank_lines() {
        let input = "{\"a\":1,\"b\":\"x\"}\n\n{\"a\":2,\"b\":null}\n";
        let mut source = NdjsonSource::new(Cursor::new(input));

        let first = source.next_row().unwrap().unwrap();
        assert_eq!(first.get("a"), Some(&Value::Int(1)));

        let second = source.next_row().unwrap().unwrap();
        assert_eq!(second.get("b"), Some(&Value::Null));

        assert!(source.next_row().unwrap().is_none());
        assert_eq!(source.line(), 3);
    }

    #[test]
    fn test_invalid_line_names_line_and_continues() {
        let input = "{\"a\":1}\nnot json\n{\"a\":{\"nested\":true}}\n{\"a\":3}\n";
        let mut source = NdjsonSource::new(Cursor::new(input));

        assert!(source.next_row().unwrap().is_some());

        let err = source.next_row().unwrap_err();
        assert!(matches!(err, SfError::Source(SourceError::InvalidRecord(ref m)) if m.starts_with("line 2")));

        assert!(source.next_row().is_err());
        assert_eq!(
            source.next_row().unwrap().unwrap().get("a"),
            Some(&Value::Int(3))
        );
    }

    #[test]
    fn test_sink_writes_lines_in_column_order() {
        let mut sink = JsonlSink::new(Vec::new());
        sink.write_row(Row::new().with("z", 1_i64).with("a", "x")).unwrap();
        sink.write_row(Row::new().with("n", Value::Null)).unwrap();
        sink.flush().unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, "{\"z\":1,\"a\":\"x\"}\n{\"n\":null}\n");
    }

    #[test]
    fn test_open_missing_file() {
        let err = NdjsonSource::open("/nonexistent/rows.ndjson").err().unwrap();
        assert!(matches!(err, SfError::Source(SourceError::NotFound(_))));
    }
}
