// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use sqlgate_core::{EngineError, EngineResult, Record};

use crate::engine::iterator::RowIterator;
use crate::export::writers::RowWriter;

/// Rows between two flushes of the sink.
pub const FLUSH_EVERY: u64 = 1000;

/// One JSON object per line.
pub struct LdjsonWriter<W> {
    sink: W,
    record: Record,
    buf: Vec<u8>,
    rows_written: u64,
    bytes_written: u64,
}

impl<W> LdjsonWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            record: Record::new(),
            buf: Vec::new(),
            rows_written: 0,
            bytes_written: 0,
        }
    }
}

#[async_trait]
impl<W> RowWriter for LdjsonWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_header(&mut self, _columns: &[String]) -> EngineResult<()> {
        Ok(())
    }

    async fn write_row(&mut self, rows: &RowIterator) -> EngineResult<()> {
        rows.scan_named(&mut self.record)?;

        self.buf.clear();
        serde_json::to_writer(&mut self.buf, &self.record)
            .map_err(|e| EngineError::encoding(e.to_string()))?;
        self.buf.push(b'\n');

        self.sink.write_all(&self.buf).await?;
        self.bytes_written += self.buf.len() as u64;
        self.rows_written += 1;

        if self.rows_written % FLUSH_EVERY == 0 {
            self.sink.flush().await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> EngineResult<()> {
        self.sink.flush().await?;
        Ok(())
    }

    fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::writers::test_support::{sample_rows, RecordingSink};
    use crate::export::{encode, OutputFormat};
    use sqlgate_core::{Row, Value};

    #[tokio::test]
    async fn test_one_object_per_line() {
        let mut out = Vec::new();
        encode(OutputFormat::Ldjson, &mut out, &mut sample_rows())
            .await
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], r#"{"id":1,"name":"alice"}"#);
        assert_eq!(lines[1], r#"{"id":2,"name":null}"#);
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_flushes_periodically_and_at_end() {
        let rows = (0..2500)
            .map(|i| Row::new(vec![Value::Int(i)]))
            .collect::<Vec<_>>();
        let mut rows = RowIterator::from_rows(vec!["n".into()], rows);

        let mut sink = RecordingSink::default();
        let summary = encode(OutputFormat::Ldjson, &mut sink, &mut rows)
            .await
            .unwrap();

        assert_eq!(summary.rows_written, 2500);
        // after rows 1000 and 2000, then once more at the end
        assert_eq!(sink.flushes, 3);
        assert_eq!(sink.data.iter().filter(|b| **b == b'\n').count(), 2500);
    }

    #[tokio::test]
    async fn test_empty_result_writes_nothing() {
        let mut rows = RowIterator::from_rows(vec!["a".into()], Vec::new());
        let mut out = Vec::new();
        encode(OutputFormat::Ldjson, &mut out, &mut rows).await.unwrap();
        assert!(out.is_empty());
    }
}
