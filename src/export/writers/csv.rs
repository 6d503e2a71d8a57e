// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use sqlgate_core::{EngineError, EngineResult};

use crate::engine::iterator::RowIterator;
use crate::export::writers::RowWriter;

/// RFC 4180 CSV with a header line. NULL cells are empty fields; the sink is
/// flushed once, at the end.
pub struct CsvWriter<W> {
    sink: W,
    builder: csv::WriterBuilder,
    buf: Vec<u8>,
    fields: Vec<Option<String>>,
    rows_written: u64,
    bytes_written: u64,
}

impl<W> CsvWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(sink: W) -> Self {
        let mut builder = csv::WriterBuilder::new();
        builder.terminator(csv::Terminator::Any(b'\n'));
        Self {
            sink,
            builder,
            buf: Vec::new(),
            fields: Vec::new(),
            rows_written: 0,
            bytes_written: 0,
        }
    }

    /// Encodes one record into the scratch buffer and copies it to the sink.
    async fn write_record<I, T>(&mut self, record: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.buf.clear();
        {
            let mut encoder = self.builder.from_writer(&mut self.buf);
            encoder.write_record(record).map_err(csv_error)?;
            encoder.flush()?;
        }
        self.sink.write_all(&self.buf).await?;
        self.bytes_written += self.buf.len() as u64;
        Ok(())
    }
}

#[async_trait]
impl<W> RowWriter for CsvWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_header(&mut self, columns: &[String]) -> EngineResult<()> {
        self.fields = vec![None; columns.len()];
        if columns.is_empty() {
            return Ok(());
        }
        self.write_record(columns.to_vec()).await
    }

    async fn write_row(&mut self, rows: &RowIterator) -> EngineResult<()> {
        rows.scan_positional(&mut self.fields)?;
        let record: Vec<String> = self
            .fields
            .iter_mut()
            .map(|f| f.take().unwrap_or_default())
            .collect();
        self.write_record(record).await?;
        self.rows_written += 1;
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

fn csv_error(err: csv::Error) -> EngineError {
    EngineError::encoding(err.to_string())
}
