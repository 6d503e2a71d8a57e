// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use sqlgate_core::{EngineError, EngineResult, Record};

use crate::engine::iterator::RowIterator;
use crate::export::writers::RowWriter;

/// A single JSON array of row objects, separated by `,\n`.
pub struct JsonWriter<W> {
    sink: W,
    record: Record,
    buf: Vec<u8>,
    rows_written: u64,
    bytes_written: u64,
}

impl<W> JsonWriter<W>
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

    async fn write_bytes(&mut self, bytes: &[u8]) -> EngineResult<()> {
        self.sink.write_all(bytes).await?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

#[async_trait]
impl<W> RowWriter for JsonWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_header(&mut self, _columns: &[String]) -> EngineResult<()> {
        self.write_bytes(b"[").await
    }

    async fn write_row(&mut self, rows: &RowIterator) -> EngineResult<()> {
        rows.scan_named(&mut self.record)?;

        self.buf.clear();
        if self.rows_written > 0 {
            self.buf.extend_from_slice(b",\n");
        }
        serde_json::to_writer(&mut self.buf, &self.record)
            .map_err(|e| EngineError::encoding(e.to_string()))?;

        let buf = std::mem::take(&mut self.buf);
        let result = self.write_bytes(&buf).await;
        self.buf = buf;
        result?;

        self.rows_written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> EngineResult<()> {
        self.write_bytes(b"]").await?;
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
