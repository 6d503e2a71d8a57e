// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use sqlgate_core::EngineResult;

use crate::engine::iterator::RowIterator;
use crate::export::types::{EncodeSummary, OutputFormat};

pub mod csv;
pub mod json;
pub mod ldjson;

pub use self::csv::CsvWriter;
pub use self::json::JsonWriter;
pub use self::ldjson::LdjsonWriter;

/// Streams one result set into a sink, one row at a time.
#[async_trait]
pub trait RowWriter: Send {
    async fn write_header(&mut self, columns: &[String]) -> EngineResult<()>;
    /// Writes the iterator's current row.
    async fn write_row(&mut self, rows: &RowIterator) -> EngineResult<()>;
    async fn finish(&mut self) -> EngineResult<()>;
    fn rows_written(&self) -> u64;
    fn bytes_written(&self) -> u64;
}

/// Drains `rows` into `sink` using `format`.
///
/// Write errors abort the stream; whatever was written before stays in the
/// sink.
pub async fn encode<W>(
    format: OutputFormat,
    sink: W,
    rows: &mut RowIterator,
) -> EngineResult<EncodeSummary>
where
    W: AsyncWrite + Unpin + Send,
{
    match format {
        OutputFormat::Csv => drive(CsvWriter::new(sink), rows).await,
        OutputFormat::Json => drive(JsonWriter::new(sink), rows).await,
        OutputFormat::Ldjson => drive(LdjsonWriter::new(sink), rows).await,
    }
}

async fn drive<R: RowWriter>(mut writer: R, rows: &mut RowIterator) -> EngineResult<EncodeSummary> {
    writer.write_header(rows.columns()).await?;
    while rows.next().await? {
        writer.write_row(rows).await?;
    }
    writer.finish().await?;

    Ok(EncodeSummary {
        rows_written: writer.rows_written(),
        bytes_written: writer.bytes_written(),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::AsyncWrite;

    use sqlgate_core::{Row, Value};

    use crate::engine::iterator::RowIterator;

    /// 3 rows × 2 columns, with one NULL.
    pub fn sample_rows() -> RowIterator {
        RowIterator::from_rows(
            vec!["id".into(), "name".into()],
            vec![
                Row::new(vec![Value::Int(1), Value::Text("alice".into())]),
                Row::new(vec![Value::Int(2), Value::Null]),
                Row::new(vec![Value::Int(3), Value::Bytes(b"carol, jr".to_vec())]),
            ],
        )
    }

    /// In-memory sink that counts flushes and can be told to fail.
    #[derive(Default)]
    pub struct RecordingSink {
        pub data: Vec<u8>,
        pub flushes: usize,
        pub fail_writes: bool,
    }

    impl AsyncWrite for RecordingSink {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.fail_writes {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "client gone")));
            }
            self.data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.flushes += 1;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}
