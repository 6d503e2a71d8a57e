// SPDX-License-Identifier: Apache-2.0

//! Row iterator
//!
//! A forward-only, single-pass cursor over a statement's result set. Column
//! names are known before the first row. Rows come from a [`RowCursor`]:
//! backends stream them from a producer task over a bounded channel
//! ([`ChannelCursor`]), tests and small fixtures can serve them from memory
//! ([`MemoryCursor`]).
//!
//! The iterator owns its cursor. [`RowIterator::close`] consumes the iterator,
//! and dropping it releases the cursor as well.

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use sqlgate_core::{EngineError, EngineResult, Record, Row};

use crate::engine::traits::{RowCursor, StreamEvent, StreamReceiver, StreamSender};

pub struct RowIterator {
    columns: Vec<String>,
    cursor: Box<dyn RowCursor>,
    current: Option<Row>,
    exhausted: bool,
}

impl std::fmt::Debug for RowIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowIterator")
            .field("columns", &self.columns)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl RowIterator {
    pub fn new(columns: Vec<String>, cursor: Box<dyn RowCursor>) -> Self {
        Self {
            columns,
            cursor,
            current: None,
            exhausted: false,
        }
    }

    /// Iterator over rows that are already in memory.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self::new(columns, Box::new(MemoryCursor::new(rows)))
    }

    /// Starts `producer` on its own task and waits for the column header.
    ///
    /// The producer must send [`StreamEvent::Columns`] first, then rows, then
    /// [`StreamEvent::Done`]. An [`StreamEvent::Error`] in place of the header
    /// is returned as the statement's error.
    pub async fn spawn<F, Fut>(buffer: usize, producer: F) -> EngineResult<Self>
    where
        F: FnOnce(StreamSender) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(buffer.max(1));
        let task = tokio::spawn(producer(tx));

        match rx.recv().await {
            Some(StreamEvent::Columns(columns)) => Ok(Self::new(
                columns,
                Box::new(ChannelCursor::new(rx, Some(task))),
            )),
            Some(StreamEvent::Error(message)) => {
                task.abort();
                Err(EngineError::execution_error(message))
            }
            Some(other) => {
                task.abort();
                Err(EngineError::internal(format!(
                    "row producer sent {:?} before the column header",
                    other
                )))
            }
            None => Err(EngineError::internal(
                "row producer stopped before sending the column header",
            )),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Advances to the next row. `Ok(false)` means the result set is exhausted.
    pub async fn next(&mut self) -> EngineResult<bool> {
        if self.exhausted {
            return Ok(false);
        }

        match self.cursor.next_row().await {
            Ok(Some(row)) => {
                self.current = Some(row);
                Ok(true)
            }
            Ok(None) => {
                self.finish();
                Ok(false)
            }
            Err(e) => {
                self.finish();
                Err(e)
            }
        }
    }

    /// Writes the current row into `record`, keyed by column name. Byte
    /// buffers are stored as text.
    pub fn scan_named(&self, record: &mut Record) -> EngineResult<()> {
        let row = self.current_row()?;
        for (name, value) in self.columns.iter().zip(row.values.iter()) {
            record.insert(name.clone(), value.clone().normalize_binary());
        }
        Ok(())
    }

    /// Writes the current row into `dest`, one nullable string per column.
    pub fn scan_positional(&self, dest: &mut [Option<String>]) -> EngineResult<()> {
        let row = self.current_row()?;
        if dest.len() != self.columns.len() {
            return Err(EngineError::invalid_parameter(format!(
                "scan buffer has {} slots but the result has {} columns",
                dest.len(),
                self.columns.len()
            )));
        }
        for (slot, value) in dest.iter_mut().zip(row.values.iter()) {
            *slot = value.to_nullable_string();
        }
        Ok(())
    }

    /// Reads at most `limit` remaining rows into records.
    pub async fn collect_records(&mut self, limit: usize) -> EngineResult<Vec<Record>> {
        let mut records = Vec::new();
        while records.len() < limit && self.next().await? {
            let mut record = Record::new();
            self.scan_named(&mut record)?;
            records.push(record);
        }
        Ok(records)
    }

    /// Releases the cursor.
    pub fn close(mut self) {
        self.finish();
    }

    fn current_row(&self) -> EngineResult<&Row> {
        self.current
            .as_ref()
            .ok_or_else(|| EngineError::internal("scan called without a current row"))
    }

    fn finish(&mut self) {
        self.exhausted = true;
        self.current = None;
        self.cursor.close();
    }
}

impl Drop for RowIterator {
    fn drop(&mut self) {
        self.cursor.close();
    }
}

/// Cursor fed by a producer task through a bounded channel.
pub struct ChannelCursor {
    rx: StreamReceiver,
    task: Option<JoinHandle<()>>,
    done: bool,
}

impl ChannelCursor {
    pub fn new(rx: StreamReceiver, task: Option<JoinHandle<()>>) -> Self {
        Self {
            rx,
            task,
            done: false,
        }
    }
}

#[async_trait]
impl RowCursor for ChannelCursor {
    async fn next_row(&mut self) -> EngineResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }

        match self.rx.recv().await {
            Some(StreamEvent::Row(row)) => Ok(Some(row)),
            Some(StreamEvent::Done(_)) => {
                self.done = true;
                Ok(None)
            }
            Some(StreamEvent::Error(message)) => {
                self.done = true;
                Err(EngineError::execution_error(message))
            }
            Some(StreamEvent::Columns(_)) => {
                self.done = true;
                Err(EngineError::internal("column header repeated mid-stream"))
            }
            None => {
                self.done = true;
                Err(EngineError::internal(
                    "row producer stopped before the end of the result set",
                ))
            }
        }
    }

    fn close(&mut self) {
        self.done = true;
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Cursor over rows held in memory.
pub struct MemoryCursor {
    rows: std::vec::IntoIter<Row>,
}

impl MemoryCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

#[async_trait]
impl RowCursor for MemoryCursor {
    async fn next_row(&mut self) -> EngineResult<Option<Row>> {
        Ok(self.rows.next())
    }

    fn close(&mut self) {
        self.rows = Vec::new().into_iter();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgate_core::Value;

    fn sample() -> RowIterator {
        RowIterator::from_rows(
            vec!["id".into(), "payload".into()],
            vec![
                Row::new(vec![Value::Int(1), Value::Bytes(b"abc".to_vec())]),
                Row::new(vec![Value::Int(2), Value::Null]),
            ],
        )
    }

    #[tokio::test]
    async fn test_scan_named_turns_bytes_into_text() {
        let mut rows = sample();
        assert!(rows.next().await.unwrap());

        let mut record = Record::new();
        rows.scan_named(&mut record).unwrap();
        assert_eq!(record["id"], Value::Int(1));
        assert_eq!(record["payload"], Value::Text("abc".into()));
    }

    #[tokio::test]
    async fn test_scan_positional() {
        let mut rows = sample();
        rows.next().await.unwrap();
        rows.next().await.unwrap();

        let mut buf = vec![None, Some("stale".to_string())];
        rows.scan_positional(&mut buf).unwrap();
        assert_eq!(buf, vec![Some("2".to_string()), None]);

        let mut short = vec![None];
        let err = rows.scan_positional(&mut short).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { .. }));
    }

    #[tokio::test]
    async fn test_exhaustion_is_sticky() {
        let mut rows = sample();
        assert!(rows.next().await.unwrap());
        assert!(rows.next().await.unwrap());
        assert!(!rows.next().await.unwrap());
        assert!(!rows.next().await.unwrap());
        assert!(rows.scan_named(&mut Record::new()).is_err());
    }

    #[tokio::test]
    async fn test_collect_records_respects_limit() {
        let mut rows = sample();
        let first = rows.collect_records(1).await.unwrap();
        assert_eq!(first.len(), 1);
        let rest = rows.collect_records(10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0]["id"], Value::Int(2));
    }

    #[tokio::test]
    async fn test_spawned_producer_streams_rows() {
        let mut rows = RowIterator::spawn(1, |tx| async move {
            let _ = tx.send(StreamEvent::Columns(vec!["n".into()])).await;
            for n in 0..5 {
                if tx.send(StreamEvent::Row(Row::new(vec![Value::Int(n)]))).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(StreamEvent::Done(5)).await;
        })
        .await
        .unwrap();

        assert_eq!(rows.columns(), ["n"]);
        let records = rows.collect_records(usize::MAX).await.unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[4]["n"], Value::Int(4));
    }

    #[tokio::test]
    async fn test_error_before_header_is_execution_error() {
        let err = RowIterator::spawn(4, |tx| async move {
            let _ = tx.send(StreamEvent::Error("no such table: t".into())).await;
        })
        .await
        .unwrap_err();

        match err {
            EngineError::ExecutionError { message } => assert_eq!(message, "no such table: t"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_producer_vanishing_mid_stream_is_internal() {
        let mut rows = RowIterator::spawn(4, |tx| async move {
            let _ = tx.send(StreamEvent::Columns(vec!["n".into()])).await;
            let _ = tx.send(StreamEvent::Row(Row::new(vec![Value::Int(1)]))).await;
        })
        .await
        .unwrap();

        assert!(rows.next().await.unwrap());
        let err = rows.next().await.unwrap_err();
        assert!(matches!(err, EngineError::Internal { .. }));
        assert!(!rows.next().await.unwrap());
    }

    #[tokio::test]
    async fn test_close_stops_producer() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let rows = RowIterator::spawn(1, move |tx| async move {
            let _guard = DropSignal(Some(done_tx));
            let _ = tx.send(StreamEvent::Columns(vec!["n".into()])).await;
            let mut n = 0;
            while tx.send(StreamEvent::Row(Row::new(vec![Value::Int(n)]))).await.is_ok() {
                n += 1;
            }
        })
        .await
        .unwrap();

        rows.close();
        assert!(done_rx.await.is_ok());
    }

    struct DropSignal(Option<tokio::sync::oneshot::Sender<()>>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }
}
