// SPDX-License-Identifier: Apache-2.0

//! Engine traits
//!
//! The seams between the pool and the backends. A [`Connector`] turns a
//! driver and a connection string into a live [`DatabaseHandle`]; a handle
//! runs statements and hands back a [`RowIterator`] fed by a [`RowCursor`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use sqlgate_core::{BoundStatement, Driver, EngineResult, Row};

use crate::config::PoolSettings;
use crate::engine::iterator::RowIterator;
use crate::observability::Secret;

/// Events emitted by a producer task while a statement streams its rows.
#[derive(Debug)]
pub enum StreamEvent {
    /// Ordered column names, always the first event.
    Columns(Vec<String>),
    Row(Row),
    /// End of the result set with the number of rows sent.
    Done(u64),
    Error(String),
}

pub type StreamSender = mpsc::Sender<StreamEvent>;
pub type StreamReceiver = mpsc::Receiver<StreamEvent>;

/// A live, shareable database handle. Each handle wraps its own pool of
/// physical connections, so concurrent queries on one handle are fine.
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    fn driver(&self) -> Driver;

    /// Round-trips to the backend.
    async fn ping(&self) -> EngineResult<()>;

    /// Runs `statement` and returns a cursor positioned before the first row.
    async fn query(&self, statement: BoundStatement) -> EngineResult<RowIterator>;

    /// Closes every physical connection. Only the pool calls this.
    async fn close(&self);
}

/// Opens database handles. The pool goes through this trait so that tests
/// can observe how many handles get created.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        driver: Driver,
        dsn: &Secret,
        settings: &PoolSettings,
    ) -> EngineResult<std::sync::Arc<dyn DatabaseHandle>>;
}

/// Forward-only source of rows behind a [`RowIterator`].
#[async_trait]
pub trait RowCursor: Send + Sync {
    /// The next row, or `None` once the result set is exhausted.
    async fn next_row(&mut self) -> EngineResult<Option<Row>>;

    /// Releases the cursor. Must be safe to call more than once.
    fn close(&mut self);
}
