// SPDX-License-Identifier: Apache-2.0

//! Gateway service
//!
//! Ties the pieces together for one request: resolve the driver, fetch or
//! open the pooled handle, run the statement and stream the rows through an
//! encoder. Transports (HTTP, gRPC, CLI) build a [`QueryRequest`] and hand the
//! gateway a sink.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tracing::instrument;

use sqlgate_core::{ConnectionDescriptor, EngineResult, QueryParams};

use crate::config::GatewayConfig;
use crate::engine::{execute, ConnectionPool, Connector, NativeConnector, RowIterator};
use crate::export::{encode, EncodeSummary, OutputFormat};

/// One statement to run against one database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Driver alias, e.g. `postgres` or `mssql`
    pub driver: String,
    #[serde(default)]
    pub connection: ConnectionDescriptor,
    pub sql: String,
    #[serde(default, alias = "parameters")]
    pub params: QueryParams,
}

pub struct Gateway {
    pool: Arc<ConnectionPool>,
}

impl Gateway {
    /// A gateway backed by the native drivers.
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_connector(Arc::new(NativeConnector), config)
    }

    pub fn with_connector(connector: Arc<dyn Connector>, config: GatewayConfig) -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new(connector, config.pool)),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Runs the request and returns its rows unencoded.
    #[instrument(skip(self, request), fields(driver = %request.driver))]
    pub async fn open_rows(&self, request: &QueryRequest) -> EngineResult<RowIterator> {
        let handle = self
            .pool
            .get_or_create(&request.driver, &request.connection)
            .await?;
        execute(handle.as_ref(), &request.sql, &request.params).await
    }

    /// Runs the request and streams every row into `sink` as `format`.
    ///
    /// Connection and statement errors surface before anything is written.
    /// A failure after the first byte leaves partial output in the sink.
    #[instrument(skip(self, request, sink), fields(driver = %request.driver, format = %format))]
    pub async fn run<W>(
        &self,
        request: &QueryRequest,
        format: OutputFormat,
        sink: W,
    ) -> EngineResult<EncodeSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut rows = self.open_rows(request).await?;
        let result = encode(format, sink, &mut rows).await;
        rows.close();

        match &result {
            Ok(summary) => tracing::info!(
                rows = summary.rows_written,
                bytes = summary.bytes_written,
                "Result streamed"
            ),
            Err(e) => tracing::warn!(error = %e, "Streaming aborted"),
        }
        result
    }

    /// Opens (or reuses) the handle for `connection` and round-trips to it.
    #[instrument(skip(self, connection))]
    pub async fn ping(&self, driver: &str, connection: &ConnectionDescriptor) -> EngineResult<()> {
        let handle = self.pool.get_or_create(driver, connection).await?;
        self.pool.ping(&handle).await
    }

    /// Closes every pooled handle.
    pub async fn shutdown(&self) {
        self.pool.shutdown_all().await;
    }
}
