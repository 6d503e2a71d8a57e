// SPDX-License-Identifier: Apache-2.0

//! SQLite backend
//!
//! The connection string is a file path (or `:memory:`) with optional query
//! parameters. Missing database files are created.

use std::str::FromStr;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Statement};

use sqlgate_core::{BoundStatement, Driver, EngineError, EngineResult, Row as GRow, Value};

use crate::config::PoolSettings;
use crate::engine::drivers::float_value;
use crate::engine::iterator::RowIterator;
use crate::engine::traits::{DatabaseHandle, StreamEvent, StreamSender};
use crate::observability::Secret;

const BUSY_TIMEOUT_SECS: u64 = 30;

pub struct SqliteHandle {
    pool: SqlitePool,
    stream_buffer: usize,
}

impl SqliteHandle {
    pub async fn open(dsn: &Secret, settings: &PoolSettings) -> EngineResult<Self> {
        let options = connect_options(dsn.expose())?;

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_idle_conns)
            .max_lifetime(settings.max_lifetime())
            .idle_timeout(settings.idle_timeout())
            .acquire_timeout(settings.acquire_timeout())
            .connect_with(options)
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;

        Ok(Self {
            pool,
            stream_buffer: settings.stream_buffer,
        })
    }
}

#[async_trait]
impl DatabaseHandle for SqliteHandle {
    fn driver(&self) -> Driver {
        Driver::Sqlite
    }

    async fn ping(&self) -> EngineResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;
        Ok(())
    }

    async fn query(&self, statement: BoundStatement) -> EngineResult<RowIterator> {
        let pool = self.pool.clone();
        RowIterator::spawn(self.stream_buffer, move |tx| async move {
            if let Err(message) = stream_rows(&pool, &statement, &tx).await {
                let _ = tx.send(StreamEvent::Error(message)).await;
            }
        })
        .await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

async fn stream_rows(
    pool: &SqlitePool,
    statement: &BoundStatement,
    tx: &StreamSender,
) -> Result<(), String> {
    let mut conn = pool.acquire().await.map_err(|e| e.to_string())?;
    let prepared = (&mut *conn)
        .prepare(statement.sql.as_str())
        .await
        .map_err(|e| e.to_string())?;

    let columns = prepared
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    if tx.send(StreamEvent::Columns(columns)).await.is_err() {
        return Ok(());
    }

    let mut query = prepared.query();
    for value in &statement.params {
        query = bind_param(query, value);
    }

    let mut rows = query.fetch(&mut *conn);
    let mut count = 0u64;
    while let Some(row) = rows.try_next().await.map_err(|e| e.to_string())? {
        if tx.send(StreamEvent::Row(convert_row(&row))).await.is_err() {
            return Ok(());
        }
        count += 1;
    }

    let _ = tx.send(StreamEvent::Done(count)).await;
    Ok(())
}

fn connect_options(dsn: &str) -> EngineResult<SqliteConnectOptions> {
    let dsn = dsn.trim();
    let url = if dsn.starts_with("sqlite:") {
        dsn.to_string()
    } else {
        format!("sqlite:{}", dsn)
    };

    let options = SqliteConnectOptions::from_str(&url)
        .map_err(|e| EngineError::connection_failed(e.to_string()))?
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(BUSY_TIMEOUT_SECS));
    Ok(options)
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(b),
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Bytes(b) => query.bind(b.as_slice()),
        Value::Json(j) => query.bind(j.to_string()),
    }
}

fn convert_row(row: &SqliteRow) -> GRow {
    let values = row
        .columns()
        .iter()
        .map(|col| extract_value(row, col.ordinal()))
        .collect();
    GRow::new(values)
}

// Storage classes are per value, so try the likely types in order.
fn extract_value(row: &SqliteRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(float_value).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::Text).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(Value::Bytes).unwrap_or(Value::Null);
    }

    Value::Null
}
