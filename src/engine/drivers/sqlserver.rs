// SPDX-License-Identifier: Apache-2.0

//! SQL Server backend
//!
//! Uses Tiberius over a bb8 pool. Connection strings are ADO-style
//! `key=value;...` pairs; a separate `port` key is folded into `server`
//! because ADO has no such keyword. `jdbc:sqlserver://` strings are accepted
//! as well.
//!
//! Only the first result set of a batch is streamed.

use async_trait::async_trait;
use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use futures::TryStreamExt;
use tiberius::{ColumnData, Config, Query, QueryItem};
use tokio::sync::RwLock;

use sqlgate_core::{BoundStatement, Driver, EngineError, EngineResult, Row as GRow, Value};

use crate::config::PoolSettings;
use crate::engine::drivers::float_value;
use crate::engine::iterator::RowIterator;
use crate::engine::traits::{DatabaseHandle, StreamEvent, StreamSender};
use crate::observability::Secret;

type MssqlPool = Pool<ConnectionManager>;

const DEFAULT_PORT: u16 = 1433;

pub struct SqlServerHandle {
    /// `None` once the handle has been closed.
    pool: RwLock<Option<MssqlPool>>,
    stream_buffer: usize,
}

impl SqlServerHandle {
    pub async fn open(dsn: &Secret, settings: &PoolSettings) -> EngineResult<Self> {
        let config = build_config(dsn.expose())?;
        let mgr = ConnectionManager::new(config);

        let pool = Pool::builder()
            .max_size(settings.max_idle_conns)
            .max_lifetime(settings.max_lifetime())
            .idle_timeout(settings.idle_timeout())
            .connection_timeout(settings.acquire_timeout())
            .build(mgr)
            .await
            .map_err(|e| {
                EngineError::connection_failed(format!("Failed to create connection pool: {e}"))
            })?;

        let handle = Self {
            pool: RwLock::new(Some(pool)),
            stream_buffer: settings.stream_buffer,
        };
        // bb8 connects lazily; fail here rather than on the first query.
        handle.ping().await?;
        Ok(handle)
    }

    async fn pool(&self) -> EngineResult<MssqlPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| EngineError::connection_failed("SQL Server handle is closed"))
    }
}

#[async_trait]
impl DatabaseHandle for SqlServerHandle {
    fn driver(&self) -> Driver {
        Driver::SqlServer
    }

    async fn ping(&self) -> EngineResult<()> {
        let pool = self.pool().await?;
        let mut conn = pool.get().await.map_err(|e| {
            EngineError::connection_failed(format!("Failed to acquire connection: {e}"))
        })?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?
            .into_first_result()
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;
        Ok(())
    }

    async fn query(&self, statement: BoundStatement) -> EngineResult<RowIterator> {
        let pool = self.pool().await?;
        RowIterator::spawn(self.stream_buffer, move |tx| async move {
            if let Err(message) = stream_rows(&pool, statement, &tx).await {
                let _ = tx.send(StreamEvent::Error(message)).await;
            }
        })
        .await
    }

    async fn close(&self) {
        // Dropping the last pool reference closes its connections.
        self.pool.write().await.take();
    }
}

async fn stream_rows(
    pool: &MssqlPool,
    statement: BoundStatement,
    tx: &StreamSender,
) -> Result<(), String> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| format!("Failed to acquire connection: {e}"))?;

    let mut query = Query::new(statement.sql);
    for value in statement.params {
        bind_param(&mut query, value);
    }

    let mut stream = query.query(&mut *conn).await.map_err(|e| e.to_string())?;
    let mut columns_sent = false;
    let mut count = 0u64;

    while let Some(item) = stream.try_next().await.map_err(|e| e.to_string())? {
        match item {
            QueryItem::Metadata(meta) if meta.result_index() == 0 => {
                let columns = meta.columns().iter().map(|c| c.name().to_string()).collect();
                if tx.send(StreamEvent::Columns(columns)).await.is_err() {
                    return Ok(());
                }
                columns_sent = true;
            }
            QueryItem::Row(row) if row.result_index() == 0 => {
                if tx.send(StreamEvent::Row(convert_row(&row))).await.is_err() {
                    return Ok(());
                }
                count += 1;
            }
            _ => break,
        }
    }

    // Statements without a result set still get an (empty) header.
    if !columns_sent && tx.send(StreamEvent::Columns(Vec::new())).await.is_err() {
        return Ok(());
    }
    let _ = tx.send(StreamEvent::Done(count)).await;
    Ok(())
}

fn build_config(dsn: &str) -> EngineResult<Config> {
    let dsn = dsn.trim();
    if dsn.starts_with("jdbc:sqlserver://") {
        return Config::from_jdbc_string(dsn)
            .map_err(|e| EngineError::connection_failed(e.to_string()));
    }

    Config::from_ado_string(&to_ado_string(dsn))
        .map_err(|e| EngineError::connection_failed(e.to_string()))
}

/// Folds a standalone `port` pair into `server=tcp:host,port`.
fn to_ado_string(dsn: &str) -> String {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut port: Option<String> = None;

    for part in dsn.split(';').filter(|p| !p.trim().is_empty()) {
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        let key = key.trim();
        if key.eq_ignore_ascii_case("port") {
            port = Some(value.trim().to_string());
        } else {
            pairs.push((key.to_string(), value.to_string()));
        }
    }

    if let Some(port) = port {
        let server = pairs.iter_mut().find(|(k, _)| {
            k.eq_ignore_ascii_case("server")
                || k.eq_ignore_ascii_case("data source")
                || k.eq_ignore_ascii_case("address")
        });
        match server {
            Some((_, host)) if !host.contains(',') => {
                let bare = host.trim().trim_start_matches("tcp:").to_string();
                *host = format!("tcp:{},{}", bare, port);
            }
            Some(_) => {}
            None => pairs.push(("server".to_string(), format!("tcp:localhost,{}", port))),
        }
    } else if let Some((_, host)) = pairs
        .iter_mut()
        .find(|(k, _)| k.eq_ignore_ascii_case("server"))
    {
        if !host.contains(',') && !host.contains('\\') {
            let bare = host.trim().trim_start_matches("tcp:").to_string();
            *host = format!("tcp:{},{}", bare, DEFAULT_PORT);
        }
    }

    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(";")
}

fn bind_param(query: &mut Query<'_>, value: Value) {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(b),
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s),
        Value::Bytes(b) => query.bind(b),
        Value::Json(j) => query.bind(j.to_string()),
    }
}

fn convert_column_data(data: &ColumnData<'_>) -> Value {
    match data {
        ColumnData::Bit(Some(b)) => Value::Bool(*b),
        ColumnData::U8(Some(v)) => Value::Int(*v as i64),
        ColumnData::I16(Some(v)) => Value::Int(*v as i64),
        ColumnData::I32(Some(v)) => Value::Int(*v as i64),
        ColumnData::I64(Some(v)) => Value::Int(*v),
        ColumnData::F32(Some(v)) => float_value(*v as f64),
        ColumnData::F64(Some(v)) => float_value(*v),
        ColumnData::Numeric(Some(n)) => {
            float_value(n.value() as f64 / 10f64.powi(n.scale() as i32))
        }
        ColumnData::String(Some(s)) => Value::Text(s.to_string()),
        ColumnData::Guid(Some(g)) => Value::Text(g.to_string()),
        ColumnData::Binary(Some(b)) => Value::Bytes(b.to_vec()),
        ColumnData::Xml(Some(xml)) => Value::Text(xml.to_string()),
        _ => Value::Null,
    }
}

// Date and time cells go through chrono, everything else through
// convert_column_data.
fn convert_row(row: &tiberius::Row) -> GRow {
    let values = row
        .cells()
        .enumerate()
        .map(|(i, (_col, data))| match data {
            ColumnData::DateTime(Some(_))
            | ColumnData::SmallDateTime(Some(_))
            | ColumnData::DateTime2(Some(_)) => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .ok()
                .flatten()
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
                .unwrap_or(Value::Null),
            ColumnData::DateTimeOffset(Some(_)) => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(i)
                .ok()
                .flatten()
                .map(|dt| Value::Text(dt.to_rfc3339()))
                .unwrap_or(Value::Null),
            ColumnData::Date(Some(_)) => row
                .try_get::<chrono::NaiveDate, _>(i)
                .ok()
                .flatten()
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null),
            ColumnData::Time(Some(_)) => row
                .try_get::<chrono::NaiveTime, _>(i)
                .ok()
                .flatten()
                .map(|t| Value::Text(t.format("%H:%M:%S%.f").to_string()))
                .unwrap_or(Value::Null),
            _ => convert_column_data(data),
        })
        .collect();
    GRow::new(values)
}
