// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL backend
//!
//! Accepts either libpq keyword/value strings (`host=h port=5432 ...`) or
//! `postgres://` URLs.

use std::str::FromStr;

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use futures::TryStreamExt;
use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{
    PgArgumentBuffer, PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgRow, PgSslMode,
    PgTypeInfo, PgTypeKind, PgValueFormat, Postgres,
};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use uuid::Uuid;

use sqlgate_core::{BoundStatement, Driver, EngineError, EngineResult, Row as GRow, Value};

use crate::config::PoolSettings;
use crate::engine::drivers::float_value;
use crate::engine::iterator::RowIterator;
use crate::engine::traits::{DatabaseHandle, StreamEvent, StreamSender};
use crate::observability::Secret;

pub struct PostgresHandle {
    pool: PgPool,
    stream_buffer: usize,
}

impl PostgresHandle {
    pub async fn open(dsn: &Secret, settings: &PoolSettings) -> EngineResult<Self> {
        let options = connect_options(dsn.expose())?;

        let pool = PgPoolOptions::new()
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
impl DatabaseHandle for PostgresHandle {
    fn driver(&self) -> Driver {
        Driver::Postgres
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

/// Runs the statement as an unnamed, uncached prepared statement, so every
/// execution is planned with the types of the values actually bound. The
/// header comes from the first row, or from a describe round trip when the
/// result is empty.
async fn stream_rows(
    pool: &PgPool,
    statement: &BoundStatement,
    tx: &StreamSender,
) -> Result<(), String> {
    let mut conn = pool.acquire().await.map_err(|e| e.to_string())?;

    let mut query = sqlx::query(statement.sql.as_str()).persistent(false);
    for value in &statement.params {
        query = bind_param(query, value);
    }

    let mut header_sent = false;
    let mut count = 0u64;
    {
        let mut rows = query.fetch(&mut *conn);
        while let Some(row) = rows.try_next().await.map_err(|e| e.to_string())? {
            if !header_sent {
                let columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                if tx.send(StreamEvent::Columns(columns)).await.is_err() {
                    return Ok(());
                }
                header_sent = true;
            }
            if tx.send(StreamEvent::Row(convert_row(&row)?)).await.is_err() {
                return Ok(());
            }
            count += 1;
        }
    }

    if !header_sent {
        let columns = describe_columns(&mut conn, &statement.sql).await;
        if tx.send(StreamEvent::Columns(columns)).await.is_err() {
            return Ok(());
        }
    }

    let _ = tx.send(StreamEvent::Done(count)).await;
    Ok(())
}

async fn describe_columns(conn: &mut PgConnection, sql: &str) -> Vec<String> {
    match conn.describe(sql).await {
        Ok(described) => described
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
        Err(e) => {
            tracing::debug!(error = %e, "Could not describe empty result");
            Vec::new()
        }
    }
}

fn connect_options(dsn: &str) -> EngineResult<PgConnectOptions> {
    let trimmed = dsn.trim();
    if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
        return PgConnectOptions::from_str(trimmed)
            .map_err(|e| EngineError::connection_failed(e.to_string()));
    }

    let mut options = PgConnectOptions::new();
    for (key, value) in parse_keyword_value(trimmed)? {
        options = match key.as_str() {
            "host" | "hostaddr" => options.host(&value),
            "port" => options.port(value.parse::<u16>().map_err(|_| {
                EngineError::connection_failed(format!("invalid port: {}", value))
            })?),
            "user" => options.username(&value),
            "password" => options.password(&value),
            "database" | "dbname" => options.database(&value),
            "sslmode" => options.ssl_mode(
                PgSslMode::from_str(&value)
                    .map_err(|e| EngineError::connection_failed(e.to_string()))?,
            ),
            "sslrootcert" => options.ssl_root_cert(value.as_str()),
            "application_name" => options.application_name(&value),
            other => {
                tracing::warn!(key = other, "Ignoring unsupported PostgreSQL connection key");
                options
            }
        };
    }
    Ok(options)
}

/// Splits a libpq keyword/value string. Values may be single-quoted; inside
/// or outside quotes a backslash escapes the next character.
fn parse_keyword_value(dsn: &str) -> EngineResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = dsn.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.next() != Some('=') {
            return Err(EngineError::connection_failed(format!(
                "missing \"=\" after \"{}\" in connection string",
                key
            )));
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '\'' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(EngineError::connection_failed(
                    "unterminated quoted string in connection string",
                ));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                chars.next();
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        value.push(escaped);
                    }
                } else {
                    value.push(c);
                }
            }
        }

        pairs.push((key, value));
    }

    Ok(pairs)
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::Null => query.bind(UntypedNull),
        Value::Bool(b) => query.bind(b),
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s),
        Value::Bytes(b) => query.bind(b),
        Value::Json(j) => query.bind(j),
    }
}

/// NULL sent with an unspecified type, so the server infers the parameter
/// type from its context (`WHERE id = $1` on an int4 column, and so on).
struct UntypedNull;

impl sqlx::Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

fn convert_row(row: &PgRow) -> Result<GRow, String> {
    let values = row
        .columns()
        .iter()
        .map(|col| extract_value(row, col.ordinal()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(GRow::new(values))
}

/// Numerics with up to 15 significant digits survive a trip through `f64`;
/// wider ones keep their exact text.
fn big_decimal_value(d: BigDecimal) -> Value {
    if d.digits() <= 15 {
        if let Some(f) = d.to_f64().filter(|f| f.is_finite()) {
            return Value::Float(f);
        }
    }
    Value::Text(d.to_string())
}

fn json_array<T: Into<serde_json::Value>>(values: Vec<Option<T>>) -> Value {
    Value::Json(serde_json::Value::from(values))
}

fn extract_value(row: &PgRow, idx: usize) -> Result<Value, String> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return Ok(v.map(Value::Int).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return Ok(v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return Ok(v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return Ok(v.map(Value::Bool).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return Ok(v.map(float_value).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return Ok(v.map(|f| float_value(f as f64)).unwrap_or(Value::Null));
    }
    // BigDecimal takes any precision; rust_decimal's decoder panics past 28 digits.
    if let Ok(v) = row.try_get::<Option<BigDecimal>, _>(idx) {
        return Ok(v.map(big_decimal_value).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<Uuid>, _>(idx) {
        return Ok(v.map(|u| Value::Text(u.to_string())).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return Ok(v.map(Value::Text).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return Ok(v.map(Value::Bytes).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return Ok(v.map(Value::Json).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return Ok(v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return Ok(v
            .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return Ok(v
            .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
        return Ok(v
            .map(|t| Value::Text(t.format("%H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<Vec<Option<i64>>>, _>(idx) {
        return Ok(v.map(json_array).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<Vec<Option<i32>>>, _>(idx) {
        return Ok(v.map(json_array).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<Vec<Option<i16>>>, _>(idx) {
        return Ok(v.map(json_array).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<Vec<Option<f64>>>, _>(idx) {
        return Ok(v.map(json_array).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<Vec<Option<bool>>>, _>(idx) {
        return Ok(v.map(json_array).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<Vec<Option<String>>>, _>(idx) {
        return Ok(v.map(json_array).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<Vec<Option<Uuid>>>, _>(idx) {
        return Ok(v
            .map(|vals| json_array(vals.into_iter().map(|u| u.map(|u| u.to_string())).collect()))
            .unwrap_or(Value::Null));
    }

    let raw = row.try_get_raw(idx).map_err(|e| e.to_string())?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_info = raw.type_info().into_owned();
    // Enum labels travel as UTF-8 in both wire formats.
    if matches!(raw.format(), PgValueFormat::Text) || matches!(type_info.kind(), PgTypeKind::Enum(_)) {
        if let Ok(text) = raw.as_str() {
            return Ok(Value::Text(text.to_string()));
        }
    }
    Err(format!(
        "column {} has unsupported type {}; cast it to text in the query",
        idx + 1,
        type_info.name()
    ))
}
