// SPDX-License-Identifier: Apache-2.0

//! MySQL / MariaDB backend
//!
//! Understands the `[user[:password]@]tcp(host:port)/database[?options]`
//! connection strings produced by the DSN builder, `unix(/path)` socket
//! addresses, and `mysql://` URLs.

use std::str::FromStr;

use async_trait::async_trait;
use futures::TryStreamExt;
use rust_decimal::Decimal;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Executor, Row, Statement};

use sqlgate_core::{BoundStatement, Driver, EngineError, EngineResult, Row as GRow, Value};

use crate::config::PoolSettings;
use crate::engine::drivers::{decimal_value, float_value};
use crate::engine::iterator::RowIterator;
use crate::engine::traits::{DatabaseHandle, StreamEvent, StreamSender};
use crate::observability::Secret;

pub struct MySqlHandle {
    pool: MySqlPool,
    stream_buffer: usize,
}

impl MySqlHandle {
    pub async fn open(dsn: &Secret, settings: &PoolSettings) -> EngineResult<Self> {
        let options = connect_options(dsn.expose())?;

        let pool = MySqlPoolOptions::new()
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
impl DatabaseHandle for MySqlHandle {
    fn driver(&self) -> Driver {
        Driver::MySql
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
    pool: &MySqlPool,
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

/// Address part of a MySQL connection string.
#[derive(Debug, PartialEq)]
enum Address {
    Default,
    Tcp { host: String, port: Option<u16> },
    Unix(String),
}

#[derive(Debug, PartialEq)]
struct ParsedDsn {
    user: Option<String>,
    password: Option<String>,
    address: Address,
    database: Option<String>,
    options: Vec<(String, String)>,
}

fn parse_dsn(dsn: &str) -> EngineResult<ParsedDsn> {
    // The database follows the last slash; credentials may contain anything,
    // so the address starts after the last '@' before it.
    let slash = dsn.rfind('/').ok_or_else(|| {
        EngineError::connection_failed("invalid MySQL connection string: missing '/'")
    })?;
    let (prefix, rest) = (&dsn[..slash], &dsn[slash + 1..]);

    let (credentials, address) = match prefix.rfind('@') {
        Some(at) => (Some(&prefix[..at]), &prefix[at + 1..]),
        None => (None, prefix),
    };

    let (user, password) = match credentials {
        Some(creds) => match creds.split_once(':') {
            Some((user, password)) => (Some(user.to_string()), Some(password.to_string())),
            None => (Some(creds.to_string()), None),
        },
        None => (None, None),
    };

    let address = parse_address(address)?;

    let (database, query) = match rest.split_once('?') {
        Some((db, query)) => (db, Some(query)),
        None => (rest, None),
    };
    let options = query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default();

    Ok(ParsedDsn {
        user: user.filter(|u| !u.is_empty()),
        password,
        address,
        database: Some(database.to_string()).filter(|d| !d.is_empty()),
        options,
    })
}

fn parse_address(address: &str) -> EngineResult<Address> {
    if address.is_empty() {
        return Ok(Address::Default);
    }

    let (net, inner) = match address.split_once('(') {
        Some((net, inner)) => {
            let inner = inner.strip_suffix(')').ok_or_else(|| {
                EngineError::connection_failed(format!("invalid MySQL address: {}", address))
            })?;
            (net, inner)
        }
        None => (address, ""),
    };

    match net {
        "tcp" if inner.is_empty() => Ok(Address::Default),
        "tcp" => {
            let (host, port) = match inner.rsplit_once(':') {
                Some((host, port)) if !host.ends_with(':') => {
                    let port = port.parse::<u16>().map_err(|_| {
                        EngineError::connection_failed(format!("invalid port: {}", port))
                    })?;
                    (host, Some(port))
                }
                _ => (inner, None),
            };
            Ok(Address::Tcp {
                host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                port,
            })
        }
        "unix" => Ok(Address::Unix(inner.to_string())),
        other => Err(EngineError::connection_failed(format!(
            "unsupported MySQL network: {}",
            other
        ))),
    }
}

fn connect_options(dsn: &str) -> EngineResult<MySqlConnectOptions> {
    let dsn = dsn.trim();
    if dsn.starts_with("mysql://") || dsn.starts_with("mariadb://") {
        return MySqlConnectOptions::from_str(dsn)
            .map_err(|e| EngineError::connection_failed(e.to_string()));
    }

    let parsed = parse_dsn(dsn)?;
    let mut options = MySqlConnectOptions::new();

    if let Some(user) = &parsed.user {
        options = options.username(user);
    }
    if let Some(password) = &parsed.password {
        options = options.password(password);
    }
    if let Some(database) = &parsed.database {
        options = options.database(database);
    }
    options = match &parsed.address {
        Address::Default => options,
        Address::Tcp { host, port } => {
            let options = options.host(host);
            match port {
                Some(port) => options.port(*port),
                None => options,
            }
        }
        Address::Unix(path) => options.socket(path),
    };

    for (key, value) in &parsed.options {
        options = match key.as_str() {
            "charset" => options.charset(value),
            "collation" => options.collation(value),
            "tls" => options.ssl_mode(match value.as_str() {
                "true" | "skip-verify" | "preferred" => MySqlSslMode::Required,
                "false" => MySqlSslMode::Disabled,
                _ => MySqlSslMode::Preferred,
            }),
            "ssl-mode" | "sslmode" => options.ssl_mode(
                MySqlSslMode::from_str(value)
                    .map_err(|e| EngineError::connection_failed(e.to_string()))?,
            ),
            other => {
                tracing::warn!(key = other, "Ignoring unsupported MySQL connection option");
                options
            }
        };
    }

    Ok(options)
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(b),
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Bytes(b) => query.bind(b.as_slice()),
        Value::Json(j) => query.bind(j),
    }
}

fn convert_row(row: &MySqlRow) -> GRow {
    let values = row
        .columns()
        .iter()
        .map(|col| extract_value(row, col.ordinal()))
        .collect();
    GRow::new(values)
}

fn extract_value(row: &MySqlRow, idx: usize) -> Value {
    // BIGINT UNSIGNED first; values above i64::MAX keep their text.
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v
            .map(|u| i64::try_from(u).map(Value::Int).unwrap_or_else(|_| Value::Text(u.to_string())))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
        return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u16>, _>(idx) {
        return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
        return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u8>, _>(idx) {
        return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(float_value).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map(|f| float_value(f as f64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
        return v.map(decimal_value).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::Text).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return v
            .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return v
            .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
        return v
            .map(|t| Value::Text(t.format("%H:%M:%S").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(Value::Bytes).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return v.map(Value::Json).unwrap_or(Value::Null);
    }

    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_built_dsn() {
        let parsed = parse_dsn("u:p@tcp(h:5432)/d").unwrap();
        assert_eq!(
            parsed,
            ParsedDsn {
                user: Some("u".into()),
                password: Some("p".into()),
                address: Address::Tcp {
                    host: "h".into(),
                    port: Some(5432)
                },
                database: Some("d".into()),
                options: Vec::new(),
            }
        );
    }

    #[test]
    fn test_parse_without_credentials_or_database() {
        let parsed = parse_dsn("tcp(localhost:3306)/?loc=Europe%2FParis&parseTime=true").unwrap();
        assert_eq!(parsed.user, None);
        assert_eq!(parsed.database, None);
        assert_eq!(
            parsed.options,
            vec![
                ("loc".to_string(), "Europe/Paris".to_string()),
                ("parseTime".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_password_may_contain_separators() {
        let parsed = parse_dsn("root:p@ss:w/rd@tcp(db:3307)/shop").unwrap();
        assert_eq!(parsed.user.as_deref(), Some("root"));
        assert_eq!(parsed.password.as_deref(), Some("p@ss:w/rd"));
        assert_eq!(parsed.database.as_deref(), Some("shop"));
    }

    #[test]
    fn test_unix_socket_and_ipv6() {
        assert_eq!(
            parse_dsn("u@unix(/var/run/mysqld.sock)/d").unwrap().address,
            Address::Unix("/var/run/mysqld.sock".into())
        );
        assert_eq!(
            parse_dsn("tcp([::1]:3306)/d").unwrap().address,
            Address::Tcp {
                host: "::1".into(),
                port: Some(3306)
            }
        );
    }

    #[test]
    fn test_invalid_strings() {
        assert!(parse_dsn("no-slash").is_err());
        assert!(parse_dsn("tcp(h:abc)/d").is_err());
        assert!(parse_dsn("udp(h:1)/d").is_err());
    }

    #[test]
    fn test_connect_options() {
        let options = connect_options("u:p@tcp(db:3307)/shop?charset=utf8mb4").unwrap();
        assert_eq!(options.get_host(), "db");
        assert_eq!(options.get_port(), 3307);
        assert_eq!(options.get_username(), "u");
        assert_eq!(options.get_database(), Some("shop"));
        assert_eq!(options.get_charset(), "utf8mb4");
    }
}
