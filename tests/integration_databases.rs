//! Round trips against real database servers.
//!
//! Skipped unless `SQLGATE_TEST_SERVERS` is set; connection details come from
//! `SQLGATE_TEST_<BACKEND>_*` variables with docker-compose style defaults.

use std::collections::HashMap;

use sqlgate::{
    ConnectionDescriptor, EngineError, EngineResult, Gateway, GatewayConfig, OutputFormat,
    QueryRequest, Scalar, Value,
};
use tokio::time::{sleep, Duration};

const DEFAULT_DB: &str = "testdb";

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_i64_or_default(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_bool_or_default(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn servers_enabled() -> bool {
    env_bool_or_default("SQLGATE_TEST_SERVERS", false)
}

fn connection(prefix: &str, port: i64, user: &str) -> ConnectionDescriptor {
    let mut params = HashMap::new();
    params.insert(
        "host".to_string(),
        Scalar::from(env_or_default(&format!("{prefix}_HOST"), "127.0.0.1")),
    );
    params.insert(
        "port".to_string(),
        Scalar::Int(env_i64_or_default(&format!("{prefix}_PORT"), port)),
    );
    params.insert(
        "user".to_string(),
        Scalar::from(env_or_default(&format!("{prefix}_USER"), user)),
    );
    params.insert(
        "password".to_string(),
        Scalar::from(env_or_default(&format!("{prefix}_PASSWORD"), "sqlgate_test")),
    );
    params.insert(
        "database".to_string(),
        Scalar::from(env_or_default(&format!("{prefix}_DB"), DEFAULT_DB)),
    );
    params
}

fn postgres_connection() -> ConnectionDescriptor {
    let mut params = connection("SQLGATE_TEST_PG", 5432, "sqlgate");
    params.insert("sslmode".to_string(), Scalar::from("disable"));
    params
}

fn mysql_connection() -> ConnectionDescriptor {
    connection("SQLGATE_TEST_MYSQL", 3306, "sqlgate")
}

fn mssql_connection() -> ConnectionDescriptor {
    let mut params = connection("SQLGATE_TEST_MSSQL", 1433, "sa");
    params.insert("database".to_string(), Scalar::from("master"));
    params.insert("TrustServerCertificate".to_string(), Scalar::from("true"));
    params
}

async fn wait_for_connection(
    gateway: &Gateway,
    driver: &str,
    connection: &ConnectionDescriptor,
) -> EngineResult<()> {
    let mut last_err = None;
    for _ in 0..20 {
        match gateway.ping(driver, connection).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                last_err = Some(err);
                sleep(Duration::from_millis(500)).await;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        EngineError::connection_failed("Ping did not succeed".to_string())
    }))
}

/// Streams a three-row result in every format, then binds named parameters.
async fn round_trip(driver: &str, connection: ConnectionDescriptor, rows_sql: &str, echo_sql: &str) {
    let gateway = Gateway::new(GatewayConfig::default());
    wait_for_connection(&gateway, driver, &connection)
        .await
        .expect("server did not come up");

    let req = QueryRequest {
        driver: driver.to_string(),
        connection: connection.clone(),
        sql: rows_sql.to_string(),
        params: HashMap::new(),
    };

    let mut csv = Vec::new();
    let summary = gateway.run(&req, OutputFormat::Csv, &mut csv).await.unwrap();
    assert_eq!(summary.rows_written, 3);
    let csv = String::from_utf8(csv).unwrap();
    assert_eq!(csv.lines().count(), 4, "{csv}");
    assert_eq!(csv.lines().next(), Some("id,name"));

    let mut json = Vec::new();
    gateway.run(&req, OutputFormat::Json, &mut json).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(parsed.as_array().map(Vec::len), Some(3));
    assert_eq!(parsed[1]["name"], serde_json::Value::Null);

    let mut ldjson = Vec::new();
    gateway.run(&req, OutputFormat::Ldjson, &mut ldjson).await.unwrap();
    assert_eq!(String::from_utf8(ldjson).unwrap().lines().count(), 3);

    let mut echo = QueryRequest {
        sql: echo_sql.to_string(),
        ..req
    };
    echo.params.insert("n".into(), Value::Int(41));
    echo.params.insert("label".into(), Value::Text("it's".into()));

    let mut rows = gateway.open_rows(&echo).await.unwrap();
    let records = rows.collect_records(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["label"], Value::Text("it's".into()));

    assert_eq!(gateway.pool().len().await, 1);
    gateway.shutdown().await;
    assert!(gateway.pool().is_empty().await);
}

#[tokio::test]
async fn test_postgres_round_trip() {
    if !servers_enabled() {
        return;
    }
    round_trip(
        "postgresql",
        postgres_connection(),
        "SELECT * FROM (VALUES (1, 'alice'), (2, NULL), (3, 'carol, jr')) AS t(id, name) ORDER BY id",
        "SELECT :n + 1 AS next, :label AS label",
    )
    .await;
}

async fn postgres_records(gateway: &Gateway, sql: &str, params: &[(&str, Value)]) -> EngineResult<Vec<sqlgate::Record>> {
    let req = QueryRequest {
        driver: "postgres".to_string(),
        connection: postgres_connection(),
        sql: sql.to_string(),
        params: params
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect(),
    };
    let mut rows = gateway.open_rows(&req).await?;
    rows.collect_records(100).await
}

#[tokio::test]
async fn test_postgres_parameter_and_column_types() {
    if !servers_enabled() {
        return;
    }
    let gateway = Gateway::new(GatewayConfig::default());
    wait_for_connection(&gateway, "postgres", &postgres_connection())
        .await
        .expect("server did not come up");

    // an int8 parameter against an int4 column
    let records = postgres_records(
        &gateway,
        "SELECT id FROM (VALUES (1::int4), (2::int4)) AS t(id) WHERE id = :id",
        &[("id", Value::Int(1))],
    )
    .await
    .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], Value::Int(1));

    // the same text runs again with a different parameter type
    let records = postgres_records(&gateway, "SELECT :s AS s", &[("s", Value::Int(7))])
        .await
        .unwrap();
    assert_eq!(records[0]["s"], Value::Int(7));
    let records = postgres_records(&gateway, "SELECT :s AS s", &[("s", Value::Text("seven".into()))])
        .await
        .unwrap();
    assert_eq!(records[0]["s"], Value::Text("seven".into()));

    // NULL takes the type the server infers
    let records = postgres_records(
        &gateway,
        "SELECT id FROM (VALUES (1::int4)) AS t(id) WHERE id = :x",
        &[("x", Value::Null)],
    )
    .await
    .unwrap();
    assert!(records.is_empty());

    let records = postgres_records(
        &gateway,
        "SELECT 123456789012345678901234567890.5::numeric AS wide, 2.25::numeric AS narrow, \
         '6f1c1a3e-2b4d-4c9a-9e57-0d3f5b8a7c21'::uuid AS id, ARRAY[1, NULL, 3]::int4[] AS nums, \
         'happy'::text AS mood",
        &[],
    )
    .await
    .unwrap();
    assert_eq!(records[0]["wide"], Value::Text("123456789012345678901234567890.5".into()));
    assert_eq!(records[0]["narrow"], Value::Float(2.25));
    assert_eq!(
        records[0]["id"],
        Value::Text("6f1c1a3e-2b4d-4c9a-9e57-0d3f5b8a7c21".into())
    );
    assert_eq!(records[0]["nums"], Value::Json(serde_json::json!([1, null, 3])));

    // an empty result still reports its columns
    let req = QueryRequest {
        driver: "postgres".to_string(),
        connection: postgres_connection(),
        sql: "SELECT 1 AS a, 'x' AS b WHERE false".to_string(),
        params: HashMap::new(),
    };
    let mut csv = Vec::new();
    gateway.run(&req, OutputFormat::Csv, &mut csv).await.unwrap();
    assert_eq!(String::from_utf8(csv).unwrap(), "a,b\n");

    let err = postgres_records(&gateway, "SELECT '127.0.0.1'::inet AS addr", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExecutionError { .. }), "{err}");
    assert!(err.to_string().contains("cast"), "{err}");

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_mysql_round_trip() {
    if !servers_enabled() {
        return;
    }
    round_trip(
        "mariadb",
        mysql_connection(),
        "SELECT 1 AS id, 'alice' AS name UNION ALL SELECT 2, NULL UNION ALL SELECT 3, 'carol, jr'",
        "SELECT :n + 1 AS next, :label AS label",
    )
    .await;
}

#[tokio::test]
async fn test_sqlserver_round_trip() {
    if !servers_enabled() {
        return;
    }
    round_trip(
        "mssql",
        mssql_connection(),
        "SELECT id, name FROM (VALUES (1, 'alice'), (2, NULL), (3, 'carol, jr')) AS t(id, name) ORDER BY id",
        "SELECT :n + 1 AS next, :label AS label",
    )
    .await;
}

#[tokio::test]
async fn test_postgres_bad_credentials_are_not_cached() {
    if !servers_enabled() {
        return;
    }
    let gateway = Gateway::new(GatewayConfig::default());
    let mut params = postgres_connection();
    params.insert("password".to_string(), Scalar::from("definitely-wrong"));

    let err = gateway.ping("postgres", &params).await.unwrap_err();
    assert!(err.is_connection_error(), "{err}");
    assert!(gateway.pool().is_empty().await);
}
