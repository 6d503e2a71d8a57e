// SPDX-License-Identifier: Apache-2.0

// Database drivers module

pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod sqlserver;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::instrument;

use sqlgate_core::{Driver, EngineError, EngineResult, Value};

use crate::config::PoolSettings;
use crate::engine::traits::{Connector, DatabaseHandle};
use crate::observability::Secret;

pub use mysql::MySqlHandle;
pub use postgres::PostgresHandle;
pub use sqlite::SqliteHandle;
pub use sqlserver::SqlServerHandle;

/// Production [`Connector`]: opens a native client pool for each backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeConnector;

#[async_trait]
impl Connector for NativeConnector {
    #[instrument(skip(self, dsn, settings), fields(driver = %driver))]
    async fn open(
        &self,
        driver: Driver,
        dsn: &Secret,
        settings: &PoolSettings,
    ) -> EngineResult<Arc<dyn DatabaseHandle>> {
        let handle: Arc<dyn DatabaseHandle> = match driver {
            Driver::Postgres => Arc::new(PostgresHandle::open(dsn, settings).await?),
            Driver::MySql => Arc::new(MySqlHandle::open(dsn, settings).await?),
            Driver::Sqlite => Arc::new(SqliteHandle::open(dsn, settings).await?),
            Driver::SqlServer => Arc::new(SqlServerHandle::open(dsn, settings).await?),
            Driver::Oracle => {
                return Err(EngineError::not_supported(format!(
                    "{}: no Oracle client is linked into this build",
                    driver.id()
                )))
            }
        };
        Ok(handle)
    }
}

/// Non-finite floats have no JSON form, keep their text.
pub(crate) fn float_value(f: f64) -> Value {
    if f.is_finite() {
        Value::Float(f)
    } else {
        Value::Text(f.to_string())
    }
}

pub(crate) fn decimal_value(d: Decimal) -> Value {
    match d.to_f64() {
        Some(f) if f.is_finite() => Value::Float(f),
        _ => Value::Text(d.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_oracle_is_not_supported() {
        let dsn = Secret::new("scott/tiger@localhost:1521/XE".to_string());
        let err = NativeConnector
            .open(Driver::Oracle, &dsn, &PoolSettings::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::NotSupported { .. }));
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_float_and_decimal_values() {
        assert_eq!(float_value(1.5), Value::Float(1.5));
        assert_eq!(float_value(f64::NAN), Value::Text("NaN".into()));
        assert_eq!(decimal_value(Decimal::new(1234, 2)), Value::Float(12.34));
    }
}
