// SPDX-License-Identifier: Apache-2.0

//! Connection Pool
//!
//! Cache of live database handles keyed by canonical connection identity.
//! A handle is created on the first request for a given (driver, parameters)
//! pair and reused afterwards. Only the pool closes handles.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::instrument;

use sqlgate_core::driver;
use sqlgate_core::dsn;
use sqlgate_core::{clean_params, CleanedParams, ConnectionDescriptor, Driver, EngineError, EngineResult};

use crate::config::PoolSettings;
use crate::engine::traits::{Connector, DatabaseHandle};
use crate::observability::Secret;

/// Canonical identity of a pooled handle: the driver id followed by the
/// cleaned parameters serialized with sorted keys. Holds credentials, so it
/// is never logged.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PoolKey(String);

impl PoolKey {
    pub fn new(driver: Driver, params: &CleanedParams) -> EngineResult<Self> {
        let params = serde_json::to_string(params)
            .map_err(|e| EngineError::internal(format!("pool key serialization: {}", e)))?;
        Ok(Self(format!("{}|{}", driver.id(), params)))
    }
}

impl std::fmt::Debug for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PoolKey([REDACTED])")
    }
}

pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    handles: Mutex<HashMap<PoolKey, Arc<dyn DatabaseHandle>>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, settings: PoolSettings) -> Self {
        Self {
            connector,
            settings,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Returns the cached handle for `alias` and `params`, opening it on a miss.
    ///
    /// The cache lock is held while a new handle connects, so concurrent
    /// requests for the same identity share a single handle. Failed opens
    /// leave the cache untouched.
    #[instrument(skip(self, params), fields(driver = %alias, params = params.len()))]
    pub async fn get_or_create(
        &self,
        alias: &str,
        params: &ConnectionDescriptor,
    ) -> EngineResult<Arc<dyn DatabaseHandle>> {
        let driver = driver::resolve(alias)?;
        let cleaned = clean_params(params);
        let key = PoolKey::new(driver, &cleaned)?;

        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(&key) {
            tracing::debug!(driver = %driver, "Reusing pooled handle");
            return Ok(Arc::clone(handle));
        }

        let dsn = Secret::new(dsn::build(driver, &cleaned));
        let handle = self
            .connector
            .open(driver, &dsn, &self.settings)
            .await
            .map_err(|e| {
                tracing::warn!(driver = %driver, error = %e, "Failed to open handle");
                e
            })?;

        handles.insert(key, Arc::clone(&handle));
        tracing::info!(driver = %driver, pooled = handles.len(), "Opened pooled handle");
        Ok(handle)
    }

    /// Round-trips to the backend behind `handle`.
    pub async fn ping(&self, handle: &Arc<dyn DatabaseHandle>) -> EngineResult<()> {
        handle.ping().await
    }

    /// Closes every cached handle and empties the cache. Later calls to
    /// [`ConnectionPool::get_or_create`] open fresh handles.
    #[instrument(skip(self))]
    pub async fn shutdown_all(&self) {
        let drained: Vec<Arc<dyn DatabaseHandle>> = {
            let mut handles = self.handles.lock().await;
            handles.drain().map(|(_, handle)| handle).collect()
        };

        let count = drained.len();
        for handle in drained {
            handle.close().await;
        }
        tracing::info!(closed = count, "Connection pool shut down");
    }

    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.lock().await.is_empty()
    }
}
