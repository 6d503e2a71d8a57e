// SPDX-License-Identifier: Apache-2.0

//! Gateway configuration
//!
//! Process-wide tunables for pooled handles and row streaming. Values come
//! from serde (embedding applications) or from `SQLGATE_*` environment
//! variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use sqlgate_core::{EngineError, EngineResult};

pub const ENV_MAX_IDLE_CONNS: &str = "SQLGATE_MAX_IDLE_CONNS";
pub const ENV_MAX_LIFETIME_SECS: &str = "SQLGATE_MAX_LIFETIME_SECS";
pub const ENV_IDLE_TIMEOUT_SECS: &str = "SQLGATE_IDLE_TIMEOUT_SECS";
pub const ENV_ACQUIRE_TIMEOUT_SECS: &str = "SQLGATE_ACQUIRE_TIMEOUT_SECS";
pub const ENV_STREAM_BUFFER: &str = "SQLGATE_STREAM_BUFFER";

/// Limits applied to every pooled handle when it is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Upper bound on open connections per handle (sqlx `max_connections`,
    /// bb8 `max_size`). Queries beyond it wait up to `acquire_timeout_secs`
    /// for a connection to free up.
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: u32,
    /// Connections older than this are closed and replaced (seconds, 0 = unlimited)
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    /// Idle connections are closed after this many seconds (0 = never)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Rows buffered between a producer task and its iterator
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

fn default_max_idle_conns() -> u32 {
    10
}

fn default_max_lifetime_secs() -> u64 {
    30 * 60
}

fn default_idle_timeout_secs() -> u64 {
    10 * 60
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_stream_buffer() -> usize {
    256
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle_conns: default_max_idle_conns(),
            max_lifetime_secs: default_max_lifetime_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl PoolSettings {
    pub fn max_lifetime(&self) -> Option<Duration> {
        non_zero_secs(self.max_lifetime_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.idle_timeout_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.max_idle_conns == 0 {
            return Err(EngineError::invalid_parameter(
                "max_idle_conns must be at least 1",
            ));
        }
        if self.acquire_timeout_secs == 0 {
            return Err(EngineError::invalid_parameter(
                "acquire_timeout_secs must be at least 1",
            ));
        }
        if self.stream_buffer == 0 {
            return Err(EngineError::invalid_parameter(
                "stream_buffer must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration of a [`crate::Gateway`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub pool: PoolSettings,
}

impl GatewayConfig {
    /// Defaults overridden by any `SQLGATE_*` variable set in the process
    /// environment.
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`GatewayConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut pool = PoolSettings::default();

        if let Some(v) = parse_var(&lookup, ENV_MAX_IDLE_CONNS)? {
            pool.max_idle_conns = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_LIFETIME_SECS)? {
            pool.max_lifetime_secs = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_IDLE_TIMEOUT_SECS)? {
            pool.idle_timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_ACQUIRE_TIMEOUT_SECS)? {
            pool.acquire_timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_STREAM_BUFFER)? {
            pool.stream_buffer = v;
        }

        pool.validate()?;
        Ok(Self { pool })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> EngineResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            EngineError::invalid_parameter(format!("{}={:?}: {}", key, raw, e))
        }),
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.pool.max_lifetime(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_env_overrides() {
        let config = GatewayConfig::from_lookup(lookup(&[
            (ENV_MAX_IDLE_CONNS, "4"),
            (ENV_MAX_LIFETIME_SECS, "0"),
            (ENV_STREAM_BUFFER, " 16 "),
        ]))
        .unwrap();
        assert_eq!(config.pool.max_idle_conns, 4);
        assert_eq!(config.pool.max_lifetime(), None);
        assert_eq!(config.pool.stream_buffer, 16);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = GatewayConfig::from_lookup(lookup(&[(ENV_MAX_IDLE_CONNS, "many")])).unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_IDLE_CONNS));

        let err = GatewayConfig::from_lookup(lookup(&[(ENV_STREAM_BUFFER, "0")])).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { .. }));
    }

    #[test]
    fn test_partial_serde_uses_defaults() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"pool":{"max_idle_conns":2}}"#).unwrap();
        assert_eq!(config.pool.max_idle_conns, 2);
        assert_eq!(config.pool.acquire_timeout_secs, 30);
    }
}
