// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the gateway
//!
//! Driver-specific failures are mapped to these variants so the transport
//! layer can pick a response without knowing which backend produced them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for every gateway operation
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum EngineError {
    #[error("Unknown driver: {driver}")]
    UnknownDriver { driver: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Feature not supported: {message}")]
    NotSupported { message: String },

    #[error("Query execution error: {message}")]
    ExecutionError { message: String },

    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("Encoding error: {message}")]
    Encoding { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn unknown_driver(driver: impl Into<String>) -> Self {
        Self::UnknownDriver {
            driver: driver.into(),
        }
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported { message: msg.into() }
    }

    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError { message: msg.into() }
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter { message: msg.into() }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// True when the failure happened before any statement ran: the handle
    /// could not be opened, or the backend is not available in this build.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::NotSupported { .. }
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::encoding(err.to_string())
    }
}

/// Result type alias for gateway operations
pub type EngineResult<T> = Result<T, EngineError>;
