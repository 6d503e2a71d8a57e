// SPDX-License-Identifier: Apache-2.0

// SqlGate - protocol-agnostic SQL gateway
// Core library

pub mod config;
pub mod engine;
pub mod export;
pub mod gateway;
pub mod observability;

pub use config::{GatewayConfig, PoolSettings};
pub use engine::{ConnectionPool, RowIterator};
pub use export::{EncodeSummary, OutputFormat};
pub use gateway::{Gateway, QueryRequest};

pub use sqlgate_core::{
    ConnectionDescriptor, Driver, EngineError, EngineResult, QueryParams, Record, Row, Scalar,
    Value,
};
