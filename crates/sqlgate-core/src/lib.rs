// SPDX-License-Identifier: Apache-2.0

//! SqlGate core
//!
//! Pure building blocks of the gateway: the driver alias table, connection
//! string builders, named-parameter binding, value types and errors. Nothing
//! in this crate performs I/O.

pub mod driver;
pub mod dsn;
pub mod error;
pub mod named;
pub mod types;

pub use driver::Driver;
pub use dsn::ConnectionParams;
pub use error::{EngineError, EngineResult};
pub use named::BoundStatement;
pub use types::*;
