// SPDX-License-Identifier: Apache-2.0

// Data Engine Module
// Pooled handles, statement execution and row cursors

pub mod drivers;
pub mod executor;
pub mod iterator;
pub mod pool;
pub mod traits;

pub use drivers::NativeConnector;
pub use executor::execute;
pub use iterator::RowIterator;
pub use pool::ConnectionPool;
pub use traits::{Connector, DatabaseHandle, RowCursor, StreamEvent};
