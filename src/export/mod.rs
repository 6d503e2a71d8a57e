// SPDX-License-Identifier: Apache-2.0

// Result encoders
// CSV, JSON and line-delimited JSON over any async sink

pub mod types;
pub mod writers;

pub use types::*;
pub use writers::{encode, RowWriter};
