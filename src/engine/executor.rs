// SPDX-License-Identifier: Apache-2.0

//! Query Executor

use std::time::Instant;

use tracing::instrument;

use sqlgate_core::{BoundStatement, EngineResult, QueryParams};

use crate::engine::iterator::RowIterator;
use crate::engine::traits::DatabaseHandle;

/// Runs `sql` on `handle` and returns a cursor positioned before the first row.
///
/// With named parameters, `:name` placeholders are rewritten to the backend's
/// positional syntax before the statement is sent; without them, the
/// statement goes out verbatim.
#[instrument(skip(handle, sql, params), fields(driver = %handle.driver(), named = params.len()))]
pub async fn execute(
    handle: &dyn DatabaseHandle,
    sql: &str,
    params: &QueryParams,
) -> EngineResult<RowIterator> {
    let statement = BoundStatement::prepare(handle.driver(), sql, params)?;
    let start = Instant::now();

    let rows = handle.query(statement).await?;

    tracing::debug!(
        columns = rows.columns().len(),
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Statement started streaming"
    );
    Ok(rows)
}
