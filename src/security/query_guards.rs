//! Query Guards
//!
//! Row and wall-clock limits for ad-hoc queries. The deadline is handed to
//! SQLite as a progress handler, so a long-running statement is interrupted
//! inside the engine rather than waited out.
//!
//! The cursor is never stepped past the first row beyond the cap: `rowCount`
//! is the number of rows returned, and `truncated` says more rows exist.

use crate::error::{Rejection, Result, SheetError};
use crate::execution::result::{storage_class, value_to_json};
use crate::execution::{FieldDescriptor, QueryResult};
use crate::security::sql_validator::{SqlValidator, ValidatedQuery};
use crate::store::Store;
use rusqlite::{Connection, ErrorCode};
use serde_json::Map;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// VM instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 1_000;

/// Extra wait for the blocking task after the deadline, so an engine-side
/// interrupt can still hand back what was collected.
const DEADLINE_GRACE: Duration = Duration::from_millis(500);

/// Query guards configuration
#[derive(Debug, Clone)]
pub struct QueryGuards {
    pub max_rows: usize,
    pub execution_timeout: Duration,
}

impl Default for QueryGuards {
    fn default() -> Self {
        Self {
            max_rows: 50_000,
            execution_timeout: Duration::from_secs(10),
        }
    }
}

impl QueryGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and run `sql` without blocking the async runtime.
    ///
    /// The deadline starts when validation passes. Waiting for the store lock
    /// counts against it, and the caller stops waiting shortly after it has
    /// passed.
    pub async fn execute(&self, store: Arc<Store>, sql: &str) -> Result<QueryResult> {
        let query = self.validate(sql)?;
        let deadline = Instant::now() + self.execution_timeout;
        let guards = self.clone();

        let task = tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| guards.run(conn, &query, deadline))
        });

        let give_up = tokio::time::Instant::from_std(deadline + DEADLINE_GRACE);
        match tokio::time::timeout_at(give_up, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SheetError::ExecutionError(format!(
                "query task failed: {}",
                join_err
            ))),
            Err(_) => {
                warn!("⏱️  Query abandoned at the {:?} deadline", self.execution_timeout);
                Err(SheetError::Timeout(self.execution_timeout))
            }
        }
    }

    /// Blocking variant for callers already off the async runtime.
    pub fn execute_blocking(&self, store: &Store, sql: &str) -> Result<QueryResult> {
        let query = self.validate(sql)?;
        let deadline = Instant::now() + self.execution_timeout;
        store.with_connection(|conn| self.run(conn, &query, deadline))
    }

    fn validate(&self, sql: &str) -> Result<ValidatedQuery> {
        SqlValidator::validate(sql).map_err(|reason| {
            info!("🚫 Query rejected: {}", reason);
            SheetError::from(reason)
        })
    }

    /// Run an already validated statement on `conn` until `deadline`.
    pub fn run(
        &self,
        conn: &Connection,
        query: &ValidatedQuery,
        deadline: Instant,
    ) -> Result<QueryResult> {
        if Instant::now() >= deadline {
            return Err(SheetError::Timeout(self.execution_timeout));
        }

        let started = Instant::now();
        conn.progress_handler(PROGRESS_INTERVAL, Some(move || Instant::now() >= deadline));
        let outcome = self.collect(conn, query, deadline);
        conn.progress_handler(PROGRESS_INTERVAL, None::<fn() -> bool>);

        let mut result = outcome?;
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            "Query {} finished in {}ms: {} rows returned, truncated={}",
            query.kind(),
            result.execution_time_ms,
            result.row_count,
            result.truncated
        );
        Ok(result)
    }

    fn collect(
        &self,
        conn: &Connection,
        query: &ValidatedQuery,
        deadline: Instant,
    ) -> Result<QueryResult> {
        let mut stmt = conn
            .prepare(query.sql())
            .map_err(|e| self.engine_error(e))?;

        if !stmt.readonly() {
            warn!("🚫 Engine reports {} statement as not read-only", query.kind());
            return Err(Rejection::NotReadOnly(query.kind().to_string()).into());
        }

        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let declared: Vec<Option<String>> = stmt
            .columns()
            .iter()
            .map(|c| c.decl_type().map(str::to_lowercase).filter(|t| !t.is_empty()))
            .collect();
        let mut observed: Vec<Option<&'static str>> = vec![None; names.len()];

        let mut rows = stmt.query([]).map_err(|e| self.engine_error(e))?;
        let mut out = Vec::new();
        let mut truncated = false;

        loop {
            let next = if Instant::now() >= deadline {
                Err(SheetError::Timeout(self.execution_timeout))
            } else {
                rows.next().map_err(|e| self.engine_error(e))
            };
            let row = match next {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(SheetError::Timeout(_)) if out.len() >= self.max_rows => {
                    // Cap already filled: the cursor was not exhausted.
                    warn!("⏱️  Deadline hit after {} rows; returning them as truncated", out.len());
                    truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            if out.len() >= self.max_rows {
                truncated = true;
                break;
            }

            let mut record = Map::with_capacity(names.len());
            for (idx, name) in names.iter().enumerate() {
                let value = row.get_ref(idx).map_err(|e| self.engine_error(e))?;
                if observed[idx].is_none() {
                    observed[idx] = storage_class(value);
                }
                record.insert(name.clone(), value_to_json(value));
            }
            out.push(record);
        }

        let fields = names
            .into_iter()
            .zip(declared.into_iter().zip(observed))
            .map(|(name, (declared, observed))| FieldDescriptor {
                name,
                data_type: declared.unwrap_or_else(|| observed.unwrap_or("null").to_string()),
            })
            .collect();

        debug!("Collected {} rows, truncated={}", out.len(), truncated);
        Ok(QueryResult {
            ok: true,
            fields,
            truncated,
            row_count: out.len() as u64,
            rows: out,
            execution_time_ms: 0,
        })
    }

    fn engine_error(&self, err: rusqlite::Error) -> SheetError {
        if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
            SheetError::Timeout(self.execution_timeout)
        } else {
            SheetError::ExecutionError(err.to_string())
        }
    }
}
