//! [`Executor`] over a [`SqlitePool`]
//!
//! rusqlite is synchronous, so every statement runs on the blocking pool.
//! Cancellation, or dropping the call, raises the call's [`AbortFlag`]: a
//! worker still waiting for the connection skips its statement, and a running
//! one is stopped by the connection's progress handler.

use crate::connection::{AbortFlag, SqlitePool};
use crate::error::{SqliteError, SqliteResult};
use crate::value::{from_sql, SqlValue};
use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection};
use strata_query::{BoxError, ColumnInfo, Executor, Parameter, RowSet, ValueType};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn finish<T>(
        task: JoinHandle<SqliteResult<T>>,
        abort: AbortFlag,
        cancel: &CancellationToken,
    ) -> SqliteResult<T> {
        let mut guard = AbortOnDrop {
            abort,
            armed: true,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Cancelling SQLite statement");
                Err(SqliteError::Cancelled)
            }
            joined = task => {
                guard.armed = false;
                joined?
            }
        }
    }
}

/// Raises the abort flag unless the statement finished first. Covers both our
/// own cancellation and the caller dropping the future.
struct AbortOnDrop {
    abort: AbortFlag,
    armed: bool,
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.abort.raise();
        }
    }
}

fn execute_statement(conn: &Connection, text: &str, parameters: &[Parameter]) -> SqliteResult<u64> {
    let mut stmt = conn.prepare_cached(text)?;
    let affected = stmt.execute(params_from_iter(parameters.iter().map(|p| SqlValue(&p.value))))?;
    Ok(affected as u64)
}

fn query_statement(
    conn: &Connection,
    text: &str,
    parameters: &[Parameter],
) -> SqliteResult<RowSet> {
    let mut stmt = conn.prepare_cached(text)?;
    let columns: Vec<ColumnInfo> = stmt
        .columns()
        .iter()
        .map(|c| ColumnInfo::new(c.name(), c.decl_type().and_then(ValueType::from_declared)))
        .collect();
    let width = columns.len();

    let mut set = RowSet::new(columns);
    let mut rows = stmt.query(params_from_iter(parameters.iter().map(|p| SqlValue(&p.value))))?;
    while let Some(row) = rows.next()? {
        let values = (0..width)
            .map(|i| row.get_ref(i).map(from_sql))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        set.push(values);
    }
    Ok(set)
}

#[async_trait]
impl Executor for SqliteExecutor {
    async fn execute(
        &self,
        text: &str,
        parameters: &[Parameter],
        cancel: &CancellationToken,
    ) -> Result<u64, BoxError> {
        debug!(sql = %text, params = parameters.len(), "SQLite execute");
        let pool = self.pool.clone();
        let text = text.to_string();
        let parameters = parameters.to_vec();

        let abort = AbortFlag::new();
        let (worker_cancel, worker_abort) = (cancel.clone(), abort.clone());

        let task = tokio::task::spawn_blocking(move || {
            pool.with_cancellable(&worker_cancel, &worker_abort, |conn| {
                execute_statement(conn, &text, &parameters)
            })
        });
        Ok(Self::finish(task, abort, cancel).await?)
    }

    async fn query(
        &self,
        text: &str,
        parameters: &[Parameter],
        cancel: &CancellationToken,
    ) -> Result<RowSet, BoxError> {
        debug!(sql = %text, params = parameters.len(), "SQLite query");
        let pool = self.pool.clone();
        let text = text.to_string();
        let parameters = parameters.to_vec();

        let abort = AbortFlag::new();
        let (worker_cancel, worker_abort) = (cancel.clone(), abort.clone());

        let task = tokio::task::spawn_blocking(move || {
            pool.with_cancellable(&worker_cancel, &worker_abort, |conn| {
                query_statement(conn, &text, &parameters)
            })
        });
        Ok(Self::finish(task, abort, cancel).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use strata_query::Value;

    fn executor() -> SqliteExecutor {
        let pool = SqlitePool::memory().unwrap();
        pool.execute_batch(
            "CREATE TABLE \"User\" (\"Id\" INTEGER PRIMARY KEY, \"Name\" TEXT NOT NULL, \
             \"Joined\" TIMESTAMP);",
        )
        .unwrap();
        SqliteExecutor::new(pool)
    }

    fn param(name: &str, value: impl Into<Value>) -> Parameter {
        Parameter {
            name: name.to_string(),
            value: value.into(),
        }
    }

    #[tokio::test]
    async fn test_execute_then_query() {
        let exec = executor();
        let cancel = CancellationToken::new();

        let affected = exec
            .execute(
                "INSERT INTO \"User\" (\"Id\", \"Name\") VALUES (?1, ?2), (?3, ?4)",
                &[param("Id", 1), param("Name", "A"), param("Id_2", 2), param("Name_2", "B")],
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(affected, 2);

        let rows = exec
            .query(
                "SELECT \"Id\", \"Name\", \"Joined\" FROM \"User\" WHERE \"Name\" = ?1",
                &[param("Name", "B")],
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(rows.rows, vec![vec![Value::Integer(2), "B".into(), Value::Null]]);
        assert_eq!(rows.columns[0].declared, Some(ValueType::Integer));
        assert_eq!(rows.columns[2].declared, Some(ValueType::Timestamp));
    }

    #[tokio::test]
    async fn test_computed_column_has_no_declared_type() {
        let exec = executor();

        let rows = exec
            .query("SELECT COUNT(*) FROM \"User\"", &[], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(rows.columns[0].declared, None);
        assert_eq!(rows.rows, vec![vec![Value::Integer(0)]]);
    }

    #[tokio::test]
    async fn test_invalid_sql_is_an_error() {
        let exec = executor();

        let err = exec
            .query("SELECT nope FROM \"User\"", &[], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no such column"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_waiting() {
        let exec = executor();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = exec
            .query("SELECT 1", &[], &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), SqliteError::Cancelled.to_string());
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    const LONG_COUNT: &str = concat!(
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 3000000) ",
        "SELECT COUNT(*) FROM c"
    );

    #[tokio::test]
    async fn test_cancelled_insert_is_never_applied() {
        let exec = executor();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = exec
            .execute(
                "INSERT INTO \"User\" (\"Id\", \"Name\") VALUES (?1, ?2)",
                &[param("Id", 1), param("Name", "A")],
                &cancel,
            )
            .await;
        assert!(result.is_err());

        // Give a detached worker the chance to run, were it still going to.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let rows = exec
            .query("SELECT COUNT(*) FROM \"User\"", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rows.rows, vec![vec![Value::Integer(0)]]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelling_one_caller_spares_another() {
        let running = executor();
        let cancelled = SqliteExecutor::new(running.pool().clone());

        let long = tokio::spawn(async move {
            running
                .query(LONG_COUNT, &[], &CancellationToken::new())
                .await
                .map_err(|e| e.to_string())
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(cancelled.query("SELECT 1", &[], &cancel).await.is_err());

        let rows = long.await.unwrap().unwrap();
        assert_eq!(rows.rows, vec![vec![Value::Integer(3_000_000)]]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_stops_own_running_statement() {
        let exec = executor();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = exec.query(LONG_COUNT, &[], &cancel).await.unwrap_err();
        assert_eq!(err.to_string(), SqliteError::Cancelled.to_string());

        // The connection is released and usable once the worker stops.
        let rows = exec
            .query("SELECT 1", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rows.rows, vec![vec![Value::Integer(1)]]);
    }
}
