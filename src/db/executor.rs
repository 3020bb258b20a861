//! Logging decorator around statement execution.
//!
//! Every statement the pipeline runs goes through an [`Executor`], which logs
//! the statement, its status and any failure under the `citegraph::sql`
//! target. It wraps a borrowed connection, so it composes the same way over
//! a plain [`Connection`] and over a [`rusqlite::Transaction`].

use rusqlite::{Connection, OptionalExtension, Params, Row};

use crate::error::{CitegraphError, Result};

pub const SQL_LOG_TARGET: &str = "citegraph::sql";

/// Logging execution handle over a borrowed connection.
#[derive(Clone, Copy)]
pub struct Executor<'c> {
    conn: &'c Connection,
}

impl<'c> Executor<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Underlying connection, for callers that need raw rusqlite access.
    pub fn conn(&self) -> &'c Connection {
        self.conn
    }

    /// Execute a single statement with bound parameters, returning the number of changed rows.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        log::debug!(target: SQL_LOG_TARGET, "execute: {}", squash(sql));
        let outcome = self
            .conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.execute(params));
        self.trace(outcome)
    }

    /// Execute several parameterless statements (DDL).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        log::debug!(target: SQL_LOG_TARGET, "execute batch: {}", squash(sql));
        match self.conn.execute_batch(sql) {
            Ok(()) => {
                log::debug!(target: SQL_LOG_TARGET, "status: ok");
                Ok(())
            }
            Err(e) => Err(self.failed(e)),
        }
    }

    /// Run a query expected to yield at most one row.
    pub fn query_optional<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        log::debug!(target: SQL_LOG_TARGET, "query: {}", squash(sql));
        let outcome = self
            .conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.query_row(params, f).optional());
        match outcome {
            Ok(row) => {
                log::debug!(
                    target: SQL_LOG_TARGET,
                    "status: {}",
                    if row.is_some() { "1 row" } else { "no rows" }
                );
                Ok(row)
            }
            Err(e) => Err(self.failed(e)),
        }
    }

    /// Run a query and collect every row.
    pub fn query_all<T, P, F>(&self, sql: &str, params: P, mut f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        log::debug!(target: SQL_LOG_TARGET, "query: {}", squash(sql));
        let outcome = self.conn.prepare_cached(sql).and_then(|mut stmt| {
            let rows = stmt.query_map(params, |row| f(row))?;
            rows.collect::<rusqlite::Result<Vec<T>>>()
        });
        match outcome {
            Ok(rows) => {
                log::debug!(target: SQL_LOG_TARGET, "status: {} row(s)", rows.len());
                Ok(rows)
            }
            Err(e) => Err(self.failed(e)),
        }
    }

    /// Scalar COUNT(*) style query.
    pub fn count(&self, sql: &str) -> Result<i64> {
        self.query_optional(sql, [], |row| row.get::<_, i64>(0))
            .map(|n| n.unwrap_or(0))
    }

    fn trace(&self, outcome: rusqlite::Result<usize>) -> Result<usize> {
        match outcome {
            Ok(changed) => {
                log::debug!(target: SQL_LOG_TARGET, "status: {} row(s) changed", changed);
                Ok(changed)
            }
            Err(e) => Err(self.failed(e)),
        }
    }

    fn failed(&self, e: rusqlite::Error) -> CitegraphError {
        let err = CitegraphError::Database(e);
        log::error!(target: SQL_LOG_TARGET, "{}: {}", err.class(), err);
        err
    }
}

/// Collapse whitespace so multi-line SQL logs on one line.
fn squash(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
