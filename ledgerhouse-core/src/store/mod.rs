//! Thin adapter over the embedded analytic store.
//!
//! The rest of the engine never talks to SQLite directly: every write goes
//! through this adapter, which serializes writers so bulk inserts cannot
//! interleave with schema DDL. Reads go straight to the pool. All
//! user-derivable input is bound as a parameter, never interpolated.

mod retry;
mod schema;

use std::path::Path;
use std::sync::Arc;

use sqlx::Row;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions,
    SqliteRow, SqliteSynchronous,
};
use sqlx::{Sqlite, SqlitePool};
use tracing::info;

use crate::error::Result;
pub use retry::with_backoff;

/// Parameter value accepted by the adapter's generic statement surface.
///
/// Integers are plain `i64` on both sides of the boundary; wide-integer
/// representations never leak into callers.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Null, Self::Text)
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Self::Null, Self::Int)
    }
}

impl From<Option<chrono::DateTime<chrono::Utc>>> for SqlValue {
    fn from(value: Option<chrono::DateTime<chrono::Utc>>) -> Self {
        value.map_or(Self::Null, |ts| Self::Text(ts.to_rfc3339()))
    }
}

/// Handle to the embedded analytic store.
#[derive(Clone)]
pub struct AnalyticStore {
    pool: SqlitePool,
    write_gate: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for AnalyticStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl AnalyticStore {
    /// Open (creating if missing) the on-disk store and bootstrap the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(crate::error::WarehouseError::Store)?;

        let store = Self { pool, write_gate: Arc::new(tokio::sync::Mutex::new(())) };
        store.init_schema().await?;
        info!("analytic store opened at {}", path.display());
        Ok(store)
    }

    /// In-memory store for tests. Single connection: every pooled connection
    /// to `:memory:` would otherwise see its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(crate::error::WarehouseError::Store)?;
        let store = Self { pool, write_gate: Arc::new(tokio::sync::Mutex::new(())) };
        store.init_schema().await?;
        Ok(store)
    }

    /// Idempotent schema bootstrap; safe across restarts.
    pub async fn init_schema(&self) -> Result<()> {
        let _guard = self.write_gate.lock().await;
        for statement in schema::SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Direct pool access for typed read queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Serialize a compound write sequence (for example a transaction that
    /// must not interleave with bulk inserts).
    pub async fn write_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_gate.lock().await
    }

    /// Execute one write statement; returns affected row count.
    pub async fn exec(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        let _guard = self.write_gate.lock().await;
        let result = bind_all(sqlx::query(sql), &params).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Run a read query returning all rows.
    pub async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<SqliteRow>> {
        Ok(bind_all(sqlx::query(sql), &params).fetch_all(&self.pool).await?)
    }

    /// Run a read query returning at most one row.
    pub async fn query_one(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> Result<Option<SqliteRow>> {
        Ok(bind_all(sqlx::query(sql), &params)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Scalar convenience for `COUNT(*)`-shaped queries.
    pub async fn query_scalar_i64(&self, sql: &str, params: Vec<SqlValue>) -> Result<i64> {
        let row = self.query_one(sql, params).await?;
        Ok(row.map_or(0, |r| r.try_get::<i64, _>(0).unwrap_or(0)))
    }

    /// Chunked multi-row insert. `table` and `columns` are engine-internal
    /// identifiers, never user input. `rows_per_statement` bounds the bind
    /// count per statement (SQLite caps host parameters).
    pub async fn bulk_insert(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<SqlValue>],
        rows_per_statement: usize,
    ) -> Result<u64> {
        self.bulk_write(table, columns, "", rows, rows_per_statement).await
    }

    /// Chunked multi-row upsert with an `ON CONFLICT` suffix.
    pub async fn bulk_upsert(
        &self,
        table: &str,
        columns: &[&str],
        on_conflict: &str,
        rows: &[Vec<SqlValue>],
        rows_per_statement: usize,
    ) -> Result<u64> {
        self.bulk_write(table, columns, on_conflict, rows, rows_per_statement)
            .await
    }

    async fn bulk_write(
        &self,
        table: &str,
        columns: &[&str],
        suffix: &str,
        rows: &[Vec<SqlValue>],
        rows_per_statement: usize,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_gate.lock().await;
        let mut inserted = 0u64;
        let head = format!("INSERT INTO {} ({}) ", table, columns.join(", "));
        for chunk in rows.chunks(rows_per_statement.max(1)) {
            let mut builder: sqlx::QueryBuilder<'_, Sqlite> =
                sqlx::QueryBuilder::new(head.as_str());
            builder.push_values(chunk.iter(), |mut b, row| {
                for value in row {
                    match value {
                        SqlValue::Null => b.push_bind(None::<String>),
                        SqlValue::Int(v) => b.push_bind(*v),
                        SqlValue::Real(v) => b.push_bind(*v),
                        SqlValue::Text(v) => b.push_bind(v.clone()),
                        SqlValue::Bool(v) => b.push_bind(*v),
                    };
                }
            });
            if !suffix.is_empty() {
                builder.push(" ");
                builder.push(suffix);
            }
            let result = builder.build().execute(&self.pool).await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }
}

/// Canonical TEXT encoding for timestamps: RFC 3339 with a `+00:00` offset.
/// Constant-offset encoding keeps lexicographic and temporal order aligned.
pub fn ts_text(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339()
}

/// Parse a stored timestamp column back into UTC.
pub fn ts_parse(text: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|ts| ts.with_timezone(&chrono::Utc))
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in params {
        query = match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Bool(v) => query.bind(*v),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_bootstrap_is_idempotent() {
        let store = AnalyticStore::in_memory().await.unwrap();
        // Second bootstrap must be a no-op, not an error.
        store.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn bulk_insert_chunks_and_counts() {
        let store = AnalyticStore::in_memory().await.unwrap();
        let rows: Vec<Vec<SqlValue>> = (0..7)
            .map(|n| {
                vec![
                    SqlValue::Text(format!("path-{n}")),
                    SqlValue::Text("events".into()),
                ]
            })
            .collect();
        let inserted = store
            .bulk_insert("raw_files", &["path", "file_type"], &rows, 3)
            .await
            .unwrap();
        assert_eq!(inserted, 7);

        let count = store
            .query_scalar_i64("SELECT COUNT(*) FROM raw_files", vec![])
            .await
            .unwrap();
        assert_eq!(count, 7);
    }

    #[tokio::test]
    async fn parameters_are_bound_not_interpolated() {
        let store = AnalyticStore::in_memory().await.unwrap();
        store
            .exec(
                "INSERT INTO raw_files (path, file_type) VALUES (?, ?)",
                vec![
                    SqlValue::Text("a'; DROP TABLE raw_files; --".into()),
                    SqlValue::Text("events".into()),
                ],
            )
            .await
            .unwrap();
        let count = store
            .query_scalar_i64(
                "SELECT COUNT(*) FROM raw_files WHERE path = ?",
                vec![SqlValue::Text("a'; DROP TABLE raw_files; --".into())],
            )
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
