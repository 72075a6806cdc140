//! DuckDB-backed [`SqlExecutor`].

use crate::error::{StorageError, StorageResult};
use crate::executor::{SqlExecutor, SqlRow, SqlValue};
use duckdb::types::{ToSql, ToSqlOutput, Value};
use duckdb::{params_from_iter, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Shared DuckDB connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates a database file at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Wraps a connection the application already shares elsewhere.
    pub fn from_shared(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl SqlExecutor for Database {
    fn execute_batch(&self, sql: &str) -> StorageResult<()> {
        debug!(sql, "execute_batch");
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> StorageResult<usize> {
        debug!(sql, params = params.len(), "execute");
        let conn = self.lock()?;
        let affected = conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(affected)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> StorageResult<Vec<SqlRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let stmt_ref: &duckdb::Statement<'_> = row.as_ref();
            let columns = stmt_ref.column_count();
            let mut values = Vec::with_capacity(columns);
            for idx in 0..columns {
                let value: Value = row.get(idx)?;
                values.push(from_duckdb_value(value));
            }
            out.push(values);
        }
        Ok(out)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(v) => Value::Boolean(*v),
            SqlValue::Integer(v) => Value::BigInt(*v),
            SqlValue::Real(v) => Value::Double(*v),
            SqlValue::Text(v) => Value::Text(v.clone()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

fn from_duckdb_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Boolean(v) => SqlValue::Bool(v),
        Value::TinyInt(v) => SqlValue::Integer(i64::from(v)),
        Value::SmallInt(v) => SqlValue::Integer(i64::from(v)),
        Value::Int(v) => SqlValue::Integer(i64::from(v)),
        Value::BigInt(v) => SqlValue::Integer(v),
        Value::UTinyInt(v) => SqlValue::Integer(i64::from(v)),
        Value::USmallInt(v) => SqlValue::Integer(i64::from(v)),
        Value::UInt(v) => SqlValue::Integer(i64::from(v)),
        Value::UBigInt(v) => match i64::try_from(v) {
            Ok(v) => SqlValue::Integer(v),
            Err(_) => SqlValue::Text(v.to_string()),
        },
        Value::HugeInt(v) => match i64::try_from(v) {
            Ok(v) => SqlValue::Integer(v),
            Err(_) => SqlValue::Text(v.to_string()),
        },
        Value::Float(v) => SqlValue::Real(f64::from(v)),
        Value::Double(v) => SqlValue::Real(v),
        Value::Text(v) => SqlValue::Text(v),
        other => SqlValue::Text(format!("{other:?}")),
    }
}
