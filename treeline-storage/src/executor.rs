//! The SQL surface consumed by the plugin runtime.

use crate::error::StorageResult;

/// A bound parameter or a returned column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

pub type SqlRow = Vec<SqlValue>;

/// Executes SQL against the shared embedded database.
///
/// Implementations own their own locking; callers never hold a connection
/// across calls.
pub trait SqlExecutor: Send + Sync {
    /// Runs one or more statements with no parameters.
    fn execute_batch(&self, sql: &str) -> StorageResult<()>;

    /// Runs a single parameterized statement, returning the affected row count.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> StorageResult<usize>;

    /// Runs a read-only query and collects every row.
    fn query(&self, sql: &str, params: &[SqlValue]) -> StorageResult<Vec<SqlRow>>;

    /// First column of the first row as an integer; `None` for no rows or NULL.
    fn query_i64(&self, sql: &str, params: &[SqlValue]) -> StorageResult<Option<i64>> {
        let rows = self.query(sql, params)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .and_then(|v| v.as_i64()))
    }

    /// Flushes the write-ahead log into the main database file.
    fn checkpoint(&self) -> StorageResult<()> {
        self.execute_batch("CHECKPOINT")
    }
}
