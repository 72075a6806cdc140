//! DuckDB storage layer for the Treeline plugin runtime.
//!
//! The runtime never talks to DuckDB directly. It goes through the
//! [`SqlExecutor`] seam, which [`Database`] implements over a shared
//! connection, so the application and every plugin use the same handle.

mod database;
mod error;
mod executor;

pub use database::Database;
pub use error::{StorageError, StorageResult};
pub use executor::{SqlExecutor, SqlRow, SqlValue};

use std::path::{Path, PathBuf};

/// Opens a DuckDB file, setting aside a WAL that prevents the open.
///
/// When the first open fails and a `.wal` file sits next to the database,
/// the WAL is renamed to `<name>.wal.stale-<UTC timestamp>` and the open is
/// retried once. The WAL is never deleted, so writes it holds can still be
/// recovered by hand. If the retry fails too, the WAL is moved back.
pub fn open_duckdb_with_wal_recovery(path: &Path) -> StorageResult<duckdb::Connection> {
    let first_err = match duckdb::Connection::open(path) {
        Ok(conn) => return Ok(conn),
        Err(e) => e,
    };

    let wal_path = wal_path_for(path);
    if !wal_path.exists() {
        return Err(first_err.into());
    }

    let stale_path = set_aside_wal(&wal_path)?;
    tracing::warn!(
        db = %path.display(),
        wal = %stale_path.display(),
        error = %first_err,
        "DuckDB open failed, moved WAL aside and retrying"
    );
    match duckdb::Connection::open(path) {
        Ok(conn) => Ok(conn),
        Err(retry_err) => {
            if let Err(e) = std::fs::rename(&stale_path, &wal_path) {
                tracing::warn!(wal = %stale_path.display(), error = %e, "Failed to restore WAL");
            }
            Err(retry_err.into())
        }
    }
}

/// `data.duckdb` -> `data.duckdb.wal`
fn wal_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".wal");
    PathBuf::from(name)
}

/// Renames `wal_path` to a timestamped sibling that does not exist yet.
fn set_aside_wal(wal_path: &Path) -> StorageResult<PathBuf> {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let mut name = wal_path.as_os_str().to_os_string();
    name.push(format!(".stale-{stamp}"));
    let mut target = PathBuf::from(&name);
    let mut attempt = 1;
    while target.exists() {
        let mut numbered = name.clone();
        numbered.push(format!("-{attempt}"));
        target = PathBuf::from(numbered);
        attempt += 1;
    }
    std::fs::rename(wal_path, &target)?;
    Ok(target)
}
