//! Versioned, once-only schema migrations tracked per plugin schema.
//!
//! Each plugin schema carries its own ledger table,
//! `<schema>.schema_migrations`, created on the first run. A version is
//! recorded only after every statement of its `up` script succeeded, so a
//! failed version stays pending and is retried from its first statement on
//! the next activation. Statements that already ran inside a failed
//! migration are not rolled back.

use crate::error::{PluginHostError, PluginHostResult};
use crate::permissions::validate_identifier;
use std::collections::HashSet;
use tracing::{debug, info};
use treeline_plugin_sdk::Migration;
use treeline_storage::{SqlExecutor, SqlValue};

pub const LEDGER_TABLE: &str = "schema_migrations";

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Highest recorded version before the run.
    pub previous_version: u32,
    /// Versions applied by this run, ascending.
    pub applied: Vec<u32>,
}

impl MigrationReport {
    pub fn current_version(&self) -> u32 {
        self.applied.last().copied().unwrap_or(self.previous_version)
    }
}

/// Brings `schema_name` up to date with `migrations`.
///
/// Versions must be positive and unique. Only versions above the ledger's
/// current maximum are applied, in ascending order. The database is
/// checkpointed once every pending migration has been recorded.
pub fn run_migrations(
    db: &dyn SqlExecutor,
    plugin_id: &str,
    schema_name: &str,
    migrations: &[Migration],
) -> PluginHostResult<MigrationReport> {
    if migrations.is_empty() {
        return Ok(MigrationReport::default());
    }

    validate_versions(plugin_id, migrations)?;
    validate_identifier(schema_name)?;

    let mut ordered: Vec<&Migration> = migrations.iter().collect();
    ordered.sort_by_key(|m| m.version);

    db.execute_batch(&format!("CREATE SCHEMA IF NOT EXISTS {schema_name}"))?;
    // executed_at has no DEFAULT; the timestamp is always bound at insert time
    db.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {schema_name}.{LEDGER_TABLE} (
            version INTEGER PRIMARY KEY,
            name VARCHAR NOT NULL,
            executed_at TIMESTAMP NOT NULL
        )"
    ))?;

    let previous_version = current_version(db, schema_name)?;
    let pending: Vec<&Migration> = ordered
        .into_iter()
        .filter(|m| m.version > previous_version)
        .collect();

    let mut report = MigrationReport {
        previous_version,
        applied: Vec::with_capacity(pending.len()),
    };
    if pending.is_empty() {
        debug!(plugin_id, schema_name, version = previous_version, "Schema up to date");
        return Ok(report);
    }

    let insert = format!(
        "INSERT INTO {schema_name}.{LEDGER_TABLE} (version, name, executed_at) \
         VALUES (?, ?, CAST(? AS TIMESTAMP))"
    );

    for migration in pending {
        let wrap = |source| PluginHostError::Migration {
            plugin_id: plugin_id.to_string(),
            version: migration.version,
            name: migration.name.clone(),
            source,
        };

        for statement in split_statements(&migration.up) {
            debug!(plugin_id, version = migration.version, statement, "Executing migration statement");
            db.execute_batch(statement).map_err(wrap)?;
        }

        let executed_at = chrono::Utc::now()
            .format("%Y-%m-%d %H:%M:%S%.6f")
            .to_string();
        db.execute(
            &insert,
            &[
                SqlValue::from(migration.version),
                SqlValue::from(migration.name.as_str()),
                SqlValue::Text(executed_at),
            ],
        )
        .map_err(wrap)?;

        info!(
            plugin_id,
            version = migration.version,
            name = %migration.name,
            "Applied migration"
        );
        report.applied.push(migration.version);
    }

    db.checkpoint()?;
    Ok(report)
}

/// Highest version recorded in the ledger, `0` when empty.
pub fn current_version(db: &dyn SqlExecutor, schema_name: &str) -> PluginHostResult<u32> {
    validate_identifier(schema_name)?;
    let max = db.query_i64(
        &format!("SELECT MAX(version) FROM {schema_name}.{LEDGER_TABLE}"),
        &[],
    )?;
    Ok(max.and_then(|v| u32::try_from(v).ok()).unwrap_or(0))
}

/// `(version, name)` pairs recorded in the ledger, ascending.
pub fn applied_migrations(
    db: &dyn SqlExecutor,
    schema_name: &str,
) -> PluginHostResult<Vec<(u32, String)>> {
    validate_identifier(schema_name)?;
    let rows = db.query(
        &format!("SELECT version, name FROM {schema_name}.{LEDGER_TABLE} ORDER BY version"),
        &[],
    )?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let mut cols = row.into_iter();
            let version = cols.next()?.as_i64().and_then(|v| u32::try_from(v).ok())?;
            let name = cols.next()?.as_str()?.to_string();
            Some((version, name))
        })
        .collect())
}

fn validate_versions(plugin_id: &str, migrations: &[Migration]) -> PluginHostResult<()> {
    let mut seen = HashSet::with_capacity(migrations.len());
    for m in migrations {
        if m.version == 0 {
            return Err(PluginHostError::InvalidMigrations {
                plugin_id: plugin_id.to_string(),
                reason: format!("migration '{}' has version 0", m.name),
            });
        }
        if !seen.insert(m.version) {
            return Err(PluginHostError::InvalidMigrations {
                plugin_id: plugin_id.to_string(),
                reason: format!("duplicate version {}", m.version),
            });
        }
    }
    Ok(())
}

/// Splits a script on `;` outside of string literals, quoted identifiers and
/// comments. Fragments that are empty or only comments are dropped.
pub fn split_statements(sql: &str) -> Vec<&str> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        SingleQuote,
        DoubleQuote,
        LineComment,
        BlockComment,
    }

    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut state = State::Code;
    let mut start = 0;
    let mut has_code = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            State::Code => match b {
                b';' => {
                    if has_code {
                        statements.push(sql[start..i].trim());
                    }
                    start = i + 1;
                    has_code = false;
                }
                b'\'' => {
                    state = State::SingleQuote;
                    has_code = true;
                }
                b'"' => {
                    state = State::DoubleQuote;
                    has_code = true;
                }
                b'-' if next == Some(b'-') => {
                    state = State::LineComment;
                    i += 1;
                }
                b'/' if next == Some(b'*') => {
                    state = State::BlockComment;
                    i += 1;
                }
                b if !b.is_ascii_whitespace() => has_code = true,
                _ => {}
            },
            // '' and "" escapes re-enter the quoted state on the next byte
            State::SingleQuote if b == b'\'' => state = State::Code,
            State::DoubleQuote if b == b'"' => state = State::Code,
            State::LineComment if b == b'\n' => state = State::Code,
            State::BlockComment if b == b'*' && next == Some(b'/') => {
                state = State::Code;
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }

    if has_code {
        statements.push(sql[start..].trim());
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_on_terminators_and_drops_empty_fragments() {
        let sql = "CREATE TABLE a (x INT);\n\n;  CREATE TABLE b (y INT);\n";
        assert_eq!(
            split_statements(sql),
            vec!["CREATE TABLE a (x INT)", "CREATE TABLE b (y INT)"]
        );
    }

    #[test]
    fn keeps_semicolons_inside_literals_and_identifiers() {
        let sql = "INSERT INTO t VALUES ('a;b', 'it''s; fine'); CREATE TABLE \"odd;name\" (x INT)";
        assert_eq!(
            split_statements(sql),
            vec![
                "INSERT INTO t VALUES ('a;b', 'it''s; fine')",
                "CREATE TABLE \"odd;name\" (x INT)"
            ]
        );
    }

    #[test]
    fn ignores_semicolons_in_comments() {
        let sql = "-- setup; not a statement\nCREATE TABLE a (x INT); /* b; c */\n-- trailing;";
        let parts = split_statements(sql);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].ends_with("CREATE TABLE a (x INT)"));
    }

    #[test]
    fn comment_only_script_yields_nothing() {
        assert!(split_statements("-- nothing here\n/* or here */").is_empty());
        assert!(split_statements("   ").is_empty());
    }

    #[test]
    fn rejects_zero_and_duplicate_versions() {
        let zero = [Migration::new(0, "zero", "SELECT 1")];
        assert!(matches!(
            validate_versions("p", &zero),
            Err(PluginHostError::InvalidMigrations { .. })
        ));

        let dup = [
            Migration::new(1, "a", "SELECT 1"),
            Migration::new(1, "b", "SELECT 1"),
        ];
        assert!(matches!(
            validate_versions("p", &dup),
            Err(PluginHostError::InvalidMigrations { .. })
        ));
    }

    #[test]
    fn report_current_version() {
        let report = MigrationReport {
            previous_version: 2,
            applied: vec![3, 4],
        };
        assert_eq!(report.current_version(), 4);
        assert_eq!(MigrationReport::default().current_version(), 0);
    }
}
