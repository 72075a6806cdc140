//! Schema-scoped table access checks.
//!
//! The runtime owns each plugin's permission set; query enforcement lives in
//! the database layer, which asks a [`PermissionScope`] before running a
//! statement. Table names reaching this module are already resolved by the
//! caller.

use crate::error::{PluginHostError, PluginHostResult};
use std::fmt;
use treeline_plugin_sdk::{Permissions, TableRef};

/// Default schema the application's own tables live in.
pub const MAIN_SCHEMA: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableAccess {
    Read,
    Write,
    Create,
}

impl fmt::Display for TableAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Create => "create",
        })
    }
}

/// A plugin's resolved permissions plus the schema it owns.
#[derive(Debug, Clone)]
pub struct PermissionScope {
    plugin_id: String,
    schema_name: String,
    permissions: Permissions,
}

impl PermissionScope {
    pub fn new(plugin_id: impl Into<String>, permissions: Permissions) -> Self {
        let plugin_id = plugin_id.into();
        let permissions = permissions.resolved_for(&plugin_id);
        let schema_name = permissions.schema_name_for(&plugin_id);
        Self {
            plugin_id,
            schema_name,
            permissions,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    /// Whether `table` (`name` or `schema.name`) may be accessed.
    ///
    /// The plugin's own schema, and anything inside it, is always allowed
    /// (case-insensitive). Otherwise
    /// the table must match an entry of the list for `access`: `*`, an exact
    /// (case-insensitive) match, or for unqualified entries the same table in
    /// the `main` schema.
    pub fn allows(&self, table: &str, access: TableAccess) -> bool {
        let requested = TableRef::parse(table);
        if requested.table_in_schema(&self.schema_name).is_some() {
            return true;
        }
        if let TableRef::Table(name) = &requested {
            if name.eq_ignore_ascii_case(&self.schema_name) {
                return true;
            }
        }

        let granted = match access {
            TableAccess::Read => &self.permissions.read,
            TableAccess::Write => &self.permissions.write,
            TableAccess::Create => &self.permissions.create,
        };
        granted.iter().any(|entry| grants(entry, &requested))
    }

    pub fn check_table_access(&self, table: &str, access: TableAccess) -> PluginHostResult<()> {
        if self.allows(table, access) {
            Ok(())
        } else {
            Err(PluginHostError::PermissionDenied {
                plugin_id: self.plugin_id.clone(),
                table: table.to_string(),
                access: access.to_string(),
            })
        }
    }
}

fn grants(entry: &TableRef, requested: &TableRef) -> bool {
    match (entry, requested) {
        (TableRef::Wildcard, _) => true,
        (TableRef::Table(granted), TableRef::Table(name)) => granted.eq_ignore_ascii_case(name),
        (TableRef::Table(granted), TableRef::Qualified { schema, table }) => {
            schema.eq_ignore_ascii_case(MAIN_SCHEMA) && granted.eq_ignore_ascii_case(table)
        }
        (
            TableRef::Qualified { schema, table },
            TableRef::Qualified {
                schema: req_schema,
                table: req_table,
            },
        ) => schema.eq_ignore_ascii_case(req_schema) && table.eq_ignore_ascii_case(req_table),
        (TableRef::Qualified { schema, table }, TableRef::Table(name)) => {
            schema.eq_ignore_ascii_case(MAIN_SCHEMA) && table.eq_ignore_ascii_case(name)
        }
        (_, TableRef::Wildcard) => false,
    }
}

/// Rejects anything that is not a plain SQL identifier, so schema names can
/// be interpolated into DDL.
pub fn validate_identifier(name: &str) -> PluginHostResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(PluginHostError::InvalidSchemaName(name.to_string()))
    }
}
