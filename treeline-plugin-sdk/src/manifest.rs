//! Plugin manifest and the declared data-access permission model.
//!
//! `manifest.json` has carried permissions in two shapes over time:
//!
//! ```json
//! { "permissions": { "read": ["transactions"], "write": ["plugin_budget.categories"] } }
//! { "permissions": { "tables": { "read": ["transactions"] }, "schemaName": "plugin_budget" } }
//! ```
//!
//! Both are accepted on input. Each list prefers the direct shape when present.
//! Serialization always emits the direct shape, so a normalized block
//! deserializes back to itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Prefix of every derived plugin schema.
pub const SCHEMA_PREFIX: &str = "plugin_";

/// Derives the private schema name for a plugin id: `plugin_<id>` with every
/// `-` replaced by `_`.
pub fn derive_schema_name(plugin_id: &str) -> String {
    format!("{SCHEMA_PREFIX}{}", plugin_id.replace('-', "_"))
}

/// A table reference inside a permission list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TableRef {
    /// `*`, every table.
    Wildcard,
    /// An unqualified table name, e.g. `transactions`.
    Table(String),
    /// A `schema.table` pair, e.g. `plugin_budget.categories`.
    Qualified { schema: String, table: String },
}

impl TableRef {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == "*" {
            return Self::Wildcard;
        }
        match raw.split_once('.') {
            Some((schema, table)) => Self::Qualified {
                schema: schema.to_string(),
                table: table.to_string(),
            },
            None => Self::Table(raw.to_string()),
        }
    }

    /// Returns the table part if this reference points into `schema`
    /// (case-insensitive).
    pub fn table_in_schema(&self, schema: &str) -> Option<&str> {
        match self {
            Self::Qualified { schema: s, table } if s.eq_ignore_ascii_case(schema) => {
                Some(table.as_str())
            }
            _ => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

impl From<&str> for TableRef {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for TableRef {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<TableRef> for String {
    fn from(table: TableRef) -> Self {
        table.to_string()
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => f.write_str("*"),
            Self::Table(name) => f.write_str(name),
            Self::Qualified { schema, table } => write!(f, "{schema}.{table}"),
        }
    }
}

/// Canonical permission block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPermissions")]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub read: BTreeSet<TableRef>,
    pub write: BTreeSet<TableRef>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub create: BTreeSet<TableRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
}

impl Permissions {
    /// Builder-style helper for tests and built-in plugins.
    pub fn with_read<I, T>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TableRef>,
    {
        self.read.extend(tables.into_iter().map(Into::into));
        self
    }

    pub fn with_write<I, T>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TableRef>,
    {
        self.write.extend(tables.into_iter().map(Into::into));
        self
    }

    pub fn with_schema_name(mut self, schema: impl Into<String>) -> Self {
        self.schema_name = Some(schema.into());
        self
    }

    /// The declared schema, or the derived one for `plugin_id`.
    pub fn schema_name_for(&self, plugin_id: &str) -> String {
        match &self.schema_name {
            Some(schema) if !schema.trim().is_empty() => schema.clone(),
            _ => derive_schema_name(plugin_id),
        }
    }

    /// Returns the block with `schema_name` filled in. Idempotent.
    pub fn resolved_for(mut self, plugin_id: &str) -> Self {
        self.schema_name = Some(self.schema_name_for(plugin_id));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty()
            && self.write.is_empty()
            && self.create.is_empty()
            && self.schema_name.is_none()
    }
}

/// Permission block exactly as it may appear on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPermissions {
    #[serde(default)]
    pub read: Option<Vec<String>>,
    #[serde(default)]
    pub write: Option<Vec<String>>,
    #[serde(default)]
    pub create: Option<Vec<String>>,
    #[serde(default)]
    pub tables: Option<RawTablePermissions>,
    #[serde(default)]
    pub schema_name: Option<String>,
}

/// Legacy `permissions.tables` block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTablePermissions {
    #[serde(default)]
    pub read: Option<Vec<String>>,
    #[serde(default)]
    pub write: Option<Vec<String>>,
    #[serde(default)]
    pub create: Option<Vec<String>>,
}

impl RawPermissions {
    pub fn normalize(self) -> Permissions {
        let tables = self.tables.unwrap_or_default();
        let pick = |direct: Option<Vec<String>>, legacy: Option<Vec<String>>| -> BTreeSet<TableRef> {
            direct
                .or(legacy)
                .unwrap_or_default()
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(TableRef::parse)
                .collect()
        };

        Permissions {
            read: pick(self.read, tables.read),
            write: pick(self.write, tables.write),
            create: pick(self.create, tables.create),
            schema_name: self
                .schema_name
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }
}

impl From<RawPermissions> for Permissions {
    fn from(raw: RawPermissions) -> Self {
        raw.normalize()
    }
}

/// Static description of a plugin (`manifest.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Entry-point file name, relative to the plugin directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default)]
    pub permissions: Permissions,
    /// Where an installed plugin came from (e.g. a release URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl PluginManifest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: "0.1.0".into(),
            description: String::new(),
            author: String::new(),
            main: None,
            permissions: Permissions::default(),
            source: None,
        }
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Parses a `manifest.json` document.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.id.trim().is_empty() {
            return Err(ManifestError::Invalid("id is required".into()));
        }
        if self.name.trim().is_empty() {
            return Err(ManifestError::Invalid("name is required".into()));
        }
        Ok(())
    }

    /// The schema this plugin owns.
    pub fn schema_name(&self) -> String {
        self.permissions.schema_name_for(&self.id)
    }

    /// Permissions with `schema_name` resolved against this manifest's id.
    pub fn resolved_permissions(&self) -> Permissions {
        self.permissions.clone().resolved_for(&self.id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("manifest validation error: {0}")]
    Invalid(String),
}
