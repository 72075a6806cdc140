//! Error types for the plugin host.

use thiserror::Error;
use treeline_storage::StorageError;

pub type PluginHostResult<T> = Result<T, PluginHostError>;

#[derive(Debug, Error)]
pub enum PluginHostError {
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin discovery failed: {0}")]
    Discovery(String),

    #[error("failed to import plugin '{plugin_id}': {reason}")]
    Import { plugin_id: String, reason: String },

    #[error("plugin module '{plugin_id}' does not export a plugin")]
    MissingExport { plugin_id: String },

    #[error("plugin '{plugin_id}' was built for ABI {found}, host expects {expected}")]
    AbiMismatch {
        plugin_id: String,
        expected: u32,
        found: u32,
    },

    #[error("invalid migrations for plugin '{plugin_id}': {reason}")]
    InvalidMigrations { plugin_id: String, reason: String },

    #[error("migration {version} ({name}) failed for plugin '{plugin_id}': {source}")]
    Migration {
        plugin_id: String,
        version: u32,
        name: String,
        #[source]
        source: StorageError,
    },

    #[error("plugin '{plugin_id}' failed to activate: {message}")]
    Activation { plugin_id: String, message: String },

    #[error("command '{command_id}' failed: {message}")]
    Command { command_id: String, message: String },

    #[error("invalid schema name '{0}'")]
    InvalidSchemaName(String),

    #[error("permission denied: plugin '{plugin_id}' cannot {access} '{table}'")]
    PermissionDenied {
        plugin_id: String,
        table: String,
        access: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file watcher error: {0}")]
    Watcher(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("installer error: {0}")]
    Installer(String),
}

impl PluginHostError {
    pub fn import(plugin_id: &str, reason: impl std::fmt::Display) -> Self {
        Self::Import {
            plugin_id: plugin_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True when the module itself could not be loaded or linked.
    pub fn is_import_failure(&self) -> bool {
        matches!(
            self,
            Self::Import { .. } | Self::MissingExport { .. } | Self::AbiMismatch { .. }
        )
    }
}
