//! Per-plugin lifecycle states and the reports lifecycle passes return.

use std::fmt;

/// Where a plugin instance is in its lifecycle.
///
/// Initialization walks `Discovered -> PermissionsRegistered ->
/// MigrationsApplied -> Activated`. A hot reload cycles an external plugin
/// through `Deactivated -> Unregistered -> Discovered` and back up, skipping
/// `MigrationsApplied`. `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginLifecycleState {
    Discovered,
    PermissionsRegistered,
    MigrationsApplied,
    Activated,
    Deactivated,
    Unregistered,
    Removed,
}

impl PluginLifecycleState {
    pub fn is_active(self) -> bool {
        self == Self::Activated
    }
}

impl fmt::Display for PluginLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Discovered => "discovered",
            Self::PermissionsRegistered => "permissions-registered",
            Self::MigrationsApplied => "migrations-applied",
            Self::Activated => "activated",
            Self::Deactivated => "deactivated",
            Self::Unregistered => "unregistered",
            Self::Removed => "removed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginFailure {
    pub plugin_id: String,
    pub error: String,
}

/// Result of [`PluginRuntime::initialize_plugins`](crate::PluginRuntime::initialize_plugins).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Activation order.
    pub activated: Vec<String>,
    /// Disabled by the user.
    pub skipped: Vec<String>,
    pub failed: Vec<PluginFailure>,
}

impl InitReport {
    pub(crate) fn fail(&mut self, plugin_id: &str, error: impl fmt::Display) {
        self.failed.push(PluginFailure {
            plugin_id: plugin_id.to_string(),
            error: error.to_string(),
        });
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.plugin_id.as_str()).collect()
    }
}

/// What a single change event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The plugin is disabled or built in.
    Ignored,
    /// The plugin is gone from disk; its registrations and orphaned tabs
    /// were removed.
    Removed,
    Reloaded,
    /// The new module could not be loaded or activated. The plugin stays
    /// unregistered until the next successful change.
    Aborted(String),
}
