//! Plugin runtime for Treeline.
//!
//! Discovers built-in and installed plugins, registers their declared table
//! permissions, brings each plugin's private schema up to date, and activates
//! them against a shared capability [`Registry`]. Installed plugins are native
//! libraries built with `treeline-plugin-sdk` and can be hot-reloaded from
//! disk while their open tabs stay in place.
//!
//! A failure in one plugin (unreadable manifest, bad module, failed
//! migration, `activate` error) is logged and isolated to that plugin.

mod config;
mod context;
mod dependencies;
mod discovery;
mod error;
mod hot_reload;
mod installer;
mod lifecycle;
mod loader;
pub mod logging;
mod manager;
pub mod migrations;
mod permissions;
mod registry;
mod settings;

pub use config::{RuntimeConfig, treeline_dir};
pub use context::{PluginOrigin, ScopedContext};
pub use dependencies::{DependentPlugin, find_dependent_plugins};
pub use discovery::{
    DiscoveredPlugin, FsPluginHost, MANIFEST_FILE, PluginChanged, PluginHost, PluginWatcher,
    entry_file_name,
};
pub use error::{PluginHostError, PluginHostResult};
pub use hot_reload::{spawn_reload_worker, start_reload_worker};
pub use installer::{PluginInstaller, PluginUpdate, UninstallPreview, UninstallReport};
pub use lifecycle::{InitReport, PluginFailure, PluginLifecycleState, ReloadOutcome};
pub use loader::{DylibLoader, ModuleLoader, ModuleRequest};
pub use manager::PluginRuntime;
pub use migrations::{MigrationReport, run_migrations};
pub use permissions::{PermissionScope, TableAccess, validate_identifier};
pub use registry::{
    OpenTab, Registered, Registry, RegistryEvent, SubscriptionId, TabStrip, UnregisterOptions,
};
pub use settings::{JsonSettingsStore, MemorySettingsStore, SettingsStore};
