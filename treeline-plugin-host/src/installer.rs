//! Installing and removing plugins.
//!
//! Fetching, unpacking and deleting plugin files are host operations behind
//! [`PluginInstaller`]. The runtime drives them and keeps its own state
//! (registry, schema, lifecycle) consistent around each call.

use crate::context::PluginOrigin;
use crate::dependencies::DependentPlugin;
use crate::error::{PluginHostError, PluginHostResult};
use crate::lifecycle::PluginLifecycleState;
use crate::manager::PluginRuntime;
use crate::permissions::validate_identifier;
use crate::registry::UnregisterOptions;
use tracing::{info, warn};
use treeline_plugin_sdk::PluginManifest;

/// A newer release of an installed plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginUpdate {
    pub plugin_id: String,
    pub current_version: String,
    pub latest_version: String,
}

pub trait PluginInstaller: Send + Sync {
    /// Fetches a remote manifest so its permissions can be reviewed before
    /// installing.
    fn fetch_manifest(&self, source: &str) -> PluginHostResult<PluginManifest>;

    /// Installs into the plugins directory and returns the installed manifest.
    fn install(&self, source: &str) -> PluginHostResult<PluginManifest>;

    /// Removes the plugin's files.
    fn uninstall(&self, plugin_id: &str) -> PluginHostResult<()>;

    /// Replaces the installed files with the latest release.
    fn upgrade(&self, plugin_id: &str) -> PluginHostResult<PluginManifest>;

    fn check_update(&self, plugin_id: &str) -> PluginHostResult<Option<PluginUpdate>>;
}

/// What uninstalling a plugin would affect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallPreview {
    pub plugin_id: String,
    pub name: String,
    pub schema_name: String,
    pub dependents: Vec<DependentPlugin>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallReport {
    pub plugin_id: String,
    /// Set when the plugin's schema was dropped.
    pub dropped_schema: Option<String>,
    /// Plugins that read from the removed schema.
    pub dependents: Vec<DependentPlugin>,
}

impl PluginRuntime {
    /// The remote manifest with its schema resolved, for a permission prompt.
    pub fn preview_install(
        &self,
        source: &str,
        installer: &dyn PluginInstaller,
    ) -> PluginHostResult<PluginManifest> {
        let mut manifest = installer.fetch_manifest(source)?;
        manifest.validate().map_err(|e| PluginHostError::Installer(e.to_string()))?;
        manifest.permissions = manifest.resolved_permissions();
        Ok(manifest)
    }

    /// Installs and activates a plugin, running its migrations.
    pub fn install_plugin(
        &mut self,
        source: &str,
        installer: &dyn PluginInstaller,
    ) -> PluginHostResult<String> {
        let installed = installer.install(source)?;
        let plugin_id = installed.id;
        if self.is_builtin(&plugin_id) {
            return Err(PluginHostError::Installer(format!(
                "'{plugin_id}' is the id of a built-in plugin"
            )));
        }
        if self.external.contains_key(&plugin_id) {
            self.unload(&plugin_id, UnregisterOptions::preserving_tabs());
        }

        let plugin = self
            .host
            .discover()?
            .into_iter()
            .find(|p| p.id() == plugin_id)
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.clone()))?;
        self.discovered.insert(plugin_id.clone(), plugin.clone());
        self.set_state(&plugin_id, PluginLifecycleState::Discovered);

        if self.settings.is_disabled(&plugin_id).unwrap_or(false) {
            info!(plugin_id = %plugin_id, "Installed plugin is disabled, not activating");
            return Ok(plugin_id);
        }

        let mut instance = self.import(&plugin)?;
        self.activate(
            &plugin.manifest,
            instance.as_mut(),
            PluginOrigin::External,
            true,
            UnregisterOptions::default(),
        )?;
        self.external.insert(plugin_id.clone(), instance);
        self.ensure_plugins_section();
        info!(plugin_id = %plugin_id, "Plugin installed");
        Ok(plugin_id)
    }

    pub fn uninstall_preview(&self, plugin_id: &str) -> PluginHostResult<UninstallPreview> {
        let schema_name = self.schema_name(plugin_id)?;
        let name = self
            .manifest(plugin_id)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| plugin_id.to_string());
        Ok(UninstallPreview {
            plugin_id: plugin_id.to_string(),
            name,
            schema_name,
            dependents: self.dependent_plugins(plugin_id)?,
        })
    }

    /// Deactivates and unregisters a plugin, closes its tabs, removes its
    /// files, and with `delete_data` drops its schema.
    pub fn uninstall(
        &mut self,
        plugin_id: &str,
        delete_data: bool,
        installer: &dyn PluginInstaller,
    ) -> PluginHostResult<UninstallReport> {
        if self.is_builtin(plugin_id) {
            return Err(PluginHostError::Installer(format!(
                "built-in plugin '{plugin_id}' cannot be uninstalled"
            )));
        }
        let schema_name = self.schema_name(plugin_id)?;
        validate_identifier(&schema_name)?;
        let dependents = self.dependent_plugins(plugin_id)?;
        if delete_data && !dependents.is_empty() {
            warn!(
                plugin_id,
                dependents = ?dependents.iter().map(|d| d.plugin_id.as_str()).collect::<Vec<_>>(),
                "Deleting data other plugins read from"
            );
        }

        self.unload(plugin_id, UnregisterOptions::default());
        installer.uninstall(plugin_id)?;

        let dropped_schema = if delete_data {
            self.db
                .execute_batch(&format!("DROP SCHEMA IF EXISTS {schema_name} CASCADE"))?;
            self.db.checkpoint()?;
            info!(plugin_id, schema = %schema_name, "Dropped plugin schema");
            Some(schema_name)
        } else {
            None
        };

        self.forget(plugin_id);
        info!(plugin_id, delete_data, "Plugin uninstalled");
        Ok(UninstallReport {
            plugin_id: plugin_id.to_string(),
            dropped_schema,
            dependents,
        })
    }

    /// Asks the installer about every installed external plugin. Failures
    /// are logged and skipped.
    pub fn check_updates(&self, installer: &dyn PluginInstaller) -> Vec<PluginUpdate> {
        let mut ids: Vec<&String> = self.discovered.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| match installer.check_update(id) {
                Ok(update) => update,
                Err(e) => {
                    warn!(plugin_id = %id, error = %e, "Update check failed");
                    None
                }
            })
            .collect()
    }
}
