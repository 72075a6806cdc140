//! Central plugin lifecycle manager.
//!
//! Owns the capability registry, every activated plugin instance, and the
//! per-plugin lifecycle state. One plugin's failure at any step is logged
//! and recorded; it never stops the remaining plugins from loading.

use crate::config::RuntimeConfig;
use crate::context::{PluginOrigin, ScopedContext};
use crate::discovery::{DiscoveredPlugin, FsPluginHost, PluginChanged, PluginHost, PluginWatcher};
use crate::error::{PluginHostError, PluginHostResult};
use crate::lifecycle::{InitReport, PluginLifecycleState};
use crate::loader::{DylibLoader, ModuleLoader, ModuleRequest};
use crate::migrations::run_migrations;
use crate::permissions::{PermissionScope, TableAccess};
use crate::registry::{Registry, UnregisterOptions};
use crate::settings::{JsonSettingsStore, SettingsStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use treeline_plugin_sdk::{CORE_SECTION, PLUGINS_SECTION, Plugin, PluginManifest, SidebarSection};
use treeline_storage::SqlExecutor;

pub struct PluginRuntime {
    pub(crate) registry: Registry,
    pub(crate) db: Arc<dyn SqlExecutor>,
    pub(crate) host: Box<dyn PluginHost>,
    pub(crate) settings: Box<dyn SettingsStore>,
    /// Built-in plugins in registration order.
    pub(crate) builtins: Vec<Box<dyn Plugin>>,
    pub(crate) builtin_ids: HashSet<String>,
    /// Activated external instances, keyed by on-disk manifest id.
    pub(crate) external: HashMap<String, Box<dyn Plugin>>,
    /// Last known on-disk record of every external plugin.
    pub(crate) discovered: HashMap<String, DiscoveredPlugin>,
    pub(crate) manifests: HashMap<String, PluginManifest>,
    pub(crate) states: HashMap<String, PluginLifecycleState>,
    pub(crate) generation: u64,
    pub(crate) watcher: Option<PluginWatcher>,
    pub(crate) changes: Option<mpsc::UnboundedReceiver<PluginChanged>>,
    // Declared last: loaded libraries must outlive every instance and
    // registry entry above.
    pub(crate) loader: Box<dyn ModuleLoader>,
}

impl PluginRuntime {
    pub fn new(
        db: Arc<dyn SqlExecutor>,
        host: Box<dyn PluginHost>,
        loader: Box<dyn ModuleLoader>,
        settings: Box<dyn SettingsStore>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            db,
            host,
            settings,
            builtins: Vec::new(),
            builtin_ids: HashSet::new(),
            external: HashMap::new(),
            discovered: HashMap::new(),
            manifests: HashMap::new(),
            states: HashMap::new(),
            generation: 0,
            watcher: None,
            changes: None,
            loader,
        }
    }

    /// The file-system host, native loader and `settings.json` store
    /// described by `config`.
    pub fn from_config(config: &RuntimeConfig, db: Arc<dyn SqlExecutor>) -> Self {
        Self::new(
            db,
            Box::new(FsPluginHost::from_config(config)),
            Box::new(DylibLoader::from_config(config)),
            Box::new(JsonSettingsStore::new(&config.settings_path)),
        )
    }

    /// Adds a plugin compiled into the application. Built-ins activate
    /// before external plugins, in the order they were added.
    pub fn with_builtin(mut self, plugin: Box<dyn Plugin>) -> Self {
        self.add_builtin(plugin);
        self
    }

    pub fn add_builtin(&mut self, plugin: Box<dyn Plugin>) {
        self.builtin_ids.insert(plugin.manifest().id);
        self.builtins.push(plugin);
    }

    // ================================================================
    // Initialization
    // ================================================================

    /// Discovers, migrates and activates every enabled plugin. Call once at
    /// startup.
    pub fn initialize_plugins(&mut self) -> InitReport {
        let mut report = InitReport::default();
        let disabled = self.settings.disabled_plugins().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read disabled plugins, treating all as enabled");
            HashSet::new()
        });

        // External plugins are imported up front so the Plugins section is
        // only added when at least one of them loaded.
        let discovered = self.host.discover().unwrap_or_else(|e| {
            warn!(error = %e, "Plugin discovery failed");
            Vec::new()
        });
        let mut imported: Vec<(DiscoveredPlugin, Box<dyn Plugin>)> = Vec::new();
        for plugin in discovered {
            let plugin_id = plugin.id().to_string();
            if disabled.contains(&plugin_id) {
                info!(plugin_id = %plugin_id, "Plugin disabled, skipping");
                report.skipped.push(plugin_id);
                continue;
            }
            if self.builtin_ids.contains(&plugin_id) || self.discovered.contains_key(&plugin_id) {
                warn!(plugin_id = %plugin_id, dir = %plugin.dir.display(), "Duplicate plugin id, skipping");
                report.fail(&plugin_id, "duplicate plugin id");
                continue;
            }

            self.discovered.insert(plugin_id.clone(), plugin.clone());
            self.set_state(&plugin_id, PluginLifecycleState::Discovered);
            match self.import(&plugin) {
                Ok(instance) => imported.push((plugin, instance)),
                Err(e) => {
                    warn!(plugin_id = %plugin_id, error = %e, "Failed to import plugin");
                    report.fail(&plugin_id, e);
                }
            }
        }

        self.registry
            .register_sidebar_section(SidebarSection::new(CORE_SECTION, "Core", 0));
        if !imported.is_empty() {
            self.ensure_plugins_section();
        }

        let mut builtins = std::mem::take(&mut self.builtins);
        for plugin in &mut builtins {
            let manifest = plugin.manifest();
            if disabled.contains(&manifest.id) {
                info!(plugin_id = %manifest.id, "Plugin disabled, skipping");
                report.skipped.push(manifest.id);
                continue;
            }
            self.set_state(&manifest.id, PluginLifecycleState::Discovered);
            match self.activate(
                &manifest,
                plugin.as_mut(),
                PluginOrigin::BuiltIn,
                true,
                UnregisterOptions::default(),
            ) {
                Ok(()) => report.activated.push(manifest.id),
                Err(e) => {
                    warn!(plugin_id = %manifest.id, error = %e, "Failed to activate built-in plugin");
                    report.fail(&manifest.id, e);
                }
            }
        }
        self.builtins = builtins;

        for (plugin, mut instance) in imported {
            let manifest = plugin.manifest.clone();
            match self.activate(
                &manifest,
                instance.as_mut(),
                PluginOrigin::External,
                true,
                UnregisterOptions::default(),
            ) {
                Ok(()) => {
                    self.external.insert(manifest.id.clone(), instance);
                    report.activated.push(manifest.id);
                }
                Err(e) => {
                    warn!(plugin_id = %manifest.id, error = %e, "Failed to activate plugin");
                    report.fail(&manifest.id, e);
                }
            }
        }

        info!(
            activated = report.activated.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Plugin initialization complete"
        );

        match self.settings.hot_reload_enabled() {
            Ok(true) => {
                if let Err(e) = self.start_watching() {
                    warn!(error = %e, "Failed to start plugin hot reload");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to read hot reload setting"),
        }

        report
    }

    /// Loads the module for an on-disk plugin.
    pub(crate) fn import(&mut self, plugin: &DiscoveredPlugin) -> PluginHostResult<Box<dyn Plugin>> {
        self.generation += 1;
        let instance = self.loader.load(&ModuleRequest {
            plugin_id: plugin.id(),
            entry: &plugin.entry,
            generation: self.generation,
        })?;

        let embedded = instance.manifest().id;
        if embedded != plugin.id() {
            debug!(
                plugin_id = %plugin.id(),
                embedded_id = %embedded,
                "Module reports a different id; using the on-disk manifest id"
            );
        }
        Ok(instance)
    }

    /// Registers permissions, optionally migrates, and activates one plugin
    /// under `manifest.id`. A failed `activate` leaves the plugin
    /// unregistered with `on_failure`, its permissions still recorded.
    pub(crate) fn activate(
        &mut self,
        manifest: &PluginManifest,
        plugin: &mut dyn Plugin,
        origin: PluginOrigin,
        migrate: bool,
        on_failure: UnregisterOptions,
    ) -> PluginHostResult<()> {
        let plugin_id = manifest.id.as_str();
        let permissions = manifest.resolved_permissions();
        let schema_name = permissions.schema_name_for(plugin_id);

        self.manifests.insert(plugin_id.to_string(), manifest.clone());
        self.registry
            .register_plugin_permissions(plugin_id, permissions.clone());
        self.set_state(plugin_id, PluginLifecycleState::PermissionsRegistered);

        if migrate {
            let migrations = plugin.migrations();
            let applied = run_migrations(self.db.as_ref(), plugin_id, &schema_name, &migrations)?;
            if !applied.applied.is_empty() {
                info!(
                    plugin_id,
                    schema = %schema_name,
                    version = applied.current_version(),
                    "Plugin schema migrated"
                );
            }
            self.set_state(plugin_id, PluginLifecycleState::MigrationsApplied);
        }

        let result = {
            let mut ctx = ScopedContext::new(&mut self.registry, plugin_id, permissions, origin);
            plugin.activate(&mut ctx)
        };
        if let Err(e) = result {
            self.registry.unregister_plugin(plugin_id, on_failure);
            return Err(PluginHostError::Activation {
                plugin_id: plugin_id.to_string(),
                message: format!("{e:#}"),
            });
        }

        self.set_state(plugin_id, PluginLifecycleState::Activated);
        info!(plugin_id, "Plugin activated");
        Ok(())
    }

    /// Adds the Plugins sidebar section the first time an external plugin
    /// loads.
    pub(crate) fn ensure_plugins_section(&mut self) {
        let present = self
            .registry
            .sidebar_sections()
            .iter()
            .any(|s| s.id == PLUGINS_SECTION);
        if !present {
            self.registry
                .register_sidebar_section(SidebarSection::new(PLUGINS_SECTION, "Plugins", 100));
        }
    }

    pub(crate) fn set_state(&mut self, plugin_id: &str, state: PluginLifecycleState) {
        debug!(plugin_id, %state, "Plugin lifecycle transition");
        self.states.insert(plugin_id.to_string(), state);
    }

    // ================================================================
    // Watching
    // ================================================================

    /// Starts watching the plugins directory. Change events queue up until
    /// taken with [`take_change_events`](Self::take_change_events).
    pub fn start_watching(&mut self) -> PluginHostResult<()> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = self.host.watch(tx)?;
        self.watcher = Some(watcher);
        self.changes = Some(rx);
        info!(dir = %self.host.plugins_dir().display(), "Plugin hot reload enabled");
        Ok(())
    }

    pub fn stop_watching(&mut self) {
        if self.watcher.take().is_some() {
            info!("Plugin hot reload disabled");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn take_change_events(&mut self) -> Option<mpsc::UnboundedReceiver<PluginChanged>> {
        self.changes.take()
    }

    // ================================================================
    // Queries
    // ================================================================

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn state(&self, plugin_id: &str) -> Option<PluginLifecycleState> {
        self.states.get(plugin_id).copied()
    }

    pub fn states(&self) -> &HashMap<String, PluginLifecycleState> {
        &self.states
    }

    pub fn is_active(&self, plugin_id: &str) -> bool {
        self.state(plugin_id).is_some_and(PluginLifecycleState::is_active)
    }

    /// Ids of activated external plugin instances, sorted.
    pub fn active_external_plugins(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.external.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_builtin(&self, plugin_id: &str) -> bool {
        self.builtin_ids.contains(plugin_id)
    }

    /// The manifest a plugin was activated with, or its on-disk manifest if
    /// it never activated.
    pub fn manifest(&self, plugin_id: &str) -> Option<&PluginManifest> {
        self.manifests
            .get(plugin_id)
            .or_else(|| self.discovered.get(plugin_id).map(|p| &p.manifest))
    }

    pub fn plugins_dir(&self) -> std::path::PathBuf {
        self.host.plugins_dir()
    }

    /// The access scope for a plugin's registered permissions.
    pub fn permission_scope(&self, plugin_id: &str) -> PermissionScope {
        PermissionScope::new(plugin_id, self.registry.get_plugin_permissions(plugin_id))
    }

    /// The access scope for whichever plugin owns `view_id`.
    pub fn permission_scope_for_view(&self, view_id: &str) -> Option<PermissionScope> {
        let (owner, permissions) = self.registry.permissions_for_view(view_id)?;
        Some(PermissionScope::new(owner, permissions))
    }

    pub fn check_table_access(
        &self,
        plugin_id: &str,
        table: &str,
        access: TableAccess,
    ) -> PluginHostResult<()> {
        self.permission_scope(plugin_id)
            .check_table_access(table, access)
    }

    /// Maps a change-event key (manifest id or directory name) to the
    /// plugin id it refers to.
    pub(crate) fn resolve_plugin_id(&self, key: &str) -> String {
        if self.discovered.contains_key(key) || self.external.contains_key(key) {
            return key.to_string();
        }
        self.discovered
            .values()
            .find(|p| p.matches(key))
            .map(|p| p.id().to_string())
            .unwrap_or_else(|| key.to_string())
    }
}
