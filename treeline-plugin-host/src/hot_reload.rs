//! Replacing a running external plugin with a freshly loaded copy.
//!
//! A reload keeps the user's open tabs: tab records survive the swap, and
//! afterwards only the tabs whose view the new version no longer registers
//! are closed. Migrations never run on reload; schema changes need a
//! restart so half-written SQL saved mid-edit is never recorded as applied.

use crate::context::PluginOrigin;
use crate::discovery::PluginChanged;
use crate::error::{PluginHostError, PluginHostResult};
use crate::lifecycle::{PluginLifecycleState, ReloadOutcome};
use crate::manager::PluginRuntime;
use crate::registry::{OpenTab, UnregisterOptions};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tabs showing a plugin's views before it was unregistered.
struct TabSnapshot {
    tabs: Vec<OpenTab>,
    active: Option<String>,
}

impl PluginRuntime {
    /// Handles one change event for `key` (a plugin id or its directory name).
    pub fn reload_plugin(&mut self, key: &str) -> ReloadOutcome {
        let plugin_id = self.resolve_plugin_id(key);

        if self.is_builtin(&plugin_id) {
            debug!(plugin_id = %plugin_id, "Ignoring change for built-in plugin");
            return ReloadOutcome::Ignored;
        }
        match self.settings.is_disabled(&plugin_id) {
            Ok(true) => {
                debug!(plugin_id = %plugin_id, "Ignoring change for disabled plugin");
                return ReloadOutcome::Ignored;
            }
            Ok(false) => {}
            Err(e) => warn!(plugin_id = %plugin_id, error = %e, "Failed to read disabled plugins"),
        }

        info!(plugin_id = %plugin_id, "Reloading plugin");
        let snapshot = self.snapshot_tabs(&plugin_id);
        self.unload(&plugin_id, UnregisterOptions::preserving_tabs());

        let discovered = match self.host.discover() {
            Ok(found) => found.into_iter().find(|p| p.matches(&plugin_id)),
            Err(e) => {
                warn!(plugin_id = %plugin_id, error = %e, "Discovery failed during reload");
                return ReloadOutcome::Aborted(e.to_string());
            }
        };
        let Some(plugin) = discovered else {
            self.forget(&plugin_id);
            self.close_orphaned_tabs(&snapshot);
            info!(plugin_id = %plugin_id, "Plugin removed from disk");
            return ReloadOutcome::Removed;
        };

        // the on-disk manifest may have renamed the plugin
        if plugin.id() != plugin_id {
            info!(plugin_id = %plugin.id(), previous_id = %plugin_id, "Plugin id changed on disk");
            self.registry.move_preserved_tabs(&plugin_id, plugin.id());
            self.forget(&plugin_id);
        }
        let plugin_id = plugin.id().to_string();
        self.discovered.insert(plugin_id.clone(), plugin.clone());
        self.set_state(&plugin_id, PluginLifecycleState::Discovered);

        let mut instance = match self.import(&plugin) {
            Ok(instance) => instance,
            Err(e) => {
                warn!(plugin_id = %plugin_id, error = %e, "Reload aborted: module failed to load");
                return ReloadOutcome::Aborted(e.to_string());
            }
        };

        if let Err(e) = self.activate(
            &plugin.manifest,
            instance.as_mut(),
            PluginOrigin::External,
            false,
            UnregisterOptions::preserving_tabs(),
        ) {
            warn!(plugin_id = %plugin_id, error = %e, "Reload aborted: activation failed");
            return ReloadOutcome::Aborted(e.to_string());
        }
        self.external.insert(plugin_id.clone(), instance);
        self.ensure_plugins_section();

        self.restore_tabs(&plugin_id, snapshot);
        info!(plugin_id = %plugin_id, "Plugin reloaded");
        ReloadOutcome::Reloaded
    }

    /// Upgrades an installed plugin in place, then loads the new version
    /// with migrations so its schema changes apply immediately.
    pub fn upgrade_plugin(
        &mut self,
        plugin_id: &str,
        installer: &dyn crate::installer::PluginInstaller,
    ) -> PluginHostResult<()> {
        if self.is_builtin(plugin_id) {
            return Err(PluginHostError::Installer(format!(
                "built-in plugin '{plugin_id}' cannot be upgraded"
            )));
        }
        let manifest = installer.upgrade(plugin_id)?;
        info!(plugin_id, version = %manifest.version, "Plugin upgraded on disk");

        let snapshot = self.snapshot_tabs(plugin_id);
        self.unload(plugin_id, UnregisterOptions::preserving_tabs());

        let plugin = self
            .host
            .discover()?
            .into_iter()
            .find(|p| p.matches(plugin_id))
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))?;
        self.discovered.insert(plugin.id().to_string(), plugin.clone());
        self.set_state(plugin.id(), PluginLifecycleState::Discovered);

        let mut instance = self.import(&plugin)?;
        self.activate(
            &plugin.manifest,
            instance.as_mut(),
            PluginOrigin::External,
            true,
            UnregisterOptions::preserving_tabs(),
        )?;
        self.external.insert(plugin.id().to_string(), instance);
        self.restore_tabs(plugin.id(), snapshot);
        Ok(())
    }

    fn snapshot_tabs(&self, plugin_id: &str) -> TabSnapshot {
        let tabs = self.registry.tabs_for_plugin(plugin_id);
        let active = self
            .registry
            .tabs()
            .active()
            .filter(|active| tabs.iter().any(|t| t.id == *active))
            .map(str::to_string);
        TabSnapshot { tabs, active }
    }

    /// Deactivates the running instance, if any, then unregisters the
    /// plugin's capabilities. A failing deactivation hook is logged and
    /// does not stop the unload.
    pub(crate) fn unload(&mut self, plugin_id: &str, options: UnregisterOptions) {
        let old = self.external.remove(plugin_id);
        if let Some(mut old) = old {
            if let Err(e) = old.deactivate() {
                warn!(plugin_id, error = %format!("{e:#}"), "Plugin deactivation failed");
            }
            self.set_state(plugin_id, PluginLifecycleState::Deactivated);
            self.registry.unregister_plugin(plugin_id, options);
            // dropped only once nothing in the registry refers to it
            drop(old);
        } else {
            self.registry.unregister_plugin(plugin_id, options);
        }
        self.set_state(plugin_id, PluginLifecycleState::Unregistered);
    }

    /// Drops every record of a plugin that is gone for good.
    pub(crate) fn forget(&mut self, plugin_id: &str) {
        self.registry.remove_plugin_permissions(plugin_id);
        self.registry.release_preserved_tabs(plugin_id);
        self.discovered.remove(plugin_id);
        self.manifests.remove(plugin_id);
        self.set_state(plugin_id, PluginLifecycleState::Removed);
    }

    fn close_orphaned_tabs(&mut self, snapshot: &TabSnapshot) {
        for tab in &snapshot.tabs {
            if !self.registry.has_view(&tab.view_id) {
                self.registry.close_tab(&tab.id);
            }
        }
    }

    fn restore_tabs(&mut self, plugin_id: &str, snapshot: TabSnapshot) {
        self.close_orphaned_tabs(&snapshot);
        self.registry.release_preserved_tabs(plugin_id);
        if let Some(active) = snapshot.active {
            if self.registry.tabs().get(&active).is_some() {
                self.registry.focus_tab(&active);
            }
        }
    }
}

/// Processes change events for a runtime, one at a time.
///
/// Events that pile up while a reload runs are coalesced per plugin id and
/// handled in arrival order, so no two reloads of the same plugin ever
/// overlap. The task ends when the event channel closes.
pub fn spawn_reload_worker(
    runtime: Arc<Mutex<PluginRuntime>>,
    mut events: mpsc::UnboundedReceiver<PluginChanged>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(first) = events.recv().await {
            let mut pending = vec![first.plugin_id];
            while let Ok(next) = events.try_recv() {
                if !pending.contains(&next.plugin_id) {
                    pending.push(next.plugin_id);
                }
            }

            for plugin_id in pending {
                let outcome = runtime.lock().await.reload_plugin(&plugin_id);
                debug!(plugin_id = %plugin_id, ?outcome, "Processed plugin change");
            }
        }
        debug!("Plugin change stream closed");
    })
}

/// Takes the runtime's change stream and starts a worker for it. Returns
/// `None` when the runtime is not watching.
pub async fn start_reload_worker(runtime: Arc<Mutex<PluginRuntime>>) -> Option<JoinHandle<()>> {
    let events = runtime.lock().await.take_change_events()?;
    Some(spawn_reload_worker(runtime, events))
}
