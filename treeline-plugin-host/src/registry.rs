//! The shared catalog of UI contributions from every active plugin.
//!
//! Every entry is tagged with the plugin that registered it, so a plugin can
//! be unregistered as a unit. Views also keep a `view_id -> plugin_id` map
//! used to resolve permissions when a tab is mounted. The open-tab strip lives
//! here too, so reloads can keep it intact while a plugin is swapped out.

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};
use treeline_plugin_sdk::{
    Cleanup, Command, CommandAction, Permissions, SidebarItem, SidebarSection, StatusBarAlignment,
    StatusBarItem, View, ViewContent,
};

use crate::error::{PluginHostError, PluginHostResult};

/// A capability plus the plugin that contributed it.
#[derive(Debug, Clone)]
pub struct Registered<T> {
    pub plugin_id: String,
    pub item: T,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenTab {
    pub id: String,
    pub view_id: String,
    pub props: serde_json::Value,
}

/// Open tabs in display order plus the focused one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabStrip {
    tabs: Vec<OpenTab>,
    active: Option<String>,
}

impl TabStrip {
    pub fn tabs(&self) -> &[OpenTab] {
        &self.tabs
    }

    pub fn ids(&self) -> Vec<&str> {
        self.tabs.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn get(&self, tab_id: &str) -> Option<&OpenTab> {
        self.tabs.iter().find(|t| t.id == tab_id)
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    fn push(&mut self, tab: OpenTab) {
        self.active = Some(tab.id.clone());
        self.tabs.push(tab);
    }

    fn focus(&mut self, tab_id: &str) -> bool {
        if self.get(tab_id).is_some() {
            self.active = Some(tab_id.to_string());
            true
        } else {
            false
        }
    }

    /// Removes a tab. Closing the active tab focuses its left neighbour, or
    /// the new first tab.
    fn close(&mut self, tab_id: &str) -> bool {
        let Some(index) = self.tabs.iter().position(|t| t.id == tab_id) else {
            return false;
        };
        self.tabs.remove(index);
        if self.active.as_deref() == Some(tab_id) {
            self.active = self
                .tabs
                .get(index.saturating_sub(1))
                .or_else(|| self.tabs.first())
                .map(|t| t.id.clone());
        }
        true
    }
}

/// Change notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    SectionsChanged,
    ViewsChanged,
    SidebarChanged,
    CommandsChanged,
    StatusBarChanged,
    PermissionsChanged(String),
    TabsChanged,
    PluginUnregistered(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&RegistryEvent) + Send>;

#[derive(Debug, Clone, Copy, Default)]
pub struct UnregisterOptions {
    /// Keep tab records that point at the plugin's views.
    pub preserve_tabs: bool,
}

impl UnregisterOptions {
    pub fn preserving_tabs() -> Self {
        Self {
            preserve_tabs: true,
        }
    }
}

#[derive(Default)]
pub struct Registry {
    sections: Vec<SidebarSection>,
    views: Vec<Registered<View>>,
    sidebar_items: Vec<Registered<SidebarItem>>,
    commands: Vec<Registered<Command>>,
    status_bar_items: Vec<Registered<StatusBarItem>>,
    view_owners: HashMap<String, String>,
    /// View ids a plugin owned when it was unregistered with its tabs kept.
    /// Lets those tabs be found again while the plugin is not registered.
    preserved_views: HashMap<String, BTreeSet<String>>,
    permissions: HashMap<String, Permissions>,
    tabs: TabStrip,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

/// Inserts `item` or replaces the entry with the same id.
fn upsert<T>(
    entries: &mut Vec<Registered<T>>,
    plugin_id: &str,
    item: T,
    id_of: impl Fn(&T) -> &str,
    kind: &str,
) {
    let id = id_of(&item).to_string();
    let entry = Registered {
        plugin_id: plugin_id.to_string(),
        item,
    };
    match entries.iter().position(|e| id_of(&e.item) == id) {
        Some(index) => {
            if entries[index].plugin_id != plugin_id {
                warn!(
                    plugin_id,
                    previous_owner = %entries[index].plugin_id,
                    id = %id,
                    "Replacing {kind} registered by another plugin"
                );
            }
            entries[index] = entry;
        }
        None => entries.push(entry),
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ================================================================
    // Subscriptions
    // ================================================================

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: Fn(&RegistryEvent) + Send + 'static,
    {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sub, _)| *sub != id);
        self.listeners.len() != before
    }

    fn notify(&self, event: RegistryEvent) {
        for (_, listener) in &self.listeners {
            listener(&event);
        }
    }

    // ================================================================
    // Registration
    // ================================================================

    pub fn register_sidebar_section(&mut self, section: SidebarSection) {
        match self.sections.iter_mut().find(|s| s.id == section.id) {
            Some(existing) => *existing = section,
            None => self.sections.push(section),
        }
        self.notify(RegistryEvent::SectionsChanged);
    }

    pub fn register_view(&mut self, plugin_id: &str, view: View) {
        self.view_owners
            .insert(view.id.clone(), plugin_id.to_string());
        upsert(&mut self.views, plugin_id, view, |v| v.id.as_str(), "view");
        self.notify(RegistryEvent::ViewsChanged);
    }

    pub fn register_sidebar_item(&mut self, plugin_id: &str, item: SidebarItem) {
        upsert(&mut self.sidebar_items, plugin_id, item, |i| i.id.as_str(), "sidebar item");
        self.notify(RegistryEvent::SidebarChanged);
    }

    pub fn register_command(&mut self, plugin_id: &str, command: Command) {
        upsert(&mut self.commands, plugin_id, command, |c| c.id.as_str(), "command");
        self.notify(RegistryEvent::CommandsChanged);
    }

    pub fn register_status_bar_item(&mut self, plugin_id: &str, item: StatusBarItem) {
        upsert(&mut self.status_bar_items, plugin_id, item, |i| i.id.as_str(), "status bar item");
        self.notify(RegistryEvent::StatusBarChanged);
    }

    pub fn register_plugin_permissions(&mut self, plugin_id: &str, permissions: Permissions) {
        self.permissions
            .insert(plugin_id.to_string(), permissions);
        self.notify(RegistryEvent::PermissionsChanged(plugin_id.to_string()));
    }

    pub fn remove_plugin_permissions(&mut self, plugin_id: &str) -> Option<Permissions> {
        let removed = self.permissions.remove(plugin_id);
        if removed.is_some() {
            self.notify(RegistryEvent::PermissionsChanged(plugin_id.to_string()));
        }
        removed
    }

    /// Removes every capability attributed to `plugin_id`.
    ///
    /// Tabs showing the plugin's views are closed unless
    /// `options.preserve_tabs` is set. Permissions are left in place.
    pub fn unregister_plugin(&mut self, plugin_id: &str, options: UnregisterOptions) {
        let owned_views: Vec<String> = self
            .views
            .iter()
            .filter(|v| v.plugin_id == plugin_id)
            .map(|v| v.item.id.clone())
            .collect();

        self.views.retain(|v| v.plugin_id != plugin_id);
        self.sidebar_items.retain(|i| i.plugin_id != plugin_id);
        self.commands.retain(|c| c.plugin_id != plugin_id);
        self.status_bar_items.retain(|i| i.plugin_id != plugin_id);
        self.view_owners.retain(|_, owner| owner.as_str() != plugin_id);

        if options.preserve_tabs {
            self.preserved_views
                .entry(plugin_id.to_string())
                .or_default()
                .extend(owned_views.iter().cloned());
        } else {
            let preserved = self.preserved_views.remove(plugin_id).unwrap_or_default();
            let orphaned: Vec<String> = self
                .tabs
                .tabs
                .iter()
                .filter(|t| owned_views.contains(&t.view_id) || preserved.contains(&t.view_id))
                .map(|t| t.id.clone())
                .collect();
            for tab_id in &orphaned {
                self.tabs.close(tab_id);
            }
            if !orphaned.is_empty() {
                self.notify(RegistryEvent::TabsChanged);
            }
        }

        debug!(
            plugin_id,
            views = owned_views.len(),
            preserve_tabs = options.preserve_tabs,
            "Unregistered plugin capabilities"
        );
        self.notify(RegistryEvent::PluginUnregistered(plugin_id.to_string()));
    }

    // ================================================================
    // Lookups
    // ================================================================

    /// Sections ordered for display.
    pub fn sidebar_sections(&self) -> Vec<&SidebarSection> {
        let mut sections: Vec<_> = self.sections.iter().collect();
        sections.sort_by_key(|s| s.order);
        sections
    }

    pub fn views(&self) -> &[Registered<View>] {
        &self.views
    }

    pub fn view(&self, view_id: &str) -> Option<&View> {
        self.views
            .iter()
            .find(|v| v.item.id == view_id)
            .map(|v| &v.item)
    }

    pub fn has_view(&self, view_id: &str) -> bool {
        self.view(view_id).is_some()
    }

    pub fn view_owner(&self, view_id: &str) -> Option<&str> {
        self.view_owners.get(view_id).map(String::as_str)
    }

    pub fn sidebar_items(&self) -> &[Registered<SidebarItem>] {
        &self.sidebar_items
    }

    /// Items of one section ordered for display.
    pub fn sidebar_items_in(&self, section_id: &str) -> Vec<&SidebarItem> {
        let mut items: Vec<_> = self
            .sidebar_items
            .iter()
            .map(|i| &i.item)
            .filter(|i| i.section_id == section_id)
            .collect();
        items.sort_by_key(|i| i.order);
        items
    }

    pub fn commands(&self) -> &[Registered<Command>] {
        &self.commands
    }

    pub fn status_bar_items(&self, alignment: StatusBarAlignment) -> Vec<&StatusBarItem> {
        let mut items: Vec<_> = self
            .status_bar_items
            .iter()
            .map(|i| &i.item)
            .filter(|i| i.alignment == alignment)
            .collect();
        items.sort_by_key(|i| i.order);
        items
    }

    /// Number of views, sidebar items, commands and status bar items
    /// attributed to `plugin_id`.
    pub fn capability_count(&self, plugin_id: &str) -> usize {
        self.views.iter().filter(|v| v.plugin_id == plugin_id).count()
            + self
                .sidebar_items
                .iter()
                .filter(|i| i.plugin_id == plugin_id)
                .count()
            + self.commands.iter().filter(|c| c.plugin_id == plugin_id).count()
            + self
                .status_bar_items
                .iter()
                .filter(|i| i.plugin_id == plugin_id)
                .count()
    }

    /// Declared permissions, or an empty block for unknown plugins.
    ///
    /// This is a lookup default only. Query enforcement must deny whatever a
    /// plugin did not declare.
    pub fn get_plugin_permissions(&self, plugin_id: &str) -> Permissions {
        self.permissions.get(plugin_id).cloned().unwrap_or_default()
    }

    pub fn get_all_plugin_permissions(&self) -> &HashMap<String, Permissions> {
        &self.permissions
    }

    /// Permissions of the plugin owning `view_id`.
    pub fn permissions_for_view(&self, view_id: &str) -> Option<(&str, Permissions)> {
        let owner = self.view_owner(view_id)?;
        Some((owner, self.get_plugin_permissions(owner)))
    }

    // ================================================================
    // Tabs
    // ================================================================

    pub fn tabs(&self) -> &TabStrip {
        &self.tabs
    }

    /// Opens `view_id` in a tab and focuses it. Views without
    /// `allow_multiple` reuse their existing tab. Returns `None` for unknown
    /// views.
    pub fn open_view(&mut self, view_id: &str, props: serde_json::Value) -> Option<String> {
        let view = self.view(view_id)?;
        if !view.allow_multiple {
            if let Some(existing) = self.tabs.tabs.iter().find(|t| t.view_id == view_id) {
                let id = existing.id.clone();
                self.tabs.focus(&id);
                self.notify(RegistryEvent::TabsChanged);
                return Some(id);
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.tabs.push(OpenTab {
            id: id.clone(),
            view_id: view_id.to_string(),
            props,
        });
        self.notify(RegistryEvent::TabsChanged);
        Some(id)
    }

    pub fn focus_tab(&mut self, tab_id: &str) -> bool {
        let focused = self.tabs.focus(tab_id);
        if focused {
            self.notify(RegistryEvent::TabsChanged);
        }
        focused
    }

    pub fn close_tab(&mut self, tab_id: &str) -> bool {
        let closed = self.tabs.close(tab_id);
        if closed {
            self.notify(RegistryEvent::TabsChanged);
        }
        closed
    }

    /// Tabs showing a view owned by `plugin_id`, including views it owned
    /// when it was last unregistered with its tabs kept, as long as no other
    /// plugin has registered them since.
    pub fn tabs_for_plugin(&self, plugin_id: &str) -> Vec<OpenTab> {
        let preserved = self.preserved_views.get(plugin_id);
        self.tabs
            .tabs
            .iter()
            .filter(|t| match self.view_owner(&t.view_id) {
                Some(owner) => owner == plugin_id,
                None => preserved.is_some_and(|views| views.contains(&t.view_id)),
            })
            .cloned()
            .collect()
    }

    /// Drops the record of views kept by a preserving unregister, once the
    /// plugin's tabs have been restored or closed.
    pub fn release_preserved_tabs(&mut self, plugin_id: &str) {
        self.preserved_views.remove(plugin_id);
    }

    /// Re-attributes kept tabs when a plugin is reloaded under a new id.
    pub fn move_preserved_tabs(&mut self, from: &str, to: &str) {
        if let Some(views) = self.preserved_views.remove(from) {
            self.preserved_views
                .entry(to.to_string())
                .or_default()
                .extend(views);
        }
    }

    /// Mounts a tab's view into `container`. Component views are rendered by
    /// the shell and return `None`.
    pub fn mount_tab(&self, tab_id: &str, container: &str) -> Option<Cleanup> {
        let tab = self.tabs.get(tab_id)?;
        match &self.view(&tab.view_id)?.content {
            ViewContent::Mount(mount) => Some(mount.mount(container, &tab.props)),
            ViewContent::Component(_) => None,
        }
    }

    /// Invokes a registered command.
    pub fn run_command(&mut self, command_id: &str) -> PluginHostResult<()> {
        let action = self
            .commands
            .iter()
            .find(|c| c.item.id == command_id)
            .map(|c| c.item.action.clone())
            .ok_or_else(|| PluginHostError::Command {
                command_id: command_id.to_string(),
                message: "no such command".into(),
            })?;

        match action {
            CommandAction::OpenView(view_id) => self
                .open_view(&view_id, serde_json::Value::Null)
                .map(|_| ())
                .ok_or_else(|| PluginHostError::Command {
                    command_id: command_id.to_string(),
                    message: format!("view '{view_id}' is not registered"),
                }),
            CommandAction::Run(f) => f().map_err(|e| PluginHostError::Command {
                command_id: command_id.to_string(),
                message: format!("{e:#}"),
            }),
        }
    }
}
