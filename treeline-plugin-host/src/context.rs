//! The scoped context handed to `Plugin::activate`.

use crate::registry::Registry;
use treeline_plugin_sdk::{
    Command, PLUGINS_SECTION, Permissions, PluginContext, SidebarItem, StatusBarItem, View,
};

/// Whether a plugin ships with the application or was installed separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginOrigin {
    BuiltIn,
    External,
}

/// Registration surface bound to one plugin id. Every contribution is
/// attributed to that id, and external plugins' sidebar entries always land
/// in the Plugins section.
pub struct ScopedContext<'a> {
    registry: &'a mut Registry,
    plugin_id: &'a str,
    schema_name: String,
    permissions: Permissions,
    origin: PluginOrigin,
}

impl<'a> ScopedContext<'a> {
    pub fn new(
        registry: &'a mut Registry,
        plugin_id: &'a str,
        permissions: Permissions,
        origin: PluginOrigin,
    ) -> Self {
        let schema_name = permissions.schema_name_for(plugin_id);
        Self {
            registry,
            plugin_id,
            schema_name,
            permissions,
            origin,
        }
    }
}

impl PluginContext for ScopedContext<'_> {
    fn plugin_id(&self) -> &str {
        self.plugin_id
    }

    fn schema_name(&self) -> &str {
        &self.schema_name
    }

    fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    fn register_view(&mut self, view: View) {
        self.registry.register_view(self.plugin_id, view);
    }

    fn register_sidebar_item(&mut self, mut item: SidebarItem) {
        if self.origin == PluginOrigin::External {
            item.section_id = PLUGINS_SECTION.to_string();
        }
        self.registry.register_sidebar_item(self.plugin_id, item);
    }

    fn register_command(&mut self, command: Command) {
        self.registry.register_command(self.plugin_id, command);
    }

    fn register_status_bar_item(&mut self, item: StatusBarItem) {
        self.registry.register_status_bar_item(self.plugin_id, item);
    }
}
