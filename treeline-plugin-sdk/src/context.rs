//! The scoped registration surface handed to `Plugin::activate`.

use crate::capability::{Command, SidebarItem, StatusBarItem, View};
use crate::manifest::Permissions;

/// Registration functions available to an activating plugin.
///
/// Every call is attributed to the plugin that owns the context; a plugin
/// cannot register capabilities on behalf of another one.
pub trait PluginContext {
    fn plugin_id(&self) -> &str;

    /// The private schema this plugin's migrations ran against.
    fn schema_name(&self) -> &str;

    fn permissions(&self) -> &Permissions;

    fn register_view(&mut self, view: View);

    fn register_sidebar_item(&mut self, item: SidebarItem);

    fn register_command(&mut self, command: Command);

    fn register_status_bar_item(&mut self, item: StatusBarItem);
}
