//! Convenience re-exports for plugin authors.

pub use crate::capability::{
    Command, CommandAction, SidebarItem, SidebarSection, StatusBarAlignment, StatusBarItem, View,
    ViewContent, ViewMount, CORE_SECTION, PLUGINS_SECTION,
};
pub use crate::context::PluginContext;
pub use crate::manifest::{Permissions, PluginManifest, TableRef};
pub use crate::migration::Migration;
pub use crate::plugin::Plugin;
