//! Which plugins read from another plugin's schema.
//!
//! Used to warn before destructive actions such as "uninstall and delete
//! data". The result is advisory: nothing here blocks the action, and only
//! declared read access is considered.

use crate::error::{PluginHostError, PluginHostResult};
use crate::manager::PluginRuntime;
use std::collections::{BTreeSet, HashMap};
use treeline_plugin_sdk::Permissions;

/// A plugin that declared read access into the target's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentPlugin {
    pub plugin_id: String,
    /// Display name, falling back to the id.
    pub name: String,
    /// Tables of the target schema it reads, as written in its manifest.
    pub tables: Vec<String>,
}

/// Scans every plugin except `target_id` for read permissions of the form
/// `<schema_name>.<table>` (schema compared case-insensitively). Results are
/// ordered by plugin id.
pub fn find_dependent_plugins<'a, F>(
    target_id: &str,
    schema_name: &str,
    all_permissions: &'a HashMap<String, Permissions>,
    display_name: F,
) -> Vec<DependentPlugin>
where
    F: Fn(&'a str) -> Option<String>,
{
    let mut dependents: Vec<DependentPlugin> = all_permissions
        .iter()
        .filter(|(plugin_id, _)| plugin_id.as_str() != target_id)
        .filter_map(|(plugin_id, permissions)| {
            let tables: BTreeSet<String> = permissions
                .read
                .iter()
                .filter_map(|t| t.table_in_schema(schema_name))
                .map(str::to_string)
                .collect();
            if tables.is_empty() {
                return None;
            }
            Some(DependentPlugin {
                plugin_id: plugin_id.clone(),
                name: display_name(plugin_id.as_str()).unwrap_or_else(|| plugin_id.clone()),
                tables: tables.into_iter().collect(),
            })
        })
        .collect();
    dependents.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
    dependents
}

impl PluginRuntime {
    /// The schema owned by a known plugin.
    pub fn schema_name(&self, plugin_id: &str) -> PluginHostResult<String> {
        if let Some(manifest) = self.manifest(plugin_id) {
            return Ok(manifest.schema_name());
        }
        self.registry
            .get_all_plugin_permissions()
            .get(plugin_id)
            .map(|p| p.schema_name_for(plugin_id))
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))
    }

    /// Plugins whose declared reads would break if `plugin_id`'s data went
    /// away.
    pub fn dependent_plugins(&self, plugin_id: &str) -> PluginHostResult<Vec<DependentPlugin>> {
        let schema_name = self.schema_name(plugin_id)?;
        Ok(find_dependent_plugins(
            plugin_id,
            &schema_name,
            self.registry.get_all_plugin_permissions(),
            |id| self.manifest(id).map(|m| m.name.clone()),
        ))
    }
}
