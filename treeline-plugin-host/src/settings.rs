//! Persisted preferences the runtime reads: the disabled-plugin list and the
//! hot-reload toggle.

use crate::error::{PluginHostError, PluginHostResult};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::warn;

pub trait SettingsStore: Send {
    fn disabled_plugins(&self) -> PluginHostResult<HashSet<String>>;
    fn hot_reload_enabled(&self) -> PluginHostResult<bool>;

    fn is_disabled(&self, plugin_id: &str) -> PluginHostResult<bool> {
        Ok(self.disabled_plugins()?.contains(plugin_id))
    }
}

/// Reads the `app` section of the unified `settings.json`:
///
/// ```json
/// { "app": { "disabledPlugins": ["goals"], "pluginHotReload": true } }
/// ```
///
/// The file is re-read on every call so toggles made by the settings UI take
/// effect on the next lifecycle step.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    app: AppSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppSettings {
    #[serde(default)]
    disabled_plugins: Vec<String>,
    #[serde(default)]
    plugin_hot_reload: bool,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> PluginHostResult<AppSettings> {
        if !self.path.exists() {
            return Ok(AppSettings::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(AppSettings::default());
        }
        let file: SettingsFile = serde_json::from_str(&contents).map_err(|e| {
            warn!("Failed to parse settings file {:?}: {}", self.path, e);
            PluginHostError::Config(format!("{}: {e}", self.path.display()))
        })?;
        Ok(file.app)
    }
}

impl SettingsStore for JsonSettingsStore {
    fn disabled_plugins(&self) -> PluginHostResult<HashSet<String>> {
        Ok(self.read()?.disabled_plugins.into_iter().collect())
    }

    fn hot_reload_enabled(&self) -> PluginHostResult<bool> {
        Ok(self.read()?.plugin_hot_reload)
    }
}

/// In-process settings, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    disabled: RwLock<HashSet<String>>,
    hot_reload: RwLock<bool>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_disabled<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut disabled) = self.disabled.write() {
            disabled.extend(ids.into_iter().map(Into::into));
        }
        self
    }

    pub fn with_hot_reload(self, enabled: bool) -> Self {
        self.set_hot_reload(enabled);
        self
    }

    pub fn disable(&self, plugin_id: &str) {
        if let Ok(mut disabled) = self.disabled.write() {
            disabled.insert(plugin_id.to_string());
        }
    }

    pub fn enable(&self, plugin_id: &str) {
        if let Ok(mut disabled) = self.disabled.write() {
            disabled.remove(plugin_id);
        }
    }

    pub fn set_hot_reload(&self, enabled: bool) {
        if let Ok(mut hot_reload) = self.hot_reload.write() {
            *hot_reload = enabled;
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn disabled_plugins(&self) -> PluginHostResult<HashSet<String>> {
        self.disabled
            .read()
            .map(|d| d.clone())
            .map_err(|_| PluginHostError::Config("settings lock poisoned".into()))
    }

    fn hot_reload_enabled(&self) -> PluginHostResult<bool> {
        self.hot_reload
            .read()
            .map(|h| *h)
            .map_err(|_| PluginHostError::Config("settings lock poisoned".into()))
    }
}
