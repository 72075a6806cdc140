//! Runtime configuration, read from `<treeline_dir>/runtime.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_FILE_NAME: &str = "runtime.toml";
pub const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 500;

/// Where plugins, cached modules, and settings live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub plugins_dir: PathBuf,
    pub module_cache_dir: PathBuf,
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
    pub settings_path: PathBuf,
}

fn default_watch_debounce_ms() -> u64 {
    DEFAULT_WATCH_DEBOUNCE_MS
}

impl RuntimeConfig {
    /// Defaults rooted at `base`.
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            plugins_dir: base.join("plugins"),
            module_cache_dir: base.join("cache").join("plugin-modules"),
            watch_debounce_ms: DEFAULT_WATCH_DEBOUNCE_MS,
            settings_path: base.join("settings.json"),
        }
    }

    /// Loads `runtime.toml` from the Treeline directory if it exists.
    pub fn load() -> Self {
        let base = treeline_dir();
        Self::load_from(&base.join(CONFIG_FILE_NAME), &base)
    }

    /// Loads from an explicit path; missing keys fall back to defaults under
    /// `base`. A missing or malformed file yields the defaults.
    pub fn load_from(path: &Path, base: &Path) -> Self {
        let defaults = Self::rooted_at(base);
        if !path.exists() {
            info!("No runtime config at {:?}, using defaults", path);
            return defaults;
        }

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read runtime config {:?}: {}", path, e);
                return defaults;
            }
        };

        match toml::from_str::<ConfigFile>(&contents) {
            Ok(file) => {
                info!("Loaded runtime config from {:?}", path);
                file.runtime.apply(defaults)
            }
            Err(e) => {
                warn!(
                    "Failed to parse runtime config {:?}: {}. Falling back to defaults.",
                    path, e
                );
                defaults
            }
        }
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

/// Raw TOML structure:
///
/// ```toml
/// [runtime]
/// plugins-dir = "/opt/treeline/plugins"
/// watch-debounce-ms = 250
/// ```
#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    runtime: RuntimeSection,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct RuntimeSection {
    plugins_dir: Option<PathBuf>,
    module_cache_dir: Option<PathBuf>,
    watch_debounce_ms: Option<u64>,
    settings_path: Option<PathBuf>,
}

impl RuntimeSection {
    fn apply(self, defaults: RuntimeConfig) -> RuntimeConfig {
        RuntimeConfig {
            plugins_dir: self.plugins_dir.unwrap_or(defaults.plugins_dir),
            module_cache_dir: self.module_cache_dir.unwrap_or(defaults.module_cache_dir),
            watch_debounce_ms: self.watch_debounce_ms.unwrap_or(defaults.watch_debounce_ms),
            settings_path: self.settings_path.unwrap_or(defaults.settings_path),
        }
    }
}

/// `$TREELINE_DIR`, else `~/.treeline`.
pub fn treeline_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TREELINE_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        Path::new(&home).join(".treeline")
    } else if let Ok(home) = std::env::var("USERPROFILE") {
        Path::new(&home).join(".treeline")
    } else {
        PathBuf::from(".treeline")
    }
}
