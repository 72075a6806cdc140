//! Host operations the runtime consumes: listing installed plugins and
//! watching the plugins directory for changes.

use crate::error::{PluginHostError, PluginHostResult};
use notify_debouncer_full::notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use std::collections::BTreeSet;
use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use treeline_plugin_sdk::PluginManifest;

pub const MANIFEST_FILE: &str = "manifest.json";

/// A file under the plugins directory changed. `plugin_id` is the name of
/// the plugin's directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginChanged {
    pub plugin_id: String,
}

impl PluginChanged {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
        }
    }
}

/// An installed plugin found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPlugin {
    pub manifest: PluginManifest,
    /// The plugin's directory under the plugins dir.
    pub dir: PathBuf,
    /// The module to load.
    pub entry: PathBuf,
}

impl DiscoveredPlugin {
    pub fn new(manifest: PluginManifest, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let entry = dir.join(entry_file_name(&manifest));
        Self {
            manifest,
            dir,
            entry,
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn dir_name(&self) -> Option<&str> {
        self.dir.file_name().and_then(|n| n.to_str())
    }

    /// Whether a change event keyed by `key` is about this plugin.
    pub fn matches(&self, key: &str) -> bool {
        self.manifest.id == key || self.dir_name() == Some(key)
    }
}

/// `main` from the manifest, or the platform library name for the id
/// (`libbudget_tools.so` for `budget-tools` on Linux).
pub fn entry_file_name(manifest: &PluginManifest) -> String {
    match manifest.main.as_deref().map(str::trim) {
        Some(main) if !main.is_empty() => main.to_string(),
        _ => format!(
            "{DLL_PREFIX}{}.{DLL_EXTENSION}",
            manifest.id.replace('-', "_")
        ),
    }
}

/// Stops watching when dropped.
pub struct PluginWatcher {
    _debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
}

impl PluginWatcher {
    /// A watcher that never fires, for hosts without a file system.
    pub fn inert() -> Self {
        Self { _debouncer: None }
    }

    pub fn is_active(&self) -> bool {
        self._debouncer.is_some()
    }
}

pub trait PluginHost: Send {
    fn plugins_dir(&self) -> PathBuf;

    /// Every installed plugin with a readable manifest, in a stable order.
    /// Unreadable manifests are skipped.
    fn discover(&self) -> PluginHostResult<Vec<DiscoveredPlugin>>;

    /// Starts forwarding change events until the returned watcher is dropped.
    fn watch(&self, events: mpsc::UnboundedSender<PluginChanged>) -> PluginHostResult<PluginWatcher>;
}

/// [`PluginHost`] over `<plugins_dir>/<id>/manifest.json`.
#[derive(Debug, Clone)]
pub struct FsPluginHost {
    plugins_dir: PathBuf,
    debounce: Duration,
}

impl FsPluginHost {
    pub fn new(plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            debounce: Duration::from_millis(crate::config::DEFAULT_WATCH_DEBOUNCE_MS),
        }
    }

    pub fn from_config(config: &crate::config::RuntimeConfig) -> Self {
        Self::new(&config.plugins_dir).with_debounce(config.watch_debounce())
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    fn read_plugin(dir: &Path) -> PluginHostResult<Option<DiscoveredPlugin>> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&manifest_path)?;
        let manifest = PluginManifest::from_json(&contents)
            .map_err(|e| PluginHostError::Discovery(format!("{}: {e}", manifest_path.display())))?;
        Ok(Some(DiscoveredPlugin::new(manifest, dir)))
    }
}

impl PluginHost for FsPluginHost {
    fn plugins_dir(&self) -> PathBuf {
        self.plugins_dir.clone()
    }

    fn discover(&self) -> PluginHostResult<Vec<DiscoveredPlugin>> {
        std::fs::create_dir_all(&self.plugins_dir)?;

        let mut dirs: Vec<PathBuf> = std::fs::read_dir(&self.plugins_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        let mut plugins = Vec::with_capacity(dirs.len());
        for dir in dirs {
            match Self::read_plugin(&dir) {
                Ok(Some(plugin)) => {
                    if plugin.dir_name() != Some(plugin.id()) {
                        warn!(
                            plugin_id = %plugin.id(),
                            dir = %dir.display(),
                            "Plugin directory name does not match manifest id"
                        );
                    }
                    plugins.push(plugin);
                }
                Ok(None) => debug!(dir = %dir.display(), "No manifest, skipping"),
                Err(e) => warn!(dir = %dir.display(), error = %e, "Skipping unreadable plugin"),
            }
        }
        Ok(plugins)
    }

    fn watch(&self, events: mpsc::UnboundedSender<PluginChanged>) -> PluginHostResult<PluginWatcher> {
        std::fs::create_dir_all(&self.plugins_dir)?;
        let roots = watch_roots(&self.plugins_dir);
        let mut receiver_gone = false;

        let mut debouncer = new_debouncer(
            self.debounce,
            None,
            move |result: DebounceEventResult| match result {
                Ok(batch) => {
                    let mut changed = BTreeSet::new();
                    for event in batch {
                        if !matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) {
                            continue;
                        }
                        for path in &event.paths {
                            if let Some(id) = changed_plugin_id(&roots, path) {
                                debug!(plugin_id = %id, path = %path.display(), "Plugin file changed");
                                changed.insert(id);
                            }
                        }
                    }
                    forward_changes(&events, changed, &mut receiver_gone);
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "Plugin watcher error");
                    }
                }
            },
        )
        .map_err(|e| PluginHostError::Watcher(e.to_string()))?;

        debouncer
            .watch(&self.plugins_dir, RecursiveMode::Recursive)
            .map_err(|e| PluginHostError::Watcher(e.to_string()))?;
        info!(dir = %self.plugins_dir.display(), "Watching plugins directory");

        Ok(PluginWatcher {
            _debouncer: Some(debouncer),
        })
    }
}

/// Sends one event per changed plugin. Once the receiver is gone, events are
/// dropped and this is logged a single time.
fn forward_changes(
    events: &mpsc::UnboundedSender<PluginChanged>,
    changed: BTreeSet<String>,
    receiver_gone: &mut bool,
) {
    if *receiver_gone {
        return;
    }
    for plugin_id in changed {
        if events.send(PluginChanged { plugin_id }).is_err() {
            warn!("Plugin change receiver closed, ignoring further changes");
            *receiver_gone = true;
            return;
        }
    }
}

fn watch_roots(plugins_dir: &Path) -> Vec<PathBuf> {
    let mut roots = vec![plugins_dir.to_path_buf()];
    if let Ok(canonical) = plugins_dir.canonicalize() {
        if canonical != plugins_dir {
            roots.push(canonical);
        }
    }
    roots
}

/// Maps a changed path to the plugin directory it belongs to, for manifest
/// and library files only.
fn changed_plugin_id(roots: &[PathBuf], path: &Path) -> Option<String> {
    let relevant = path.file_name().and_then(|n| n.to_str()) == Some(MANIFEST_FILE)
        || path.extension().and_then(|e| e.to_str()) == Some(DLL_EXTENSION);
    if !relevant {
        return None;
    }

    let relative = roots.iter().find_map(|root| path.strip_prefix(root).ok())?;
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(dir)), Some(_)) => dir.to_str().map(str::to_string),
        _ => None,
    }
}
