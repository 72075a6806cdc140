//! Shared fakes for the runtime integration tests: an in-memory plugin
//! directory, a module loader backed by factories, a recording SQL executor,
//! and a configurable test plugin.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use treeline_plugin_host::*;
use treeline_plugin_sdk::prelude::*;
use treeline_storage::{Database, SqlExecutor, SqlRow, SqlValue, StorageResult};

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

// ================================================================
// Test plugin
// ================================================================

/// What a [`TestPlugin`] registers and how it behaves.
#[derive(Clone)]
pub struct PluginSpec {
    pub manifest: PluginManifest,
    pub migrations: Vec<Migration>,
    pub views: Vec<&'static str>,
    pub fail_activate: bool,
    pub fail_deactivate: bool,
    pub log: EventLog,
}

impl PluginSpec {
    pub fn new(id: &str, log: &EventLog) -> Self {
        Self {
            manifest: PluginManifest::new(id, id.to_uppercase()),
            migrations: Vec::new(),
            views: vec![],
            fail_activate: false,
            fail_deactivate: false,
            log: Arc::clone(log),
        }
    }

    pub fn views(mut self, views: &[&'static str]) -> Self {
        self.views = views.to_vec();
        self
    }

    pub fn migrations(mut self, migrations: Vec<Migration>) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn reads(mut self, tables: &[&str]) -> Self {
        self.manifest.permissions = self.manifest.permissions.with_read(tables.iter().copied());
        self
    }

    pub fn failing_activate(mut self) -> Self {
        self.fail_activate = true;
        self
    }

    pub fn failing_deactivate(mut self) -> Self {
        self.fail_deactivate = true;
        self
    }

    pub fn build(&self) -> Box<dyn Plugin> {
        Box::new(TestPlugin {
            spec: self.clone(),
        })
    }
}

pub struct TestPlugin {
    spec: PluginSpec,
}

impl Plugin for TestPlugin {
    fn manifest(&self) -> PluginManifest {
        self.spec.manifest.clone()
    }

    fn migrations(&self) -> Vec<Migration> {
        self.spec.migrations.clone()
    }

    fn activate(&mut self, ctx: &mut dyn PluginContext) -> anyhow::Result<()> {
        let id = ctx.plugin_id().to_string();
        self.spec.log.lock().unwrap().push(format!("activate:{id}"));
        for view in &self.spec.views {
            ctx.register_view(View::component(*view, *view, "TestView"));
            ctx.register_sidebar_item(SidebarItem::new(*view, *view, *view));
            ctx.register_command(Command::open_view(format!("{view}.open"), *view, *view));
        }
        if self.spec.fail_activate {
            anyhow::bail!("activate failed on purpose");
        }
        Ok(())
    }

    fn deactivate(&mut self) -> anyhow::Result<()> {
        let id = self.spec.manifest.id.clone();
        self.spec.log.lock().unwrap().push(format!("deactivate:{id}"));
        if self.spec.fail_deactivate {
            anyhow::bail!("deactivate failed on purpose");
        }
        Ok(())
    }
}

// ================================================================
// Plugins directory + loader
// ================================================================

type Factory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

#[derive(Default)]
struct DiskState {
    plugins: Vec<DiscoveredPlugin>,
    modules: HashMap<String, Option<Factory>>,
    loads: Vec<(String, u64)>,
    watch_sender: Option<mpsc::UnboundedSender<PluginChanged>>,
}

/// An in-memory plugins directory shared by [`FakeHost`] and [`FakeLoader`].
/// Tests keep a clone to change "disk" contents while the runtime runs.
#[derive(Clone, Default)]
pub struct FakeDisk {
    state: Arc<Mutex<DiskState>>,
}

impl FakeDisk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `spec` under a directory named after its manifest id. The
    /// module builds plugins from `module`, which may differ from `spec`.
    pub fn install(&self, spec: &PluginSpec) {
        self.install_with_module(spec.manifest.clone(), spec.clone());
    }

    pub fn install_with_module(&self, manifest: PluginManifest, module: PluginSpec) {
        let mut state = self.state.lock().unwrap();
        let id = manifest.id.clone();
        state.plugins.retain(|p| p.id() != id);
        state
            .plugins
            .push(DiscoveredPlugin::new(manifest, PathBuf::from("/plugins").join(&id)));
        state
            .modules
            .insert(id, Some(Arc::new(move || module.build())));
    }

    /// Puts `spec` into directory `dir`, replacing whatever was there, even
    /// when the manifest id differs from the directory name.
    pub fn install_in_dir(&self, dir: &str, spec: &PluginSpec) {
        let mut state = self.state.lock().unwrap();
        state.plugins.retain(|p| p.dir_name() != Some(dir));
        state.plugins.push(DiscoveredPlugin::new(
            spec.manifest.clone(),
            PathBuf::from("/plugins").join(dir),
        ));
        let module = spec.clone();
        state
            .modules
            .insert(spec.manifest.id.clone(), Some(Arc::new(move || module.build())));
    }

    /// Replaces the module of an installed plugin, as a rebuild would.
    pub fn replace_module(&self, plugin_id: &str, module: PluginSpec) {
        self.state
            .lock()
            .unwrap()
            .modules
            .insert(plugin_id.to_string(), Some(Arc::new(move || module.build())));
    }

    /// Makes the plugin's module fail to load.
    pub fn break_module(&self, plugin_id: &str) {
        self.state
            .lock()
            .unwrap()
            .modules
            .insert(plugin_id.to_string(), None);
    }

    pub fn remove(&self, plugin_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.plugins.retain(|p| p.id() != plugin_id);
        state.modules.remove(plugin_id);
    }

    /// `(plugin_id, generation)` for every load attempt.
    pub fn loads(&self) -> Vec<(String, u64)> {
        self.state.lock().unwrap().loads.clone()
    }

    pub fn load_count(&self, plugin_id: &str) -> usize {
        self.loads().iter().filter(|(id, _)| id == plugin_id).count()
    }

    /// Sends a change event through the watcher handed to the runtime.
    pub fn emit(&self, plugin_id: &str) -> bool {
        match &self.state.lock().unwrap().watch_sender {
            Some(tx) => tx.send(PluginChanged::new(plugin_id)).is_ok(),
            None => false,
        }
    }

    pub fn host(&self) -> Box<dyn PluginHost> {
        Box::new(FakeHost { disk: self.clone() })
    }

    pub fn loader(&self) -> Box<dyn ModuleLoader> {
        Box::new(FakeLoader { disk: self.clone() })
    }
}

pub struct FakeHost {
    disk: FakeDisk,
}

impl PluginHost for FakeHost {
    fn plugins_dir(&self) -> PathBuf {
        PathBuf::from("/plugins")
    }

    fn discover(&self) -> PluginHostResult<Vec<DiscoveredPlugin>> {
        Ok(self.disk.state.lock().unwrap().plugins.clone())
    }

    fn watch(&self, events: mpsc::UnboundedSender<PluginChanged>) -> PluginHostResult<PluginWatcher> {
        self.disk.state.lock().unwrap().watch_sender = Some(events);
        Ok(PluginWatcher::inert())
    }
}

pub struct FakeLoader {
    disk: FakeDisk,
}

impl ModuleLoader for FakeLoader {
    fn load(&mut self, request: &ModuleRequest<'_>) -> PluginHostResult<Box<dyn Plugin>> {
        let factory = {
            let mut state = self.disk.state.lock().unwrap();
            state
                .loads
                .push((request.plugin_id.to_string(), request.generation));
            state.modules.get(request.plugin_id).cloned()
        };
        match factory {
            Some(Some(build)) => Ok(build()),
            Some(None) => Err(PluginHostError::MissingExport {
                plugin_id: request.plugin_id.to_string(),
            }),
            None => Err(PluginHostError::import(request.plugin_id, "module not found")),
        }
    }
}

// ================================================================
// Database
// ================================================================

/// Forwards to an in-memory DuckDB database and records every statement.
#[derive(Clone)]
pub struct RecordingDb {
    pub db: Database,
    statements: Arc<Mutex<Vec<String>>>,
}

impl RecordingDb {
    pub fn new() -> Self {
        Self {
            db: Database::open_in_memory().unwrap(),
            statements: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.statements.lock().unwrap().clear();
    }

    /// Statements other than ledger bookkeeping and checkpoints.
    pub fn migration_statements(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| {
                !s.contains(migrations::LEDGER_TABLE)
                    && !s.starts_with("CREATE SCHEMA IF NOT EXISTS")
                    && s != "CHECKPOINT"
            })
            .collect()
    }

    fn record(&self, sql: &str) {
        self.statements.lock().unwrap().push(sql.trim().to_string());
    }

    pub fn schema_exists(&self, schema: &str) -> bool {
        self.db
            .query_i64(
                "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = ?",
                &[SqlValue::from(schema)],
            )
            .unwrap()
            .unwrap_or(0)
            > 0
    }

    pub fn table_exists(&self, schema: &str, table: &str) -> bool {
        self.db
            .query_i64(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
                &[SqlValue::from(schema), SqlValue::from(table)],
            )
            .unwrap()
            .unwrap_or(0)
            > 0
    }
}

impl SqlExecutor for RecordingDb {
    fn execute_batch(&self, sql: &str) -> StorageResult<()> {
        self.record(sql);
        self.db.execute_batch(sql)
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> StorageResult<usize> {
        self.record(sql);
        self.db.execute(sql, params)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> StorageResult<Vec<SqlRow>> {
        self.db.query(sql, params)
    }
}

// ================================================================
// Installer
// ================================================================

/// Installs from a catalog of specs into a [`FakeDisk`], recording calls.
pub struct FakeInstaller {
    pub disk: FakeDisk,
    pub catalog: HashMap<String, PluginSpec>,
    pub calls: EventLog,
}

impl FakeInstaller {
    pub fn new(disk: &FakeDisk) -> Self {
        Self {
            disk: disk.clone(),
            catalog: HashMap::new(),
            calls: event_log(),
        }
    }

    pub fn with_release(mut self, spec: PluginSpec) -> Self {
        self.catalog.insert(spec.manifest.id.clone(), spec);
        self
    }

    fn call(&self, what: String) {
        self.calls.lock().unwrap().push(what);
    }

    fn release(&self, id: &str) -> PluginHostResult<&PluginSpec> {
        self.catalog
            .get(id)
            .ok_or_else(|| PluginHostError::Installer(format!("no release for '{id}'")))
    }
}

impl PluginInstaller for FakeInstaller {
    fn fetch_manifest(&self, source: &str) -> PluginHostResult<PluginManifest> {
        self.call(format!("fetch_manifest:{source}"));
        Ok(self.release(source)?.manifest.clone())
    }

    fn install(&self, source: &str) -> PluginHostResult<PluginManifest> {
        self.call(format!("install:{source}"));
        let spec = self.release(source)?;
        self.disk.install(spec);
        Ok(spec.manifest.clone())
    }

    fn uninstall(&self, plugin_id: &str) -> PluginHostResult<()> {
        self.call(format!("uninstall:{plugin_id}"));
        self.disk.remove(plugin_id);
        Ok(())
    }

    fn upgrade(&self, plugin_id: &str) -> PluginHostResult<PluginManifest> {
        self.call(format!("upgrade:{plugin_id}"));
        let spec = self.release(plugin_id)?;
        self.disk.install(spec);
        Ok(spec.manifest.clone())
    }

    fn check_update(&self, plugin_id: &str) -> PluginHostResult<Option<PluginUpdate>> {
        self.call(format!("check_update:{plugin_id}"));
        Ok(self.catalog.get(plugin_id).map(|spec| PluginUpdate {
            plugin_id: plugin_id.to_string(),
            current_version: "0.1.0".into(),
            latest_version: spec.manifest.version.clone(),
        }))
    }
}

// ================================================================
// Runtime
// ================================================================

pub struct Harness {
    pub runtime: PluginRuntime,
    pub disk: FakeDisk,
    pub db: RecordingDb,
    pub settings: Arc<MemorySettingsStore>,
}

/// Settings shared between the runtime and the test.
pub struct SharedSettings(pub Arc<MemorySettingsStore>);

impl SettingsStore for SharedSettings {
    fn disabled_plugins(&self) -> PluginHostResult<std::collections::HashSet<String>> {
        self.0.disabled_plugins()
    }

    fn hot_reload_enabled(&self) -> PluginHostResult<bool> {
        self.0.hot_reload_enabled()
    }
}

pub fn harness(disk: &FakeDisk, builtins: Vec<Box<dyn Plugin>>) -> Harness {
    harness_with(disk, builtins, MemorySettingsStore::new())
}

pub fn harness_with(
    disk: &FakeDisk,
    builtins: Vec<Box<dyn Plugin>>,
    settings: MemorySettingsStore,
) -> Harness {
    let db = RecordingDb::new();
    let settings = Arc::new(settings);
    let mut runtime = PluginRuntime::new(
        Arc::new(db.clone()),
        disk.host(),
        disk.loader(),
        Box::new(SharedSettings(Arc::clone(&settings))),
    );
    for plugin in builtins {
        runtime.add_builtin(plugin);
    }
    Harness {
        runtime,
        disk: disk.clone(),
        db,
        settings,
    }
}
