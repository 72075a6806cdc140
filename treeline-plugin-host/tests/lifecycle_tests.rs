//! Initialization: ordering, disabling, failure isolation and identity.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use treeline_plugin_host::*;
use treeline_plugin_sdk::prelude::*;

fn init_migration(schema: &str) -> Vec<Migration> {
    vec![Migration::new(
        1,
        "init",
        format!("CREATE TABLE {schema}.items (id INTEGER);"),
    )]
}

#[test]
fn builtins_activate_before_external_plugins() {
    let log = event_log();
    let disk = FakeDisk::new();
    disk.install(&PluginSpec::new("zeta", &log).views(&["zeta"]));
    disk.install(&PluginSpec::new("alpha", &log).views(&["alpha"]));

    let mut h = harness(
        &disk,
        vec![
            PluginSpec::new("accounts", &log).views(&["accounts"]).build(),
            PluginSpec::new("transactions", &log).build(),
        ],
    );
    let report = h.runtime.initialize_plugins();

    assert_eq!(report.activated, vec!["accounts", "transactions", "zeta", "alpha"]);
    assert_eq!(
        entries(&log),
        vec![
            "activate:accounts",
            "activate:transactions",
            "activate:zeta",
            "activate:alpha"
        ]
    );
    assert_eq!(h.runtime.active_external_plugins(), vec!["alpha", "zeta"]);
    assert!(h.runtime.is_active("accounts"));
    assert_eq!(h.runtime.state("zeta"), Some(PluginLifecycleState::Activated));
}

#[test]
fn sections_and_sidebar_redirect() {
    let log = event_log();
    let disk = FakeDisk::new();
    disk.install(&PluginSpec::new("goals", &log).views(&["goals"]));
    let mut h = harness(&disk, vec![PluginSpec::new("accounts", &log).views(&["accounts"]).build()]);
    h.runtime.initialize_plugins();

    let registry = h.runtime.registry();
    let sections: Vec<_> = registry.sidebar_sections().iter().map(|s| s.id.clone()).collect();
    assert_eq!(sections, vec![CORE_SECTION, PLUGINS_SECTION]);
    let core: Vec<_> = registry.sidebar_items_in(CORE_SECTION).iter().map(|i| i.id.clone()).collect();
    let plugins: Vec<_> = registry.sidebar_items_in(PLUGINS_SECTION).iter().map(|i| i.id.clone()).collect();
    assert_eq!(core, vec!["accounts"]);
    assert_eq!(plugins, vec!["goals"]);
    assert_eq!(registry.view_owner("goals"), Some("goals"));
}

#[test]
fn plugins_section_requires_a_loaded_external_plugin() {
    let log = event_log();
    let disk = FakeDisk::new();
    disk.install(&PluginSpec::new("broken", &log));
    disk.break_module("broken");

    let mut h = harness(&disk, vec![PluginSpec::new("accounts", &log).build()]);
    let report = h.runtime.initialize_plugins();

    assert_eq!(report.failed_ids(), vec!["broken"]);
    let sections: Vec<_> = h.runtime.registry().sidebar_sections().iter().map(|s| s.id.clone()).collect();
    assert_eq!(sections, vec![CORE_SECTION]);
}

#[test]
fn disabled_plugins_are_skipped_entirely() {
    let log = event_log();
    let disk = FakeDisk::new();
    disk.install(
        &PluginSpec::new("goals", &log)
            .views(&["goals"])
            .migrations(init_migration("plugin_goals")),
    );
    let mut h = harness_with(
        &disk,
        vec![PluginSpec::new("accounts", &log).views(&["accounts"]).build()],
        MemorySettingsStore::new().with_disabled(["goals", "accounts"]),
    );

    let report = h.runtime.initialize_plugins();

    assert_eq!(report.skipped, vec!["goals", "accounts"]);
    assert!(report.activated.is_empty());
    assert_eq!(h.runtime.registry().capability_count("goals"), 0);
    assert_eq!(h.runtime.registry().capability_count("accounts"), 0);
    assert!(h.runtime.registry().get_all_plugin_permissions().is_empty());
    assert!(h.runtime.active_external_plugins().is_empty());
    assert_eq!(disk.load_count("goals"), 0);
    assert!(!h.db.schema_exists("plugin_goals"));
    assert!(entries(&log).is_empty());
}

#[test]
fn migrations_run_against_the_plugin_schema_before_activation() {
    let log = event_log();
    let disk = FakeDisk::new();
    disk.install(
        &PluginSpec::new("cash-flow", &log).migrations(init_migration("plugin_cash_flow")),
    );
    let mut h = harness(&disk, vec![]);
    h.runtime.initialize_plugins();

    assert!(h.db.table_exists("plugin_cash_flow", "items"));
    assert_eq!(
        migrations::current_version(&h.db, "plugin_cash_flow").unwrap(),
        1
    );
    assert_eq!(
        h.runtime.registry().get_plugin_permissions("cash-flow").schema_name.as_deref(),
        Some("plugin_cash_flow")
    );
}

#[test]
fn one_failing_plugin_does_not_stop_the_others() {
    let log = event_log();
    let disk = FakeDisk::new();
    disk.install(&PluginSpec::new("a-bad-migration", &log).migrations(vec![Migration::new(
        1,
        "bad",
        "CREATE TABL nope;",
    )]));
    disk.install(&PluginSpec::new("b-missing", &log));
    disk.break_module("b-missing");
    disk.install(&PluginSpec::new("c-throws", &log).views(&["c"]).failing_activate());
    disk.install(&PluginSpec::new("d-fine", &log).views(&["d"]));

    let mut h = harness(&disk, vec![]);
    let report = h.runtime.initialize_plugins();

    assert_eq!(report.activated, vec!["d-fine"]);
    assert_eq!(report.failed_ids(), vec!["b-missing", "a-bad-migration", "c-throws"]);
    assert!(h.runtime.is_active("d-fine"));
    assert!(!h.runtime.is_active("a-bad-migration"));
    assert_eq!(h.runtime.active_external_plugins(), vec!["d-fine"]);

    // the migration failure left the plugin un-activated
    assert!(!entries(&log).contains(&"activate:a-bad-migration".to_string()));
    // a throwing activate is left unregistered, its permissions remain
    assert_eq!(h.runtime.registry().capability_count("c-throws"), 0);
    assert!(h.runtime.registry().get_all_plugin_permissions().contains_key("c-throws"));
}

#[test]
fn on_disk_manifest_id_is_authoritative() {
    let log = event_log();
    let disk = FakeDisk::new();
    let on_disk = PluginManifest::new("budget", "Budget");
    let module = PluginSpec::new("budget-old", &log).views(&["budget"]);
    disk.install_with_module(on_disk, module.clone());

    let mut h = harness(&disk, vec![]);
    let report = h.runtime.initialize_plugins();

    assert_eq!(report.activated, vec!["budget"]);
    assert_eq!(entries(&log), vec!["activate:budget"]);
    assert_eq!(h.runtime.registry().view_owner("budget"), Some("budget"));
    assert_eq!(h.runtime.registry().capability_count("budget-old"), 0);
    assert!(h.runtime.registry().get_all_plugin_permissions().contains_key("budget"));
    assert_eq!(h.runtime.active_external_plugins(), vec!["budget"]);

    disk.replace_module("budget", module);
    assert_eq!(h.runtime.reload_plugin("budget"), ReloadOutcome::Reloaded);
    assert_eq!(h.runtime.registry().view_owner("budget"), Some("budget"));
    assert_eq!(h.runtime.state("budget-old"), None);
}

#[test]
fn legacy_permission_shape_is_normalized_at_registration() {
    let log = event_log();
    let disk = FakeDisk::new();
    let manifest = PluginManifest::from_json(
        r#"{"id":"net-worth","name":"Net Worth","permissions":{"tables":{"read":["accounts","plugin_goals.goals"]}}}"#,
    )
    .unwrap();
    disk.install_with_module(manifest, PluginSpec::new("net-worth", &log));

    let mut h = harness(&disk, vec![]);
    h.runtime.initialize_plugins();

    let perms = h.runtime.registry().get_plugin_permissions("net-worth");
    assert_eq!(perms.read.len(), 2);
    assert_eq!(perms.schema_name.as_deref(), Some("plugin_net_worth"));

    let scope = h.runtime.permission_scope("net-worth");
    assert!(scope.allows("accounts", TableAccess::Read));
    assert!(scope.allows("plugin_net_worth.snapshots", TableAccess::Write));
    assert!(h
        .runtime
        .check_table_access("net-worth", "accounts", TableAccess::Write)
        .is_err());
}

#[test]
fn unknown_plugins_have_empty_permissions() {
    let disk = FakeDisk::new();
    let mut h = harness(&disk, vec![]);
    h.runtime.initialize_plugins();
    assert!(h.runtime.registry().get_plugin_permissions("nobody").is_empty());
    assert!(h
        .runtime
        .check_table_access("nobody", "accounts", TableAccess::Read)
        .is_err());
}

#[test]
fn view_permissions_resolve_through_owner() {
    let log = event_log();
    let disk = FakeDisk::new();
    disk.install(&PluginSpec::new("goals", &log).views(&["goals"]).reads(&["accounts"]));
    let mut h = harness(&disk, vec![]);
    h.runtime.initialize_plugins();

    let scope = h.runtime.permission_scope_for_view("goals").unwrap();
    assert_eq!(scope.plugin_id(), "goals");
    assert!(scope.allows("accounts", TableAccess::Read));
    assert!(h.runtime.permission_scope_for_view("missing").is_none());
}

#[test]
fn hot_reload_setting_starts_watching() {
    let disk = FakeDisk::new();
    let mut h = harness_with(&disk, vec![], MemorySettingsStore::new().with_hot_reload(true));
    h.runtime.initialize_plugins();
    assert!(h.runtime.is_watching());
    assert!(disk.emit("goals"));

    let mut events = h.runtime.take_change_events().unwrap();
    assert_eq!(events.try_recv().unwrap(), PluginChanged::new("goals"));
    h.runtime.stop_watching();
    assert!(!h.runtime.is_watching());
}

#[test]
fn watching_stays_off_by_default() {
    let disk = FakeDisk::new();
    let mut h = harness(&disk, vec![]);
    h.runtime.initialize_plugins();
    assert!(!h.runtime.is_watching());
    assert!(h.runtime.take_change_events().is_none());
}
