//! Property-based tests for the manifest and permission model.
//!
//! - Derived schema names replace every `-` and nothing else
//! - Normalization is idempotent on its own output
//! - The direct permission shape always wins over `tables`

use proptest::prelude::*;
use treeline_plugin_sdk::{derive_schema_name, Permissions, RawPermissions, TableRef};

fn plugin_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,30}").unwrap()
}

fn table_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("*".to_string()),
        prop::string::string_regex("[a-z_]{1,12}").unwrap(),
        prop::string::string_regex("[a-z_]{1,12}\\.[a-z_]{1,12}").unwrap(),
    ]
}

fn tables_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(table_strategy(), 0..8)
}

proptest! {
    #[test]
    fn schema_name_replaces_every_dash(id in plugin_id_strategy()) {
        let schema = derive_schema_name(&id);
        prop_assert!(schema.starts_with("plugin_"));
        prop_assert!(!schema.contains('-'));
        prop_assert_eq!(&schema["plugin_".len()..], id.replace('-', "_"));
    }

    #[test]
    fn normalization_is_idempotent(
        id in plugin_id_strategy(),
        read in tables_strategy(),
        write in tables_strategy(),
    ) {
        let raw = RawPermissions {
            read: Some(read),
            write: Some(write),
            ..Default::default()
        };
        let once = raw.normalize().resolved_for(&id);
        let json = serde_json::to_string(&once).unwrap();
        let twice: Permissions = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(twice.resolved_for(&id), once);
    }

    #[test]
    fn direct_read_wins_over_legacy(direct in tables_strategy(), legacy in tables_strategy()) {
        let json = serde_json::json!({
            "read": direct,
            "tables": { "read": legacy },
        });
        let perms: Permissions = serde_json::from_value(json).unwrap();
        let expected: std::collections::BTreeSet<TableRef> =
            direct.iter().map(|t| TableRef::parse(t)).collect();
        prop_assert_eq!(perms.read, expected);
    }
}
