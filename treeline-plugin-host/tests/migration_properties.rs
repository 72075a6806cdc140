//! Property tests for the migration ledger.

mod common;

use common::RecordingDb;
use proptest::prelude::*;
use std::collections::BTreeSet;
use treeline_plugin_host::migrations::{applied_migrations, run_migrations};
use treeline_plugin_sdk::Migration;

fn migration_set(versions: &BTreeSet<u32>) -> Vec<Migration> {
    versions
        .iter()
        .map(|v| {
            Migration::new(
                *v,
                format!("m{v}"),
                format!("CREATE TABLE plugin_prop.t{v} (x INTEGER);"),
            )
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn rerunning_is_idempotent(versions in prop::collection::btree_set(1u32..500, 1..8)) {
        let db = RecordingDb::new();
        let migrations = migration_set(&versions);
        run_migrations(&db, "prop", "plugin_prop", &migrations).unwrap();
        db.clear();

        let report = run_migrations(&db, "prop", "plugin_prop", &migrations).unwrap();
        prop_assert!(report.applied.is_empty());
        prop_assert!(db.migration_statements().is_empty());
        prop_assert_eq!(report.previous_version, *versions.iter().max().unwrap());
    }

    #[test]
    fn ledger_records_exactly_the_versions_above_previous_max(
        first in prop::collection::btree_set(1u32..100, 0..5),
        later in prop::collection::btree_set(100u32..200, 1..5),
    ) {
        let db = RecordingDb::new();
        run_migrations(&db, "prop", "plugin_prop", &migration_set(&first)).unwrap();

        let all: BTreeSet<u32> = first.union(&later).copied().collect();
        let report = run_migrations(&db, "prop", "plugin_prop", &migration_set(&all)).unwrap();
        prop_assert_eq!(report.applied, later.iter().copied().collect::<Vec<_>>());

        let recorded: Vec<u32> = applied_migrations(&db, "plugin_prop")
            .unwrap()
            .into_iter()
            .map(|(v, _)| v)
            .collect();
        prop_assert_eq!(recorded, all.into_iter().collect::<Vec<_>>());
    }
}
