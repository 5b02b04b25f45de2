//! Property-based coverage for the id-allocation and orphan-exclusivity
//! invariants from `spec.md` §8 (I1, I2), run over randomly interleaved
//! namespace adds and removes.

use nova_registry::{
    CachePaths, Entity, ExtensionInput, ExtensionPointInput, ExtensionRegistry, NamespaceInput,
    RegistryConfig,
};
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Op {
    AddPoint { bundle_id: i64, target: u8 },
    AddExtension { bundle_id: i64, target: u8 },
    Remove { bundle_id: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..12, 0u8..4).prop_map(|(bundle_id, target)| Op::AddPoint { bundle_id, target }),
        (1i64..12, 0u8..4).prop_map(|(bundle_id, target)| Op::AddExtension { bundle_id, target }),
        (1i64..12).prop_map(|bundle_id| Op::Remove { bundle_id }),
    ]
}

fn target_unique_id(target: u8) -> String {
    format!("t.{target}")
}

fn registry() -> ExtensionRegistry {
    let dir = tempfile::tempdir().unwrap();
    let paths = CachePaths::under(dir.path());
    let mut config = RegistryConfig::default();
    config.no_registry_cache = true;
    ExtensionRegistry::start(paths, 0, config)
}

/// I1: every extension is in exactly one extension point's `raw_children` or
/// exactly one orphan list, never both, never neither.
fn check_orphan_exclusivity(reg: &ExtensionRegistry) {
    let mut linked: HashSet<nova_registry::Id> = HashSet::new();
    for point in reg.get_extension_points() {
        let Entity::ExtensionPoint(rec) = point.resolve().unwrap() else {
            panic!("expected extension point");
        };
        for child in &rec.raw_children {
            assert!(linked.insert(*child), "extension {child} linked into more than one point");
        }
    }

    for bundle_id in reg.get_namespaces() {
        for extension in reg.get_extensions(bundle_id) {
            let Entity::Extension(rec) = extension.resolve().unwrap() else {
                panic!("expected extension");
            };
            let orphaned = reg.orphans_for(rec.extension_point_identifier.as_str());
            let is_linked = linked.contains(&rec.id);
            let is_orphaned = orphaned.contains(&rec.id);
            assert_ne!(
                is_linked, is_orphaned,
                "extension {} must be linked xor orphaned (linked={is_linked}, orphaned={is_orphaned})",
                rec.id
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn orphan_exclusivity_and_monotonic_ids_hold_across_random_mutations(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let reg = registry();
        let mut live_bundles = HashSet::new();
        let mut max_id_seen: i32 = 0;

        for op in ops {
            match op {
                Op::AddPoint { bundle_id, target } => {
                    if live_bundles.contains(&bundle_id) {
                        continue;
                    }
                    let ns = NamespaceInput {
                        bundle_id,
                        unique_identifier: Some(format!("bundle.{bundle_id}").into()),
                        extension_points: vec![ExtensionPointInput {
                            unique_identifier: target_unique_id(target).into(),
                            simple_identifier: "p".into(),
                            schema_reference: None,
                            label: None,
                        }],
                        extensions: vec![],
                    };
                    if reg.add(ns).is_ok() {
                        live_bundles.insert(bundle_id);
                    }
                }
                Op::AddExtension { bundle_id, target } => {
                    if live_bundles.contains(&bundle_id) {
                        continue;
                    }
                    let ns = NamespaceInput {
                        bundle_id,
                        unique_identifier: Some(format!("bundle.{bundle_id}").into()),
                        extension_points: vec![],
                        extensions: vec![ExtensionInput {
                            simple_identifier: Some("e".into()),
                            extension_point_identifier: Some(target_unique_id(target).into()),
                            label: None,
                            children: vec![],
                        }],
                    };
                    if reg.add(ns).is_ok() {
                        live_bundles.insert(bundle_id);
                    }
                }
                Op::Remove { bundle_id } => {
                    if live_bundles.remove(&bundle_id) {
                        reg.remove(bundle_id);
                    }
                }
            }

            // I2: the highest id ever handed out never decreases; ids are
            // never reused once a bundle is removed and re-added elsewhere.
            let mut current_max = max_id_seen;
            for point in reg.get_extension_points() {
                current_max = current_max.max(point.id());
            }
            for bundle_id in reg.get_namespaces() {
                for extension in reg.get_extensions(bundle_id) {
                    current_max = current_max.max(extension.id());
                }
            }
            prop_assert!(current_max >= max_id_seen);
            max_id_seen = current_max;

            check_orphan_exclusivity(&reg);
        }
    }
}
