//! Property-based tests for the graph invariants.

use proptest::prelude::*;

use crate::Tree;

// Strategy for remap-free, variable-free trees built through the smart
// constructors. Constants stay finite so folds remain deterministic.
fn arb_tree() -> impl Strategy<Value = Tree> {
    let leaf = prop_oneof![
        Just(Tree::x()),
        Just(Tree::y()),
        Just(Tree::z()),
        (-100.0f32..100.0).prop_map(Tree::constant),
    ];
    leaf.prop_recursive(6, 48, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a + b),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a - b),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a * b),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.min(b)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.max(b)),
            inner.clone().prop_map(|a| -a),
            inner.clone().prop_map(|a| a.abs()),
            inner.prop_map(|a| a.square()),
        ]
    })
}

proptest! {
    // Construction is deterministic: the same shape interns to the same
    // records, so a second build is the same handle.
    #[test]
    fn construction_deduplicates(t in arb_tree()) {
        let rebuilt = t.unique();
        prop_assert_eq!(rebuilt, t);
    }

    #[test]
    fn size_matches_walk_length(t in arb_tree()) {
        prop_assert_eq!(t.size(), t.walk().count());
    }

    #[test]
    fn walk_is_post_order(t in arb_tree()) {
        let mut seen = std::collections::HashSet::new();
        for node in t.walk() {
            for child in node.children() {
                prop_assert!(seen.contains(&child.id()));
            }
            prop_assert!(seen.insert(node.id()));
        }
        prop_assert!(seen.contains(&t.id()));
    }

    #[test]
    fn flatten_without_remap_is_identity(t in arb_tree()) {
        prop_assert!(!t.has_remap());
        prop_assert_eq!(t.flatten(), t);
    }

    #[test]
    fn flags_match_reachable_leaves(t in arb_tree()) {
        let has_axis = t.walk().any(|n| {
            matches!(n.op(), crate::Opcode::VarX | crate::Opcode::VarY | crate::Opcode::VarZ)
        });
        prop_assert_eq!(t.has_xyz(), has_axis);
        prop_assert!(!t.has_oracle());
    }

    // Archive round-trips reconstruct the same records, since loading goes
    // through the same constructors that built the graph.
    #[test]
    fn archive_roundtrip(t in arb_tree()) {
        let mut buf = Vec::new();
        t.serialize(&mut buf).unwrap();
        let back = Tree::deserialize(buf.as_slice()).unwrap();
        prop_assert_eq!(&back, &t);
        prop_assert_eq!(back.to_string(), t.to_string());
    }

    // collect_affine preserves remap-freedom and never invents new leaf
    // kinds; its output is stable under a second collection pass.
    #[test]
    fn collect_affine_is_idempotent(t in arb_tree()) {
        let once = t.collect_affine();
        // Folded overflows make coefficients non-finite and the canonical
        // ordering meaningless; skip those inputs.
        prop_assume!(once.walk().all(|n| n.value().map_or(true, f32::is_finite)));
        let twice = once.collect_affine();
        prop_assert_eq!(twice.to_string(), once.to_string());
    }
}
