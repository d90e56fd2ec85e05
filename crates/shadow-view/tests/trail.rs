use std::collections::HashSet;

use shadow_protocol::{ChangeTrailEntry, Uuid};
use shadow_view::ComponentContext;

/// Builds a chain of `depth` levels with `fanout` children per node.
fn build(cx: &mut ComponentContext, parent: Uuid, depth: usize, fanout: usize) -> usize {
    if depth == 0 {
        return 0;
    }
    let mut created = 0;
    for _ in 0..fanout {
        let child = cx.create_component("node", Some(parent)).unwrap();
        created += 1 + build(cx, child, depth - 1, fanout);
    }
    created
}

#[test]
fn destroying_a_subtree_emits_one_entry_per_node_children_first() {
    let mut cx = ComponentContext::new();
    let root = cx.create_component("root", None).unwrap();
    let descendants = build(&mut cx, root, 3, 3);
    cx.flush();

    cx.destroy_component(root).unwrap();
    let trail = cx.flush();

    assert_eq!(trail.len(), descendants + 1);
    assert!(
        trail
            .iter()
            .all(|entry| matches!(entry, ChangeTrailEntry::DestroyEntity { .. }))
    );
    let mut seen = HashSet::new();
    for entry in &trail {
        seen.insert(entry.uuid());
    }
    assert_eq!(seen.len(), trail.len());
    assert_eq!(trail.entries().last().map(ChangeTrailEntry::uuid), Some(root));
}

#[test]
fn uuids_are_unique_across_destroy_and_create() {
    let mut cx = ComponentContext::new();
    let mut issued = HashSet::new();
    for round in 0..20 {
        let root = cx.create_component("root", None).unwrap();
        assert!(issued.insert(root), "uuid reused in round {round}");
        let child = cx.create_component("child", Some(root)).unwrap();
        assert!(issued.insert(child));
        cx.destroy_component(root).unwrap();
    }
    let trail = cx.flush();
    assert_eq!(trail.len(), 20 * 4);
}

#[test]
fn cleared_context_starts_over() {
    let mut cx = ComponentContext::new();
    let root = cx.create_component("root", None).unwrap();
    cx.create_component("child", Some(root)).unwrap();

    cx.clear();

    assert!(cx.is_empty());
    assert!(cx.flush().is_empty());
    assert!(cx.snapshot_trail().is_empty());
}
