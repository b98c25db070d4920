use crate::{command, computed, state, Store, StoreError};

#[test]
fn node_count_tracks_first_use() {
    let store = Store::new();
    let a = state(1);
    assert_eq!(store.debug().node_count(), 0);
    store.get(&a).unwrap();
    assert_eq!(store.debug().node_count(), 1);
}

#[test]
fn atoms_snapshot() {
    let store = Store::new();
    let a = state(1).named("a");
    let c = {
        let a = a.clone();
        computed(move |cx| cx.get(&a))
    }
    .named("c");
    store.get(&c).unwrap();

    let atoms = store.debug().atoms();
    assert_eq!(atoms.len(), 2);
    assert_eq!(atoms[0].label, "a");
    assert_eq!(atoms[0].kind, "state");
    assert!(!atoms[0].mounted);
    assert_eq!(atoms[1].label, "c");
    assert_eq!(atoms[1].kind, "computed");
    assert!(atoms[1].cached);
    assert!(!atoms[1].dirty);
}

#[test]
fn dependency_tree_follows_read_order() {
    let store = Store::new();
    let a = state(1).named("a");
    let b = state(2).named("b");
    let sum = {
        let (a, b) = (a.clone(), b.clone());
        computed(move |cx| Ok(cx.get(&a)? + cx.get(&b)?))
    }
    .named("sum");
    store.get(&sum).unwrap();

    let tree = store.debug().dependency_tree(&sum);
    assert_eq!(tree.label, "sum");
    assert_eq!(tree.children.len(), 2);
    assert_eq!(tree.children[0].label, "a");
    assert_eq!(tree.children[1].label, "b");
    assert_eq!(tree.to_string(), "sum\n  a\n  b\n");
}

#[test]
fn dependents_tree_is_the_reverse_view() {
    let store = Store::new();
    let a = state(1).named("a");
    let c = {
        let a = a.clone();
        computed(move |cx| cx.get(&a))
    }
    .named("c");
    store.get(&c).unwrap();

    let tree = store.debug().dependents_tree(&a);
    assert_eq!(tree.label, "a");
    assert_eq!(tree.children.len(), 1);
    assert_eq!(tree.children[0].label, "c");
}

#[test]
fn unknown_atom_yields_a_leaf() {
    let store = Store::new();
    let a = state(1).named("lonely");
    let tree = store.debug().dependency_tree(&a);
    assert_eq!(tree.label, "lonely");
    assert!(tree.children.is_empty());
}

#[test]
fn subscription_tree_roots_at_listeners() {
    let store = Store::new();
    let a = state(1).named("a");
    let c = {
        let a = a.clone();
        computed(move |cx| cx.get(&a))
    }
    .named("c");
    let l = command(|_, ()| Ok(())).named("render");
    let _s = store.sub(&c, &l);

    let roots = store.debug().subscription_tree();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].label, "render");
    assert_eq!(roots[0].children.len(), 1);
    assert_eq!(roots[0].children[0].label, "c");
    assert_eq!(roots[0].children[0].children[0].label, "a");
}

#[test]
fn subscription_tree_groups_targets_per_listener() {
    let store = Store::new();
    let a = state(1).named("a");
    let b = state(2).named("b");
    let l = command(|_, ()| Ok(()));
    let _s = store.sub_many([(&a).into(), (&b).into()], &l);

    let roots = store.debug().subscription_tree();
    assert_eq!(roots.len(), 1);
    // unnamed listeners fall back to the generated identifier
    assert!(roots[0].label.starts_with("atom#"));
    let targets: Vec<&str> = roots[0].children.iter().map(|t| t.label.as_str()).collect();
    assert_eq!(targets, ["a", "b"]);
}

#[test]
fn pending_listeners_drain_with_flush() {
    let store = Store::new();
    let a = state(0).named("a");
    let l = command(|_, ()| Ok(()));
    let _s = store.sub(&a, &l);

    // set flushes before returning, so nothing stays pending
    store.set(&a, 1).unwrap();
    assert!(store.debug().pending_listeners().is_empty());

    // a failing listener leaves the rest staged
    let bad = command(|_, ()| Err(StoreError::Unreadable));
    let _s2 = store.sub(&a, &bad);
    let good = command(|_, ()| Ok(()));
    let _s3 = store.sub(&a, &good);
    assert!(store.set(&a, 2).is_err());
    assert_eq!(store.debug().pending_listeners(), ["a"]);
}

#[test]
fn trees_serialize() {
    let store = Store::new();
    let a = state(1).named("a");
    let c = {
        let a = a.clone();
        computed(move |cx| cx.get(&a))
    }
    .named("c");
    store.get(&c).unwrap();

    let json = serde_json::to_value(store.debug().dependency_tree(&c)).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "label": "c",
            "children": [{"label": "a", "children": []}],
        })
    );
}
