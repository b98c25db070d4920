use std::collections::BTreeSet;

use serde::Serialize;

use crate::{
    atom::{AnyAtom, AtomId, AtomKind},
    store::{Node, Store},
};

#[cfg(test)]
mod tests;

impl Store {
    /// Introspection views over this store's node graph.
    ///
    /// All views are snapshots; they never mutate the graph and never
    /// trigger evaluation of stale derivations.
    pub fn debug(&self) -> StoreDebug<'_> {
        StoreDebug { store: self }
    }
}

/// Read-only debug access to a [`Store`].
pub struct StoreDebug<'a> {
    store: &'a Store,
}

/// Per-node snapshot returned by [`StoreDebug::atoms`].
#[derive(Debug, Clone, Serialize)]
pub struct AtomSummary {
    pub label: String,
    pub kind: &'static str,
    pub mounted: bool,
    pub dirty: bool,
    pub cached: bool,
    pub listeners: usize,
}

/// A labeled tree, displayed with two-space indentation per level.
#[derive(Debug, Clone, Serialize)]
pub struct DebugTree {
    pub label: String,
    pub children: Vec<DebugTree>,
}

impl DebugTree {
    fn leaf(label: String) -> Self {
        DebugTree {
            label,
            children: Vec::new(),
        }
    }
    fn fmt_at(&self, f: &mut std::fmt::Formatter<'_>, depth: usize) -> std::fmt::Result {
        writeln!(f, "{:indent$}{}", "", self.label, indent = depth * 2)?;
        for child in &self.children {
            child.fmt_at(f, depth + 1)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DebugTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_at(f, 0)
    }
}

impl StoreDebug<'_> {
    /// Number of nodes currently registered, mounted or not.
    pub fn node_count(&self) -> usize {
        self.store.with_nodes(|nodes| nodes.len())
    }

    /// Snapshot of every node, ordered by atom creation.
    pub fn atoms(&self) -> Vec<AtomSummary> {
        self.store.with_nodes(|nodes| {
            let mut ids: Vec<AtomId> = nodes.keys().copied().collect();
            ids.sort();
            ids.into_iter()
                .map(|id| {
                    let n = &nodes[&id];
                    AtomSummary {
                        label: n.label(id),
                        kind: kind_str(n.kind),
                        mounted: n.mounted.is_some(),
                        dirty: n.dirty,
                        cached: n.value.is_some(),
                        listeners: n
                            .mounted
                            .as_ref()
                            .map(|m| m.listeners.len())
                            .unwrap_or(0),
                    }
                })
                .collect()
        })
    }

    /// Labels of atoms with staged, not yet delivered notifications.
    pub fn pending_listeners(&self) -> Vec<String> {
        let sources = self.store.staged_sources();
        self.store.with_nodes(|nodes| {
            sources
                .iter()
                .map(|id| {
                    nodes
                        .get(id)
                        .map(|n| n.label(*id))
                        .unwrap_or_else(|| id.anon_label())
                })
                .collect()
        })
    }

    /// One tree per listener command: the listener at the root, its
    /// subscribed atoms' dependency trees below it.
    pub fn subscription_tree(&self) -> Vec<DebugTree> {
        self.store.with_nodes(|nodes| {
            let mut ids: Vec<AtomId> = nodes.keys().copied().collect();
            ids.sort();
            // listener id -> (label, subscribed atoms in creation order)
            let mut subs: Vec<(AtomId, String, Vec<AtomId>)> = Vec::new();
            for id in ids {
                let Some(m) = nodes[&id].mounted.as_ref() else { continue };
                for listener in m.listeners.values() {
                    let lid = listener.0.id;
                    match subs.iter_mut().find(|(i, _, _)| *i == lid) {
                        Some((_, _, targets)) => targets.push(id),
                        None => subs.push((
                            lid,
                            listener
                                .debug_label()
                                .unwrap_or_else(|| lid.anon_label()),
                            vec![id],
                        )),
                    }
                }
            }
            subs.sort_by_key(|(lid, _, _)| *lid);
            subs.into_iter()
                .map(|(_, label, targets)| DebugTree {
                    label,
                    children: targets
                        .into_iter()
                        .map(|t| walk(nodes, t, Edge::Deps, &mut BTreeSet::new()))
                        .collect(),
                })
                .collect()
        })
    }

    /// The atoms `atom` reads, transitively, as recorded by the latest
    /// executions.
    pub fn dependency_tree(&self, atom: impl Into<AnyAtom>) -> DebugTree {
        self.tree_of(atom.into(), Edge::Deps)
    }

    /// The atoms that read `atom`, transitively.
    pub fn dependents_tree(&self, atom: impl Into<AnyAtom>) -> DebugTree {
        self.tree_of(atom.into(), Edge::Dependents)
    }

    fn tree_of(&self, atom: AnyAtom, edge: Edge) -> DebugTree {
        let id = atom.id();
        self.store.with_nodes(|nodes| {
            if nodes.contains_key(&id) {
                walk(nodes, id, edge, &mut BTreeSet::new())
            } else {
                DebugTree::leaf(
                    atom.debug_label().unwrap_or_else(|| id.anon_label()),
                )
            }
        })
    }
}

#[derive(Clone, Copy)]
enum Edge {
    Deps,
    Dependents,
}

fn walk(
    nodes: &std::collections::HashMap<AtomId, Node>,
    id: AtomId,
    edge: Edge,
    visited: &mut BTreeSet<AtomId>,
) -> DebugTree {
    let Some(n) = nodes.get(&id) else {
        return DebugTree::leaf(id.anon_label());
    };
    let label = n.label(id);
    if !visited.insert(id) {
        return DebugTree::leaf(format!("{label} (repeated)"));
    }
    let next: Vec<AtomId> = match edge {
        Edge::Deps => n.deps.clone(),
        Edge::Dependents => n.dependents.iter().copied().collect(),
    };
    DebugTree {
        label,
        children: next
            .into_iter()
            .map(|c| walk(nodes, c, edge, visited))
            .collect(),
    }
}

fn kind_str(kind: AtomKind) -> &'static str {
    match kind {
        AtomKind::State => "state",
        AtomKind::Computed => "computed",
        AtomKind::Command => "command",
    }
}
