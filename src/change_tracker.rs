//! Subscription registry: the "central event bus between the store/index/
//! rollup layer and view subscriptions" (§4.7).
//!
//! This module owns only the *lookup* structures — "per-type subscription
//! lists plus per-node watches" (the per-node piece here is the nested
//! `(parent, edge)` registry, distinct from [`crate::watch::WatchRegistry`],
//! which is the separate application-level per-node watch registry §4.7
//! calls out). Dispatch — what a matching subscription actually *does* with
//! an event — lives in [`crate::view`], which owns the reactive tree state
//! a subscription's id resolves to.

use std::collections::HashMap;

use crate::node_store::NodeId;
use crate::primitives::keyed_map::KeyedMap;
use crate::schema::{EdgeId, TypeId};

/// Opaque handle to a view, assigned by [`crate::graph::Graph`] (an arena
/// index, not a pointer — §9's "treat the graph as an arena").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u64);

/// Opaque handle to one subscription (one nesting level of one view).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// What a subscription is watching: either "every node of this type"
/// (a root-level, type-scoped query) or "the targets of this edge on this
/// specific node" (a nested expansion level, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope {
    Root { type_id: TypeId },
    Nested { parent: NodeId, edge: EdgeId },
}

#[derive(Debug, Clone, Copy)]
struct SubscriptionEntry {
    id: SubscriptionId,
    view: ViewId,
    scope: SubscriptionScope,
}

/// Registers and looks up subscriptions by type (root-level) or by
/// `(parent, edge)` (nested level), and prunes a view's subscriptions
/// synchronously on drop (§5 "on view drop, the tracker's registry is
/// pruned synchronously").
#[derive(Default)]
pub struct ChangeTracker {
    next_id: u64,
    entries: HashMap<SubscriptionId, SubscriptionEntry>,
    by_type: KeyedMap<TypeId, SubscriptionId>,
    by_parent_edge: KeyedMap<(NodeId, EdgeId), SubscriptionId>,
    /// Subscriptions owned by each view, so [`Self::remove_view`] can prune
    /// every level in one pass without a linear scan of `entries`.
    by_view: KeyedMap<ViewId, SubscriptionId>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        ChangeTracker::default()
    }

    fn alloc(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn register_root(&mut self, view: ViewId, type_id: TypeId) -> SubscriptionId {
        let id = self.alloc();
        self.by_type.insert(type_id, id);
        self.by_view.insert(view, id);
        self.entries.insert(
            id,
            SubscriptionEntry {
                id,
                view,
                scope: SubscriptionScope::Root { type_id },
            },
        );
        id
    }

    pub fn register_nested(&mut self, view: ViewId, parent: NodeId, edge: EdgeId) -> SubscriptionId {
        let id = self.alloc();
        self.by_parent_edge.insert((parent, edge), id);
        self.by_view.insert(view, id);
        self.entries.insert(
            id,
            SubscriptionEntry {
                id,
                view,
                scope: SubscriptionScope::Nested { parent, edge },
            },
        );
        id
    }

    pub fn unregister(&mut self, id: SubscriptionId) {
        let Some(entry) = self.entries.remove(&id) else {
            return;
        };
        match entry.scope {
            SubscriptionScope::Root { type_id } => self.by_type.remove(&type_id, &id),
            SubscriptionScope::Nested { parent, edge } => self.by_parent_edge.remove(&(parent, edge), &id),
        }
        self.by_view.remove(&entry.view, &id);
    }

    /// Drops every subscription owned by `view` — called on view drop (§5).
    pub fn remove_view(&mut self, view: ViewId) {
        let ids = self.by_view.remove_key(&view);
        for id in ids {
            if let Some(entry) = self.entries.remove(&id) {
                match entry.scope {
                    SubscriptionScope::Root { type_id } => self.by_type.remove(&type_id, &id),
                    SubscriptionScope::Nested { parent, edge } => {
                        self.by_parent_edge.remove(&(parent, edge), &id)
                    }
                }
            }
        }
    }

    /// Every view with a live root-level subscription on `type_id`.
    pub fn views_for_type(&self, type_id: TypeId) -> Vec<ViewId> {
        self.by_type
            .get(&type_id)
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| e.view))
            .collect()
    }

    /// The view (if any) with a live nested subscription on `(parent, edge)`.
    pub fn view_for_nested(&self, parent: NodeId, edge: EdgeId) -> Option<ViewId> {
        self.by_parent_edge
            .get(&(parent, edge))
            .first()
            .and_then(|id| self.entries.get(id).map(|e| e.view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_registration_is_found_by_type() {
        let mut tracker = ChangeTracker::new();
        let view = ViewId(1);
        tracker.register_root(view, TypeId(0));
        assert_eq!(tracker.views_for_type(TypeId(0)), vec![view]);
        assert!(tracker.views_for_type(TypeId(1)).is_empty());
    }

    #[test]
    fn nested_registration_is_scoped_to_parent_and_edge() {
        let mut tracker = ChangeTracker::new();
        let view = ViewId(7);
        tracker.register_nested(view, NodeId(3), EdgeId(0));
        assert_eq!(tracker.view_for_nested(NodeId(3), EdgeId(0)), Some(view));
        assert_eq!(tracker.view_for_nested(NodeId(3), EdgeId(1)), None);
        assert_eq!(tracker.view_for_nested(NodeId(4), EdgeId(0)), None);
    }

    #[test]
    fn remove_view_prunes_every_subscription_it_owns() {
        let mut tracker = ChangeTracker::new();
        let view = ViewId(1);
        tracker.register_root(view, TypeId(0));
        tracker.register_nested(view, NodeId(3), EdgeId(0));
        tracker.remove_view(view);
        assert!(tracker.views_for_type(TypeId(0)).is_empty());
        assert_eq!(tracker.view_for_nested(NodeId(3), EdgeId(0)), None);
    }

    #[test]
    fn unregister_removes_a_single_subscription_only() {
        let mut tracker = ChangeTracker::new();
        let view = ViewId(1);
        let root = tracker.register_root(view, TypeId(0));
        tracker.register_nested(view, NodeId(3), EdgeId(0));
        tracker.unregister(root);
        assert!(tracker.views_for_type(TypeId(0)).is_empty());
        assert_eq!(tracker.view_for_nested(NodeId(3), EdgeId(0)), Some(view));
    }
}
