//! The public facade: [`Graph`] owns every layer (schema, node store,
//! index manager, rollup cache, change tracker, watch registry) behind one
//! `Rc<RefCell<_>>`, and [`View`] is a lightweight handle into it. Both
//! share the same state cell rather than each owning a copy, since a view
//! must observe mutations the `Graph` handle performs and vice versa —
//! this crate runs single-threaded and cooperative, so `Rc<RefCell<_>>`
//! is the right tool, not `Arc<Mutex<_>>` (§9 "treat the graph as an
//! arena").
//!
//! Every mutation follows one order (§5): indexes updated first, then
//! tracker/view dispatch for the direct edit, then rollup recomputation
//! and its cascaded dispatch. Deleting a node additionally synthesizes
//! unlink events for every edge pointing *into* it before removal (§4.7) —
//! its own outgoing edges are simply gone, with no separate event.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::change_tracker::{ChangeTracker, ViewId};
use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::index_manager::IndexManager;
use crate::metrics::PerformanceMetrics;
use crate::node_store::{Node, NodeId, NodeStore};
use crate::query::Query;
use crate::rollup::RollupCache;
use crate::schema::{Schema, TypeId};
use crate::value::Value;
use crate::verify::VerifyReport;
use crate::view::{self, Item, ViewState};
use crate::watch::{NodeWatch, WatchRegistry};

struct GraphState {
    schema: Schema,
    store: NodeStore,
    indexes: IndexManager,
    rollups: RollupCache,
    tracker: ChangeTracker,
    watches: WatchRegistry,
    config: GraphConfig,
    metrics: PerformanceMetrics,
    views: HashMap<ViewId, ViewState>,
    next_view_id: u64,
}

impl GraphState {
    fn notify_change_everywhere(&mut self, node_id: NodeId) {
        self.notify_change_except(node_id, &[]);
    }

    /// Same as [`Self::notify_change_everywhere`], skipping views already
    /// given a chance to emit their own (possibly position-changing)
    /// event for this node — avoids a duplicate `on_change` right after
    /// `handle_root_update` already emitted one.
    fn notify_change_except(&mut self, node_id: NodeId, already_handled: &[ViewId]) {
        let view_ids: Vec<ViewId> = self.views.keys().copied().collect();
        for vid in view_ids {
            if already_handled.contains(&vid) {
                continue;
            }
            if let Some(v) = self.views.get_mut(&vid) {
                view::notify_change(v, node_id);
                self.metrics.view_dispatches += 1;
            }
        }
    }

    /// `field` changed on `node_id`: reorders any already-loaded nested
    /// edge list it's a member of whose declared sort reads that field,
    /// and tells whichever view has that `(parent, edge)` expanded.
    fn reposition_in_parent_edges(&mut self, node_id: NodeId, field: &str, new_value: Value) {
        let refs = self.rollups.inverted().sources_of(node_id).to_vec();
        for r in refs {
            let source_type_def = self.schema.type_def(r.source_type);
            let Some(edge_def) = source_type_def.edge_by_id(r.edge) else {
                continue;
            };
            let Some(sort) = &edge_def.sort else { continue };
            if sort.property != field {
                continue;
            }
            if self
                .store
                .reposition_edge_target(r.source, r.edge, node_id, new_value.clone())
                .is_none()
            {
                continue;
            }
            if let Some(view_id) = self.tracker.view_for_nested(r.source, r.edge) {
                if let Some(v) = self.views.get_mut(&view_id) {
                    view::handle_edge_reposition(v, &self.store, r.source, r.edge, node_id);
                    self.metrics.view_dispatches += 1;
                }
            }
        }
    }

    /// Recomputes every rollup whose cascade touches `field` on `node_id`,
    /// then fires `on_change` in every view that currently shows an
    /// affected node. The recompute and the notification walk the same
    /// dependency edges but are kept separate: rollup.rs owns correctness
    /// of the cached values, this owns telling views about it.
    fn cascade_and_notify(&mut self, node_id: NodeId, field: &str) -> Result<()> {
        self.rollups.recompute_traverse_deps(
            node_id,
            field,
            &self.schema,
            &mut self.store,
            &self.indexes,
            &mut self.metrics,
        )?;
        self.metrics.rollup_cascades += 1;
        self.notify_cascade_at(node_id, field, 0);
        Ok(())
    }

    fn notify_cascade_at(&mut self, target: NodeId, field: &str, depth: usize) {
        if depth >= self.config.max_rollup_cascade_depth {
            return;
        }
        let refs = self.rollups.inverted().sources_of(target).to_vec();
        let mut affected: Vec<(NodeId, String)> = Vec::new();
        for r in &refs {
            let source_type_def = self.schema.type_def(r.source_type);
            for rollup in &source_type_def.rollups {
                let reads_field = match &rollup.kind {
                    crate::schema::RollupKind::Traverse { edge, property } => *edge == r.edge && property == field,
                    crate::schema::RollupKind::First { edge, sort_field, .. }
                    | crate::schema::RollupKind::Last { edge, sort_field, .. } => *edge == r.edge && sort_field == field,
                    crate::schema::RollupKind::Count { .. } => false,
                };
                if reads_field {
                    affected.push((r.source, rollup.name.clone()));
                }
            }
        }
        for (source, rollup_name) in affected {
            self.notify_change_everywhere(source);
            self.notify_cascade_at(source, &rollup_name, depth + 1);
        }
    }
}

/// The embedded graph database handle (§6). Cheap to clone: clones share
/// the same underlying state, the way a `Rc` handle is meant to.
#[derive(Clone)]
pub struct Graph {
    state: Rc<RefCell<GraphState>>,
}

impl Graph {
    /// Loads a schema from its JSON wire form and opens an empty graph
    /// over it, using the default (balanced) configuration.
    pub fn open(schema_json: &serde_json::Value) -> Result<Graph> {
        Graph::open_with_config(schema_json, GraphConfig::default())
    }

    pub fn open_with_config(schema_json: &serde_json::Value, config: GraphConfig) -> Result<Graph> {
        let schema = Schema::from_json(schema_json)?;
        let indexes = IndexManager::with_fanout(&schema, config.btree_min_fanout);
        let state = GraphState {
            schema,
            store: NodeStore::new(),
            indexes,
            rollups: RollupCache::new(),
            tracker: ChangeTracker::new(),
            watches: WatchRegistry::new(),
            config,
            metrics: PerformanceMetrics::new(),
            views: HashMap::new(),
            next_view_id: 0,
        };
        Ok(Graph { state: Rc::new(RefCell::new(state)) })
    }

    /// Inserts a new node of `type_name` with the given initial
    /// properties and returns its id. Indexes are seeded before any view
    /// dispatch so a freshly inserted node that matches a type-level
    /// view's filters is visible to that view's very first `on_enter`.
    pub fn insert(&self, type_name: &str, properties: &[(&str, Value)]) -> Result<NodeId> {
        let mut s = self.state.borrow_mut();
        let type_id = s
            .schema
            .type_by_name(type_name)
            .ok_or_else(|| GraphError::UnknownType(type_name.to_string()))?;
        let id = s.store.insert(type_id);
        for (name, value) in properties {
            s.store.set_property(id, name, value.clone())?;
        }
        let node = s.store.require(id)?.clone();
        s.indexes.on_insert(&node);
        s.rollups.initialize_rollups(id, &s.schema, &mut s.store, &s.indexes, &mut s.metrics);

        let view_ids = s.tracker.views_for_type(type_id);
        for view_id in view_ids {
            if let Some(v) = s.views.get_mut(&view_id) {
                view::handle_root_insert(v, &s.store, id);
                s.metrics.view_dispatches += 1;
            }
        }
        debug!(node = id.0, type_id = type_id.0, "inserted node");
        Ok(id)
    }

    /// Sets one property, re-encodes affected indexes, repositions any
    /// already-loaded nested edge list sorted by this property, and
    /// cascades rollup recomputation to every dependent (§4.5, §5).
    pub fn set_property(&self, id: NodeId, name: &str, value: Value) -> Result<()> {
        let mut s = self.state.borrow_mut();
        let old_node = s.store.require(id)?.clone();
        s.store.set_property(id, name, value.clone())?;
        let new_node = s.store.require(id)?.clone();
        s.indexes.reencode(&new_node, &old_node);

        let type_id = new_node.type_id;
        let view_ids = s.tracker.views_for_type(type_id);
        for view_id in &view_ids {
            if let Some(v) = s.views.get_mut(view_id) {
                view::handle_root_update(v, &s.store, &mut s.tracker, id);
                s.metrics.view_dispatches += 1;
            }
        }
        s.notify_change_except(id, &view_ids);
        s.watches.notify_update(&new_node);

        s.reposition_in_parent_edges(id, name, value);
        s.cascade_and_notify(id, name)?;
        Ok(())
    }

    /// Links `target` onto `source`'s `edge_name`, updating `target`'s
    /// reverse edge, re-encoding any edge-prefixed index on `target`'s
    /// type, and notifying a view with `(source, edge)` expanded (§4.3,
    /// §4.8).
    pub fn link(&self, source: NodeId, edge_name: &str, target: NodeId) -> Result<()> {
        let mut s = self.state.borrow_mut();
        let source_type = s.store.require(source)?.type_id;
        let edge_def = s
            .schema
            .type_def(source_type)
            .edge_by_name(edge_name)
            .ok_or_else(|| GraphError::UnknownEdge(edge_name.to_string()))?
            .clone();

        let sort = edge_def.sort.as_ref().map(|s| (s.property.clone(), s.direction));
        s.store.link(source, edge_def.id, sort.as_ref(), target)?;

        let target_old = s.store.require(target)?.clone();
        s.store.link(target, edge_def.reverse_id, None, source)?;
        let target_new = s.store.require(target)?.clone();
        s.indexes.reencode(&target_new, &target_old);

        s.rollups.on_link(source, source_type, edge_def.id, target);
        s.rollups
            .recompute_for_edge(source, edge_def.id, &s.schema, &mut s.store, &s.indexes, &mut s.metrics)?;

        if let Some(view_id) = s.tracker.view_for_nested(source, edge_def.id) {
            if let Some(v) = s.views.get_mut(&view_id) {
                view::handle_nested_link(v, &s.schema, &s.store, source, edge_def.id, target);
                s.metrics.view_dispatches += 1;
            }
        }
        // A count/traverse rollup keyed on this edge may have just moved
        // `source` within any type-level view sorted or filtered by it.
        let view_ids = s.tracker.views_for_type(source_type);
        for view_id in &view_ids {
            if let Some(v) = s.views.get_mut(view_id) {
                view::handle_root_update(v, &s.store, &mut s.tracker, source);
                s.metrics.view_dispatches += 1;
            }
        }
        s.notify_change_except(source, &view_ids);
        Ok(())
    }

    pub fn unlink(&self, source: NodeId, edge_name: &str, target: NodeId) -> Result<()> {
        let mut s = self.state.borrow_mut();
        let source_type = s.store.require(source)?.type_id;
        let edge_def = s
            .schema
            .type_def(source_type)
            .edge_by_name(edge_name)
            .ok_or_else(|| GraphError::UnknownEdge(edge_name.to_string()))?
            .clone();

        s.store.unlink(source, edge_def.id, target);
        s.store.unlink(target, edge_def.reverse_id, source);
        s.rollups.on_unlink(source, source_type, edge_def.id, target);
        s.rollups
            .recompute_for_edge(source, edge_def.id, &s.schema, &mut s.store, &s.indexes, &mut s.metrics)?;

        if let Some(view_id) = s.tracker.view_for_nested(source, edge_def.id) {
            if let Some(v) = s.views.get_mut(&view_id) {
                view::handle_nested_unlink(v, &mut s.tracker, source, edge_def.id, target);
                s.metrics.view_dispatches += 1;
            }
        }
        let view_ids = s.tracker.views_for_type(source_type);
        for view_id in &view_ids {
            if let Some(v) = s.views.get_mut(view_id) {
                view::handle_root_update(v, &s.store, &mut s.tracker, source);
                s.metrics.view_dispatches += 1;
            }
        }
        s.notify_change_except(source, &view_ids);
        Ok(())
    }

    /// Deletes a node. Every edge pointing *into* it gets a synthetic
    /// unlink dispatched first (§4.7); its own outgoing edges vanish with
    /// it with no separate event, since nothing downstream of a deleted
    /// node needs telling that its now-gone parent unlinked it.
    pub fn delete(&self, id: NodeId) -> Result<()> {
        let mut s = self.state.borrow_mut();
        let node = s.store.require(id)?.clone();

        let incoming = s.rollups.inverted().sources_of(id).to_vec();
        for r in &incoming {
            s.store.unlink(r.source, r.edge, id);
            if let Some(view_id) = s.tracker.view_for_nested(r.source, r.edge) {
                if let Some(v) = s.views.get_mut(&view_id) {
                    view::handle_nested_unlink(v, &mut s.tracker, r.source, r.edge, id);
                    s.metrics.view_dispatches += 1;
                }
            }
        }

        // Every view may have `id` materialized (as a type-level root
        // member or nested somewhere in its tree), not just ones whose
        // root type matches, so all of them get a chance to drop it.
        let all_views: Vec<ViewId> = s.views.keys().copied().collect();
        for view_id in all_views {
            if let Some(v) = s.views.get_mut(&view_id) {
                view::handle_delete_anywhere(v, &mut s.tracker, id);
                s.metrics.view_dispatches += 1;
            }
        }

        s.indexes.on_delete(&node);
        s.rollups.remove_node(id);
        s.watches.notify_delete(id);
        s.store.remove(id);
        Ok(())
    }

    /// A cloned snapshot of the node at the current graph state (§6 `get(id)`).
    pub fn get(&self, id: NodeId) -> Result<Node> {
        let s = self.state.borrow();
        Ok(s.store.require(id)?.clone())
    }

    pub fn get_property(&self, id: NodeId, name: &str) -> Result<Option<Value>> {
        let s = self.state.borrow();
        Ok(s.store.require(id)?.field(name).cloned())
    }

    pub fn get_type_name(&self, id: NodeId) -> Result<String> {
        let s = self.state.borrow();
        let type_id = s.store.require(id)?.type_id;
        Ok(s.schema.type_def(type_id).name.clone())
    }

    pub fn get_edge_targets(&self, id: NodeId, edge_name: &str) -> Result<Vec<NodeId>> {
        let s = self.state.borrow();
        let type_id = s.store.require(id)?.type_id;
        let edge_def = s
            .schema
            .type_def(type_id)
            .edge_by_name(edge_name)
            .ok_or_else(|| GraphError::UnknownEdge(edge_name.to_string()))?;
        Ok(s.store
            .require(id)?
            .edge_targets(edge_def.id)
            .map(|l| l.iter().collect())
            .unwrap_or_default())
    }

    pub fn has_edge(&self, id: NodeId, edge_name: &str, target: NodeId) -> Result<bool> {
        Ok(self.get_edge_targets(id, edge_name)?.contains(&target))
    }

    pub fn count(&self, type_name: &str) -> Result<usize> {
        let s = self.state.borrow();
        let type_id = s
            .schema
            .type_by_name(type_name)
            .ok_or_else(|| GraphError::UnknownType(type_name.to_string()))?;
        Ok(s.store.nodes_of_type(type_id).count())
    }

    pub fn watch_node(&self, id: NodeId, watch: NodeWatch) {
        self.state.borrow_mut().watches.watch(id, watch);
    }

    pub fn unwatch_node(&self, id: NodeId) {
        self.state.borrow_mut().watches.unwatch(id);
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.state.borrow().metrics.clone()
    }

    pub fn verify(&self) -> VerifyReport {
        let s = self.state.borrow();
        crate::verify::verify(&s.schema, &s.store, &s.indexes, &s.rollups)
    }

    /// Opens a reactive view over `query`. With `immediate`, every nested
    /// edge selection the query names is expanded recursively right away;
    /// otherwise the caller drives expansion through [`View::expand`].
    pub fn view(&self, query: Query, immediate: bool) -> Result<View> {
        let mut s = self.state.borrow_mut();
        let default_height = s.config.default_viewport_height;
        let mut view_state = ViewState::new(query, default_height);

        let view_id = ViewId(s.next_view_id);
        s.next_view_id += 1;

        let GraphState {
            schema,
            store,
            indexes,
            tracker,
            metrics,
            ..
        } = &mut *s;
        view::activate(&mut view_state, schema, store, indexes, tracker, metrics, view_id, immediate)?;

        s.views.insert(view_id, view_state);
        Ok(View {
            state: self.state.clone(),
            id: view_id,
        })
    }
}

/// A handle to one live, reactively maintained view (§6, §4.8). Dropping
/// it removes its subscriptions from the tracker; cloning shares the same
/// underlying view.
pub struct View {
    state: Rc<RefCell<GraphState>>,
    id: ViewId,
}

impl View {
    pub fn items(&self) -> Vec<Item> {
        let s = self.state.borrow();
        view::items(s.views.get(&self.id).expect("view handle outlives its state"))
    }

    pub fn total(&self) -> usize {
        let s = self.state.borrow();
        s.views.get(&self.id).map(view::ViewState::total).unwrap_or(0)
    }

    pub fn index_of_id(&self, id: NodeId) -> Option<usize> {
        let s = self.state.borrow();
        view::index_of_id(s.views.get(&self.id)?, id)
    }

    pub fn offset(&self) -> usize {
        let s = self.state.borrow();
        s.views.get(&self.id).map(view::ViewState::offset).unwrap_or(0)
    }

    pub fn height(&self) -> usize {
        let s = self.state.borrow();
        s.views.get(&self.id).map(view::ViewState::height).unwrap_or(0)
    }

    pub fn scroll_to(&self, pos: usize) {
        let mut s = self.state.borrow_mut();
        if let Some(v) = s.views.get_mut(&self.id) {
            view::scroll_to(v, pos);
        }
    }

    pub fn move_viewport(&self, delta: isize) {
        let mut s = self.state.borrow_mut();
        if let Some(v) = s.views.get_mut(&self.id) {
            view::move_viewport(v, delta);
        }
    }

    pub fn set_height(&self, height: usize) {
        let mut s = self.state.borrow_mut();
        if let Some(v) = s.views.get_mut(&self.id) {
            view::set_height(v, height);
        }
    }

    pub fn expand(&self, node_id: NodeId, edge_name: &str) -> Result<()> {
        let mut s = self.state.borrow_mut();
        let GraphState {
            schema,
            store,
            indexes,
            tracker,
            metrics,
            views,
            ..
        } = &mut *s;
        let v = views.get_mut(&self.id).ok_or(GraphError::NodeNotInView(node_id.0))?;
        view::expand_by_id(v, schema, store, indexes, tracker, metrics, self.id, node_id, edge_name)
    }

    pub fn collapse(&self, node_id: NodeId, edge_name: &str) -> Result<()> {
        let mut s = self.state.borrow_mut();
        let GraphState { tracker, views, .. } = &mut *s;
        let v = views.get_mut(&self.id).ok_or(GraphError::NodeNotInView(node_id.0))?;
        view::collapse_by_id(v, tracker, node_id, edge_name)
    }

    pub fn toggle(&self, node_id: NodeId, edge_name: &str) -> Result<()> {
        let mut s = self.state.borrow_mut();
        let GraphState {
            schema,
            store,
            indexes,
            tracker,
            metrics,
            views,
            ..
        } = &mut *s;
        let v = views.get_mut(&self.id).ok_or(GraphError::NodeNotInView(node_id.0))?;
        view::toggle_by_id(v, schema, store, indexes, tracker, metrics, self.id, node_id, edge_name)
    }

    pub fn is_expanded(&self, node_id: NodeId, edge_name: &str) -> bool {
        let s = self.state.borrow();
        s.views.get(&self.id).map(|v| view::is_expanded_by_id(v, node_id, edge_name)).unwrap_or(false)
    }

    pub fn expand_all(&self, max_depth: Option<usize>) -> Result<()> {
        let mut s = self.state.borrow_mut();
        let GraphState {
            schema,
            store,
            indexes,
            tracker,
            metrics,
            views,
            ..
        } = &mut *s;
        let v = views.get_mut(&self.id).ok_or(GraphError::NodeNotInView(0))?;
        view::expand_all(v, schema, store, indexes, tracker, metrics, self.id, max_depth)
    }

    pub fn collapse_all(&self) {
        let mut s = self.state.borrow_mut();
        let GraphState { tracker, views, .. } = &mut *s;
        if let Some(v) = views.get_mut(&self.id) {
            view::collapse_all(v, tracker);
        }
    }

    pub fn on_enter(&self, cb: impl FnMut(&Item) + 'static) {
        if let Some(v) = self.state.borrow_mut().views.get_mut(&self.id) {
            v.callbacks.on_enter = Some(Box::new(cb));
        }
    }

    pub fn on_leave(&self, cb: impl FnMut(NodeId) + 'static) {
        if let Some(v) = self.state.borrow_mut().views.get_mut(&self.id) {
            v.callbacks.on_leave = Some(Box::new(cb));
        }
    }

    pub fn on_change(&self, cb: impl FnMut(&Item) + 'static) {
        if let Some(v) = self.state.borrow_mut().views.get_mut(&self.id) {
            v.callbacks.on_change = Some(Box::new(cb));
        }
    }

    pub fn on_move(&self, cb: impl FnMut(NodeId, usize, usize) + 'static) {
        if let Some(v) = self.state.borrow_mut().views.get_mut(&self.id) {
            v.callbacks.on_move = Some(Box::new(cb));
        }
    }
}

impl Drop for View {
    fn drop(&mut self) {
        let mut s = self.state.borrow_mut();
        if let Some(mut v) = s.views.remove(&self.id) {
            view::deinit(&mut v, &mut s.tracker, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::RawQuery;
    use crate::value::Direction;

    fn schema_json() -> serde_json::Value {
        serde_json::json!([
            {
                "name": "Root",
                "properties": [{"name": "priority", "type": "int"}],
                "edges": [
                    {"name": "children", "target": "Item", "reverse": "_parent",
                     "sort": {"property": "priority", "direction": "asc"}}
                ],
                "indexes": [{"fields": [{"kind": "property", "field": "priority", "direction": "asc"}]}]
            },
            {
                "name": "Item",
                "properties": [{"name": "priority", "type": "int"}],
                "edges": [{"name": "_parent", "target": "Root", "reverse": "children"}]
            }
        ])
    }

    #[test]
    fn insert_is_visible_to_a_root_level_view() {
        let graph = Graph::open(&schema_json()).unwrap();
        let raw = RawQuery::root("Root").sort_by("priority", Direction::Asc);
        let query = Query::validate(raw, &graph.state.borrow().schema).unwrap();
        let view = graph.view(query, false).unwrap();
        assert_eq!(view.total(), 0);

        let id = graph.insert("Root", &[("priority", Value::Int(1))]).unwrap();
        assert_eq!(view.total(), 1);
        assert_eq!(view.items()[0].id, id);
    }

    #[test]
    fn link_and_expand_shows_children_in_sorted_order() {
        let graph = Graph::open(&schema_json()).unwrap();
        let root = graph.insert("Root", &[("priority", Value::Int(1))]).unwrap();
        let c1 = graph.insert("Item", &[("priority", Value::Int(10))]).unwrap();
        let c2 = graph.insert("Item", &[("priority", Value::Int(5))]).unwrap();
        graph.link(root, "children", c1).unwrap();
        graph.link(root, "children", c2).unwrap();

        let raw = RawQuery::root("Root").with_id(root.0).with_edge(crate::query::RawEdgeSelection::named("children"));
        let query = Query::validate(raw, &graph.state.borrow().schema).unwrap();
        let view = graph.view(query, true).unwrap();

        let ids: Vec<NodeId> = view.items().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![root, c2, c1]);
    }

    #[test]
    fn delete_removes_node_and_its_incoming_links() {
        let graph = Graph::open(&schema_json()).unwrap();
        let root = graph.insert("Root", &[("priority", Value::Int(1))]).unwrap();
        let child = graph.insert("Item", &[("priority", Value::Int(1))]).unwrap();
        graph.link(root, "children", child).unwrap();

        graph.delete(child).unwrap();
        assert!(graph.get_property(child, "priority").is_err());
        assert_eq!(graph.get_edge_targets(root, "children").unwrap(), Vec::<NodeId>::new());
    }
}
