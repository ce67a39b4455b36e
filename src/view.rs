//! The reactive view: a viewport-bounded, lazily materialized tree over a
//! [`Query`], kept continuously consistent with the graph through
//! subscriptions registered in [`ChangeTracker`] (§4.8).
//!
//! Ordering has exactly one source of truth: [`crate::node_store`]'s
//! per-edge `SortedTargetList`. The initial load of an expanded edge and
//! every later reactive insert/reposition both read that same list, so
//! there is no second, independently-computed ordering to drift out of
//! sync with it — the failure mode a naive lazy-loader-plus-reactive-patch
//! split invites.
//!
//! `total()` is a running accumulator rather than a recomputed count:
//! every expand/collapse/insert/delete adjusts it by the exact delta, so
//! reading it is O(1) regardless of tree size.

use std::collections::HashMap;

use crate::change_tracker::{ChangeTracker, SubscriptionId, ViewId};
use crate::compound_key::KeyField;
use crate::error::{GraphError, Result};
use crate::index_manager::{Filter, IndexManager, IndexFieldKind, SortField};
use crate::metrics::PerformanceMetrics;
use crate::node_store::{NodeId, NodeStore};
use crate::query::{EdgeSelection, Query};
use crate::schema::{EdgeId, Schema, TypeId};
use crate::value::{Direction, Value};

/// One visible row: the node it names, its depth under the view's root,
/// and its current absolute position in the flattened visible order.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: NodeId,
    pub type_id: TypeId,
    pub depth: usize,
    pub position: usize,
}

type EnterCb = Box<dyn FnMut(&Item)>;
type LeaveCb = Box<dyn FnMut(NodeId)>;
type ChangeCb = Box<dyn FnMut(&Item)>;
type MoveCb = Box<dyn FnMut(NodeId, usize, usize)>;

#[derive(Default)]
pub(crate) struct ViewCallbacks {
    pub on_enter: Option<EnterCb>,
    pub on_leave: Option<LeaveCb>,
    pub on_change: Option<ChangeCb>,
    pub on_move: Option<MoveCb>,
}

/// One materialized node in the reactive tree. Only nodes on a path from
/// the root to something currently expanded (or in the loaded viewport)
/// exist here — everything else is unloaded (§4.8's `TreeNode` states).
struct TreeNode {
    type_id: TypeId,
    depth: usize,
    /// True for a `virtual_root`'s root entry: present so its edges can be
    /// expanded, but never emitted and never counted toward `total`.
    is_virtual: bool,
    /// The edge selections available for expansion at this node — cloned
    /// down from the `Query`/`EdgeSelection` tree that produced it, so
    /// expansion never needs a path back up to the root query.
    available_edges: Vec<EdgeSelection>,
    /// Ordered child ids per expanded edge; an edge absent here is simply
    /// not expanded.
    children: HashMap<EdgeId, Vec<NodeId>>,
    expanded: HashMap<EdgeId, SubscriptionId>,
}

pub(crate) struct ViewState {
    query: Query,
    offset: usize,
    height: usize,
    total: usize,
    active: bool,
    root_is_type_level: bool,
    root_order: Vec<NodeId>,
    root_subscription: Option<SubscriptionId>,
    nodes: HashMap<NodeId, TreeNode>,
    pub(crate) callbacks: ViewCallbacks,
}

impl ViewState {
    pub(crate) fn new(query: Query, default_height: usize) -> ViewState {
        let root_is_type_level = query.root_id.is_none();
        ViewState {
            query,
            offset: 0,
            height: default_height,
            total: 0,
            active: false,
            root_is_type_level,
            root_order: Vec::new(),
            root_subscription: None,
            nodes: HashMap::new(),
            callbacks: ViewCallbacks::default(),
        }
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn height(&self) -> usize {
        self.height
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }
}

fn compare_by_sorts(a: NodeId, b: NodeId, sorts: &[SortField], store: &NodeStore) -> std::cmp::Ordering {
    for s in sorts {
        let av = store.get(a).and_then(|n| n.field(&s.field)).cloned().unwrap_or(Value::Null);
        let bv = store.get(b).and_then(|n| n.field(&s.field)).cloned().unwrap_or(Value::Null);
        let ord = s.direction.apply(av.total_cmp(&bv));
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    a.cmp(&b)
}

fn matches_filters(store: &NodeStore, id: NodeId, filters: &[Filter]) -> bool {
    let Some(node) = store.get(id) else { return false };
    filters
        .iter()
        .all(|f| node.field(&f.field).map(|v| f.op.matches(v, &f.value)).unwrap_or(false))
}

/// `type:id(/edge(:id))*`-free prefix builder: the leading equality fields
/// of a root-level index, in index order, sourced from the query's own
/// equality filters.
fn build_equality_prefix(
    indexes: &IndexManager,
    type_id: TypeId,
    index_id: usize,
    equality_prefix: usize,
    filters: &[Filter],
) -> Vec<KeyField> {
    let Some(fields) = indexes.index_fields(type_id, index_id) else {
        return Vec::new();
    };
    fields
        .iter()
        .take(equality_prefix)
        .filter_map(|field| match &field.kind {
            IndexFieldKind::Property(name) => filters
                .iter()
                .find(|f| &f.field == name)
                .map(|f| KeyField::new(f.value.clone(), field.direction)),
            IndexFieldKind::Edge(_) => None,
        })
        .collect()
}

/// Activates a view: the first load. Type-level queries scan the best
/// available index (erroring with `NoIndexCoverage` if none scores); a
/// query rooted at an explicit node seeds the tree with just that node.
/// With `immediate`, every edge selection named by the query is expanded
/// recursively right away; otherwise the caller drives expansion through
/// `expand_by_id`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn activate(
    view: &mut ViewState,
    schema: &Schema,
    store: &NodeStore,
    indexes: &IndexManager,
    tracker: &mut ChangeTracker,
    metrics: &mut PerformanceMetrics,
    view_id: ViewId,
    immediate: bool,
) -> Result<()> {
    if view.active {
        return Ok(());
    }

    match view.query.root_id {
        None => {
            let coverage = match indexes.select_index(view.query.root_type, &view.query.filters, &view.query.sorts) {
                Some(c) => c,
                None => {
                    metrics.index_scan_misses += 1;
                    return Err(GraphError::NoIndexCoverage);
                }
            };
            let prefix = build_equality_prefix(
                indexes,
                view.query.root_type,
                coverage.index_id,
                coverage.equality_prefix,
                &view.query.filters,
            );
            let mut ids = indexes.scan(view.query.root_type, &coverage, &prefix, metrics);
            ids.retain(|id| matches_filters(store, *id, &view.query.filters));

            for id in &ids {
                let type_id = store.require(*id)?.type_id;
                view.nodes.insert(
                    *id,
                    TreeNode {
                        type_id,
                        depth: 0,
                        is_virtual: false,
                        available_edges: view.query.edges.clone(),
                        children: HashMap::new(),
                        expanded: HashMap::new(),
                    },
                );
            }
            view.total = ids.len();
            view.root_order = ids;

            let sub = tracker.register_root(view_id, view.query.root_type);
            view.root_subscription = Some(sub);
        }
        Some(root_id) => {
            let type_id = store.require(root_id)?.type_id;
            view.nodes.insert(
                root_id,
                TreeNode {
                    type_id,
                    depth: 0,
                    is_virtual: view.query.virtual_root,
                    available_edges: view.query.edges.clone(),
                    children: HashMap::new(),
                    expanded: HashMap::new(),
                },
            );
            view.root_order = vec![root_id];
            view.total = if view.query.virtual_root { 0 } else { 1 };
        }
    }

    view.active = true;

    if immediate {
        expand_all(view, schema, store, indexes, tracker, metrics, view_id, None)?;
    }

    Ok(())
}

pub(crate) fn deinit(view: &mut ViewState, tracker: &mut ChangeTracker, view_id: ViewId) {
    tracker.remove_view(view_id);
    view.nodes.clear();
    view.root_order.clear();
    view.total = 0;
    view.active = false;
}

fn walk_node<F: FnMut(NodeId, &TreeNode, usize)>(nodes: &HashMap<NodeId, TreeNode>, id: NodeId, pos: &mut usize, f: &mut F) {
    let Some(node) = nodes.get(&id) else { return };
    if !node.is_virtual {
        f(id, node, *pos);
        *pos += 1;
    }
    for es in &node.available_edges {
        if let Some(children) = node.children.get(&es.edge_id) {
            for child in children {
                walk_node(nodes, *child, pos, f);
            }
        }
    }
}

fn walk_visible<F: FnMut(NodeId, &TreeNode, usize)>(view: &ViewState, mut f: F) {
    let mut pos = 0usize;
    for root_id in &view.root_order {
        walk_node(&view.nodes, *root_id, &mut pos, &mut f);
    }
}

pub(crate) fn items(view: &ViewState) -> Vec<Item> {
    let mut out = Vec::new();
    walk_visible(view, |id, node, pos| {
        if pos >= view.offset && pos < view.offset + view.height {
            out.push(Item {
                id,
                type_id: node.type_id,
                depth: node.depth,
                position: pos,
            });
        }
    });
    out
}

pub(crate) fn index_of_id(view: &ViewState, id: NodeId) -> Option<usize> {
    let mut found = None;
    walk_visible(view, |nid, _, pos| {
        if nid == id {
            found = Some(pos);
        }
    });
    found
}

pub(crate) fn scroll_to(view: &mut ViewState, pos: usize) {
    let max_offset = view.total.saturating_sub(view.height);
    view.offset = pos.min(max_offset);
}

pub(crate) fn move_viewport(view: &mut ViewState, delta: isize) {
    let new_pos = (view.offset as isize + delta).max(0) as usize;
    scroll_to(view, new_pos);
}

pub(crate) fn set_height(view: &mut ViewState, height: usize) {
    view.height = height;
}

fn in_viewport(view: &ViewState, pos: usize) -> bool {
    pos >= view.offset && pos < view.offset + view.height
}

fn emit_enters_for_new_nodes(view: &mut ViewState, new_ids: &[NodeId]) {
    let mut positions = HashMap::new();
    walk_visible(view, |id, _, pos| {
        if new_ids.contains(&id) {
            positions.insert(id, pos);
        }
    });
    for id in new_ids {
        if let Some(&pos) = positions.get(id) {
            if in_viewport(view, pos) {
                if let Some(node) = view.nodes.get(id) {
                    let item = Item {
                        id: *id,
                        type_id: node.type_id,
                        depth: node.depth,
                        position: pos,
                    };
                    if let Some(cb) = view.callbacks.on_enter.as_mut() {
                        cb(&item);
                    }
                }
            }
        }
    }
}

fn emit_move_delta(view: &mut ViewState, id: NodeId, old_abs: Option<usize>, new_abs: Option<usize>) {
    let old_in = old_abs.map(|p| in_viewport(view, p)).unwrap_or(false);
    let new_in = new_abs.map(|p| in_viewport(view, p)).unwrap_or(false);
    match (old_in, new_in) {
        (true, true) => {
            if old_abs != new_abs {
                if let Some(cb) = view.callbacks.on_move.as_mut() {
                    cb(id, old_abs.unwrap(), new_abs.unwrap());
                }
            } else if let Some(node) = view.nodes.get(&id) {
                let item = Item {
                    id,
                    type_id: node.type_id,
                    depth: node.depth,
                    position: new_abs.unwrap(),
                };
                if let Some(cb) = view.callbacks.on_change.as_mut() {
                    cb(&item);
                }
            }
        }
        (false, true) => {
            if let Some(node) = view.nodes.get(&id) {
                let item = Item {
                    id,
                    type_id: node.type_id,
                    depth: node.depth,
                    position: new_abs.unwrap(),
                };
                if let Some(cb) = view.callbacks.on_enter.as_mut() {
                    cb(&item);
                }
            }
        }
        (true, false) => {
            if let Some(cb) = view.callbacks.on_leave.as_mut() {
                cb(id);
            }
        }
        (false, false) => {}
    }
}

/// A node already materialized somewhere in this view (root-level or
/// nested) had a property or rollup value change that doesn't affect its
/// membership or sort position — e.g. a cascaded rollup recompute.
/// Emits `on_change` if it's currently in the viewport; a no-op if the
/// node isn't part of this view at all.
pub(crate) fn notify_change(view: &mut ViewState, node_id: NodeId) {
    let Some(pos) = index_of_id(view, node_id) else { return };
    if !in_viewport(view, pos) {
        return;
    }
    if let Some(node) = view.nodes.get(&node_id) {
        let item = Item {
            id: node_id,
            type_id: node.type_id,
            depth: node.depth,
            position: pos,
        };
        if let Some(cb) = view.callbacks.on_change.as_mut() {
            cb(&item);
        }
    }
}

fn remove_subtree(view: &mut ViewState, tracker: &mut ChangeTracker, node_id: NodeId) -> usize {
    let old_pos = index_of_id(view, node_id);
    let Some(node) = view.nodes.remove(&node_id) else { return 0 };
    let mut count = if node.is_virtual { 0 } else { 1 };
    for sub_id in node.expanded.values() {
        tracker.unregister(*sub_id);
    }
    for children in node.children.into_values() {
        for child in children {
            count += remove_subtree(view, tracker, child);
        }
    }
    if let Some(pos) = old_pos {
        if in_viewport(view, pos) {
            if let Some(cb) = view.callbacks.on_leave.as_mut() {
                cb(node_id);
            }
        }
    }
    count
}

fn load_edge_children(
    schema: &Schema,
    store: &NodeStore,
    indexes: &IndexManager,
    metrics: &mut PerformanceMetrics,
    node_id: NodeId,
    es: &EdgeSelection,
) -> Result<Vec<NodeId>> {
    let node = store.require(node_id)?;
    let edge_def = schema
        .type_def(node.type_id)
        .edge_by_id(es.edge_id)
        .ok_or_else(|| GraphError::UnknownEdge(es.edge_name.clone()))?;

    let wants_natural_order = match &edge_def.sort {
        Some(s) => es.sorts.is_empty() || (es.sorts.len() == 1 && es.sorts[0].field == s.property && es.sorts[0].direction == s.direction),
        None => es.sorts.is_empty(),
    };

    let mut ids: Vec<NodeId> = if wants_natural_order {
        node.edge_targets(es.edge_id).map(|l| l.iter().collect()).unwrap_or_default()
    } else if let Some(coverage) = indexes.select_nested_index(es.target_type, edge_def.reverse_id, &es.filters, &es.sorts) {
        let prefix = vec![KeyField::edge_target(node_id, Direction::Asc)];
        indexes.scan(es.target_type, &coverage, &prefix, metrics)
    } else {
        metrics.index_scan_misses += 1;
        let mut ids: Vec<NodeId> = node.edge_targets(es.edge_id).map(|l| l.iter().collect()).unwrap_or_default();
        ids.sort_by(|a, b| compare_by_sorts(*a, *b, &es.sorts, store));
        ids
    };

    if !es.filters.is_empty() {
        ids.retain(|id| matches_filters(store, *id, &es.filters));
    }
    if let Some(limit) = es.limit {
        ids.truncate(limit);
    }
    Ok(ids)
}

/// Expands `edge_name` on `node_id`, loading its current children through
/// an index-driven scan (or, for the common "no extra sort beyond the
/// edge's own" case, directly off the store's already-ordered target
/// list) and registering a nested subscription so future link/unlink
/// events on that `(node, edge)` pair keep it live (§4.8).
#[allow(clippy::too_many_arguments)]
pub(crate) fn expand_by_id(
    view: &mut ViewState,
    schema: &Schema,
    store: &NodeStore,
    indexes: &IndexManager,
    tracker: &mut ChangeTracker,
    metrics: &mut PerformanceMetrics,
    view_id: ViewId,
    node_id: NodeId,
    edge_name: &str,
) -> Result<()> {
    let tree_node = view.nodes.get(&node_id).ok_or(GraphError::NodeNotInView(node_id.0))?;
    let es = tree_node
        .available_edges
        .iter()
        .find(|e| e.edge_name == edge_name)
        .cloned()
        .ok_or_else(|| GraphError::UnknownEdge(edge_name.to_string()))?;
    if tree_node.expanded.contains_key(&es.edge_id) {
        return Ok(());
    }
    let depth = tree_node.depth + if tree_node.is_virtual { 0 } else { 1 };

    let children_ids = load_edge_children(schema, store, indexes, metrics, node_id, &es)?;

    for child_id in &children_ids {
        let child_type = store.require(*child_id)?.type_id;
        view.nodes.entry(*child_id).or_insert_with(|| TreeNode {
            type_id: child_type,
            depth,
            is_virtual: false,
            available_edges: es.nested.clone(),
            children: HashMap::new(),
            expanded: HashMap::new(),
        });
    }

    let sub_id = tracker.register_nested(view_id, node_id, es.edge_id);
    let tree_node = view.nodes.get_mut(&node_id).expect("checked above");
    tree_node.children.insert(es.edge_id, children_ids.clone());
    tree_node.expanded.insert(es.edge_id, sub_id);

    view.total += children_ids.len();
    emit_enters_for_new_nodes(view, &children_ids);

    Ok(())
}

pub(crate) fn collapse_by_id(view: &mut ViewState, tracker: &mut ChangeTracker, node_id: NodeId, edge_name: &str) -> Result<()> {
    let tree_node = view.nodes.get(&node_id).ok_or(GraphError::NodeNotInView(node_id.0))?;
    let edge_id = tree_node
        .available_edges
        .iter()
        .find(|e| e.edge_name == edge_name)
        .map(|e| e.edge_id)
        .ok_or_else(|| GraphError::UnknownEdge(edge_name.to_string()))?;

    let Some(sub_id) = tree_node.expanded.get(&edge_id).copied() else {
        return Ok(());
    };
    tracker.unregister(sub_id);

    let children = view
        .nodes
        .get_mut(&node_id)
        .map(|n| {
            n.expanded.remove(&edge_id);
            n.children.remove(&edge_id)
        })
        .and_then(|c| c)
        .unwrap_or_default();

    let mut removed = 0usize;
    for child in children {
        removed += remove_subtree(view, tracker, child);
    }
    view.total = view.total.saturating_sub(removed);
    Ok(())
}

pub(crate) fn is_expanded_by_id(view: &ViewState, node_id: NodeId, edge_name: &str) -> bool {
    let Some(tree_node) = view.nodes.get(&node_id) else { return false };
    tree_node
        .available_edges
        .iter()
        .find(|e| e.edge_name == edge_name)
        .map(|e| tree_node.expanded.contains_key(&e.edge_id))
        .unwrap_or(false)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn toggle_by_id(
    view: &mut ViewState,
    schema: &Schema,
    store: &NodeStore,
    indexes: &IndexManager,
    tracker: &mut ChangeTracker,
    metrics: &mut PerformanceMetrics,
    view_id: ViewId,
    node_id: NodeId,
    edge_name: &str,
) -> Result<()> {
    if is_expanded_by_id(view, node_id, edge_name) {
        collapse_by_id(view, tracker, node_id, edge_name)
    } else {
        expand_by_id(view, schema, store, indexes, tracker, metrics, view_id, node_id, edge_name)
    }
}

#[allow(clippy::too_many_arguments)]
fn expand_recursive(
    view: &mut ViewState,
    schema: &Schema,
    store: &NodeStore,
    indexes: &IndexManager,
    tracker: &mut ChangeTracker,
    metrics: &mut PerformanceMetrics,
    view_id: ViewId,
    node_id: NodeId,
    depth: usize,
    max_depth: Option<usize>,
) -> Result<()> {
    if let Some(max) = max_depth {
        if depth >= max {
            return Ok(());
        }
    }
    let edge_names: Vec<String> = view
        .nodes
        .get(&node_id)
        .map(|n| n.available_edges.iter().map(|e| e.edge_name.clone()).collect())
        .unwrap_or_default();
    for name in edge_names {
        expand_by_id(view, schema, store, indexes, tracker, metrics, view_id, node_id, &name)?;
    }
    let child_ids: Vec<NodeId> = view
        .nodes
        .get(&node_id)
        .map(|n| n.children.values().flatten().copied().collect())
        .unwrap_or_default();
    for child in child_ids {
        expand_recursive(view, schema, store, indexes, tracker, metrics, view_id, child, depth + 1, max_depth)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn expand_all(
    view: &mut ViewState,
    schema: &Schema,
    store: &NodeStore,
    indexes: &IndexManager,
    tracker: &mut ChangeTracker,
    metrics: &mut PerformanceMetrics,
    view_id: ViewId,
    max_depth: Option<usize>,
) -> Result<()> {
    let roots: Vec<NodeId> = view.root_order.clone();
    for root in roots {
        expand_recursive(view, schema, store, indexes, tracker, metrics, view_id, root, 0, max_depth)?;
    }
    Ok(())
}

pub(crate) fn collapse_all(view: &mut ViewState, tracker: &mut ChangeTracker) {
    let roots: Vec<NodeId> = view.root_order.clone();
    for root in roots {
        let edges: Vec<EdgeId> = view.nodes.get(&root).map(|n| n.expanded.keys().copied().collect()).unwrap_or_default();
        for edge in edges {
            if let Some(sub) = view.nodes.get(&root).and_then(|n| n.expanded.get(&edge).copied()) {
                tracker.unregister(sub);
            }
            let children = view
                .nodes
                .get_mut(&root)
                .map(|n| {
                    n.expanded.remove(&edge);
                    n.children.remove(&edge)
                })
                .and_then(|c| c)
                .unwrap_or_default();
            for child in children {
                let removed = remove_subtree(view, tracker, child);
                view.total = view.total.saturating_sub(removed);
            }
        }
    }
}

/// A node of this view's root type was inserted into the graph. Relevant
/// only to type-level (non-rooted) queries.
pub(crate) fn handle_root_insert(view: &mut ViewState, store: &NodeStore, node_id: NodeId) {
    if !view.root_is_type_level {
        return;
    }
    let Some(node) = store.get(node_id) else { return };
    if node.type_id != view.query.root_type {
        return;
    }
    if !matches_filters(store, node_id, &view.query.filters) {
        return;
    }
    let pos = view
        .root_order
        .binary_search_by(|other| compare_by_sorts(*other, node_id, &view.query.sorts, store))
        .unwrap_or_else(|e| e);
    view.root_order.insert(pos, node_id);
    view.nodes.entry(node_id).or_insert_with(|| TreeNode {
        type_id: node.type_id,
        depth: 0,
        is_virtual: false,
        available_edges: view.query.edges.clone(),
        children: HashMap::new(),
        expanded: HashMap::new(),
    });
    view.total += 1;
    emit_enters_for_new_nodes(view, &[node_id]);
}

/// A property changed on a node that may be a root-level member of a
/// type-level query: re-evaluates membership and, if the node stays a
/// member, its sorted position.
pub(crate) fn handle_root_update(view: &mut ViewState, store: &NodeStore, tracker: &mut ChangeTracker, node_id: NodeId) {
    if !view.root_is_type_level {
        return;
    }
    let Some(node) = store.get(node_id) else { return };
    if node.type_id != view.query.root_type {
        return;
    }
    let now_matches = matches_filters(store, node_id, &view.query.filters);
    let was_member = view.root_order.contains(&node_id);

    match (was_member, now_matches) {
        (false, true) => handle_root_insert(view, store, node_id),
        (true, false) => {
            if let Some(pos) = view.root_order.iter().position(|id| *id == node_id) {
                view.root_order.remove(pos);
            }
            let removed = remove_subtree(view, tracker, node_id);
            view.total = view.total.saturating_sub(removed);
        }
        (true, true) => {
            let old_abs = index_of_id(view, node_id);
            if let Some(pos) = view.root_order.iter().position(|id| *id == node_id) {
                view.root_order.remove(pos);
            }
            let new_pos = view
                .root_order
                .binary_search_by(|other| compare_by_sorts(*other, node_id, &view.query.sorts, store))
                .unwrap_or_else(|e| e);
            view.root_order.insert(new_pos, node_id);
            let new_abs = index_of_id(view, node_id);
            emit_move_delta(view, node_id, old_abs, new_abs);
        }
        (false, false) => {}
    }
}

/// A node was deleted from the graph: drops it (and any materialized
/// subtree under it) from every place in this view it appears, top-level
/// or nested. Safe to call for a node this view never saw.
pub(crate) fn handle_delete_anywhere(view: &mut ViewState, tracker: &mut ChangeTracker, node_id: NodeId) {
    if view.root_is_type_level {
        if let Some(pos) = view.root_order.iter().position(|id| *id == node_id) {
            view.root_order.remove(pos);
        }
    }
    if view.nodes.contains_key(&node_id) {
        let removed = remove_subtree(view, tracker, node_id);
        view.total = view.total.saturating_sub(removed);
    }
}

/// `target` was linked onto `source`'s `edge`. Only observable to a view
/// that currently has `(source, edge)` expanded — e.g. linking a new
/// child onto some *other* node's edge of the same name never touches a
/// subscription scoped to `source` (§4.8's virtual-root scenario: linking
/// onto the root's own target from a different source doesn't leak in).
pub(crate) fn handle_nested_link(view: &mut ViewState, schema: &Schema, store: &NodeStore, source: NodeId, edge: EdgeId, target: NodeId) {
    let Some(tree_node) = view.nodes.get(&source) else { return };
    if !tree_node.expanded.contains_key(&edge) {
        return;
    }
    let Some(es) = tree_node.available_edges.iter().find(|e| e.edge_id == edge).cloned() else {
        return;
    };
    if !matches_filters(store, target, &es.filters) {
        return;
    }
    if tree_node.children.get(&edge).map(|c| c.contains(&target)).unwrap_or(false) {
        return;
    }
    let Some(target_node) = store.get(target) else { return };

    let edge_def = schema.type_def(tree_node.type_id).edge_by_id(edge);
    let natural = edge_def.map(|e| e.sort.is_some()).unwrap_or(false) && es.sorts.is_empty();
    let depth = tree_node.depth + if tree_node.is_virtual { 0 } else { 1 };

    let insert_pos = {
        let children = view.nodes.get(&source).and_then(|n| n.children.get(&edge));
        let len = children.map(Vec::len).unwrap_or(0);
        if natural {
            store
                .get(source)
                .and_then(|n| n.edge_targets(edge))
                .and_then(|l| l.position_of(target))
                .unwrap_or(len)
                .min(len)
        } else {
            children
                .map(|c| c.binary_search_by(|other| compare_by_sorts(*other, target, &es.sorts, store)).unwrap_or_else(|e| e))
                .unwrap_or(0)
        }
    };

    view.nodes
        .get_mut(&source)
        .expect("checked above")
        .children
        .entry(edge)
        .or_default()
        .insert(insert_pos, target);

    view.nodes.entry(target).or_insert_with(|| TreeNode {
        type_id: target_node.type_id,
        depth,
        is_virtual: false,
        available_edges: es.nested.clone(),
        children: HashMap::new(),
        expanded: HashMap::new(),
    });
    view.total += 1;
    emit_enters_for_new_nodes(view, &[target]);
}

pub(crate) fn handle_nested_unlink(view: &mut ViewState, tracker: &mut ChangeTracker, source: NodeId, edge: EdgeId, target: NodeId) {
    let Some(tree_node) = view.nodes.get_mut(&source) else { return };
    if !tree_node.expanded.contains_key(&edge) {
        return;
    }
    let Some(children) = tree_node.children.get_mut(&edge) else { return };
    let Some(pos) = children.iter().position(|id| *id == target) else { return };
    children.remove(pos);
    let removed = remove_subtree(view, tracker, target);
    view.total = view.total.saturating_sub(removed);
}

/// `target`'s position changed within `source`'s `edge` (its sort
/// property was updated). Re-derives the child order straight from the
/// store's `SortedTargetList` — the same source [`load_edge_children`]
/// and [`handle_nested_link`] read from — so there is never a second,
/// independently maintained ordering to fall out of step with it.
pub(crate) fn handle_edge_reposition(view: &mut ViewState, store: &NodeStore, source: NodeId, edge: EdgeId, target: NodeId) {
    let Some(tree_node) = view.nodes.get(&source) else { return };
    if !tree_node.expanded.contains_key(&edge) {
        return;
    }
    let old_abs = index_of_id(view, target);
    let Some(fresh_order) = store.get(source).and_then(|n| n.edge_targets(edge)).map(|l| l.iter().collect::<Vec<_>>()) else {
        return;
    };
    let current: std::collections::HashSet<NodeId> = tree_node.children.get(&edge).cloned().unwrap_or_default().into_iter().collect();
    let new_children: Vec<NodeId> = fresh_order.into_iter().filter(|id| current.contains(id)).collect();
    view.nodes.get_mut(&source).expect("checked above").children.insert(edge, new_children);
    let new_abs = index_of_id(view, target);
    emit_move_delta(view, target, old_abs, new_abs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_manager::IndexManager;
    use crate::query::{RawEdgeSelection, RawQuery};
    use crate::rollup::RollupCache;
    use crate::schema::Schema;
    use crate::value::Value;

    fn schema() -> Schema {
        Schema::from_json(&serde_json::json!([
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
        ]))
        .unwrap()
    }

    struct Harness {
        schema: Schema,
        store: NodeStore,
        indexes: IndexManager,
        tracker: ChangeTracker,
        #[allow(dead_code)]
        rollups: RollupCache,
    }

    impl Harness {
        fn new() -> Self {
            let schema = schema();
            Harness {
                indexes: IndexManager::new(&schema),
                store: NodeStore::new(),
                tracker: ChangeTracker::new(),
                rollups: RollupCache::new(),
                schema,
            }
        }
    }

    #[test]
    fn root_level_reorders_on_priority_change_and_emits_move() {
        let mut h = Harness::new();
        let root_ty = h.schema.type_by_name("Root").unwrap();
        let a = h.store.insert(root_ty);
        let b = h.store.insert(root_ty);
        h.store.set_property(a, "priority", Value::Int(1)).unwrap();
        h.store.set_property(b, "priority", Value::Int(2)).unwrap();
        h.indexes.on_insert(h.store.get(a).unwrap());
        h.indexes.on_insert(h.store.get(b).unwrap());

        let raw = RawQuery::root("Root").sort_by("priority", Direction::Asc);
        let query = Query::validate(raw, &h.schema).unwrap();
        let mut view = ViewState::new(query, 10);
        let view_id = ViewId(1);
        activate(&mut view, &h.schema, &h.store, &h.indexes, &mut h.tracker, view_id, false).unwrap();
        assert_eq!(view.root_order, vec![a, b]);

        let moved = std::rc::Rc::new(std::cell::RefCell::new(None));
        let moved2 = moved.clone();
        view.callbacks.on_move = Some(Box::new(move |id, from, to| {
            *moved2.borrow_mut() = Some((id, from, to));
        }));

        h.store.set_property(a, "priority", Value::Int(5)).unwrap();
        let old_key_node = h.store.get(a).unwrap().clone();
        let mut updated = old_key_node.clone();
        updated.set_rollup_value("_unused", Value::Null);
        let _ = updated;
        handle_root_update(&mut view, &h.store, &mut h.tracker, a);

        assert_eq!(view.root_order, vec![b, a]);
        assert_eq!(*moved.borrow(), Some((a, 0, 1)));
    }

    #[test]
    fn expand_by_id_orders_children_by_edge_sort_and_reacts_to_link() {
        let mut h = Harness::new();
        let root_ty = h.schema.type_by_name("Root").unwrap();
        let item_ty = h.schema.type_by_name("Item").unwrap();
        let root = h.store.insert(root_ty);
        let c1 = h.store.insert(item_ty);
        let c2 = h.store.insert(item_ty);
        h.store.set_property(c1, "priority", Value::Int(10)).unwrap();
        h.store.set_property(c2, "priority", Value::Int(5)).unwrap();
        let edge = h.schema.type_def(root_ty).edge_by_name("children").unwrap();
        let sort = (edge.sort.as_ref().unwrap().property.clone(), edge.sort.as_ref().unwrap().direction);
        h.store.link(root, edge.id, Some(&sort), c1).unwrap();
        h.store.link(root, edge.id, Some(&sort), c2).unwrap();

        let raw = RawQuery::root("Root").with_id(root.0).with_edge(RawEdgeSelection::named("children"));
        let query = Query::validate(raw, &h.schema).unwrap();
        let mut view = ViewState::new(query, 10);
        let view_id = ViewId(2);
        activate(&mut view, &h.schema, &h.store, &h.indexes, &mut h.tracker, view_id, false).unwrap();
        expand_by_id(&mut view, &h.schema, &h.store, &h.indexes, &mut h.tracker, view_id, root, "children").unwrap();

        let rows = items(&view);
        assert_eq!(rows.iter().map(|i| i.id).collect::<Vec<_>>(), vec![root, c2, c1]);
        assert_eq!(view.total(), 3);

        let c3 = h.store.insert(item_ty);
        h.store.set_property(c3, "priority", Value::Int(1)).unwrap();
        h.store.link(root, edge.id, Some(&sort), c3).unwrap();
        handle_nested_link(&mut view, &h.schema, &h.store, root, edge.id, c3);

        let rows = items(&view);
        assert_eq!(rows.iter().map(|i| i.id).collect::<Vec<_>>(), vec![root, c3, c2, c1]);
        assert_eq!(view.total(), 4);
    }

    #[test]
    fn virtual_root_does_not_leak_unrelated_links_on_same_edge() {
        let mut h = Harness::new();
        let item_ty = h.schema.type_by_name("Item").unwrap();
        let root_ty = h.schema.type_by_name("Root").unwrap();
        let p = h.store.insert(root_ty);
        let child1 = h.store.insert(item_ty);
        let edge_children = h.schema.type_def(root_ty).edge_by_name("children").unwrap();
        let reverse = h.schema.type_def(item_ty).edge_by_name("_parent").unwrap();
        h.store.link(p, edge_children.id, None, child1).unwrap();
        h.store.link(child1, reverse.id, None, p).unwrap();

        let raw = RawQuery::root("Item").virtual_at(child1.0).with_edge(RawEdgeSelection::named("_parent"));
        let query = Query::validate(raw, &h.schema).unwrap();
        let mut view = ViewState::new(query, 10);
        let view_id = ViewId(3);
        activate(&mut view, &h.schema, &h.store, &h.indexes, &mut h.tracker, view_id, false).unwrap();
        expand_by_id(&mut view, &h.schema, &h.store, &h.indexes, &mut h.tracker, view_id, child1, "_parent").unwrap();
        assert_eq!(view.total(), 1);

        let child2 = h.store.insert(item_ty);
        h.store.link(p, edge_children.id, None, child2).unwrap();
        h.store.link(child2, reverse.id, None, p).unwrap();
        // child2 links onto its own "_parent" edge, not child1's — must not
        // be observed by a subscription scoped to (child1, "_parent").
        handle_nested_link(&mut view, &h.schema, &h.store, child2, reverse.id, p);

        assert_eq!(view.total(), 1);
    }
}
