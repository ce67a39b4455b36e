//! The node store: owns every [`Node`], assigns [`NodeId`]s, and maintains
//! each node's property map, rollup-value map, and sorted edge target
//! lists (§3, §4.3).

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{GraphError, Result};
use crate::primitives::sorted_vec::SortedVec;
use crate::schema::{EdgeId, TypeId};
use crate::value::{Direction, Value};

/// Unique node identifier, assigned by the store. Monotonically increasing
/// and never reused within a process lifetime (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// One target in a sorted edge list: the target id plus the sort-key value
/// observed at insertion/reposition time (so the comparator never has to
/// dereference the store mid-compare — see [`SortedTargetList::reposition`]).
#[derive(Debug, Clone)]
struct TargetEntry {
    target: NodeId,
    sort_value: Option<Value>,
}

fn compare_targets(a: &TargetEntry, b: &TargetEntry, direction: Option<Direction>) -> Ordering {
    match (&a.sort_value, &b.sort_value, direction) {
        (Some(av), Some(bv), Some(dir)) => dir
            .apply(av.total_cmp(bv))
            .then_with(|| a.target.cmp(&b.target)),
        _ => a.target.cmp(&b.target),
    }
}

/// A single edge's sorted target list. Ordered either by target `NodeId`
/// (the default) or by a named property on the target, ties broken by
/// `NodeId` (§3).
#[derive(Debug, Clone)]
pub struct SortedTargetList {
    sort: Option<(String, Direction)>,
    entries: SortedVec<TargetEntry>,
}

impl SortedTargetList {
    fn new_unsorted() -> Self {
        SortedTargetList {
            sort: None,
            entries: SortedVec::new(),
        }
    }

    fn new_sorted(property: String, direction: Direction) -> Self {
        SortedTargetList {
            sort: Some((property, direction)),
            entries: SortedVec::new(),
        }
    }

    pub fn sort_spec(&self) -> Option<&(String, Direction)> {
        self.sort.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, target: NodeId) -> bool {
        self.entries.as_slice().iter().any(|e| e.target == target)
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.as_slice().iter().map(|e| e.target)
    }

    pub fn position_of(&self, target: NodeId) -> Option<usize> {
        self.entries.as_slice().iter().position(|e| e.target == target)
    }

    pub fn get_at(&self, index: usize) -> Option<NodeId> {
        self.entries.as_slice().get(index).map(|e| e.target)
    }

    /// Inserts `target`; `sort_value` is the target's current value of the
    /// sort property (`None` for an unsorted / by-id list). Returns the
    /// insertion index.
    fn insert(&mut self, target: NodeId, sort_value: Option<Value>) -> usize {
        let direction = self.sort.as_ref().map(|(_, d)| *d);
        let entry = TargetEntry { target, sort_value };
        self.entries
            .insert_by(entry, |a, b| compare_targets(a, b, direction))
    }

    fn remove(&mut self, target: NodeId) -> Option<usize> {
        let idx = self.position_of(target)?;
        self.entries.remove_at(idx);
        Some(idx)
    }

    /// Repositions `target` after its sort-property value changed,
    /// returning `(old_index, new_index)` if the target was present.
    fn reposition(&mut self, target: NodeId, new_sort_value: Value) -> Option<(usize, usize)> {
        let old_idx = self.position_of(target)?;
        self.entries.remove_at(old_idx);
        let direction = self.sort.as_ref().map(|(_, d)| *d);
        let entry = TargetEntry {
            target,
            sort_value: Some(new_sort_value),
        };
        let new_idx = self
            .entries
            .insert_by(entry, |a, b| compare_targets(a, b, direction));
        Some((old_idx, new_idx))
    }
}

/// A node: its type, its property map, its rollup-value map (overrides
/// property lookup only when the name is absent from properties, §3), and
/// its per-edge sorted target lists.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub type_id: TypeId,
    properties: HashMap<String, Value>,
    rollups: HashMap<String, Value>,
    edges: HashMap<EdgeId, SortedTargetList>,
}

impl Node {
    fn new(id: NodeId, type_id: TypeId) -> Self {
        Node {
            id,
            type_id,
            properties: HashMap::new(),
            rollups: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    /// A field lookup that checks properties first, falling back to a
    /// rollup of the same name (§3: rollup values "override property
    /// lookup only when absent from properties").
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).or_else(|| self.rollups.get(name))
    }

    pub fn rollup_value(&self, name: &str) -> Option<&Value> {
        self.rollups.get(name)
    }

    pub fn set_rollup_value(&mut self, name: &str, value: Value) {
        self.rollups.insert(name.to_string(), value);
    }

    pub fn edge_targets(&self, edge: EdgeId) -> Option<&SortedTargetList> {
        self.edges.get(&edge)
    }

    pub fn has_edge_loaded(&self, edge: EdgeId) -> bool {
        self.edges.contains_key(&edge)
    }

    pub fn edge_count(&self, edge: EdgeId) -> usize {
        self.edges.get(&edge).map(SortedTargetList::len).unwrap_or(0)
    }
}

/// Owns every node in the graph, keyed by monotonically assigned
/// [`NodeId`] (§4.3).
#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
}

impl NodeStore {
    pub fn new() -> Self {
        NodeStore {
            nodes: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn insert(&mut self, type_id: TypeId) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(id, type_id));
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn require(&self, id: NodeId) -> Result<&Node> {
        self.get(id).ok_or(GraphError::NodeNotFound(id.0))
    }

    pub fn require_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.get_mut(id).ok_or(GraphError::NodeNotFound(id.0))
    }

    pub fn set_property(&mut self, id: NodeId, name: &str, value: Value) -> Result<()> {
        let node = self.require_mut(id)?;
        node.properties.insert(name.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Links `target` onto `source`'s edge list. If this is the edge's
    /// first link and it has a sort spec, the sort's property value is read
    /// from the target node to seed the first entry; every later
    /// [`Self::link`] onto that edge also reads the current target value,
    /// since the edge's comparator is defined once the list exists.
    pub fn link(
        &mut self,
        source: NodeId,
        edge: EdgeId,
        sort_spec: Option<&(String, Direction)>,
        target: NodeId,
    ) -> Result<usize> {
        if !self.nodes.contains_key(&target) {
            return Err(GraphError::NodeNotFound(target.0));
        }
        let sort_value = match sort_spec {
            Some((prop, _)) => self.require(target)?.field(prop).cloned(),
            None => None,
        };
        let node = self.require_mut(source)?;
        let list = node.edges.entry(edge).or_insert_with(|| match sort_spec {
            Some((prop, dir)) => SortedTargetList::new_sorted(prop.clone(), *dir),
            None => SortedTargetList::new_unsorted(),
        });
        Ok(list.insert(target, sort_value))
    }

    pub fn unlink(&mut self, source: NodeId, edge: EdgeId, target: NodeId) -> Option<usize> {
        self.nodes.get_mut(&source)?.edges.get_mut(&edge)?.remove(target)
    }

    /// Repositions `target` within every `(source, edge)` pair the caller
    /// supplies, after the target's sort property changed. Returns the
    /// `(source, edge, old_index, new_index)` tuples that actually moved,
    /// for the caller (the view engine) to translate into `on_move` deltas.
    pub fn reposition_edge_target(
        &mut self,
        source: NodeId,
        edge: EdgeId,
        target: NodeId,
        new_value: Value,
    ) -> Option<(usize, usize)> {
        self.nodes
            .get_mut(&source)?
            .edges
            .get_mut(&edge)?
            .reposition(target, new_value)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node of `type_id`, for index rebuilds and integrity scans.
    pub fn nodes_of_type(&self, type_id: TypeId) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().filter(move |(_, n)| n.type_id == type_id).map(|(id, n)| (*id, n))
    }
}
