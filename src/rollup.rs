//! The inverted edge index and the rollup cache that sits on top of it
//! (§4.5, §4.6).

use ahash::AHashMap;
use tracing::trace;

use crate::compound_key::KeyField;
use crate::error::{GraphError, Result};
use crate::index_manager::IndexManager;
use crate::metrics::PerformanceMetrics;
use crate::node_store::{NodeId, NodeStore};
use crate::schema::{EdgeId, RollupKind, Schema, TypeId};
use crate::value::{Direction, Value};
use crate::primitives::keyed_map::KeyedMap;

/// Guards against a pathological cascade depth (a schema with a rollup
/// dependency cycle would otherwise recurse forever); §4.5 argues the
/// cascade terminates because the dependency DAG is finite, so this is a
/// belt-and-suspenders limit rather than an expected code path.
const MAX_CASCADE_DEPTH: usize = 64;

/// One `{source, source_type, edge}` reference into a bucket keyed by
/// target id (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeRef {
    pub source: NodeId,
    pub source_type: TypeId,
    pub edge: EdgeId,
}

/// `target_id -> {(source, source_type, edge)}` (§4.6). Backed by
/// [`KeyedMap`], the same key-grouped container the per-type subscription
/// registry uses.
#[derive(Default)]
pub struct InvertedEdgeIndex {
    buckets: KeyedMap<NodeId, EdgeRef>,
}

impl InvertedEdgeIndex {
    pub fn new() -> Self {
        InvertedEdgeIndex::default()
    }

    pub fn on_link(&mut self, source: NodeId, source_type: TypeId, edge: EdgeId, target: NodeId) {
        self.buckets.insert(
            target,
            EdgeRef {
                source,
                source_type,
                edge,
            },
        );
    }

    pub fn on_unlink(&mut self, source: NodeId, source_type: TypeId, edge: EdgeId, target: NodeId) {
        self.buckets.remove(
            &target,
            &EdgeRef {
                source,
                source_type,
                edge,
            },
        );
    }

    pub fn sources_of(&self, target: NodeId) -> &[EdgeRef] {
        self.buckets.get(&target)
    }

    pub fn remove_source(&mut self, id: NodeId) {
        // A source can appear in many buckets; KeyedMap only supports
        // removal by (key, value), so we need every bucket a given source
        // might be in. Callers that unlink before delete (§4.7's delete
        // protocol) never need this for normal operation; it exists for
        // `Graph::delete` to scrub any residual reference defensively.
        let targets: Vec<NodeId> = self
            .buckets
            .keys_matching(|refs| refs.iter().any(|r| r.source == id))
            .collect();
        for target in targets {
            let matching: Vec<EdgeRef> = self
                .buckets
                .get(&target)
                .iter()
                .filter(|r| r.source == id)
                .copied()
                .collect();
            for r in matching {
                self.buckets.remove(&target, &r);
            }
        }
    }

    pub fn remove_target(&mut self, id: NodeId) {
        self.buckets.remove_key(&id);
    }
}

/// `(node, rollup-name) -> (value, valid)` (§3, §4.5).
#[derive(Default)]
pub struct RollupCache {
    entries: AHashMap<(NodeId, String), (Value, bool)>,
    inverted: InvertedEdgeIndex,
}

impl RollupCache {
    pub fn new() -> Self {
        RollupCache::default()
    }

    pub fn inverted(&self) -> &InvertedEdgeIndex {
        &self.inverted
    }

    pub fn on_link(&mut self, source: NodeId, source_type: TypeId, edge: EdgeId, target: NodeId) {
        self.inverted.on_link(source, source_type, edge, target);
    }

    pub fn on_unlink(&mut self, source: NodeId, source_type: TypeId, edge: EdgeId, target: NodeId) {
        self.inverted.on_unlink(source, source_type, edge, target);
    }

    pub fn remove_node(&mut self, id: NodeId) {
        self.entries.retain(|(node, _), _| *node != id);
        self.inverted.remove_source(id);
        self.inverted.remove_target(id);
    }

    /// Populates every rollup declared on `node`'s type with a freshly
    /// computed value, so later reads never observe a missing entry
    /// (§4.5 `initialize_rollups`).
    pub fn initialize_rollups(
        &mut self,
        id: NodeId,
        schema: &Schema,
        store: &mut NodeStore,
        indexes: &IndexManager,
        metrics: &mut PerformanceMetrics,
    ) {
        let type_id = store.require(id).map(|n| n.type_id).unwrap_or(TypeId(0));
        let names: Vec<String> = schema
            .type_def(type_id)
            .rollups
            .iter()
            .map(|r| r.name.clone())
            .collect();
        for name in names {
            let _ = self.get(id, &name, schema, store, indexes, metrics);
        }
    }

    /// `get(node, name)`: returns the cached value if valid, else computes,
    /// caches, and returns it (§4.5). The computed value is also written
    /// into the node's own rollup shadow (`Node::set_rollup_value`), since
    /// that's what index encoding and view filters/sorts read through
    /// `Node::field` — the cache here is the thing that knows how to
    /// recompute a stale entry, but the node itself is what every other
    /// reader consults.
    pub fn get(
        &mut self,
        id: NodeId,
        name: &str,
        schema: &Schema,
        store: &mut NodeStore,
        indexes: &IndexManager,
        metrics: &mut PerformanceMetrics,
    ) -> Result<Value> {
        if let Some((value, true)) = self.entries.get(&(id, name.to_string())) {
            metrics.rollup_cache_hits += 1;
            return Ok(value.clone());
        }
        metrics.rollup_cache_misses += 1;
        let value = self.compute(id, name, schema, store, indexes, metrics)?;
        self.entries.insert((id, name.to_string()), (value.clone(), true));
        if let Some(node) = store.get_mut(id) {
            node.set_rollup_value(name, value.clone());
        }
        Ok(value)
    }

    #[allow(clippy::too_many_arguments)]
    fn compute(
        &mut self,
        id: NodeId,
        name: &str,
        schema: &Schema,
        store: &mut NodeStore,
        indexes: &IndexManager,
        metrics: &mut PerformanceMetrics,
    ) -> Result<Value> {
        let type_id = store.require(id)?.type_id;
        let rollup = schema
            .type_def(type_id)
            .rollup(name)
            .ok_or_else(|| GraphError::UnknownProperty(name.to_string()))?
            .clone();
        match &rollup.kind {
            RollupKind::Count { edge } => {
                let count = store.require(id)?.edge_count(*edge);
                Ok(Value::Int(count as i64))
            }
            RollupKind::Traverse { edge, property } => {
                let target = store.require(id)?.edge_targets(*edge).and_then(|l| l.get_at(0));
                match target {
                    Some(target) => read_field(target, property, schema, store, indexes, self, metrics),
                    None => Ok(Value::Null),
                }
            }
            RollupKind::First {
                edge,
                sort_field,
                direction,
                property,
            } => self.first_or_last(
                type_id,
                id,
                *edge,
                sort_field,
                *direction,
                property.as_deref(),
                false,
                schema,
                store,
                indexes,
                metrics,
            ),
            RollupKind::Last {
                edge,
                sort_field,
                direction,
                property,
            } => self.first_or_last(
                type_id,
                id,
                *edge,
                sort_field,
                *direction,
                property.as_deref(),
                true,
                schema,
                store,
                indexes,
                metrics,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn first_or_last(
        &mut self,
        source_type: TypeId,
        source_id: NodeId,
        edge: EdgeId,
        sort_field: &str,
        direction: Direction,
        property: Option<&str>,
        want_last: bool,
        schema: &Schema,
        store: &mut NodeStore,
        indexes: &IndexManager,
        metrics: &mut PerformanceMetrics,
    ) -> Result<Value> {
        let edge_def = schema
            .type_def(source_type)
            .edge_by_id(edge)
            .ok_or_else(|| GraphError::UnknownEdge(format!("{edge:?}")))?;
        let target_type = edge_def.target_type;
        let reverse_edge = edge_def.reverse_id;

        let coverage = match indexes.select_nested_index(
            target_type,
            reverse_edge,
            &[],
            &[crate::index_manager::SortField {
                field: sort_field.to_string(),
                direction,
            }],
        ) {
            Some(c) if c.sort_suffix >= 1 => c,
            _ => {
                metrics.index_scan_misses += 1;
                return Ok(Value::Null);
            }
        };

        let prefix = vec![KeyField::edge_target(source_id, Direction::Asc)];
        let trees_scan = indexes.scan(target_type, &coverage, &prefix, metrics);

        let target = if want_last {
            trees_scan.last().copied()
        } else {
            trees_scan.first().copied()
        };

        match target {
            None => Ok(Value::Null),
            Some(target_id) => match property {
                Some(p) => read_field(target_id, p, schema, store, indexes, self, metrics),
                None => Ok(Value::Int(target_id.0 as i64)),
            },
        }
    }

    /// Recomputes every rollup on `node` whose kind references `edge`,
    /// overwriting the cached value (§4.5 `recompute_for_edge`).
    pub fn recompute_for_edge(
        &mut self,
        node: NodeId,
        edge: EdgeId,
        schema: &Schema,
        store: &mut NodeStore,
        indexes: &IndexManager,
        metrics: &mut PerformanceMetrics,
    ) -> Result<()> {
        let type_id = store.require(node)?.type_id;
        let names: Vec<String> = schema
            .type_def(type_id)
            .rollups
            .iter()
            .filter(|r| r.kind.edge() == edge)
            .map(|r| r.name.clone())
            .collect();
        for name in names {
            self.invalidate(node, &name);
            self.get(node, &name, schema, store, indexes, metrics)?;
        }
        Ok(())
    }

    /// Walks the inverted index's sources of `target` for every source
    /// whose type declares a traverse/first/last rollup reading
    /// `(edge_to_target, field)`, recomputes it, and cascades upward
    /// through the rollup dependency DAG (§4.5 `recompute_traverse_deps`).
    pub fn recompute_traverse_deps(
        &mut self,
        target: NodeId,
        field: &str,
        schema: &Schema,
        store: &mut NodeStore,
        indexes: &IndexManager,
        metrics: &mut PerformanceMetrics,
    ) -> Result<()> {
        self.recompute_traverse_deps_at(target, field, schema, store, indexes, metrics, 0)
    }

    #[allow(clippy::too_many_arguments)]
    fn recompute_traverse_deps_at(
        &mut self,
        target: NodeId,
        field: &str,
        schema: &Schema,
        store: &mut NodeStore,
        indexes: &IndexManager,
        metrics: &mut PerformanceMetrics,
        depth: usize,
    ) -> Result<()> {
        if depth >= MAX_CASCADE_DEPTH {
            tracing::warn!(depth, "rollup cascade depth guard tripped; stopping");
            return Ok(());
        }
        let refs: Vec<_> = self.inverted.sources_of(target).to_vec();
        for r in refs {
            let source_type_def = schema.type_def(r.source_type);
            for rollup in &source_type_def.rollups {
                let reads_field = match &rollup.kind {
                    RollupKind::Traverse { edge, property } => *edge == r.edge && property == field,
                    RollupKind::First { edge, sort_field, .. } | RollupKind::Last { edge, sort_field, .. } => {
                        *edge == r.edge && sort_field == field
                    }
                    RollupKind::Count { .. } => false,
                };
                if !reads_field {
                    continue;
                }
                trace!(source = r.source.0, rollup = %rollup.name, depth, "cascading rollup recompute");
                self.invalidate(r.source, &rollup.name);
                self.get(r.source, &rollup.name, schema, store, indexes, metrics)?;
                self.recompute_traverse_deps_at(r.source, &rollup.name, schema, store, indexes, metrics, depth + 1)?;
            }
        }
        Ok(())
    }

    pub fn invalidate(&mut self, id: NodeId, name: &str) {
        if let Some(entry) = self.entries.get_mut(&(id, name.to_string())) {
            entry.1 = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_index_dedups_links_and_drops_empty_buckets() {
        let mut idx = InvertedEdgeIndex::new();
        let source = NodeId(1);
        let target = NodeId(2);
        let edge = EdgeId(0);
        let ty = TypeId(0);
        idx.on_link(source, ty, edge, target);
        idx.on_link(source, ty, edge, target);
        assert_eq!(idx.sources_of(target).len(), 1);
        idx.on_unlink(source, ty, edge, target);
        assert!(idx.sources_of(target).is_empty());
    }

    #[test]
    fn remove_target_drops_whole_bucket() {
        let mut idx = InvertedEdgeIndex::new();
        idx.on_link(NodeId(1), TypeId(0), EdgeId(0), NodeId(9));
        idx.on_link(NodeId(2), TypeId(0), EdgeId(0), NodeId(9));
        idx.remove_target(NodeId(9));
        assert!(idx.sources_of(NodeId(9)).is_empty());
    }

    #[test]
    fn remove_source_scrubs_every_bucket_it_appears_in() {
        let mut idx = InvertedEdgeIndex::new();
        idx.on_link(NodeId(1), TypeId(0), EdgeId(0), NodeId(9));
        idx.on_link(NodeId(1), TypeId(0), EdgeId(0), NodeId(10));
        idx.remove_source(NodeId(1));
        assert!(idx.sources_of(NodeId(9)).is_empty());
        assert!(idx.sources_of(NodeId(10)).is_empty());
    }
}

#[allow(clippy::too_many_arguments)]
fn read_field(
    id: NodeId,
    name: &str,
    schema: &Schema,
    store: &mut NodeStore,
    indexes: &IndexManager,
    cache: &mut RollupCache,
    metrics: &mut PerformanceMetrics,
) -> Result<Value> {
    if let Some(v) = store.require(id)?.property(name) {
        return Ok(v.clone());
    }
    cache.get(id, name, schema, store, indexes, metrics)
}
