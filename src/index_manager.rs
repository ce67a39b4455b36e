//! Per-type B+ tree indexes, and the coverage-scoring algorithm that picks
//! the best index for a `(filters, sorts)` pair (§4.4).

use std::collections::HashMap;

use tracing::debug;

use crate::btree::BTree;
use crate::compound_key::{self, CompoundKey, KeyField};
use crate::metrics::PerformanceMetrics;
use crate::node_store::{Node, NodeId};
use crate::schema::{EdgeId, IndexDef, IndexFieldKind, Schema, TypeId};
use crate::value::{Direction, Value};

/// A single filter term: `field <op> value`. `field` names a property on
/// the filtered type; edge-targeted filters are not part of this spec's
/// query surface (§6).
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub fn is_range(self) -> bool {
        !matches!(self, FilterOp::Eq)
    }

    pub fn matches(self, actual: &Value, expected: &Value) -> bool {
        use std::cmp::Ordering::*;
        match (self, actual.total_cmp(expected)) {
            (FilterOp::Eq, Equal) => true,
            (FilterOp::Gt, Greater) => true,
            (FilterOp::Gte, Greater | Equal) => true,
            (FilterOp::Lt, Less) => true,
            (FilterOp::Lte, Less | Equal) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub field: String,
    pub direction: Direction,
}

/// The result of coverage selection: which index to scan, how many
/// leading fields are satisfied by equality/range/sort, and which filters
/// remain to be applied by a post-filter pass over the scan (§4.4).
#[derive(Debug, Clone)]
pub struct Coverage {
    pub index_id: usize,
    pub equality_prefix: usize,
    pub range_field: bool,
    pub sort_suffix: usize,
    pub score: u32,
    pub post_filters: Vec<Filter>,
}

impl Coverage {
    pub fn score(equality_prefix: usize, range_field: bool, sort_suffix: usize) -> u32 {
        100 * equality_prefix as u32 + 50 * (range_field as u32) + 10 * sort_suffix as u32
    }
}

struct Index {
    def: IndexDef,
    tree: BTree,
}

/// Owns one B+ tree per schema-declared index, grouped by the type it
/// indexes.
pub struct IndexManager {
    indexes: HashMap<TypeId, Vec<Index>>,
}

impl IndexManager {
    /// Builds one empty tree per index declared in `schema`, using the
    /// default B+ tree fanout.
    pub fn new(schema: &Schema) -> Self {
        IndexManager::with_fanout(schema, crate::btree::DEFAULT_MIN_FANOUT)
    }

    /// Builds one empty tree per index declared in `schema`, sized by
    /// `min_fanout` (from [`crate::config::GraphConfig::btree_min_fanout`]).
    pub fn with_fanout(schema: &Schema, min_fanout: usize) -> Self {
        let mut indexes = HashMap::new();
        for type_def in schema.types() {
            let trees = type_def
                .indexes
                .iter()
                .map(|def| Index {
                    def: def.clone(),
                    tree: BTree::with_fanout(min_fanout),
                })
                .collect();
            indexes.insert(type_def.id, trees);
        }
        IndexManager { indexes }
    }

    pub fn on_insert(&mut self, node: &Node) {
        if let Some(trees) = self.indexes.get_mut(&node.type_id) {
            for index in trees {
                let key = encode_key(node, &index.def);
                index.tree.insert(key, node.id);
            }
        }
    }

    pub fn on_delete(&mut self, node: &Node) {
        if let Some(trees) = self.indexes.get_mut(&node.type_id) {
            for index in trees {
                let key = encode_key(node, &index.def);
                index.tree.remove(&key);
            }
        }
    }

    /// Re-encodes `node`'s entry in every index whose fields could be
    /// affected: a property index when that property changed, an edge
    /// index always (since the edge-prefixed key itself targets this
    /// node's incoming edges, not its own fields — call sites re-encode
    /// unconditionally on link/unlink for simplicity, matching §4.4's
    /// "for each index that includes that edge field, re-encode").
    pub fn reencode(&mut self, node: &Node, old_key_node: &Node) {
        if let Some(trees) = self.indexes.get_mut(&node.type_id) {
            for index in trees {
                let old_key = encode_key(old_key_node, &index.def);
                index.tree.remove(&old_key);
                let new_key = encode_key(node, &index.def);
                index.tree.insert(new_key, node.id);
            }
        }
    }

    /// Selects the best top-level index for `type_id` given `filters` and
    /// `sorts`, per §4.4's scoring algorithm. Returns `None` if the type
    /// has no indexes or nothing scores above zero.
    pub fn select_index(&self, type_id: TypeId, filters: &[Filter], sorts: &[SortField]) -> Option<Coverage> {
        self.select_from(type_id, 0, filters, sorts)
    }

    /// Selects an index whose first field is the edge `reverse_edge`
    /// (§4.4 "nested coverage"); coverage is computed on the remaining
    /// fields.
    pub fn select_nested_index(
        &self,
        type_id: TypeId,
        reverse_edge: EdgeId,
        filters: &[Filter],
        sorts: &[SortField],
    ) -> Option<Coverage> {
        let trees = self.indexes.get(&type_id)?;
        let candidates: Vec<usize> = trees
            .iter()
            .enumerate()
            .filter(|(_, idx)| idx.def.leads_with_edge(reverse_edge))
            .map(|(i, _)| i)
            .collect();
        self.best_among(type_id, &candidates, 1, filters, sorts)
    }

    fn select_from(&self, type_id: TypeId, skip: usize, filters: &[Filter], sorts: &[SortField]) -> Option<Coverage> {
        let trees = self.indexes.get(&type_id)?;
        let candidates: Vec<usize> = (0..trees.len()).collect();
        self.best_among(type_id, &candidates, skip, filters, sorts)
    }

    fn best_among(
        &self,
        type_id: TypeId,
        candidates: &[usize],
        skip: usize,
        filters: &[Filter],
        sorts: &[SortField],
    ) -> Option<Coverage> {
        let trees = self.indexes.get(&type_id)?;
        let mut best: Option<Coverage> = None;
        for &i in candidates {
            let def = &trees[i].def;
            let coverage = score_index(i, def, skip, filters, sorts);
            if coverage.score > 0 && best.as_ref().map(|b| coverage.score > b.score).unwrap_or(true) {
                best = Some(coverage);
            }
        }
        if let Some(c) = &best {
            debug!(type_id = type_id.0, index_id = c.index_id, score = c.score, "selected index coverage");
        }
        best
    }

    /// Scans the index chosen by `coverage`, bounded to entries whose key
    /// has the given edge-target prefix (for a nested/cross-entity scan)
    /// or the plain equality prefix (for a top-level scan). Every call is
    /// one covered scan, counted in `metrics.index_scans`.
    pub fn scan(
        &self,
        type_id: TypeId,
        coverage: &Coverage,
        prefix_fields: &[KeyField],
        metrics: &mut PerformanceMetrics,
    ) -> Vec<NodeId> {
        metrics.index_scans += 1;
        let trees = match self.indexes.get(&type_id) {
            Some(t) => t,
            None => return Vec::new(),
        };
        let index = &trees[coverage.index_id];
        let prefix = compound_key::encode_partial(prefix_fields);
        index
            .tree
            .scan_prefix(&prefix)
            .map(|(_, node)| node)
            .collect()
    }

    /// Position-indexed skip into a scan, for the viewport's O(log n)
    /// first render (§4.4, §4.8).
    pub fn skip_to_position(&self, type_id: TypeId, index_id: usize, pos: usize) -> Option<NodeId> {
        self.indexes
            .get(&type_id)?
            .get(index_id)?
            .tree
            .skip_to_position(pos)
            .map(|(_, node)| node)
    }

    /// The field list of one declared index, so a caller building a prefix
    /// scan (the view engine's root-level load) knows which filter values
    /// to encode and in what order.
    pub fn index_fields(&self, type_id: TypeId, index_id: usize) -> Option<&[crate::schema::IndexField]> {
        self.indexes
            .get(&type_id)?
            .get(index_id)
            .map(|idx| idx.def.fields.as_slice())
    }

    /// Every (type, index) pair, for `Graph::verify()`'s Invariant 1 walk.
    pub fn all_indexes(&self) -> impl Iterator<Item = (TypeId, &IndexDef)> {
        self.indexes
            .iter()
            .flat_map(|(ty, trees)| trees.iter().map(move |idx| (*ty, &idx.def)))
    }

    /// Looks up `node`'s own key in `index_id` and checks it resolves back
    /// to `node.id` — the Invariant 1 check `Graph::verify()` runs per index.
    pub fn contains(&self, type_id: TypeId, index_id: usize, node: &Node) -> bool {
        let Some(idx) = self.indexes.get(&type_id).and_then(|t| t.get(index_id)) else {
            return false;
        };
        let key = encode_key(node, &idx.def);
        idx.tree.get(&key) == Some(node.id)
    }
}

fn score_index(index_id: usize, def: &IndexDef, skip: usize, filters: &[Filter], sorts: &[SortField]) -> Coverage {
    let fields = &def.fields[skip.min(def.fields.len())..];

    let mut equality_prefix = 0;
    let mut consumed_filter_fields: Vec<&str> = Vec::new();
    for field in fields {
        let name = match &field.kind {
            IndexFieldKind::Property(p) => p.as_str(),
            IndexFieldKind::Edge(_) => break,
        };
        let matched = filters.iter().any(|f| f.field == name && f.op == FilterOp::Eq);
        if !matched {
            break;
        }
        consumed_filter_fields.push(name);
        equality_prefix += 1;
    }

    let mut range_field = false;
    if let Some(field) = fields.get(equality_prefix) {
        if let IndexFieldKind::Property(name) = &field.kind {
            if filters.iter().any(|f| &f.field == name && f.op.is_range()) {
                range_field = true;
                consumed_filter_fields.push(name.as_str());
            }
        }
    }

    let sort_start = equality_prefix + range_field as usize;
    let mut sort_suffix = 0;
    for (field, sort) in fields[sort_start.min(fields.len())..].iter().zip(sorts.iter()) {
        match &field.kind {
            IndexFieldKind::Property(name) if *name == sort.field && field.direction == sort.direction => {
                sort_suffix += 1;
            }
            _ => break,
        }
    }

    let post_filters: Vec<Filter> = filters
        .iter()
        .filter(|f| !consumed_filter_fields.contains(&f.field.as_str()))
        .cloned()
        .collect();

    Coverage {
        index_id,
        equality_prefix,
        range_field,
        sort_suffix,
        score: Coverage::score(equality_prefix, range_field, sort_suffix),
        post_filters,
    }
}

/// A sentinel target id used when an edge-keyed index field has no linked
/// target yet; sorts before every real `NodeId` (ids start at 1).
const NO_TARGET: NodeId = NodeId(0);

fn encode_key(node: &Node, def: &IndexDef) -> CompoundKey {
    let fields: Vec<KeyField> = def
        .fields
        .iter()
        .map(|field| match &field.kind {
            IndexFieldKind::Property(name) => {
                let value = node.field(name).cloned().unwrap_or(Value::Null);
                KeyField::new(value, field.direction)
            }
            IndexFieldKind::Edge(edge_id) => {
                let target = node
                    .edge_targets(*edge_id)
                    .and_then(|list| list.get_at(0))
                    .unwrap_or(NO_TARGET);
                KeyField::edge_target(target, field.direction)
            }
        })
        .collect();
    compound_key::encode_full(&fields, node.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_eq(field: &str, value: Value) -> Filter {
        Filter {
            field: field.to_string(),
            op: FilterOp::Eq,
            value,
        }
    }

    fn filter_gt(field: &str, value: Value) -> Filter {
        Filter {
            field: field.to_string(),
            op: FilterOp::Gt,
            value,
        }
    }

    fn sort(field: &str, direction: Direction) -> SortField {
        SortField {
            field: field.to_string(),
            direction,
        }
    }

    fn post_index(fields: Vec<(&str, Direction)>) -> IndexDef {
        IndexDef {
            id: 0,
            fields: fields
                .into_iter()
                .map(|(name, dir)| crate::schema::IndexField {
                    kind: IndexFieldKind::Property(name.to_string()),
                    direction: dir,
                })
                .collect(),
        }
    }

    // S5: status asc, views desc.
    #[test]
    fn s5_coverage_scoring_matches_scenario() {
        let def = post_index(vec![("status", Direction::Asc), ("views", Direction::Desc)]);

        let filters = vec![filter_eq("status", Value::String("X".into()))];
        let sorts = vec![sort("views", Direction::Desc)];
        let c = score_index(0, &def, 0, &filters, &sorts);
        assert_eq!((c.equality_prefix, c.range_field, c.sort_suffix, c.score), (1, false, 1, 110));
        assert!(c.post_filters.is_empty());

        let filters = vec![
            filter_eq("status", Value::String("X".into())),
            filter_gt("views", Value::Int(100)),
        ];
        let c = score_index(0, &def, 0, &filters, &sorts);
        assert_eq!((c.equality_prefix, c.range_field, c.sort_suffix, c.score), (1, true, 0, 150));
        assert!(c.post_filters.is_empty());

        let filters = vec![
            filter_eq("status", Value::String("X".into())),
            filter_eq("author", Value::String("bob".into())),
        ];
        let c = score_index(0, &def, 0, &filters, &sorts);
        assert_eq!((c.equality_prefix, c.range_field, c.sort_suffix, c.score), (1, false, 1, 110));
        assert_eq!(c.post_filters, vec![filter_eq("author", Value::String("bob".into()))]);
    }
}
