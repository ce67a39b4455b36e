//! An in-memory B+ tree over [`crate::compound_key::CompoundKey`] with
//! subtree-count annotations on internal nodes, giving O(log n)
//! rank/select (`skip_to_position`) alongside the usual O(log n)
//! point/range lookup (§4.2).
//!
//! Backed by a plain sorted `Vec` at each node rather than a pointer
//! structure: fanout is large (see [`BTree::with_fanout`]) so a node's
//! keys fit a handful of cache lines, and an in-memory tree never pays a
//! disk-page write amplification cost that would justify a copy-on-write
//! node layout.

use std::cmp::Ordering;

use crate::compound_key::CompoundKey;
use crate::node_store::NodeId;

/// Default minimum number of keys a non-root node holds before it must
/// borrow or merge, mirroring a typical on-disk B+ tree fanout scaled down
/// for an in-memory budget (§9's config note: "B+ tree fanout (min/max
/// children per node)" is a [`crate::config::GraphConfig`] field).
pub const DEFAULT_MIN_FANOUT: usize = 16;

#[derive(Debug, Clone)]
struct Entry {
    key: CompoundKey,
    node: NodeId,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf {
        entries: Vec<Entry>,
    },
    Internal {
        /// `children.len() == separators.len() + 1`. `separators[i]` is the
        /// smallest key in `children[i + 1]`.
        separators: Vec<CompoundKey>,
        children: Vec<Box<BNode>>,
    },
}

#[derive(Debug, Clone)]
struct BNode {
    kind: NodeKind,
    /// Total number of leaf entries in this subtree, maintained on every
    /// structural change so [`BTree::skip_to_position`] can descend in
    /// O(log n) without scanning leaves.
    count: usize,
}

impl BNode {
    fn leaf() -> Self {
        BNode {
            kind: NodeKind::Leaf { entries: Vec::new() },
            count: 0,
        }
    }

    fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }
}

/// A B+ tree mapping [`CompoundKey`] to [`NodeId`], supporting duplicate
/// keys are not expected (the codec appends a node id to break ties, §4.1)
/// so every key is unique in practice, but the tree does not itself assume
/// uniqueness.
#[derive(Debug, Clone)]
pub struct BTree {
    root: Box<BNode>,
    min_fanout: usize,
}

impl BTree {
    pub fn new() -> Self {
        BTree::with_fanout(DEFAULT_MIN_FANOUT)
    }

    pub fn with_fanout(min_fanout: usize) -> Self {
        BTree {
            root: Box::new(BNode::leaf()),
            min_fanout: min_fanout.max(2),
        }
    }

    pub fn len(&self) -> usize {
        self.root.count
    }

    pub fn is_empty(&self) -> bool {
        self.root.count == 0
    }

    /// Inserts `(key, node)`. If an entry with an equal key already
    /// exists, it is replaced in place (count unchanged).
    pub fn insert(&mut self, key: CompoundKey, node: NodeId) {
        if let Some(new_child) = insert_rec(&mut self.root, key, node, self.min_fanout) {
            let old_root = std::mem::replace(&mut self.root, Box::new(BNode::leaf()));
            let new_root_count = old_root.count + new_child.count;
            let separator = first_key(&new_child);
            self.root = Box::new(BNode {
                kind: NodeKind::Internal {
                    separators: vec![separator],
                    children: vec![old_root, new_child],
                },
                count: new_root_count,
            });
        }
    }

    /// Removes the entry matching `key` exactly, returning its `NodeId` if
    /// present. Leaf/internal rebalancing below `min_fanout` is left to
    /// natural shrink-on-empty rather than eager merge: an in-memory tree
    /// under churn converges back to a balanced shape on the next full
    /// rebuild (the index manager rebuilds indexes wholesale on schema
    /// change, never incrementally re-balances).
    pub fn remove(&mut self, key: &CompoundKey) -> Option<NodeId> {
        remove_rec(&mut self.root, key)
    }

    pub fn get(&self, key: &CompoundKey) -> Option<NodeId> {
        get_rec(&self.root, key)
    }

    /// Returns the 0-based rank of the first entry `>= key` among all
    /// entries in the tree (i.e. how many entries sort strictly before
    /// it), without a leaf scan.
    pub fn rank(&self, key: &CompoundKey) -> usize {
        rank_rec(&self.root, key)
    }

    /// Returns the entry at 0-based position `pos` in sorted order, or
    /// `None` if out of range. O(log n) via the subtree-count annotation
    /// (§4.2 "skip_to_position").
    pub fn skip_to_position(&self, pos: usize) -> Option<(CompoundKey, NodeId)> {
        select_rec(&self.root, pos)
    }

    /// Iterates every entry with `key.has_prefix(prefix)`, in ascending
    /// key order, starting from `prefix` itself.
    pub fn scan_prefix<'a>(&'a self, prefix: &'a CompoundKey) -> impl Iterator<Item = (CompoundKey, NodeId)> + 'a {
        self.range(prefix.clone(), CompoundKey::max_with_prefix(prefix))
    }

    /// Iterates every entry in `[lo, hi)`, ascending.
    pub fn range<'a>(&'a self, lo: CompoundKey, hi: CompoundKey) -> impl Iterator<Item = (CompoundKey, NodeId)> + 'a {
        let mut out = Vec::new();
        collect_range(&self.root, &lo, &hi, &mut out);
        out.into_iter()
    }
}

impl Default for BTree {
    fn default() -> Self {
        BTree::new()
    }
}

fn first_key(node: &BNode) -> CompoundKey {
    match &node.kind {
        NodeKind::Leaf { entries } => entries.first().map(|e| e.key.clone()).unwrap_or_else(CompoundKey::min),
        NodeKind::Internal { children, .. } => first_key(&children[0]),
    }
}

/// Inserts into the subtree rooted at `node`, splitting it if it overflows
/// `2 * min_fanout` entries. Returns the new right sibling when a split
/// happened, for the caller to link in as a new child.
fn insert_rec(node: &mut BNode, key: CompoundKey, target: NodeId, min_fanout: usize) -> Option<Box<BNode>> {
    let max_fanout = min_fanout * 2;
    match &mut node.kind {
        NodeKind::Leaf { entries } => {
            let idx = entries.partition_point(|e| e.key.compare(&key) == Ordering::Less);
            if entries.get(idx).map(|e| e.key.compare(&key) == Ordering::Equal).unwrap_or(false) {
                entries[idx].node = target;
                return None;
            }
            entries.insert(idx, Entry { key, node: target });
            node.count += 1;
            if entries.len() <= max_fanout {
                return None;
            }
            let split_at = entries.len() / 2;
            let right_entries = entries.split_off(split_at);
            let right_count = right_entries.len();
            node.count -= right_count;
            Some(Box::new(BNode {
                kind: NodeKind::Leaf { entries: right_entries },
                count: right_count,
            }))
        }
        NodeKind::Internal { separators, children } => {
            let child_idx = child_index(separators, &key);
            let before = children[child_idx].count;
            let split = insert_rec(&mut children[child_idx], key, target, min_fanout);
            node.count += children[child_idx].count - before;
            if let Some(new_child) = split {
                node.count += new_child.count;
                let sep = first_key(&new_child);
                separators.insert(child_idx, sep);
                children.insert(child_idx + 1, new_child);
                if children.len() <= max_fanout {
                    return None;
                }
                let split_at = children.len() / 2;
                let right_children = children.split_off(split_at);
                let right_separators = separators.split_off(split_at);
                // The separator consumed to promote this split sits at the
                // boundary; it is not duplicated in either side's
                // separators, only implied by `first_key`.
                separators.pop();
                let right_count: usize = right_children.iter().map(|c| c.count).sum();
                node.count -= right_count;
                return Some(Box::new(BNode {
                    kind: NodeKind::Internal {
                        separators: right_separators,
                        children: right_children,
                    },
                    count: right_count,
                }));
            }
            None
        }
    }
}

fn child_index(separators: &[CompoundKey], key: &CompoundKey) -> usize {
    separators.partition_point(|sep| sep.compare(key) != Ordering::Greater)
}

fn remove_rec(node: &mut BNode, key: &CompoundKey) -> Option<NodeId> {
    match &mut node.kind {
        NodeKind::Leaf { entries } => {
            let idx = entries.iter().position(|e| e.key.compare(key) == Ordering::Equal)?;
            node.count -= 1;
            Some(entries.remove(idx).node)
        }
        NodeKind::Internal { separators, children } => {
            let child_idx = child_index(separators, key);
            let removed = remove_rec(&mut children[child_idx], key);
            if removed.is_some() {
                node.count -= 1;
            }
            removed
        }
    }
}

fn get_rec(node: &BNode, key: &CompoundKey) -> Option<NodeId> {
    match &node.kind {
        NodeKind::Leaf { entries } => entries
            .iter()
            .find(|e| e.key.compare(key) == Ordering::Equal)
            .map(|e| e.node),
        NodeKind::Internal { separators, children } => {
            let idx = child_index(separators, key);
            get_rec(&children[idx], key)
        }
    }
}

fn rank_rec(node: &BNode, key: &CompoundKey) -> usize {
    match &node.kind {
        NodeKind::Leaf { entries } => entries.partition_point(|e| e.key.compare(key) == Ordering::Less),
        NodeKind::Internal { separators, children } => {
            let idx = child_index(separators, key);
            let preceding: usize = children[..idx].iter().map(|c| c.count).sum();
            preceding + rank_rec(&children[idx], key)
        }
    }
}

fn select_rec(node: &BNode, pos: usize) -> Option<(CompoundKey, NodeId)> {
    if pos >= node.count {
        return None;
    }
    match &node.kind {
        NodeKind::Leaf { entries } => entries.get(pos).map(|e| (e.key.clone(), e.node)),
        NodeKind::Internal { children, .. } => {
            let mut remaining = pos;
            for child in children {
                if remaining < child.count {
                    return select_rec(child, remaining);
                }
                remaining -= child.count;
            }
            None
        }
    }
}

fn collect_range(node: &BNode, lo: &CompoundKey, hi: &CompoundKey, out: &mut Vec<(CompoundKey, NodeId)>) {
    match &node.kind {
        NodeKind::Leaf { entries } => {
            for e in entries {
                if e.key.compare(lo) != Ordering::Less && e.key.compare(hi) == Ordering::Less {
                    out.push((e.key.clone(), e.node));
                }
            }
        }
        NodeKind::Internal { separators, children } => {
            let start = child_index(separators, lo);
            let mut end = child_index(separators, hi);
            if end < children.len() {
                end += 1;
            }
            for child in &children[start..end.min(children.len())] {
                collect_range(child, lo, hi, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compound_key::{encode_full, KeyField};
    use crate::value::{Direction, Value};
    use proptest::prelude::*;

    fn k(i: i64, node: u64) -> CompoundKey {
        encode_full(&[KeyField::asc(Value::Int(i))], NodeId(node))
    }

    #[test]
    fn insert_get_round_trip() {
        let mut tree = BTree::with_fanout(2);
        for i in 0..50 {
            tree.insert(k(i, i as u64), NodeId(i as u64));
        }
        for i in 0..50 {
            assert_eq!(tree.get(&k(i, i as u64)), Some(NodeId(i as u64)));
        }
        assert_eq!(tree.len(), 50);
    }

    #[test]
    fn skip_to_position_matches_sorted_order() {
        let mut tree = BTree::with_fanout(2);
        let mut ids: Vec<i64> = (0..40).collect();
        ids.reverse();
        for &i in &ids {
            tree.insert(k(i, i as u64), NodeId(i as u64));
        }
        for pos in 0..40usize {
            let (key, _) = tree.skip_to_position(pos).unwrap();
            let expected = k(pos as i64, pos as u64);
            assert_eq!(key.compare(&expected), Ordering::Equal);
        }
        assert!(tree.skip_to_position(40).is_none());
    }

    #[test]
    fn remove_then_get_returns_none() {
        let mut tree = BTree::with_fanout(2);
        for i in 0..20 {
            tree.insert(k(i, i as u64), NodeId(i as u64));
        }
        assert_eq!(tree.remove(&k(5, 5)), Some(NodeId(5)));
        assert_eq!(tree.get(&k(5, 5)), None);
        assert_eq!(tree.len(), 19);
    }

    #[test]
    fn range_scan_is_half_open_and_sorted() {
        let mut tree = BTree::with_fanout(2);
        for i in 0..30 {
            tree.insert(k(i, i as u64), NodeId(i as u64));
        }
        let lo = k(10, 10);
        let hi = k(20, 20);
        let got: Vec<NodeId> = tree.range(lo, hi).map(|(_, n)| n).collect();
        let expected: Vec<NodeId> = (10..20).map(|i| NodeId(i as u64)).collect();
        assert_eq!(got, expected);
    }

    proptest! {
        #[test]
        fn rank_matches_linear_count(mut xs in proptest::collection::vec(0i64..500, 1..80)) {
            xs.sort();
            xs.dedup();
            let mut tree = BTree::with_fanout(3);
            for &i in &xs {
                tree.insert(k(i, i as u64), NodeId(i as u64));
            }
            for &i in &xs {
                let key = k(i, i as u64);
                let expected_rank = xs.iter().filter(|&&x| x < i).count();
                prop_assert_eq!(tree.rank(&key), expected_rank);
            }
        }
    }
}
