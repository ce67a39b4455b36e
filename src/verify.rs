//! Integrity checks a caller can run against a live graph: index-key
//! presence, edge/reverse-edge consistency, and inverted-edge-index
//! consistency. Grounded on the teacher's own admin verification report
//! shape, adapted from an on-disk adjacency scan to an in-memory one.

use serde::Serialize;

use crate::index_manager::IndexManager;
use crate::node_store::NodeStore;
use crate::rollup::RollupCache;
use crate::schema::Schema;

const MAX_FINDINGS: usize = 32;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    Warning,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    pub severity: VerifySeverity,
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        VerifyFinding {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    pub nodes_checked: u64,
    pub edges_checked: u64,
    pub index_entries_checked: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    pub success: bool,
    pub findings: Vec<VerifyFinding>,
    pub counts: VerifyCounts,
}

fn push_error(findings: &mut Vec<VerifyFinding>, message: impl Into<String>) -> bool {
    if findings.len() < MAX_FINDINGS {
        findings.push(VerifyFinding::error(message.into()));
    }
    findings.len() >= MAX_FINDINGS
}

/// Walks every node, checking (1) each of its loaded edge targets has the
/// matching reverse edge back, (2) every index the schema declares for
/// its type actually contains it, and (3) every bucket in the rollup
/// cache's inverted edge index points at a link that still exists.
pub fn verify(schema: &Schema, store: &NodeStore, indexes: &IndexManager, rollups: &RollupCache) -> VerifyReport {
    let mut findings = Vec::new();
    let mut counts = VerifyCounts::default();

    'nodes: for type_def in schema.types() {
        for edge_def in &type_def.edges {
            for (node_id, node) in store.nodes_of_type(type_def.id) {
                counts.nodes_checked += 1;
                let Some(targets) = node.edge_targets(edge_def.id) else {
                    continue;
                };
                for target in targets.iter() {
                    counts.edges_checked += 1;
                    let Some(target_node) = store.get(target) else {
                        if push_error(&mut findings, format!("edge {} -> missing target node {}", edge_def.name, target.0)) {
                            break 'nodes;
                        }
                        continue;
                    };
                    let has_reverse = target_node
                        .edge_targets(edge_def.reverse_id)
                        .map(|rev| rev.contains(node_id))
                        .unwrap_or(false);
                    if !has_reverse {
                        if push_error(
                            &mut findings,
                            format!(
                                "missing reverse edge: {}:{} --{}--> {}:{} has no matching {} back-link",
                                type_def.name, node_id.0, edge_def.name, target_node.type_id.0, target.0, edge_def.reverse_name
                            ),
                        ) {
                            break 'nodes;
                        }
                    }
                }
            }
        }
    }

    for (type_id, index_def) in indexes.all_indexes() {
        for (node_id, node) in store.nodes_of_type(type_id) {
            counts.index_entries_checked += 1;
            if !indexes.contains(type_id, index_def.id, node) {
                if push_error(
                    &mut findings,
                    format!("node {} missing from index {} on type {}", node_id.0, index_def.id, type_id.0),
                ) {
                    break;
                }
            }
        }
    }

    for type_def in schema.types() {
        for (node_id, node) in store.nodes_of_type(type_def.id) {
            for source_ref in rollups.inverted().sources_of(node_id) {
                let Some(source_node) = store.get(source_ref.source) else {
                    push_error(&mut findings, format!("inverted index references missing source {}", source_ref.source.0));
                    continue;
                };
                let still_linked = source_node
                    .edge_targets(source_ref.edge)
                    .map(|l| l.contains(node_id))
                    .unwrap_or(false);
                if !still_linked {
                    push_error(
                        &mut findings,
                        format!(
                            "stale inverted-index entry: {} no longer links to {} via edge {}",
                            source_ref.source.0, node.type_id.0, source_ref.edge.0
                        ),
                    );
                }
            }
        }
    }

    VerifyReport {
        success: findings.is_empty(),
        findings,
        counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn schema() -> Schema {
        Schema::from_json(&serde_json::json!([
            {
                "name": "Root",
                "properties": [{"name": "priority", "type": "int"}],
                "edges": [{"name": "children", "target": "Item", "reverse": "_parent"}],
                "indexes": [{"fields": [{"kind": "property", "field": "priority", "direction": "asc"}]}]
            },
            {
                "name": "Item",
                "properties": [],
                "edges": [{"name": "_parent", "target": "Root", "reverse": "children"}]
            }
        ]))
        .unwrap()
    }

    #[test]
    fn clean_graph_verifies_successfully() {
        let schema = schema();
        let root_ty = schema.type_by_name("Root").unwrap();
        let item_ty = schema.type_by_name("Item").unwrap();
        let mut store = NodeStore::new();
        let mut indexes = IndexManager::new(&schema);
        let rollups = RollupCache::new();

        let root = store.insert(root_ty);
        store.set_property(root, "priority", Value::Int(1)).unwrap();
        indexes.on_insert(store.get(root).unwrap());
        let item = store.insert(item_ty);
        let edge = schema.type_def(root_ty).edge_by_name("children").unwrap();
        let reverse = schema.type_def(item_ty).edge_by_name("_parent").unwrap();
        store.link(root, edge.id, None, item).unwrap();
        store.link(item, reverse.id, None, root).unwrap();

        let report = verify(&schema, &store, &indexes, &rollups);
        assert!(report.success, "{:?}", report.findings);
    }

    #[test]
    fn missing_reverse_edge_is_flagged() {
        let schema = schema();
        let root_ty = schema.type_by_name("Root").unwrap();
        let item_ty = schema.type_by_name("Item").unwrap();
        let mut store = NodeStore::new();
        let indexes = IndexManager::new(&schema);
        let rollups = RollupCache::new();

        let root = store.insert(root_ty);
        let item = store.insert(item_ty);
        let edge = schema.type_def(root_ty).edge_by_name("children").unwrap();
        store.link(root, edge.id, None, item).unwrap();

        let report = verify(&schema, &store, &indexes, &rollups);
        assert!(!report.success);
    }
}
