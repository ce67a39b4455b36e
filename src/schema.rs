//! The schema: an immutable, load-time-validated description of every type,
//! its properties, edges (with reverse pairing and optional target sort),
//! indexes, and rollups (§3, §6).
//!
//! The schema *parser* is treated as an external collaborator per the
//! design notes — the hard engineering this crate owns is the index
//! manager, rollup cache, and reactive view engine that consume a `Schema`
//! value, not schema authoring tooling. This module implements the
//! straightforward JSON → `Schema` contract §6 describes, plus the
//! cross-reference validation §3 requires ("every edge has a matching
//! reverse on its target type; index fields resolve; rollup sources
//! resolve").

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{GraphError, Result};
use crate::value::Direction;

/// Small unsigned integer identifying a type, assigned by schema load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Small unsigned integer identifying an edge, assigned globally at schema
/// load (unique across all types, so the inverted edge index and rollup
/// cascade can key on it directly without a `(type, name)` pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

/// Scalar property kind declared in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    Int,
    Number,
    Bool,
}

impl PropertyKind {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "string" => Ok(PropertyKind::String),
            "int" => Ok(PropertyKind::Int),
            "number" => Ok(PropertyKind::Number),
            "bool" => Ok(PropertyKind::Bool),
            other => Err(GraphError::InvalidJson(format!(
                "unknown property type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,
    pub kind: PropertyKind,
}

/// A sort spec on an edge's target list (§3 "ordered by a `(target.property,
/// direction)` pair").
#[derive(Debug, Clone)]
pub struct EdgeSortSpec {
    pub property: String,
    pub direction: Direction,
}

#[derive(Debug, Clone)]
pub struct EdgeDef {
    pub id: EdgeId,
    pub name: String,
    pub target_type: TypeId,
    pub reverse_name: String,
    pub reverse_id: EdgeId,
    pub sort: Option<EdgeSortSpec>,
}

/// One field of an index definition: either a property on the indexed
/// type, or an edge on the indexed type (contributing the target's
/// `NodeId` per §3 — this is what makes an index "cross-entity").
#[derive(Debug, Clone)]
pub enum IndexFieldKind {
    Property(String),
    Edge(EdgeId),
}

#[derive(Debug, Clone)]
pub struct IndexField {
    pub kind: IndexFieldKind,
    pub direction: Direction,
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub id: usize,
    pub fields: Vec<IndexField>,
}

impl IndexDef {
    /// True when this index's first field is the named edge — the
    /// cross-entity-coverage precondition of §4.4's
    /// `select_nested_index`.
    pub fn leads_with_edge(&self, edge: EdgeId) -> bool {
        matches!(self.fields.first(), Some(IndexField { kind: IndexFieldKind::Edge(e), .. }) if *e == edge)
    }
}

#[derive(Debug, Clone)]
pub enum RollupKind {
    Count {
        edge: EdgeId,
    },
    Traverse {
        edge: EdgeId,
        property: String,
    },
    First {
        edge: EdgeId,
        sort_field: String,
        direction: Direction,
        property: Option<String>,
    },
    Last {
        edge: EdgeId,
        sort_field: String,
        direction: Direction,
        property: Option<String>,
    },
}

impl RollupKind {
    pub fn edge(&self) -> EdgeId {
        match self {
            RollupKind::Count { edge }
            | RollupKind::Traverse { edge, .. }
            | RollupKind::First { edge, .. }
            | RollupKind::Last { edge, .. } => *edge,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RollupDef {
    pub name: String,
    pub kind: RollupKind,
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    pub id: TypeId,
    pub name: String,
    pub properties: Vec<PropertyDef>,
    pub edges: Vec<EdgeDef>,
    pub indexes: Vec<IndexDef>,
    pub rollups: Vec<RollupDef>,
}

impl TypeDef {
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn edge_by_name(&self, name: &str) -> Option<&EdgeDef> {
        self.edges.iter().find(|e| e.name == name)
    }

    pub fn edge_by_id(&self, id: EdgeId) -> Option<&EdgeDef> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn rollup(&self, name: &str) -> Option<&RollupDef> {
        self.rollups.iter().find(|r| r.name == name)
    }
}

/// The immutable, validated schema. Everything downstream (node store,
/// index manager, rollup cache, view engine) treats this as read-only for
/// the lifetime of the [`crate::graph::Graph`] it's loaded into.
#[derive(Debug)]
pub struct Schema {
    types: Vec<TypeDef>,
    type_by_name: HashMap<String, TypeId>,
    /// Map from an edge's global id back to the type it is declared on, so
    /// the rollup cascade (§4.5) can resolve `(source_type, edge)` without a
    /// linear scan.
    edge_owner: HashMap<EdgeId, TypeId>,
}

impl Schema {
    pub fn type_by_name(&self, name: &str) -> Option<TypeId> {
        self.type_by_name.get(name).copied()
    }

    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id.0 as usize]
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.iter()
    }

    pub fn edge_owner(&self, edge: EdgeId) -> TypeId {
        self.edge_owner[&edge]
    }

    /// Parses and validates a schema from its JSON wire form (§6).
    pub fn from_json(json: &serde_json::Value) -> Result<Schema> {
        let raw: Vec<RawType> = serde_json::from_value(json.clone())
            .map_err(|e| GraphError::InvalidJson(e.to_string()))?;
        Schema::from_raw(raw)
    }

    fn from_raw(raw: Vec<RawType>) -> Result<Schema> {
        let mut type_by_name = HashMap::new();
        for (idx, t) in raw.iter().enumerate() {
            if type_by_name
                .insert(t.name.clone(), TypeId(idx as u32))
                .is_some()
            {
                return Err(GraphError::InvalidJson(format!(
                    "duplicate type name '{}'",
                    t.name
                )));
            }
        }

        let mut next_edge_id = 0u32;
        let mut edge_owner = HashMap::new();
        // First pass: assign properties, edge ids (reverse resolved after),
        // index shells, rollup shells.
        let mut types: Vec<TypeDef> = Vec::with_capacity(raw.len());
        let mut edge_ids_by_type: Vec<HashMap<String, EdgeId>> = Vec::with_capacity(raw.len());

        for (idx, t) in raw.iter().enumerate() {
            let type_id = TypeId(idx as u32);
            let properties = t
                .properties
                .iter()
                .map(|p| {
                    Ok(PropertyDef {
                        name: p.name.clone(),
                        kind: PropertyKind::parse(&p.kind)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let mut ids_by_name = HashMap::new();
            let mut edges = Vec::with_capacity(t.edges.len());
            for e in &t.edges {
                let id = EdgeId(next_edge_id);
                next_edge_id += 1;
                edge_owner.insert(id, type_id);
                ids_by_name.insert(e.name.clone(), id);
                edges.push(e);
            }
            edge_ids_by_type.push(ids_by_name);

            types.push(TypeDef {
                id: type_id,
                name: t.name.clone(),
                properties,
                edges: Vec::new(), // filled below once reverse ids resolve
                indexes: Vec::new(),
                rollups: Vec::new(),
            });
            let _ = edges;
        }

        // Second pass: resolve edges (target type, reverse edge id).
        for (idx, t) in raw.iter().enumerate() {
            let type_id = TypeId(idx as u32);
            let mut edges = Vec::with_capacity(t.edges.len());
            for e in &t.edges {
                let target_type = *type_by_name.get(&e.target).ok_or_else(|| {
                    GraphError::InvalidJson(format!(
                        "edge '{}' on type '{}' targets unknown type '{}'",
                        e.name, t.name, e.target
                    ))
                })?;
                let reverse_id = *edge_ids_by_type[target_type.0 as usize]
                    .get(&e.reverse)
                    .ok_or_else(|| {
                        GraphError::InvalidJson(format!(
                            "edge '{}' on type '{}' has no reverse edge '{}' on type '{}'",
                            e.name, t.name, e.reverse, e.target
                        ))
                    })?;
                let id = edge_ids_by_type[idx][&e.name];
                edges.push(EdgeDef {
                    id,
                    name: e.name.clone(),
                    target_type,
                    reverse_name: e.reverse.clone(),
                    reverse_id,
                    sort: e
                        .sort
                        .as_ref()
                        .map(|s| EdgeSortSpec {
                            property: s.property.clone(),
                            direction: s.direction(),
                        }),
                });
            }
            types[type_id.0 as usize].edges = edges;
        }

        // Third pass: indexes (need edge ids resolved).
        for (idx, t) in raw.iter().enumerate() {
            let mut indexes = Vec::with_capacity(t.indexes.len());
            for (index_id, idx_spec) in t.indexes.iter().enumerate() {
                let mut fields = Vec::with_capacity(idx_spec.fields.len());
                for f in &idx_spec.fields {
                    let kind = match f.kind.as_str() {
                        "property" => IndexFieldKind::Property(f.field.clone()),
                        "edge" => {
                            let edge_id = *edge_ids_by_type[idx].get(&f.field).ok_or_else(|| {
                                GraphError::InvalidJson(format!(
                                    "index on type '{}' references unknown edge '{}'",
                                    t.name, f.field
                                ))
                            })?;
                            IndexFieldKind::Edge(edge_id)
                        }
                        other => {
                            return Err(GraphError::InvalidJson(format!(
                                "unknown index field kind '{other}'"
                            )))
                        }
                    };
                    fields.push(IndexField {
                        kind,
                        direction: f.direction(),
                    });
                }
                indexes.push(IndexDef {
                    id: index_id,
                    fields,
                });
            }
            types[idx].indexes = indexes;
        }

        // Fourth pass: rollups.
        for (idx, t) in raw.iter().enumerate() {
            let mut rollups = Vec::with_capacity(t.rollups.len());
            for r in &t.rollups {
                let edge_id = *edge_ids_by_type[idx].get(&r.edge).ok_or_else(|| {
                    GraphError::InvalidJson(format!(
                        "rollup '{}' on type '{}' references unknown edge '{}'",
                        r.name, t.name, r.edge
                    ))
                })?;
                let kind = match r.kind.as_str() {
                    "count" => RollupKind::Count { edge: edge_id },
                    "traverse" => RollupKind::Traverse {
                        edge: edge_id,
                        property: r.property.clone().ok_or_else(|| {
                            GraphError::InvalidJson(format!(
                                "traverse rollup '{}' missing 'property'",
                                r.name
                            ))
                        })?,
                    },
                    "first" | "last" => {
                        let sort_field = r.sort_field.clone().ok_or_else(|| {
                            GraphError::InvalidJson(format!(
                                "{} rollup '{}' missing 'sort_field'",
                                r.kind, r.name
                            ))
                        })?;
                        let direction = r.direction();
                        if r.kind == "first" {
                            RollupKind::First {
                                edge: edge_id,
                                sort_field,
                                direction,
                                property: r.property.clone(),
                            }
                        } else {
                            RollupKind::Last {
                                edge: edge_id,
                                sort_field,
                                direction,
                                property: r.property.clone(),
                            }
                        }
                    }
                    other => {
                        return Err(GraphError::InvalidJson(format!(
                            "unknown rollup kind '{other}'"
                        )))
                    }
                };
                rollups.push(RollupDef {
                    name: r.name.clone(),
                    kind,
                });
            }
            types[idx].rollups = rollups;
        }

        Ok(Schema {
            types,
            type_by_name,
            edge_owner,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawType {
    name: String,
    #[serde(default)]
    properties: Vec<RawProperty>,
    #[serde(default)]
    edges: Vec<RawEdge>,
    #[serde(default)]
    indexes: Vec<RawIndex>,
    #[serde(default)]
    rollups: Vec<RawRollup>,
}

#[derive(Debug, Deserialize)]
struct RawProperty {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RawEdge {
    name: String,
    target: String,
    reverse: String,
    #[serde(default)]
    sort: Option<RawSort>,
}

#[derive(Debug, Deserialize)]
struct RawSort {
    property: String,
    #[serde(default)]
    direction: Option<String>,
}

impl RawSort {
    fn direction(&self) -> Direction {
        parse_direction(self.direction.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct RawIndexField {
    kind: String,
    field: String,
    #[serde(default)]
    direction: Option<String>,
}

impl RawIndexField {
    fn direction(&self) -> Direction {
        parse_direction(self.direction.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct RawIndex {
    fields: Vec<RawIndexField>,
}

#[derive(Debug, Deserialize)]
struct RawRollup {
    name: String,
    kind: String,
    edge: String,
    #[serde(default)]
    property: Option<String>,
    #[serde(default)]
    sort_field: Option<String>,
    #[serde(default)]
    direction: Option<String>,
}

impl RawRollup {
    fn direction(&self) -> Direction {
        parse_direction(self.direction.as_deref())
    }
}

fn parse_direction(s: Option<&str>) -> Direction {
    match s {
        Some("desc") => Direction::Desc,
        _ => Direction::Asc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread_stack_schema() -> serde_json::Value {
        serde_json::json!([
            {
                "name": "Thread",
                "rollups": [
                    {"name": "latest", "kind": "first", "edge": "stacks", "sort_field": "timestamp", "direction": "desc", "property": "timestamp"}
                ],
                "edges": [
                    {"name": "stacks", "target": "Stack", "reverse": "thread"}
                ]
            },
            {
                "name": "Stack",
                "properties": [{"name": "timestamp", "type": "int"}],
                "edges": [
                    {"name": "thread", "target": "Thread", "reverse": "stacks"}
                ],
                "indexes": [
                    {"fields": [
                        {"kind": "edge", "field": "thread", "direction": "asc"},
                        {"kind": "property", "field": "timestamp", "direction": "desc"}
                    ]}
                ]
            }
        ])
    }

    #[test]
    fn parses_and_resolves_reverse_edges() {
        let schema = Schema::from_json(&thread_stack_schema()).unwrap();
        let thread = schema.type_by_name("Thread").unwrap();
        let stack = schema.type_by_name("Stack").unwrap();
        let stacks_edge = schema.type_def(thread).edge_by_name("stacks").unwrap();
        let thread_edge = schema.type_def(stack).edge_by_name("thread").unwrap();
        assert_eq!(stacks_edge.reverse_id, thread_edge.id);
        assert_eq!(thread_edge.reverse_id, stacks_edge.id);
        assert_eq!(stacks_edge.target_type, stack);
        assert_eq!(thread_edge.target_type, thread);
    }

    #[test]
    fn rejects_unknown_reverse_edge() {
        let mut json = thread_stack_schema();
        json[1]["edges"][0]["reverse"] = serde_json::json!("nonexistent");
        assert!(Schema::from_json(&json).is_err());
    }

    #[test]
    fn cross_entity_index_leads_with_edge() {
        let schema = Schema::from_json(&thread_stack_schema()).unwrap();
        let stack = schema.type_by_name("Stack").unwrap();
        let thread_edge = schema.type_def(stack).edge_by_name("thread").unwrap().id;
        let index = &schema.type_def(stack).indexes[0];
        assert!(index.leads_with_edge(thread_edge));
    }
}
