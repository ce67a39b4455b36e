//! The validated query value §3/§6 describe: a root type (optionally a
//! specific node, optionally virtual), flat filters/sorts, and a tree of
//! nested edge selections each with their own filters/sorts/limit.
//!
//! Parsing/validation happens once, at [`Query::validate`] time, against a
//! [`Schema`] — everything downstream (the view engine) trusts a `Query`
//! to name real types, fields, and edges.

use serde::Deserialize;

use crate::error::{GraphError, Result};
use crate::index_manager::{Filter, FilterOp, SortField};
use crate::node_store::NodeId;
use crate::schema::{EdgeId, Schema, TypeId};
use crate::value::{Direction, Value};

/// One nested edge traversal: which edge to follow, and the filters/sorts/
/// limit/recursion-flag/nested-selections that apply to its targets (§3).
#[derive(Debug, Clone)]
pub struct EdgeSelection {
    pub edge_name: String,
    pub edge_id: EdgeId,
    pub target_type: TypeId,
    pub filters: Vec<Filter>,
    pub sorts: Vec<SortField>,
    pub limit: Option<usize>,
    /// §1 Non-goals: "recursive (cycle-admitting) queries that aren't
    /// expressed through explicit nested edge selections" are out of scope;
    /// this flag exists so a query can *name* a self-referential edge
    /// selection without the engine ever walking it more than one level
    /// implicitly — recursion always means another explicit nested
    /// `EdgeSelection`, never an implicit fixed-point.
    pub recursive: bool,
    pub nested: Vec<EdgeSelection>,
}

/// A fully validated, schema-bound query, ready to hand to
/// [`crate::view::View::new`] (§3 "Query (validated)").
#[derive(Debug, Clone)]
pub struct Query {
    pub root_type: TypeId,
    pub root_id: Option<NodeId>,
    pub virtual_root: bool,
    pub filters: Vec<Filter>,
    pub sorts: Vec<SortField>,
    pub edges: Vec<EdgeSelection>,
}

impl Query {
    /// Validates a query built programmatically (the structured-value path
    /// of §6); JSON queries go through [`Query::from_json`] first.
    pub fn validate(raw: RawQuery, schema: &Schema) -> Result<Query> {
        let root_type = schema
            .type_by_name(&raw.root)
            .ok_or_else(|| GraphError::UnknownType(raw.root.clone()))?;

        let filters = validate_filters(root_type, &raw.filters, schema)?;
        let sorts = validate_sorts(root_type, &raw.sort, schema)?;
        let edges = validate_edges(root_type, &raw.edges, schema)?;

        if raw.virtual_root && raw.id.is_none() {
            return Err(GraphError::InvalidQuery(
                "virtual=true requires an explicit root id".to_string(),
            ));
        }

        Ok(Query {
            root_type,
            root_id: raw.id.map(NodeId),
            virtual_root: raw.virtual_root,
            filters,
            sorts,
            edges,
        })
    }

    /// Parses and validates a query from its JSON wire form (§6).
    pub fn from_json(json: &serde_json::Value, schema: &Schema) -> Result<Query> {
        let raw: RawQuery =
            serde_json::from_value(json.clone()).map_err(|e| GraphError::InvalidJson(e.to_string()))?;
        Query::validate(raw, schema)
    }
}

fn validate_filters(type_id: TypeId, raw: &[RawFilter], schema: &Schema) -> Result<Vec<Filter>> {
    let type_def = schema.type_def(type_id);
    raw.iter()
        .map(|f| {
            if type_def.property(&f.path).is_none() && type_def.rollup(&f.path).is_none() {
                return Err(GraphError::UnknownProperty(f.path.clone()));
            }
            Ok(Filter {
                field: f.path.clone(),
                op: parse_filter_op(&f.op)?,
                value: (&f.value).into(),
            })
        })
        .collect()
}

fn validate_sorts(type_id: TypeId, raw: &[RawSort], schema: &Schema) -> Result<Vec<SortField>> {
    let type_def = schema.type_def(type_id);
    raw.iter()
        .map(|s| {
            if type_def.property(&s.field).is_none() && type_def.rollup(&s.field).is_none() {
                return Err(GraphError::UnknownProperty(s.field.clone()));
            }
            Ok(SortField {
                field: s.field.clone(),
                direction: match s.direction.as_deref() {
                    Some("desc") => Direction::Desc,
                    _ => Direction::Asc,
                },
            })
        })
        .collect()
}

fn validate_edges(type_id: TypeId, raw: &[RawEdgeSelection], schema: &Schema) -> Result<Vec<EdgeSelection>> {
    let type_def = schema.type_def(type_id);
    raw.iter()
        .map(|e| {
            let edge_def = type_def
                .edge_by_name(&e.name)
                .ok_or_else(|| GraphError::UnknownEdge(e.name.clone()))?;
            let target_type = edge_def.target_type;
            Ok(EdgeSelection {
                edge_name: e.name.clone(),
                edge_id: edge_def.id,
                target_type,
                filters: validate_filters(target_type, &e.filters, schema)?,
                sorts: validate_sorts(target_type, &e.sort, schema)?,
                limit: e.limit,
                recursive: e.recursive,
                nested: validate_edges(target_type, &e.edges, schema)?,
            })
        })
        .collect()
}

/// The unvalidated wire shape of a query (§6): `root`, optional `id`,
/// `virtual`, `filters`, `sort` (long form only here — the "short-form
/// string list" §6 mentions is a binding-side convenience that expands to
/// this shape before reaching the core), and nested `edges`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuery {
    pub root: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, rename = "virtual")]
    pub virtual_root: bool,
    #[serde(default)]
    pub filters: Vec<RawFilter>,
    #[serde(default)]
    pub sort: Vec<RawSort>,
    #[serde(default)]
    pub edges: Vec<RawEdgeSelection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFilter {
    pub path: String,
    pub op: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSort {
    pub field: String,
    #[serde(default)]
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEdgeSelection {
    pub name: String,
    #[serde(default)]
    pub filters: Vec<RawFilter>,
    #[serde(default)]
    pub sort: Vec<RawSort>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub edges: Vec<RawEdgeSelection>,
}

impl RawQuery {
    pub fn root(root: impl Into<String>) -> Self {
        RawQuery {
            root: root.into(),
            id: None,
            virtual_root: false,
            filters: Vec::new(),
            sort: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn virtual_at(mut self, id: u64) -> Self {
        self.id = Some(id);
        self.virtual_root = true;
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.sort.push(RawSort {
            field: field.into(),
            direction: Some(match direction {
                Direction::Asc => "asc".to_string(),
                Direction::Desc => "desc".to_string(),
            }),
        });
        self
    }

    pub fn filter(mut self, path: impl Into<String>, op: &str, value: Value) -> Self {
        self.filters.push(RawFilter {
            path: path.into(),
            op: op.to_string(),
            value: json_of(&value),
        });
        self
    }

    pub fn with_edge(mut self, edge: RawEdgeSelection) -> Self {
        self.edges.push(edge);
        self
    }
}

impl RawEdgeSelection {
    pub fn named(name: impl Into<String>) -> Self {
        RawEdgeSelection {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.sort.push(RawSort {
            field: field.into(),
            direction: Some(match direction {
                Direction::Asc => "asc".to_string(),
                Direction::Desc => "desc".to_string(),
            }),
        });
        self
    }
}

fn json_of(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
    }
}

fn parse_filter_op(op: &str) -> Result<FilterOp> {
    match op {
        "eq" => Ok(FilterOp::Eq),
        "gt" => Ok(FilterOp::Gt),
        "gte" => Ok(FilterOp::Gte),
        "lt" => Ok(FilterOp::Lt),
        "lte" => Ok(FilterOp::Lte),
        other => Err(GraphError::InvalidQuery(format!("unknown filter op '{other}'"))),
    }
}
