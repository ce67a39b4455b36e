//! # livegraph - In-Memory Reactive Property Graph
//!
//! livegraph is an in-memory, schema-driven property graph with
//! materialized, viewport-bounded reactive views, B+-tree secondary
//! indexes, and cascading rollup fields.
//!
//! ## Quick Start
//!
//! ```rust
//! use livegraph::{Graph, Value};
//! use serde_json::json;
//!
//! let schema = json!([
//!     {
//!         "name": "User",
//!         "properties": [{"name": "name", "type": "string"}],
//!         "edges": [{"name": "posts", "target": "Post", "reverse": "author"}]
//!     },
//!     {
//!         "name": "Post",
//!         "properties": [{"name": "title", "type": "string"}],
//!         "edges": [{"name": "author", "target": "User", "reverse": "posts"}]
//!     }
//! ]);
//!
//! let graph = Graph::open(&schema)?;
//! let alice = graph.insert("User", &[("name", Value::String("alice".into()))])?;
//! let post = graph.insert("Post", &[("title", Value::String("hello".into()))])?;
//! graph.link(alice, "posts", post)?;
//! # Ok::<(), livegraph::GraphError>(())
//! ```
//!
//! ## Features
//!
//! - **Reactive views**: a live, viewport-bounded tree of query results that
//!   emits enter/leave/change/move deltas as the graph mutates, always
//!   observably equivalent to recomputing the query from scratch.
//! - **Secondary indexes**: compound-key B+-trees with coverage scoring,
//!   including cross-entity indexes prefixed by an edge.
//! - **Rollup fields**: count/traverse/first/last fields that cascade
//!   through the rollup dependency graph and are visible to sorts,
//!   filters, and index encoding like any other property.
//! - **Integrity verification**: an on-demand consistency sweep over edges,
//!   indexes, and the rollup cache's inverted edge index.
//!
//! ## Architecture
//!
//! livegraph is organized as a stack of layers, each trusting the one below
//! it:
//! - **Schema**: parses and validates the type/edge/index/rollup
//!   declarations once, at load time.
//! - **Node store**: owns every node and its per-edge sorted target lists,
//!   the single source of truth for edge-target order.
//! - **Index manager / rollup cache**: compound-key indexes and cascading
//!   rollups layered on top of the node store.
//! - **Change tracker / view engine**: turns raw mutations into the delta
//!   events a live view observes.
//! - **Graph**: the public facade tying the above together behind a single
//!   `Rc<RefCell<_>>`-backed handle.

pub mod btree;
pub mod change_tracker;
pub mod compound_key;
pub mod config;
pub mod error;
pub mod graph;
pub mod index_manager;
pub mod metrics;
pub mod node_store;
pub mod primitives;
pub mod query;
pub mod rollup;
pub mod schema;
pub mod tree_path;
pub mod value;
pub mod verify;
pub mod view;
pub mod watch;

// Re-export the main public API.
pub use crate::change_tracker::{SubscriptionId, ViewId};
pub use crate::config::{ConfigProfile, GraphConfig};
pub use crate::error::{GraphError, Result};
pub use crate::graph::{Graph, View};
pub use crate::index_manager::{Filter, FilterOp, SortField};
pub use crate::metrics::PerformanceMetrics;
pub use crate::node_store::{Node, NodeId};
pub use crate::query::{EdgeSelection, Query, RawEdgeSelection, RawQuery};
pub use crate::schema::{EdgeId, Schema, TypeId};
pub use crate::value::{Direction, Value};
pub use crate::verify::{VerifyCounts, VerifyFinding, VerifyReport, VerifySeverity};
pub use crate::view::Item;
pub use crate::watch::NodeWatch;
