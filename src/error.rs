//! Error kinds surfaced by the core graph engine.
//!
//! Mutations and query/view construction return these to the caller. They
//! never propagate through the reactive event path (§7 of the design notes):
//! a panic inside a subscriber callback is caught at the change-tracker
//! boundary and logged, not turned into one of these.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node {0} not found")]
    NodeNotFound(u64),

    #[error("edge target not found: {0}")]
    EdgeTargetNotFound(u64),

    #[error("edge '{edge}' not found on type '{type_name}'")]
    EdgeNotFound { type_name: String, edge: String },

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("unknown property: {0}")]
    UnknownProperty(String),

    #[error("no index covers this query")]
    NoIndexCoverage,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("invalid schema/query JSON: {0}")]
    InvalidJson(String),

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("empty path")]
    EmptyPath,

    #[error("missing root id in path")]
    MissingRootId,

    #[error("malformed path segment: {0}")]
    MalformedSegment(String),

    #[error("unknown edge: {0}")]
    UnknownEdge(String),

    #[error("node {0} not registered in any view subscription")]
    NodeNotInView(u64),

    #[error("out of memory")]
    OutOfMemory,
}
