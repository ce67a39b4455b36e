//! Parses tree-path strings of the form `type:id(/edge(:id))*` (§4.9):
//! a path ending in `:id` addresses a node, one ending in `/edge`
//! addresses an edge on the preceding node.

use crate::error::{GraphError, Result};
use crate::node_store::NodeId;

/// One segment of a parsed path: a typed node, or a bare edge name hung
/// off the previous node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Node { type_name: String, id: NodeId },
    Edge { name: String, id: Option<NodeId> },
}

/// A fully parsed path: the root node, followed by zero or more edge/node
/// hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreePath {
    pub segments: Vec<PathSegment>,
}

impl TreePath {
    /// `type:id(/edge(:id))*`.
    pub fn parse(path: &str) -> Result<TreePath> {
        if path.is_empty() {
            return Err(GraphError::EmptyPath);
        }
        let mut parts = path.split('/');

        let root = parts.next().unwrap();
        let (type_name, id) = root.split_once(':').ok_or(GraphError::MissingRootId)?;
        if type_name.is_empty() {
            return Err(GraphError::MalformedSegment(root.to_string()));
        }
        let id = parse_id(id)?;
        let mut segments = vec![PathSegment::Node {
            type_name: type_name.to_string(),
            id: NodeId(id),
        }];

        for part in parts {
            if part.is_empty() {
                return Err(GraphError::MalformedSegment(path.to_string()));
            }
            match part.split_once(':') {
                Some((name, id_str)) => {
                    if name.is_empty() {
                        return Err(GraphError::MalformedSegment(part.to_string()));
                    }
                    let id = parse_id(id_str)?;
                    segments.push(PathSegment::Edge {
                        name: name.to_string(),
                        id: Some(NodeId(id)),
                    });
                }
                None => {
                    segments.push(PathSegment::Edge {
                        name: part.to_string(),
                        id: None,
                    });
                }
            }
        }

        Ok(TreePath { segments })
    }
}

fn parse_id(raw: &str) -> Result<u64> {
    if raw.is_empty() {
        return Err(GraphError::MissingRootId);
    }
    raw.parse::<u64>()
        .map_err(|_| GraphError::InvalidNodeId(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_node() {
        let path = TreePath::parse("Thread:12").unwrap();
        assert_eq!(
            path.segments,
            vec![PathSegment::Node {
                type_name: "Thread".to_string(),
                id: NodeId(12)
            }]
        );
    }

    #[test]
    fn parses_node_then_edge() {
        let path = TreePath::parse("Thread:12/stacks").unwrap();
        assert_eq!(path.segments.len(), 2);
        assert_eq!(
            path.segments[1],
            PathSegment::Edge {
                name: "stacks".to_string(),
                id: None
            }
        );
    }

    #[test]
    fn parses_node_edge_node() {
        let path = TreePath::parse("Thread:12/stacks:5").unwrap();
        assert_eq!(
            path.segments[1],
            PathSegment::Edge {
                name: "stacks".to_string(),
                id: Some(NodeId(5))
            }
        );
    }

    #[test]
    fn rejects_empty_path() {
        assert!(matches!(TreePath::parse(""), Err(GraphError::EmptyPath)));
    }

    #[test]
    fn rejects_missing_root_id() {
        assert!(matches!(TreePath::parse("Thread"), Err(GraphError::MissingRootId)));
    }

    #[test]
    fn rejects_non_numeric_id() {
        assert!(matches!(
            TreePath::parse("Thread:abc"),
            Err(GraphError::InvalidNodeId(_))
        ));
    }

    #[test]
    fn rejects_malformed_segment() {
        assert!(matches!(
            TreePath::parse("Thread:12//stacks"),
            Err(GraphError::MalformedSegment(_))
        ));
    }
}
