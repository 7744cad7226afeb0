//! Property-graph DTOs: [`GraphNode`], [`GraphEdge`], and traversal
//! [`GraphPath`]s. Shape is grounded on the teacher's `Node`/`Relationship`/
//! `Path` triad (`model::node`, `model::relationship`, `model::path`),
//! generalized from opaque `u64` ids to the string ids spec.md's data
//! model requires (nodes/edges live in relational tables keyed by a
//! caller-supplied `id`, not an auto-incrementing backend counter).

use super::PropertyMap;
use serde::{Deserialize, Serialize};

/// A node in the property graph. Unique by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub properties: PropertyMap,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            properties: PropertyMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<super::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&super::Value> {
        self.properties.get(key)
    }
}

/// A directed edge. Identity is `(from, to, type)` — spec.md §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    #[serde(rename = "type")]
    pub edge_type: String,
    pub from: String,
    pub to: String,
    pub properties: PropertyMap,
}

impl GraphEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, edge_type: impl Into<String>) -> Self {
        Self {
            edge_type: edge_type.into(),
            from: from.into(),
            to: to.into(),
            properties: PropertyMap::new(),
        }
    }

    /// The edge's identity key, used for dedup and upsert semantics.
    pub fn key(&self) -> (String, String, String) {
        (self.from.clone(), self.to.clone(), self.edge_type.clone())
    }

    /// The node id at the other end of the edge from `node_id`, if it
    /// participates in this edge at all.
    pub fn other_node(&self, node_id: &str) -> Option<&str> {
        if self.from == node_id {
            Some(&self.to)
        } else if self.to == node_id {
            Some(&self.from)
        } else {
            None
        }
    }
}

/// Traversal direction — spec.md §3 invariant 8, §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
            Direction::Both => "both",
        }
    }
}

/// The actual deserialization boundary for direction validation (spec.md
/// §4.6 step 1, §8 scenario 8): any value outside the closed set — wrong
/// case, injection payload, empty string — is rejected with
/// `Invalid direction: <v>` before any SQL is assembled. Driven from
/// [`crate::graph::GraphStore::traverse`]/`shortest_path`/`find_connected`,
/// which take the raw caller string and convert here rather than asking
/// callers to pre-validate into a typed [`Direction`] themselves.
impl std::convert::TryFrom<&str> for Direction {
    type Error = crate::Error;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "outgoing" => Ok(Direction::Outgoing),
            "incoming" => Ok(Direction::Incoming),
            "both" => Ok(Direction::Both),
            other => Err(crate::Error::BuildError(format!("INVALID_VALUE: Invalid direction: {other}"))),
        }
    }
}

/// A path in the graph: node -[edge]-> node -[edge]-> node ...
///
/// Always has exactly one more node than edges (teacher's `Path` invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPath {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl GraphPath {
    pub fn single(node: GraphNode) -> Self {
        Self { nodes: vec![node], edges: Vec::new() }
    }

    pub fn depth(&self) -> usize {
        self.edges.len()
    }

    pub fn start(&self) -> &GraphNode {
        self.nodes.first().expect("GraphPath always has at least one node")
    }

    pub fn end(&self) -> &GraphNode {
        self.nodes.last().expect("GraphPath always has at least one node")
    }

    pub fn append(&mut self, edge: GraphEdge, node: GraphNode) {
        self.edges.push(edge);
        self.nodes.push(node);
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// All distinct node ids touched by this path.
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_try_from_rejects_anything_outside_the_closed_set() {
        use std::convert::TryFrom;
        assert_eq!(Direction::try_from("outgoing").unwrap(), Direction::Outgoing);
        assert!(Direction::try_from("Outgoing").is_err());
        assert!(Direction::try_from("'; DROP TABLE nodes; --").is_err());
        assert!(Direction::try_from("").is_err());
    }

    #[test]
    fn path_append_and_depth() {
        let mut path = GraphPath::single(GraphNode::new("a", "Person"));
        path.append(GraphEdge::new("a", "b", "KNOWS"), GraphNode::new("b", "Person"));
        assert_eq!(path.depth(), 1);
        assert_eq!(path.start().id, "a");
        assert_eq!(path.end().id, "b");
        assert!(path.contains_node("a"));
        assert!(!path.contains_node("z"));
    }

    #[test]
    fn edge_key_and_other_node() {
        let e = GraphEdge::new("a", "b", "KNOWS");
        assert_eq!(e.key(), ("a".to_string(), "b".to_string(), "KNOWS".to_string()));
        assert_eq!(e.other_node("a"), Some("b"));
        assert_eq!(e.other_node("b"), Some("a"));
        assert_eq!(e.other_node("z"), None);
    }
}
