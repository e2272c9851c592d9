//! Half-edges: one node's view of a graph edge.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::QuineId;

/// Direction of a half-edge relative to the node that holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeDirection {
    /// Edge points from this node to the peer.
    Outgoing,
    /// Edge points from the peer to this node.
    Incoming,
    /// Edge has no orientation.
    Undirected,
}

impl EdgeDirection {
    /// The direction of the same edge as seen from the peer.
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            EdgeDirection::Outgoing => EdgeDirection::Incoming,
            EdgeDirection::Incoming => EdgeDirection::Outgoing,
            EdgeDirection::Undirected => EdgeDirection::Undirected,
        }
    }
}

/// Label classifying an edge (e.g. `knows`, `contains`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeLabel(String);

impl EdgeLabel {
    /// Creates a label from any string-like value.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Returns the label as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EdgeLabel {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One node's record of an edge: direction, label, and the peer's id.
///
/// The full edge exists as two matching half-edges, one on each endpoint.
/// Peers are addressed by [`QuineId`] only, never by reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HalfEdge {
    /// Direction relative to the holding node.
    pub direction: EdgeDirection,
    /// Edge label.
    pub label: EdgeLabel,
    /// The node on the far side.
    pub peer: QuineId,
}

impl HalfEdge {
    /// Creates a half-edge.
    pub fn new(direction: EdgeDirection, label: impl Into<EdgeLabel>, peer: QuineId) -> Self {
        Self { direction, label: label.into(), peer }
    }

    /// The matching half-edge as stored on the peer, given this node's id.
    #[must_use]
    pub fn reflected(&self, self_qid: QuineId) -> HalfEdge {
        HalfEdge {
            direction: self.direction.reversed(),
            label: self.label.clone(),
            peer: self_qid,
        }
    }
}

impl From<String> for EdgeLabel {
    fn from(label: String) -> Self {
        Self(label)
    }
}
