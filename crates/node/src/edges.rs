//! Ordered, duplicate-free half-edge storage and edge effect checks.
//!
//! The edge collection is the heart of the edge processor: insertion order
//! is preserved for replay determinism, duplicates are forbidden, and both
//! membership tests and the effect checks that guard journal writes are
//! O(1).

use std::collections::HashSet;

use strandgraph_types::{EdgeEvent, HalfEdge};

/// An ordered multi-set of half-edges with constant-time membership.
///
/// The `Vec` carries insertion order; the `HashSet` mirrors it for
/// membership. The two are kept in lockstep by the mutation methods.
#[derive(Debug, Default, Clone)]
pub struct EdgeCollection {
    ordered: Vec<HalfEdge>,
    present: HashSet<HalfEdge>,
}

impl EdgeCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the half-edge is present.
    pub fn contains(&self, edge: &HalfEdge) -> bool {
        self.present.contains(edge)
    }

    /// Adds a half-edge at the end of the order.
    ///
    /// Returns `false` without modification if the edge is already present.
    pub fn add(&mut self, edge: HalfEdge) -> bool {
        if !self.present.insert(edge.clone()) {
            return false;
        }
        self.ordered.push(edge);
        true
    }

    /// Removes a half-edge.
    ///
    /// Returns `false` without modification if the edge is absent.
    pub fn remove(&mut self, edge: &HalfEdge) -> bool {
        if !self.present.remove(edge) {
            return false;
        }
        // O(n), but removals are rare relative to lookups.
        if let Some(pos) = self.ordered.iter().position(|e| e == edge) {
            self.ordered.remove(pos);
        }
        true
    }

    /// Iterates half-edges in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &HalfEdge> {
        self.ordered.iter()
    }

    /// Number of half-edges held.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Returns `true` if no half-edges are held.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Returns whether applying `event` would change the collection.
    ///
    /// An `Added` has no effect if the half-edge is already present; a
    /// `Removed` has no effect if it is absent.
    pub fn event_has_effect(&self, event: &EdgeEvent) -> bool {
        match event {
            EdgeEvent::Added(edge) => !self.contains(edge),
            EdgeEvent::Removed(edge) => self.contains(edge),
        }
    }

    /// Applies an edge event. Returns `true` if the collection changed.
    pub fn apply(&mut self, event: &EdgeEvent) -> bool {
        match event {
            EdgeEvent::Added(edge) => self.add(edge.clone()),
            EdgeEvent::Removed(edge) => self.remove(edge),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use strandgraph_types::{EdgeDirection, QuineId};

    use super::*;

    fn edge(label: &str, peer: u64) -> HalfEdge {
        HalfEdge::new(EdgeDirection::Outgoing, label, QuineId::from_u64(peer))
    }

    #[test]
    fn test_add_preserves_insertion_order() {
        let mut edges = EdgeCollection::new();
        assert!(edges.add(edge("c", 3)));
        assert!(edges.add(edge("a", 1)));
        assert!(edges.add(edge("b", 2)));

        let labels: Vec<_> = edges.iter().map(|e| e.label.as_str().to_string()).collect();
        assert_eq!(labels, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_duplicate_add_is_rejected() {
        let mut edges = EdgeCollection::new();
        assert!(edges.add(edge("knows", 1)));
        assert!(!edges.add(edge("knows", 1)));
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut edges = EdgeCollection::new();
        assert!(!edges.remove(&edge("knows", 1)));
        assert!(edges.is_empty());
    }

    #[test]
    fn test_remove_keeps_mirror_consistent() {
        let mut edges = EdgeCollection::new();
        edges.add(edge("a", 1));
        edges.add(edge("b", 2));
        assert!(edges.remove(&edge("a", 1)));
        assert!(!edges.contains(&edge("a", 1)));
        assert!(edges.contains(&edge("b", 2)));
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_effect_checks() {
        let mut edges = EdgeCollection::new();
        let e = edge("knows", 42);

        assert!(edges.event_has_effect(&EdgeEvent::Added(e.clone())));
        assert!(!edges.event_has_effect(&EdgeEvent::Removed(e.clone())));

        edges.add(e.clone());
        assert!(!edges.event_has_effect(&EdgeEvent::Added(e.clone())));
        assert!(edges.event_has_effect(&EdgeEvent::Removed(e)));
    }

    #[test]
    fn test_distinct_directions_are_distinct_edges() {
        let mut edges = EdgeCollection::new();
        let out = HalfEdge::new(EdgeDirection::Outgoing, "x", QuineId::from_u64(1));
        let incoming = HalfEdge::new(EdgeDirection::Incoming, "x", QuineId::from_u64(1));
        assert!(edges.add(out));
        assert!(edges.add(incoming));
        assert_eq!(edges.len(), 2);
    }
}
