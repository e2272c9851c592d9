//! Builders for test event batches.

use serde::Serialize;
use strandgraph_types::{
    EdgeDirection, EdgeEvent, HalfEdge, PropertyEvent, PropertyValue, QuineId,
};

/// A `PropertySet` carrying any serializable value.
pub fn set_property<T: Serialize>(key: &str, value: &T) -> PropertyEvent {
    PropertyEvent::Set {
        key: key.into(),
        value: PropertyValue::of(value).expect("test value must encode"),
    }
}

/// A `PropertyRemoved`; the recorded previous value is canonicalized by the
/// node, so the placeholder here never reaches the journal.
pub fn remove_property(key: &str) -> PropertyEvent {
    PropertyEvent::Removed { key: key.into(), previous: PropertyValue::from_bytes(Vec::new()) }
}

/// An `EdgeAdded` for an outgoing labeled edge.
pub fn add_edge(label: &str, peer: QuineId) -> EdgeEvent {
    EdgeEvent::Added(HalfEdge::new(EdgeDirection::Outgoing, label, peer))
}

/// An `EdgeRemoved` matching [`add_edge`].
pub fn remove_edge(label: &str, peer: QuineId) -> EdgeEvent {
    EdgeEvent::Removed(HalfEdge::new(EdgeDirection::Outgoing, label, peer))
}
