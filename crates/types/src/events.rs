//! The typed event model: everything a node journals and applies.
//!
//! Three event families exist:
//!
//! - [`PropertyEvent`] — set or remove a property on the node.
//! - [`EdgeEvent`] — add or remove a half-edge.
//! - [`DomainIndexEvent`] — standing-query subscription lifecycle and
//!   subscription results.
//!
//! Property and edge events together form the [`NodeChangeEvent`] stream;
//! the union of all three is [`NodeEvent`], the full journal record type.
//! Each family has a stable wire tag so journal records remain decodable
//! across versions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::half_edge::HalfEdge;
use crate::ids::{DgnId, QuineId, StandingQueryId};
use crate::property::{PropertyKey, PropertyValue};

/// Journal tag for property events.
pub const TAG_PROPERTY: u8 = 1;
/// Journal tag for edge events.
pub const TAG_EDGE: u8 = 2;
/// Journal tag for domain-index events.
pub const TAG_DOMAIN_INDEX: u8 = 3;

/// A mutation of one property on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyEvent {
    /// The property was set to a new value.
    Set {
        /// Property name.
        key: PropertyKey,
        /// New value.
        value: PropertyValue,
    },
    /// The property was removed.
    Removed {
        /// Property name.
        key: PropertyKey,
        /// Value the property held before removal.
        previous: PropertyValue,
    },
}

impl PropertyEvent {
    /// The property key this event touches.
    pub fn key(&self) -> &PropertyKey {
        match self {
            PropertyEvent::Set { key, .. } | PropertyEvent::Removed { key, .. } => key,
        }
    }
}

/// A mutation of one half-edge on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeEvent {
    /// The half-edge was added.
    Added(HalfEdge),
    /// The half-edge was removed.
    Removed(HalfEdge),
}

impl EdgeEvent {
    /// The half-edge this event touches.
    pub fn half_edge(&self) -> &HalfEdge {
        match self {
            EdgeEvent::Added(e) | EdgeEvent::Removed(e) => e,
        }
    }
}

/// The party a domain-graph subscription reports back to.
///
/// Either a peer node (addressed by id) propagating a larger pattern, or a
/// top-level standing query consuming final results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubscriberRef {
    /// A peer node subscribed on behalf of a parent pattern fragment.
    Node(QuineId),
    /// A registered standing query consuming results directly.
    Query(StandingQueryId),
}

/// Standing-query subscription lifecycle and result events.
///
/// These are journaled on their own logical stream so that node-change
/// replay and subscription replay can be toggled independently on wake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainIndexEvent {
    /// A subscriber registered interest in this node's answer for a DGN.
    CreateSubscription {
        /// Who to notify on answer changes.
        subscriber: SubscriberRef,
        /// The pattern fragment being watched.
        dgn_id: DgnId,
        /// Standing queries this subscription serves.
        related_queries: BTreeSet<StandingQueryId>,
    },
    /// A subscriber withdrew its interest in a DGN.
    CancelSubscription {
        /// The subscriber being removed.
        subscriber: SubscriberRef,
        /// The pattern fragment no longer watched.
        dgn_id: DgnId,
    },
    /// A peer reported its answer for a DGN this node depends on.
    SubscriptionResult {
        /// The peer that evaluated the child fragment.
        from: QuineId,
        /// The child fragment.
        dgn_id: DgnId,
        /// Whether the peer currently matches it.
        result: bool,
    },
    /// This node reported its answer for a DGN to a standing query.
    StandingQueryResult {
        /// The consuming query.
        query_id: StandingQueryId,
        /// The fragment answered for.
        dgn_id: DgnId,
        /// The answer.
        result: bool,
    },
}

/// A property or edge mutation: the events that change node content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeChangeEvent {
    /// Property mutation.
    Property(PropertyEvent),
    /// Edge mutation.
    Edge(EdgeEvent),
}

impl From<PropertyEvent> for NodeChangeEvent {
    fn from(event: PropertyEvent) -> Self {
        NodeChangeEvent::Property(event)
    }
}

impl From<EdgeEvent> for NodeChangeEvent {
    fn from(event: EdgeEvent) -> Self {
        NodeChangeEvent::Edge(event)
    }
}

/// Any event a node journals: the union of all three families.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEvent {
    /// Property mutation.
    Property(PropertyEvent),
    /// Edge mutation.
    Edge(EdgeEvent),
    /// Subscription lifecycle or result.
    DomainIndex(DomainIndexEvent),
}

impl NodeEvent {
    /// Stable wire tag discriminating the event family.
    pub const fn tag(&self) -> u8 {
        match self {
            NodeEvent::Property(_) => TAG_PROPERTY,
            NodeEvent::Edge(_) => TAG_EDGE,
            NodeEvent::DomainIndex(_) => TAG_DOMAIN_INDEX,
        }
    }

    /// Returns the node-change view of this event, if it is one.
    pub fn as_node_change(&self) -> Option<NodeChangeEvent> {
        match self {
            NodeEvent::Property(e) => Some(NodeChangeEvent::Property(e.clone())),
            NodeEvent::Edge(e) => Some(NodeChangeEvent::Edge(e.clone())),
            NodeEvent::DomainIndex(_) => None,
        }
    }
}

impl From<NodeChangeEvent> for NodeEvent {
    fn from(event: NodeChangeEvent) -> Self {
        match event {
            NodeChangeEvent::Property(e) => NodeEvent::Property(e),
            NodeChangeEvent::Edge(e) => NodeEvent::Edge(e),
        }
    }
}

impl From<DomainIndexEvent> for NodeEvent {
    fn from(event: DomainIndexEvent) -> Self {
        NodeEvent::DomainIndex(event)
    }
}
