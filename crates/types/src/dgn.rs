//! Domain graph node (DGN) pattern fragments.
//!
//! A DGN is a globally registered fragment of a graph pattern: a set of
//! property tests a node must satisfy locally, plus a set of edges whose far
//! endpoints must each satisfy a child fragment. Live nodes subscribe to the
//! fragments that concern them and answer `true`/`false` as their state and
//! their peers' answers evolve.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::events::SubscriberRef;
use crate::half_edge::{EdgeDirection, EdgeLabel};
use crate::ids::{DgnId, StandingQueryId};
use crate::property::{PropertyKey, PropertyValue};

/// A single property requirement within a DGN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyTest {
    /// Property that must be present.
    pub key: PropertyKey,
    /// Required value; `None` means any value satisfies the test.
    pub expected: Option<PropertyValue>,
}

impl PropertyTest {
    /// Requires the property to exist with exactly the given value.
    pub fn equals(key: impl Into<PropertyKey>, expected: PropertyValue) -> Self {
        Self { key: key.into(), expected: Some(expected) }
    }

    /// Requires the property to exist with any value.
    pub fn exists(key: impl Into<PropertyKey>) -> Self {
        Self { key: key.into(), expected: None }
    }
}

/// An edge requirement within a DGN: a matching half-edge must exist and its
/// peer must answer `true` for the child fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRequirement {
    /// Required edge label.
    pub label: EdgeLabel,
    /// Required edge direction, from the matching node's perspective.
    pub direction: EdgeDirection,
    /// Fragment the peer must satisfy.
    pub child: DgnId,
}

/// A registered pattern fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainGraphNode {
    /// Globally unique fragment id.
    pub id: DgnId,
    /// Property tests the node must satisfy locally.
    pub required_properties: Vec<PropertyTest>,
    /// Edges to child fragments.
    pub required_edges: Vec<EdgeRequirement>,
}

impl DomainGraphNode {
    /// A fragment with no requirements (matches every node).
    pub fn unconditional(id: DgnId) -> Self {
        Self { id, required_properties: Vec::new(), required_edges: Vec::new() }
    }
}

/// One DGN's subscription record on a node: who asked, what was last
/// reported, and which standing queries the subscription serves.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DgnSubscription {
    /// Parties notified when this node's answer changes.
    pub subscribers: BTreeSet<SubscriberRef>,
    /// Last answer reported to subscribers, if any.
    pub last_notification: Option<bool>,
    /// Standing queries this subscription ultimately serves.
    pub related_queries: BTreeSet<StandingQueryId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconditional_fragment_has_no_requirements() {
        let dgn = DomainGraphNode::unconditional(DgnId::new(1));
        assert!(dgn.required_properties.is_empty());
        assert!(dgn.required_edges.is_empty());
    }

    #[test]
    fn test_property_test_constructors() {
        assert!(PropertyTest::exists("name").expected.is_none());
        let value = PropertyValue::from_bytes(vec![1]);
        assert_eq!(PropertyTest::equals("name", value.clone()).expected, Some(value));
    }
}
