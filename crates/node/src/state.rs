//! In-memory state owned by one node actor.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use strandgraph_persist::NodeSnapshot;
use strandgraph_types::{
    ChunkedHasher, DgnSubscription, DomainGraphNode, EdgeDirection, EventTime, Hash,
    NodeChangeEvent, PropertyEvent, PropertyKey, PropertyValue, QuineId, SqPartId,
    StandingQueryId, SubscriberRef, ids::DgnId, standing_query::MvsqPartSpec,
};

use crate::edges::EdgeCollection;
use crate::index::LocalEventIndex;

/// Live state of one multiple-values standing-query part on this node.
#[derive(Debug, Clone)]
pub struct MvsqState {
    /// What the part watches.
    pub spec: MvsqPartSpec,
    /// Parties receiving this part's updates.
    pub subscribers: BTreeSet<SubscriberRef>,
    /// Current values of the watched properties: the partial-match tuple
    /// this part carries.
    pub accumulated: BTreeMap<PropertyKey, PropertyValue>,
}

/// All state owned by a node actor.
///
/// Touched only by the owning actor task; nothing here is shared across
/// threads.
#[derive(Debug, Default)]
pub struct NodeState {
    /// Node properties. Keys unique.
    pub properties: HashMap<PropertyKey, PropertyValue>,
    /// Half-edges, insertion-ordered and duplicate-free.
    pub edges: EdgeCollection,
    /// DGN subscription records: who watches this node's answers.
    pub subscribers: BTreeMap<DgnId, DgnSubscription>,
    /// Last answers received from peers, per peer and DGN.
    pub domain_node_index: BTreeMap<QuineId, BTreeMap<DgnId, Option<bool>>>,
    /// Multiple-values part states.
    pub mvsq: BTreeMap<(StandingQueryId, SqPartId), MvsqState>,
    /// Derived event→subscriber index.
    pub index: LocalEventIndex,
    /// Event time of the last effective update since the last snapshot,
    /// or `None` when the node is clean.
    pub latest_update_after_snapshot: Option<EventTime>,
}

impl NodeState {
    /// Creates empty state for a fresh node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores state from a decoded snapshot.
    ///
    /// The event index and multiple-values part states are derived and
    /// re-synced separately after journal replay.
    pub fn from_snapshot(snapshot: NodeSnapshot) -> Self {
        let mut edges = EdgeCollection::new();
        for edge in snapshot.edges {
            edges.add(edge);
        }
        Self {
            properties: snapshot.properties.into_iter().collect(),
            edges,
            subscribers: snapshot.subscribers,
            domain_node_index: snapshot.domain_node_index,
            mvsq: BTreeMap::new(),
            index: LocalEventIndex::new(),
            latest_update_after_snapshot: None,
        }
    }

    /// Captures the snapshot view of this state as of `at`.
    pub fn to_snapshot(&self, at: EventTime) -> NodeSnapshot {
        NodeSnapshot {
            at,
            properties: self.properties.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            edges: self.edges.iter().cloned().collect(),
            subscribers: self.subscribers.clone(),
            domain_node_index: self.domain_node_index.clone(),
        }
    }

    /// Returns whether applying `event` would change node content.
    ///
    /// A `Set` of the value already held and a `Removed` of an absent key
    /// are both no-ops; so are edge events per the edge collection.
    pub fn node_change_has_effect(&self, event: &NodeChangeEvent) -> bool {
        match event {
            NodeChangeEvent::Property(PropertyEvent::Set { key, value }) => {
                self.properties.get(key) != Some(value)
            },
            NodeChangeEvent::Property(PropertyEvent::Removed { key, .. }) => {
                self.properties.contains_key(key)
            },
            NodeChangeEvent::Edge(e) => self.edges.event_has_effect(e),
        }
    }

    /// Rewrites an effective event into its canonical journaled form.
    ///
    /// A removal records the value actually removed, regardless of what the
    /// caller believed the previous value was.
    pub fn canonicalize_node_change(&self, event: NodeChangeEvent) -> NodeChangeEvent {
        match event {
            NodeChangeEvent::Property(PropertyEvent::Removed { key, .. }) => {
                let previous = self
                    .properties
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| PropertyValue::from_bytes(Vec::new()));
                NodeChangeEvent::Property(PropertyEvent::Removed { key, previous })
            },
            other => other,
        }
    }

    /// Applies a node-change event to properties or edges.
    pub fn apply_node_change(&mut self, event: &NodeChangeEvent) {
        match event {
            NodeChangeEvent::Property(PropertyEvent::Set { key, value }) => {
                self.properties.insert(key.clone(), value.clone());
            },
            NodeChangeEvent::Property(PropertyEvent::Removed { key, .. }) => {
                self.properties.remove(key);
            },
            NodeChangeEvent::Edge(e) => {
                self.edges.apply(e);
            },
        }
    }

    /// Evaluates whether this node currently matches a pattern fragment.
    ///
    /// Every property test must pass against local properties, and every
    /// edge requirement must be witnessed by some matching half-edge whose
    /// peer last answered `true` for the child fragment.
    pub fn evaluate_dgn(&self, dgn: &DomainGraphNode) -> bool {
        for test in &dgn.required_properties {
            match self.properties.get(&test.key) {
                None => return false,
                Some(value) => {
                    if let Some(expected) = &test.expected
                        && value != expected
                    {
                        return false;
                    }
                },
            }
        }
        for requirement in &dgn.required_edges {
            let witnessed = self.edges.iter().any(|edge| {
                edge.label == requirement.label
                    && edge.direction == requirement.direction
                    && self
                        .domain_node_index
                        .get(&edge.peer)
                        .and_then(|answers| answers.get(&requirement.child))
                        .copied()
                        .flatten()
                        == Some(true)
            });
            if !witnessed {
                return false;
            }
        }
        true
    }

    /// Content hash over `(qid, properties, edges)`.
    ///
    /// Properties are hashed in key order; edges in insertion order, which
    /// journal replay reproduces deterministically.
    pub fn node_hash(&self, qid: QuineId) -> Hash {
        let mut hasher = ChunkedHasher::new();
        hasher.chunk(qid.as_bytes());

        let mut keys: Vec<_> = self.properties.keys().collect();
        keys.sort();
        for key in keys {
            hasher.chunk(key.as_str().as_bytes());
            if let Some(value) = self.properties.get(key) {
                hasher.chunk(value.as_bytes());
            }
        }

        for edge in self.edges.iter() {
            let direction: u8 = match edge.direction {
                EdgeDirection::Outgoing => 0,
                EdgeDirection::Incoming => 1,
                EdgeDirection::Undirected => 2,
            };
            hasher.chunk(&[direction]);
            hasher.chunk(edge.label.as_str().as_bytes());
            hasher.chunk(edge.peer.as_bytes());
        }

        hasher.finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use strandgraph_types::{EdgeEvent, EdgeRequirement, HalfEdge, PropertyTest};

    use super::*;

    fn set(key: &str, value: u64) -> NodeChangeEvent {
        NodeChangeEvent::Property(PropertyEvent::Set {
            key: key.into(),
            value: PropertyValue::of(&value).unwrap(),
        })
    }

    #[test]
    fn test_set_has_no_effect_when_value_unchanged() {
        let mut state = NodeState::new();
        let event = set("x", 2);
        assert!(state.node_change_has_effect(&event));
        state.apply_node_change(&event);
        assert!(!state.node_change_has_effect(&event));
        assert!(state.node_change_has_effect(&set("x", 3)));
    }

    #[test]
    fn test_removed_only_effective_when_present() {
        let mut state = NodeState::new();
        let removed = NodeChangeEvent::Property(PropertyEvent::Removed {
            key: "x".into(),
            previous: PropertyValue::from_bytes(Vec::new()),
        });
        assert!(!state.node_change_has_effect(&removed));
        state.apply_node_change(&set("x", 1));
        assert!(state.node_change_has_effect(&removed));
    }

    #[test]
    fn test_canonicalize_records_actual_previous_value() {
        let mut state = NodeState::new();
        state.apply_node_change(&set("x", 7));

        let claimed = NodeChangeEvent::Property(PropertyEvent::Removed {
            key: "x".into(),
            previous: PropertyValue::of(&999u64).unwrap(),
        });
        let canonical = state.canonicalize_node_change(claimed);
        match canonical {
            NodeChangeEvent::Property(PropertyEvent::Removed { previous, .. }) => {
                assert_eq!(previous.decode_as::<u64>().unwrap(), 7);
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_node_hash_ignores_property_insertion_order() {
        let qid = QuineId::from_u64(1);
        let mut a = NodeState::new();
        a.apply_node_change(&set("x", 1));
        a.apply_node_change(&set("y", 2));

        let mut b = NodeState::new();
        b.apply_node_change(&set("y", 2));
        b.apply_node_change(&set("x", 1));

        assert_eq!(a.node_hash(qid), b.node_hash(qid));
    }

    #[test]
    fn test_node_hash_sensitive_to_content_and_identity() {
        let mut state = NodeState::new();
        state.apply_node_change(&set("x", 1));
        let base = state.node_hash(QuineId::from_u64(1));

        assert_ne!(base, state.node_hash(QuineId::from_u64(2)));

        state.apply_node_change(&set("x", 2));
        assert_ne!(base, state.node_hash(QuineId::from_u64(1)));
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_content() {
        let mut state = NodeState::new();
        state.apply_node_change(&set("x", 1));
        state.apply_node_change(&NodeChangeEvent::Edge(EdgeEvent::Added(HalfEdge::new(
            EdgeDirection::Outgoing,
            "knows",
            QuineId::from_u64(2),
        ))));

        let qid = QuineId::from_u64(1);
        let snapshot = state.to_snapshot(EventTime::from_parts(10, 0));
        let restored = NodeState::from_snapshot(snapshot);
        assert_eq!(state.node_hash(qid), restored.node_hash(qid));
    }

    #[test]
    fn test_evaluate_dgn_property_and_edge_requirements() {
        let mut state = NodeState::new();
        let peer = QuineId::from_u64(2);
        let dgn = DomainGraphNode {
            id: DgnId::new(1),
            required_properties: vec![PropertyTest::equals(
                "kind",
                PropertyValue::of(&"server").unwrap(),
            )],
            required_edges: vec![EdgeRequirement {
                label: "hosts".into(),
                direction: EdgeDirection::Outgoing,
                child: DgnId::new(2),
            }],
        };

        assert!(!state.evaluate_dgn(&dgn), "empty node cannot match");

        state.apply_node_change(&NodeChangeEvent::Property(PropertyEvent::Set {
            key: "kind".into(),
            value: PropertyValue::of(&"server").unwrap(),
        }));
        state.apply_node_change(&NodeChangeEvent::Edge(EdgeEvent::Added(HalfEdge::new(
            EdgeDirection::Outgoing,
            "hosts",
            peer,
        ))));
        assert!(!state.evaluate_dgn(&dgn), "peer has not answered yet");

        state.domain_node_index.entry(peer).or_default().insert(DgnId::new(2), Some(true));
        assert!(state.evaluate_dgn(&dgn));

        state.domain_node_index.entry(peer).or_default().insert(DgnId::new(2), Some(false));
        assert!(!state.evaluate_dgn(&dgn));
    }
}
