//! Local event index: which standing-query subscribers care about which
//! events on this node.
//!
//! The index is derived state. It is rebuilt on wake from the node's DGN
//! subscription records and multiple-values part states, and maintained
//! incrementally afterwards. Lookups hand each interested subscriber to a
//! callback; the callback can request removal of the subscription, which is
//! how stale entries for globally-deregistered DGNs self-heal out of the
//! index.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use strandgraph_types::{
    DgnSubscription, DomainGraphNode, EdgeLabel, NodeChangeEvent, PropertyKey, SqPartId,
    StandingQueryId, ids::DgnId, standing_query::MvsqPartSpec,
};

use crate::registry::DgnRegistry;

/// A party interested in this node's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subscriber {
    /// One part of a multiple-values standing query.
    MultipleValuesSq {
        /// The query.
        sq_id: StandingQueryId,
        /// The part.
        part_id: SqPartId,
    },
    /// A domain-graph subscription on this node.
    DomainNodeIndex {
        /// The watched pattern fragment.
        dgn_id: DgnId,
    },
}

/// The three sub-indexes over this node's events.
#[derive(Debug, Default)]
pub struct LocalEventIndex {
    watching_for_property: HashMap<PropertyKey, HashSet<Subscriber>>,
    watching_for_edge: HashMap<EdgeLabel, HashSet<Subscriber>>,
    watching_for_any_edge: HashSet<Subscriber>,
}

impl LocalEventIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in one property key.
    pub fn watch_property(&mut self, key: PropertyKey, subscriber: Subscriber) {
        self.watching_for_property.entry(key).or_default().insert(subscriber);
    }

    /// Registers interest in one edge label.
    pub fn watch_edge(&mut self, label: EdgeLabel, subscriber: Subscriber) {
        self.watching_for_edge.entry(label).or_default().insert(subscriber);
    }

    /// Registers interest in every edge change.
    pub fn watch_any_edge(&mut self, subscriber: Subscriber) {
        self.watching_for_any_edge.insert(subscriber);
    }

    /// Removes a subscriber from all three sub-indexes.
    pub fn remove_subscriber(&mut self, subscriber: &Subscriber) {
        self.watching_for_property.retain(|_, subs| {
            subs.remove(subscriber);
            !subs.is_empty()
        });
        self.watching_for_edge.retain(|_, subs| {
            subs.remove(subscriber);
            !subs.is_empty()
        });
        self.watching_for_any_edge.remove(subscriber);
    }

    /// Invokes `callback` for each subscriber interested in `event`.
    ///
    /// A callback returning `true` requests removal of that subscription
    /// from the index (used when a DGN has disappeared from the global
    /// registry). Subscribers are visited in deterministic order.
    pub fn standing_queries_watching<F>(&mut self, event: &NodeChangeEvent, mut callback: F)
    where
        F: FnMut(Subscriber) -> bool,
    {
        // Deterministic visit order keeps notification order reproducible.
        let mut interested: BTreeSet<Subscriber> = BTreeSet::new();
        match event {
            NodeChangeEvent::Property(e) => {
                if let Some(subs) = self.watching_for_property.get(e.key()) {
                    interested.extend(subs.iter().copied());
                }
            },
            NodeChangeEvent::Edge(e) => {
                if let Some(subs) = self.watching_for_edge.get(&e.half_edge().label) {
                    interested.extend(subs.iter().copied());
                }
                interested.extend(self.watching_for_any_edge.iter().copied());
            },
        }

        for subscriber in interested {
            if callback(subscriber) {
                self.remove_subscriber(&subscriber);
            }
        }
    }

    /// Registers the index entries one DGN contributes.
    pub fn index_dgn(&mut self, dgn: &DomainGraphNode) {
        let subscriber = Subscriber::DomainNodeIndex { dgn_id: dgn.id };
        for test in &dgn.required_properties {
            self.watch_property(test.key.clone(), subscriber);
        }
        for requirement in &dgn.required_edges {
            self.watch_edge(requirement.label.clone(), subscriber);
        }
    }

    /// Registers the index entries one multiple-values part contributes.
    pub fn index_mvsq_part(&mut self, sq_id: StandingQueryId, spec: &MvsqPartSpec) {
        let subscriber = Subscriber::MultipleValuesSq { sq_id, part_id: spec.part_id };
        for key in &spec.watched_properties {
            self.watch_property(key.clone(), subscriber);
        }
        for label in &spec.watched_edges {
            self.watch_edge(label.clone(), subscriber);
        }
        if spec.watch_any_edge {
            self.watch_any_edge(subscriber);
        }
    }

    /// Rebuilds the index after journal restoration.
    ///
    /// Reconstructs from (a) the node's current DGN subscription records
    /// and (b) its multiple-values part states. Returns the rebuilt index
    /// together with the set of DGN ids that are no longer registered in
    /// the global registry; the caller garbage-collects those subscriptions.
    pub fn rebuild(
        subscribers: &BTreeMap<DgnId, DgnSubscription>,
        mvsq_parts: &BTreeMap<(StandingQueryId, SqPartId), MvsqPartSpec>,
        registry: &DgnRegistry,
    ) -> (Self, BTreeSet<DgnId>) {
        let mut index = Self::new();
        let mut stale = BTreeSet::new();

        for dgn_id in subscribers.keys() {
            match registry.get(*dgn_id) {
                Some(dgn) => index.index_dgn(&dgn),
                None => {
                    stale.insert(*dgn_id);
                },
            }
        }
        for ((sq_id, _), spec) in mvsq_parts {
            index.index_mvsq_part(*sq_id, spec);
        }

        (index, stale)
    }
}
