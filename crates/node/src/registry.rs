//! Global registry of domain graph nodes.
//!
//! The registry is read-mostly: standing-query registration writes it,
//! every node's post-action pass reads it. Nodes receive the registry as an
//! injected handle at construction; updates reach awake nodes via explicit
//! re-sync messages rather than shared mutation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use strandgraph_types::{
    DomainGraphNode, StandingQueryId, StandingQueryRecord, ids::DgnId,
    standing_query::StandingQueryPattern,
};

/// Shared handle to the global DGN registry.
#[derive(Debug, Clone, Default)]
pub struct DgnRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// Registered fragments by id.
    fragments: HashMap<DgnId, DomainGraphNode>,
    /// Which standing queries contributed each fragment.
    owners: HashMap<DgnId, BTreeSet<StandingQueryId>>,
}

impl DgnRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single fragment with no owning query.
    ///
    /// Mostly useful in tests; standing-query registration goes through
    /// [`DgnRegistry::register_query`].
    pub fn register(&self, dgn: DomainGraphNode) {
        self.inner.write().fragments.insert(dgn.id, dgn);
    }

    /// Registers every fragment a standing query contributes.
    ///
    /// Idempotent: re-registering the same query refreshes its fragments.
    pub fn register_query(&self, record: &StandingQueryRecord) {
        if let StandingQueryPattern::DomainGraph { fragments, .. } = &record.pattern {
            let mut inner = self.inner.write();
            for fragment in fragments {
                inner.fragments.insert(fragment.id, fragment.clone());
                inner.owners.entry(fragment.id).or_default().insert(record.id);
            }
        }
    }

    /// Removes a standing query's fragments.
    ///
    /// A fragment shared with another still-registered query survives.
    pub fn deregister_query(&self, record: &StandingQueryRecord) {
        if let StandingQueryPattern::DomainGraph { fragments, .. } = &record.pattern {
            let mut inner = self.inner.write();
            for fragment in fragments {
                let orphaned = match inner.owners.get_mut(&fragment.id) {
                    Some(owners) => {
                        owners.remove(&record.id);
                        owners.is_empty()
                    },
                    None => true,
                };
                if orphaned {
                    inner.owners.remove(&fragment.id);
                    inner.fragments.remove(&fragment.id);
                }
            }
        }
    }

    /// Returns `true` if the fragment is currently registered.
    pub fn contains(&self, dgn_id: DgnId) -> bool {
        self.inner.read().fragments.contains_key(&dgn_id)
    }

    /// Returns a fragment definition, if registered.
    pub fn get(&self, dgn_id: DgnId) -> Option<DomainGraphNode> {
        self.inner.read().fragments.get(&dgn_id).cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn query_with_fragments(ids: &[u64]) -> StandingQueryRecord {
        StandingQueryRecord {
            id: StandingQueryId::fresh(),
            pattern: StandingQueryPattern::DomainGraph {
                root: DgnId::new(ids[0]),
                fragments: ids
                    .iter()
                    .map(|id| DomainGraphNode::unconditional(DgnId::new(*id)))
                    .collect(),
            },
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = DgnRegistry::new();
        let record = query_with_fragments(&[1, 2]);
        registry.register_query(&record);

        assert!(registry.contains(DgnId::new(1)));
        assert!(registry.contains(DgnId::new(2)));
        assert!(!registry.contains(DgnId::new(3)));
        assert_eq!(registry.get(DgnId::new(1)).unwrap().id, DgnId::new(1));
    }

    #[test]
    fn test_deregister_removes_fragments() {
        let registry = DgnRegistry::new();
        let record = query_with_fragments(&[1]);
        registry.register_query(&record);
        registry.deregister_query(&record);
        assert!(!registry.contains(DgnId::new(1)));
    }

    #[test]
    fn test_shared_fragment_survives_one_owner_leaving() {
        let registry = DgnRegistry::new();
        let first = query_with_fragments(&[1]);
        let second = query_with_fragments(&[1]);
        registry.register_query(&first);
        registry.register_query(&second);

        registry.deregister_query(&first);
        assert!(registry.contains(DgnId::new(1)), "fragment still owned by second query");

        registry.deregister_query(&second);
        assert!(!registry.contains(DgnId::new(1)));
    }
}
