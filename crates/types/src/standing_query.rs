//! Durable standing-query metadata records.
//!
//! The persistence backend stores one record per registered standing query;
//! nodes consult this set on wake to register queries created while they
//! slept and to drop queries cancelled in the meantime.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::dgn::DomainGraphNode;
use crate::half_edge::EdgeLabel;
use crate::ids::{DgnId, SqPartId, StandingQueryId};
use crate::property::PropertyKey;

/// What one part of a multiple-values standing query watches on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvsqPartSpec {
    /// Part identifier.
    pub part_id: SqPartId,
    /// Property keys whose changes this part observes.
    pub watched_properties: BTreeSet<PropertyKey>,
    /// Edge labels whose changes this part observes.
    pub watched_edges: BTreeSet<EdgeLabel>,
    /// Whether the part observes every edge change regardless of label.
    pub watch_any_edge: bool,
}

/// The pattern behind a standing query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StandingQueryPattern {
    /// A domain-graph pattern: a tree of DGN fragments rooted at `root`.
    DomainGraph {
        /// Fragment whose answer is the query's result.
        root: DgnId,
        /// All fragments the query comprises, root included.
        fragments: Vec<DomainGraphNode>,
    },
    /// A multiple-values pattern: independent parts carrying value tuples.
    MultipleValues {
        /// The parts, matched independently per node.
        parts: Vec<MvsqPartSpec>,
    },
}

/// A durable standing-query registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingQueryRecord {
    /// Query identifier.
    pub id: StandingQueryId,
    /// The pattern being continuously matched.
    pub pattern: StandingQueryPattern,
}

impl StandingQueryRecord {
    /// The DGN ids this query registers, if it is a domain-graph query.
    pub fn dgn_ids(&self) -> Vec<DgnId> {
        match &self.pattern {
            StandingQueryPattern::DomainGraph { fragments, .. } => {
                fragments.iter().map(|f| f.id).collect()
            },
            StandingQueryPattern::MultipleValues { .. } => Vec::new(),
        }
    }

    /// The root DGN, if this is a domain-graph query.
    pub fn root_dgn(&self) -> Option<DgnId> {
        match &self.pattern {
            StandingQueryPattern::DomainGraph { root, .. } => Some(*root),
            StandingQueryPattern::MultipleValues { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dgn_ids_for_domain_graph_pattern() {
        let record = StandingQueryRecord {
            id: StandingQueryId::fresh(),
            pattern: StandingQueryPattern::DomainGraph {
                root: DgnId::new(1),
                fragments: vec![
                    DomainGraphNode::unconditional(DgnId::new(1)),
                    DomainGraphNode::unconditional(DgnId::new(2)),
                ],
            },
        };
        assert_eq!(record.dgn_ids(), vec![DgnId::new(1), DgnId::new(2)]);
        assert_eq!(record.root_dgn(), Some(DgnId::new(1)));
    }

    #[test]
    fn test_multiple_values_pattern_registers_no_dgns() {
        let record = StandingQueryRecord {
            id: StandingQueryId::fresh(),
            pattern: StandingQueryPattern::MultipleValues { parts: Vec::new() },
        };
        assert!(record.dgn_ids().is_empty());
        assert!(record.root_dgn().is_none());
    }
}
