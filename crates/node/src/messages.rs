//! Message types crossing the node actor boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use strandgraph_types::{
    DomainIndexEvent, EdgeEvent, EventTime, Hash, HalfEdge, NodeEvent, PropertyEvent, PropertyKey,
    PropertyValue, QuineId, SqPartId, StandingQueryId, error::Result, ids::DgnId,
};
use tokio::sync::oneshot;

/// A message deliverable to a node actor.
///
/// Every request that expects an answer carries a oneshot reply channel;
/// the actor processes messages strictly one at a time, so replies are
/// issued in submission order.
#[derive(Debug)]
pub enum NodeMessage {
    /// Submit a batch of property events.
    PropertyEvents {
        /// The batch; deduplicated to the last event per key before
        /// effect-checking.
        events: Vec<PropertyEvent>,
        /// Optional caller-supplied event-time floor.
        at_override: Option<EventTime>,
        /// Completion channel, resolved per the effect order.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Submit a batch of edge events.
    EdgeEvents {
        /// The batch.
        events: Vec<EdgeEvent>,
        /// Optional caller-supplied event-time floor.
        at_override: Option<EventTime>,
        /// Completion channel, resolved per the effect order.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Submit one domain-index event (subscription lifecycle / results).
    DomainIndexEvent {
        /// The event.
        event: DomainIndexEvent,
        /// Completion channel; peer-originated messages pass `None`.
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// Force a snapshot now. No-op on historical nodes.
    SnapshotNow {
        /// Completion channel.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Compute the content hash over `(qid, properties, edges)`.
    NodeHash {
        /// Reply channel.
        reply: oneshot::Sender<Hash>,
    },
    /// Assemble the in-memory half of a diagnostic record.
    DebugState {
        /// Reply channel.
        reply: oneshot::Sender<NodeInternalState>,
    },
    /// Re-sync local standing-query registrations against the durable set.
    SyncStandingQueries {
        /// Completion channel.
        reply: oneshot::Sender<Result<()>>,
    },
    /// A background snapshot write became durable.
    ///
    /// Sent by the per-node write lane so the dirty marker is cleared on
    /// the actor's own thread, never from a completion callback.
    SnapshotPersisted {
        /// Capture time of the snapshot that became durable.
        at: EventTime,
    },
    /// The background write lane hit a permanent failure.
    ///
    /// The actor marks itself unhealthy and refuses further writes until
    /// operator intervention.
    PersistFailed {
        /// Description of the failure.
        message: String,
    },
    /// Write a final snapshot if dirty, then stop the actor.
    Sleep {
        /// Completion channel.
        reply: oneshot::Sender<Result<()>>,
    },
}

/// A message emitted by a node for delivery elsewhere in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedMessage {
    /// Deliver a domain-index event to a peer node.
    ToNode {
        /// Destination node.
        to: QuineId,
        /// The event to process there.
        event: DomainIndexEvent,
    },
    /// Deliver a standing-query output to the query's consumer.
    SqOutput(SqOutput),
}

/// Incremental output of a standing query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqOutput {
    /// A node's answer for a domain-graph pattern changed.
    DgnResult {
        /// The consuming query.
        query_id: StandingQueryId,
        /// The answering node.
        from: QuineId,
        /// The pattern fragment answered for.
        dgn_id: DgnId,
        /// The new answer.
        result: bool,
    },
    /// A multiple-values part observed events, batched per subscriber.
    MvsqUpdate {
        /// The consuming query.
        query_id: StandingQueryId,
        /// The part that matched.
        part_id: SqPartId,
        /// The observing node.
        from: QuineId,
        /// The party this update is addressed to.
        subscriber: strandgraph_types::SubscriberRef,
        /// Observed events, in application order.
        events: Vec<strandgraph_types::NodeChangeEvent>,
    },
}

/// Diagnostic record assembled by `debug_internal_state`.
#[derive(Debug, Clone)]
pub struct NodeInternalState {
    /// The node.
    pub qid: QuineId,
    /// Historical instant, if this is a historical view.
    pub at_time: Option<u64>,
    /// Current properties.
    pub properties: BTreeMap<PropertyKey, PropertyValue>,
    /// Current half-edges in insertion order.
    pub edges: Vec<HalfEdge>,
    /// Number of DGN subscription records.
    pub subscriber_count: usize,
    /// Number of multiple-values part states.
    pub mvsq_count: usize,
    /// Dirty marker since the last snapshot.
    pub latest_update_after_snapshot: Option<EventTime>,
    /// Last event time the actor clock issued.
    pub clock_last: EventTime,
    /// Whether the node accepts writes.
    pub healthy: bool,
    /// The node's journal, filled in from the persistor by the caller.
    pub journal: Vec<(EventTime, NodeEvent)>,
    /// When this record was assembled.
    pub collected_at: DateTime<Utc>,
}
