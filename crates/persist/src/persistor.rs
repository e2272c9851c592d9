//! The persistence backend contract.

use async_trait::async_trait;
use strandgraph_types::{
    DomainIndexEvent, EventTime, NodeChangeEvent, NodeEvent, QuineId, StandingQueryId,
    StandingQueryRecord,
};

use crate::error::Result;

/// Contract every persistence backend implements.
///
/// All operations are asynchronous and may fail with a retryable
/// [`PersistorError`](crate::PersistorError). Handles are shared across
/// node actors and must be internally thread-safe. Implementations over
/// blocking storage run their I/O on a dedicated blocking executor
/// (e.g. `tokio::task::spawn_blocking`) so node actors are never starved.
///
/// # Ordering
///
/// Within a single `persist_*_events` call, events are durable atomically
/// or not at all. Across calls, durability order matches call order only
/// when the caller awaits each completion before issuing the next — the
/// node core does so for its per-node write lane.
#[async_trait]
pub trait Persistor: Send + Sync + 'static {
    /// Appends property and edge events to a node's journal, in order.
    ///
    /// `events` must be non-empty; the node core never issues empty writes.
    ///
    /// # Errors
    ///
    /// Returns a transient or permanent backend failure.
    async fn persist_node_change_events(
        &self,
        qid: QuineId,
        events: Vec<(EventTime, NodeChangeEvent)>,
    ) -> Result<()>;

    /// Appends domain-index events to a node's journal, in order.
    ///
    /// Same contract as [`persist_node_change_events`], on a separate
    /// logical stream.
    ///
    /// [`persist_node_change_events`]: Persistor::persist_node_change_events
    ///
    /// # Errors
    ///
    /// Returns a transient or permanent backend failure.
    async fn persist_domain_index_events(
        &self,
        qid: QuineId,
        events: Vec<(EventTime, DomainIndexEvent)>,
    ) -> Result<()>;

    /// Stores a snapshot blob for a node.
    ///
    /// When the graph runs with `snapshot_singleton`, `at` is
    /// [`EventTime::MAX`] and the write replaces any prior snapshot;
    /// otherwise snapshots are keyed by their creation time.
    ///
    /// # Errors
    ///
    /// Returns a transient or permanent backend failure.
    async fn persist_snapshot(&self, qid: QuineId, at: EventTime, blob: Vec<u8>) -> Result<()>;

    /// Reads a node's journal between `from` and `to`, bounds inclusive.
    ///
    /// Domain-index events are merged into the result in event-time order
    /// when `include_domain_index` is set.
    ///
    /// # Errors
    ///
    /// Returns a backend failure, or a codec failure for undecodable
    /// records.
    async fn get_journal_with_time(
        &self,
        qid: QuineId,
        from: EventTime,
        to: EventTime,
        include_domain_index: bool,
    ) -> Result<Vec<(EventTime, NodeEvent)>>;

    /// Returns the most recent snapshot at or before `at_or_before`, if any.
    ///
    /// # Errors
    ///
    /// Returns a transient or permanent backend failure.
    async fn get_latest_snapshot(
        &self,
        qid: QuineId,
        at_or_before: EventTime,
    ) -> Result<Option<(EventTime, Vec<u8>)>>;

    /// Lists every registered standing query.
    ///
    /// # Errors
    ///
    /// Returns a transient or permanent backend failure.
    async fn list_standing_queries(&self) -> Result<Vec<StandingQueryRecord>>;

    /// Returns one standing-query registration, if present.
    ///
    /// # Errors
    ///
    /// Returns a transient or permanent backend failure.
    async fn get_standing_query(&self, id: StandingQueryId)
    -> Result<Option<StandingQueryRecord>>;

    /// Registers or replaces a standing query.
    ///
    /// # Errors
    ///
    /// Returns a transient or permanent backend failure.
    async fn put_standing_query(&self, record: StandingQueryRecord) -> Result<()>;

    /// Removes a standing-query registration.
    ///
    /// # Errors
    ///
    /// Returns a transient or permanent backend failure.
    async fn delete_standing_query(&self, id: StandingQueryId) -> Result<()>;
}
