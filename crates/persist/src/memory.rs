//! In-memory reference persistor.
//!
//! Stores journals, snapshots, and standing-query metadata in process
//! memory. Used by tests and by ephemeral graphs that accept losing state
//! on shutdown. Records are held in their encoded wire form so the journal
//! codec is exercised on every write and read, exactly as a disk-backed
//! implementation would.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use strandgraph_types::{
    DomainIndexEvent, EventTime, NodeChangeEvent, NodeEvent, QuineId, StandingQueryId,
    StandingQueryRecord,
};

use crate::error::{PermanentSnafu, Result};
use crate::journal::{decode_journal_record, encode_journal_record};
use crate::persistor::Persistor;

/// Per-node storage: two journal streams plus snapshots.
#[derive(Debug, Default)]
struct NodeStreams {
    /// Property and edge events, encoded, keyed by event time.
    node_change: BTreeMap<EventTime, Vec<u8>>,
    /// Domain-index events, encoded, keyed by event time.
    domain_index: BTreeMap<EventTime, Vec<u8>>,
    /// Snapshot blobs keyed by capture time (or `EventTime::MAX` for
    /// singleton snapshots).
    snapshots: BTreeMap<EventTime, Vec<u8>>,
}

/// An in-memory [`Persistor`].
#[derive(Debug, Default)]
pub struct InMemoryPersistor {
    nodes: RwLock<HashMap<QuineId, NodeStreams>>,
    standing_queries: RwLock<HashMap<StandingQueryId, StandingQueryRecord>>,
}

impl InMemoryPersistor {
    /// Creates an empty persistor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of node-change journal records held for a node.
    ///
    /// Test observability: lets suites assert "zero journal writes"
    /// without reading the journal back.
    pub fn node_change_event_count(&self, qid: QuineId) -> usize {
        self.nodes.read().get(&qid).map_or(0, |s| s.node_change.len())
    }

    /// Number of domain-index journal records held for a node.
    pub fn domain_index_event_count(&self, qid: QuineId) -> usize {
        self.nodes.read().get(&qid).map_or(0, |s| s.domain_index.len())
    }

    /// Number of snapshots held for a node.
    pub fn snapshot_count(&self, qid: QuineId) -> usize {
        self.nodes.read().get(&qid).map_or(0, |s| s.snapshots.len())
    }

    fn decode_stream(
        stream: &BTreeMap<EventTime, Vec<u8>>,
        from: EventTime,
        to: EventTime,
    ) -> Result<Vec<(EventTime, NodeEvent)>> {
        let mut out = Vec::new();
        for (at, record) in stream.range(from..=to) {
            let ((decoded_at, event), _) = decode_journal_record(record)
                .map_err(|e| PermanentSnafu { message: e.to_string() }.build())?;
            debug_assert_eq!(decoded_at, *at);
            out.push((decoded_at, event));
        }
        Ok(out)
    }
}

#[async_trait]
impl Persistor for InMemoryPersistor {
    async fn persist_node_change_events(
        &self,
        qid: QuineId,
        events: Vec<(EventTime, NodeChangeEvent)>,
    ) -> Result<()> {
        let mut nodes = self.nodes.write();
        let streams = nodes.entry(qid).or_default();
        for (at, event) in events {
            let record = encode_journal_record(at, &NodeEvent::from(event))
                .map_err(|e| PermanentSnafu { message: e.to_string() }.build())?;
            streams.node_change.insert(at, record);
        }
        Ok(())
    }

    async fn persist_domain_index_events(
        &self,
        qid: QuineId,
        events: Vec<(EventTime, DomainIndexEvent)>,
    ) -> Result<()> {
        let mut nodes = self.nodes.write();
        let streams = nodes.entry(qid).or_default();
        for (at, event) in events {
            let record = encode_journal_record(at, &NodeEvent::DomainIndex(event))
                .map_err(|e| PermanentSnafu { message: e.to_string() }.build())?;
            streams.domain_index.insert(at, record);
        }
        Ok(())
    }

    async fn persist_snapshot(&self, qid: QuineId, at: EventTime, blob: Vec<u8>) -> Result<()> {
        let mut nodes = self.nodes.write();
        nodes.entry(qid).or_default().snapshots.insert(at, blob);
        Ok(())
    }

    async fn get_journal_with_time(
        &self,
        qid: QuineId,
        from: EventTime,
        to: EventTime,
        include_domain_index: bool,
    ) -> Result<Vec<(EventTime, NodeEvent)>> {
        let nodes = self.nodes.read();
        let Some(streams) = nodes.get(&qid) else {
            return Ok(Vec::new());
        };

        let mut events = Self::decode_stream(&streams.node_change, from, to)?;
        if include_domain_index {
            events.extend(Self::decode_stream(&streams.domain_index, from, to)?);
            // Merge the two streams back into one time-ordered journal.
            events.sort_by_key(|(at, _)| *at);
        }
        Ok(events)
    }

    async fn get_latest_snapshot(
        &self,
        qid: QuineId,
        at_or_before: EventTime,
    ) -> Result<Option<(EventTime, Vec<u8>)>> {
        let nodes = self.nodes.read();
        Ok(nodes.get(&qid).and_then(|streams| {
            streams
                .snapshots
                .range(..=at_or_before)
                .next_back()
                .map(|(at, blob)| (*at, blob.clone()))
        }))
    }

    async fn list_standing_queries(&self) -> Result<Vec<StandingQueryRecord>> {
        let queries = self.standing_queries.read();
        let mut records: Vec<_> = queries.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn get_standing_query(
        &self,
        id: StandingQueryId,
    ) -> Result<Option<StandingQueryRecord>> {
        Ok(self.standing_queries.read().get(&id).cloned())
    }

    async fn put_standing_query(&self, record: StandingQueryRecord) -> Result<()> {
        self.standing_queries.write().insert(record.id, record);
        Ok(())
    }

    async fn delete_standing_query(&self, id: StandingQueryId) -> Result<()> {
        self.standing_queries.write().remove(&id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use strandgraph_types::{
        EdgeDirection, EdgeEvent, HalfEdge, PropertyEvent, PropertyValue, StandingQueryPattern,
        SubscriberRef, ids::DgnId,
    };

    use super::*;

    fn set(key: &str, value: u64) -> NodeChangeEvent {
        NodeChangeEvent::Property(PropertyEvent::Set {
            key: key.into(),
            value: PropertyValue::of(&value).unwrap(),
        })
    }

    #[tokio::test]
    async fn test_journal_roundtrip_in_order() {
        let persistor = InMemoryPersistor::new();
        let qid = QuineId::from_u64(1);

        let events = vec![
            (EventTime::from_parts(10, 0), set("a", 1)),
            (EventTime::from_parts(10, 1), set("b", 2)),
            (EventTime::from_parts(11, 0), set("c", 3)),
        ];
        persistor.persist_node_change_events(qid, events.clone()).await.unwrap();

        let journal = persistor
            .get_journal_with_time(qid, EventTime::MIN, EventTime::MAX, false)
            .await
            .unwrap();
        assert_eq!(journal.len(), 3);
        for ((at, original), (decoded_at, decoded)) in events.iter().zip(&journal) {
            assert_eq!(at, decoded_at);
            assert_eq!(&NodeEvent::from(original.clone()), decoded);
        }
    }

    #[tokio::test]
    async fn test_journal_bounds_are_inclusive() {
        let persistor = InMemoryPersistor::new();
        let qid = QuineId::from_u64(1);
        for i in 0..5u64 {
            persistor
                .persist_node_change_events(qid, vec![(EventTime::from_parts(i, 0), set("k", i))])
                .await
                .unwrap();
        }

        let journal = persistor
            .get_journal_with_time(
                qid,
                EventTime::from_parts(1, 0),
                EventTime::from_parts(3, 0),
                false,
            )
            .await
            .unwrap();
        assert_eq!(journal.len(), 3);
        assert_eq!(journal[0].0, EventTime::from_parts(1, 0));
        assert_eq!(journal[2].0, EventTime::from_parts(3, 0));
    }

    #[tokio::test]
    async fn test_domain_index_stream_merges_in_time_order() {
        let persistor = InMemoryPersistor::new();
        let qid = QuineId::from_u64(1);

        persistor
            .persist_node_change_events(qid, vec![
                (EventTime::from_parts(1, 0), set("a", 1)),
                (EventTime::from_parts(3, 0), set("b", 2)),
            ])
            .await
            .unwrap();
        persistor
            .persist_domain_index_events(qid, vec![(
                EventTime::from_parts(2, 0),
                DomainIndexEvent::SubscriptionResult {
                    from: QuineId::from_u64(9),
                    dgn_id: DgnId::new(4),
                    result: true,
                },
            )])
            .await
            .unwrap();

        let merged = persistor
            .get_journal_with_time(qid, EventTime::MIN, EventTime::MAX, true)
            .await
            .unwrap();
        let times: Vec<_> = merged.iter().map(|(at, _)| at.millis()).collect();
        assert_eq!(times, vec![1, 2, 3]);

        let without = persistor
            .get_journal_with_time(qid, EventTime::MIN, EventTime::MAX, false)
            .await
            .unwrap();
        assert_eq!(without.len(), 2);
    }

    #[tokio::test]
    async fn test_latest_snapshot_at_or_before() {
        let persistor = InMemoryPersistor::new();
        let qid = QuineId::from_u64(1);
        persistor.persist_snapshot(qid, EventTime::from_parts(5, 0), vec![5]).await.unwrap();
        persistor.persist_snapshot(qid, EventTime::from_parts(9, 0), vec![9]).await.unwrap();

        let found =
            persistor.get_latest_snapshot(qid, EventTime::from_parts(7, 0)).await.unwrap();
        assert_eq!(found, Some((EventTime::from_parts(5, 0), vec![5])));

        let latest = persistor.get_latest_snapshot(qid, EventTime::MAX).await.unwrap();
        assert_eq!(latest, Some((EventTime::from_parts(9, 0), vec![9])));

        let none =
            persistor.get_latest_snapshot(qid, EventTime::from_parts(1, 0)).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_singleton_snapshot_replaces_prior() {
        let persistor = InMemoryPersistor::new();
        let qid = QuineId::from_u64(1);
        persistor.persist_snapshot(qid, EventTime::MAX, vec![1]).await.unwrap();
        persistor.persist_snapshot(qid, EventTime::MAX, vec![2]).await.unwrap();

        assert_eq!(persistor.snapshot_count(qid), 1);
        let latest = persistor.get_latest_snapshot(qid, EventTime::MAX).await.unwrap();
        assert_eq!(latest, Some((EventTime::MAX, vec![2])));
    }

    #[tokio::test]
    async fn test_standing_query_crud() {
        let persistor = InMemoryPersistor::new();
        let record = StandingQueryRecord {
            id: StandingQueryId::fresh(),
            pattern: StandingQueryPattern::MultipleValues { parts: Vec::new() },
        };

        persistor.put_standing_query(record.clone()).await.unwrap();
        assert_eq!(persistor.get_standing_query(record.id).await.unwrap(), Some(record.clone()));
        assert_eq!(persistor.list_standing_queries().await.unwrap(), vec![record.clone()]);

        persistor.delete_standing_query(record.id).await.unwrap();
        assert!(persistor.get_standing_query(record.id).await.unwrap().is_none());
        assert!(persistor.list_standing_queries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_node_reads_empty() {
        let persistor = InMemoryPersistor::new();
        let qid = QuineId::from_u64(404);
        let journal = persistor
            .get_journal_with_time(qid, EventTime::MIN, EventTime::MAX, true)
            .await
            .unwrap();
        assert!(journal.is_empty());
        assert!(persistor.get_latest_snapshot(qid, EventTime::MAX).await.unwrap().is_none());
    }

    #[test]
    fn test_counts_observability() {
        let persistor = InMemoryPersistor::new();
        let qid = QuineId::from_u64(1);
        assert_eq!(persistor.node_change_event_count(qid), 0);
        assert_eq!(persistor.domain_index_event_count(qid), 0);
        assert_eq!(persistor.snapshot_count(qid), 0);
    }

    // SubscriberRef is ordered so subscription sets serialize deterministically.
    #[test]
    fn test_subscriber_ref_ordering_is_total() {
        let a = SubscriberRef::Node(QuineId::from_u64(1));
        let b = SubscriberRef::Node(QuineId::from_u64(2));
        assert!(a < b);
    }

    #[test]
    fn test_edge_event_helper() {
        let edge = HalfEdge::new(EdgeDirection::Outgoing, "x", QuineId::from_u64(2));
        assert_eq!(EdgeEvent::Added(edge.clone()).half_edge(), &edge);
    }
}
