//! Event guarding, deduplication, and journal contents.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::memory_shard;
use strandgraph_test_utils::{add_edge, remove_property, set_property};
use strandgraph_types::{EventTime, GraphConfig, NodeEvent, NodeRef, PropertyEvent, QuineId};

#[tokio::test]
async fn property_batch_dedups_and_journals_once() {
    let (shard, persistor, _registry, _sq) = memory_shard(GraphConfig::default());
    let node = NodeRef::live(QuineId::from_u64(1));

    // Set, overwrite, and a no-op repeat in a single batch.
    shard
        .submit_property_events(
            node,
            vec![set_property("x", &1u64), set_property("x", &2u64), set_property("x", &2u64)],
            None,
        )
        .await
        .unwrap();

    assert_eq!(persistor.node_change_event_count(node.qid), 1);

    let record = shard.debug_internal_state(node).await.unwrap();
    assert_eq!(
        record.properties.get(&"x".into()).unwrap().decode_as::<u64>().unwrap(),
        2
    );
    // Exactly one effective write, so the dirty marker is that event's time.
    let (journaled_at, journaled) = &record.journal[0];
    assert_eq!(record.journal.len(), 1);
    assert_eq!(record.latest_update_after_snapshot, Some(*journaled_at));
    match journaled {
        NodeEvent::Property(PropertyEvent::Set { key, value }) => {
            assert_eq!(key.as_str(), "x");
            assert_eq!(value.decode_as::<u64>().unwrap(), 2);
        },
        other => panic!("unexpected journal record: {other:?}"),
    }
}

#[tokio::test]
async fn edge_add_is_idempotent() {
    let (shard, persistor, _registry, _sq) = memory_shard(GraphConfig::default());
    let node = NodeRef::live(QuineId::from_u64(1));
    let peer = QuineId::from_u64(42);

    shard.submit_edge_events(node, vec![add_edge("knows", peer)], None).await.unwrap();
    assert_eq!(persistor.node_change_event_count(node.qid), 1);

    // Second submission is a no-op: reply Ok, empty journal write elided.
    shard.submit_edge_events(node, vec![add_edge("knows", peer)], None).await.unwrap();
    assert_eq!(persistor.node_change_event_count(node.qid), 1);

    let record = shard.debug_internal_state(node).await.unwrap();
    assert_eq!(record.edges.len(), 1);
}

#[tokio::test]
async fn noop_event_leaves_dirty_marker_unchanged() {
    let (shard, persistor, _registry, _sq) = memory_shard(GraphConfig::default());
    let node = NodeRef::live(QuineId::from_u64(1));

    shard.submit_property_events(node, vec![set_property("x", &1u64)], None).await.unwrap();
    shard.snapshot_now(node).await.unwrap();

    // Allow the background snapshot completion to clear the marker.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let before = shard.debug_internal_state(node).await.unwrap();
    assert_eq!(before.latest_update_after_snapshot, None);

    // Same value again: zero journal writes, marker untouched.
    shard.submit_property_events(node, vec![set_property("x", &1u64)], None).await.unwrap();
    assert_eq!(persistor.node_change_event_count(node.qid), 1);
    let after = shard.debug_internal_state(node).await.unwrap();
    assert_eq!(after.latest_update_after_snapshot, None);
}

#[tokio::test]
async fn remove_journals_actual_previous_value() {
    let (shard, _persistor, _registry, _sq) = memory_shard(GraphConfig::default());
    let node = NodeRef::live(QuineId::from_u64(1));

    shard.submit_property_events(node, vec![set_property("x", &7u64)], None).await.unwrap();
    shard.submit_property_events(node, vec![remove_property("x")], None).await.unwrap();

    let record = shard.debug_internal_state(node).await.unwrap();
    assert!(record.properties.is_empty());
    match &record.journal[1].1 {
        NodeEvent::Property(PropertyEvent::Removed { previous, .. }) => {
            assert_eq!(previous.decode_as::<u64>().unwrap(), 7);
        },
        other => panic!("unexpected journal record: {other:?}"),
    }

    // Removing an absent key is a no-op.
    shard.submit_property_events(node, vec![remove_property("x")], None).await.unwrap();
    assert_eq!(shard.debug_internal_state(node).await.unwrap().journal.len(), 2);
}

#[tokio::test]
async fn event_times_are_strictly_increasing() {
    let (shard, _persistor, _registry, _sq) = memory_shard(GraphConfig::default());
    let node = NodeRef::live(QuineId::from_u64(1));

    for i in 0..50u64 {
        shard
            .submit_property_events(node, vec![set_property("k", &i)], None)
            .await
            .unwrap();
    }

    let record = shard.debug_internal_state(node).await.unwrap();
    assert_eq!(record.journal.len(), 50);
    for pair in record.journal.windows(2) {
        assert!(pair[0].0 < pair[1].0, "event times regressed: {} then {}", pair[0].0, pair[1].0);
    }
}

#[tokio::test]
async fn at_override_stamps_first_event() {
    let (shard, _persistor, _registry, _sq) = memory_shard(GraphConfig::default());
    let node = NodeRef::live(QuineId::from_u64(1));

    shard.submit_property_events(node, vec![set_property("a", &1u64)], None).await.unwrap();
    let last = shard.debug_internal_state(node).await.unwrap().journal[0].0;

    // An override beyond the clock becomes the exact stamp.
    let future = EventTime::from_parts(last.millis() + 60_000, 3);
    shard
        .submit_property_events(node, vec![set_property("b", &2u64)], Some(future))
        .await
        .unwrap();

    let record = shard.debug_internal_state(node).await.unwrap();
    assert_eq!(record.journal[1].0, future);

    // The clock bumped past the override: later stamps exceed it.
    shard.submit_property_events(node, vec![set_property("c", &3u64)], None).await.unwrap();
    let record = shard.debug_internal_state(node).await.unwrap();
    assert!(record.journal[2].0 > future);
}

#[tokio::test]
async fn empty_and_ineffective_batches_touch_nothing() {
    let (shard, persistor, _registry, _sq) = memory_shard(GraphConfig::default());
    let node = NodeRef::live(QuineId::from_u64(1));

    shard.submit_property_events(node, Vec::new(), None).await.unwrap();
    assert_eq!(persistor.node_change_event_count(node.qid), 0);

    // A batch that cancels itself out: add then remove the same edge.
    let peer = QuineId::from_u64(2);
    shard
        .submit_edge_events(
            node,
            vec![
                strandgraph_test_utils::add_edge("x", peer),
                strandgraph_test_utils::remove_edge("x", peer),
            ],
            None,
        )
        .await
        .unwrap();
    // Both events were effective relative to the evolving batch state.
    assert_eq!(persistor.node_change_event_count(node.qid), 2);
    let record = shard.debug_internal_state(node).await.unwrap();
    assert!(record.edges.is_empty());
}
