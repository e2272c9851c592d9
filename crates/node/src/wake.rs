//! Wake/sleep state and restoration from durable storage.
//!
//! Every node has a [`NodeCell`]: the only cross-thread shared mutable for
//! that node. Shard routing consults the cell under a read-shared lock; the
//! sleep transition holds it write-exclusively, which blocks inbound
//! routing for the duration. Restoration reads the latest snapshot, replays
//! the journal tail with side effects suppressed, and rebuilds the derived
//! event index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use strandgraph_persist::{Persistor, decode_snapshot};
use strandgraph_types::{
    EventClock, EventTime, NodeChangeEvent, NodeError, NodeEvent, QuineId,
    error::{PersistorPermanentSnafu, Result},
};
use tokio::sync::RwLock;

use crate::actor::NodeHandle;
use crate::index::LocalEventIndex;
use crate::registry::DgnRegistry;
use crate::state::NodeState;
use crate::subscribers::{
    SideEffects, apply_domain_index_event, ensure_subscription_to_domain_edges,
    update_answer_and_notify_subscribers,
};

/// Lifecycle state of one node.
#[derive(Debug, Default)]
pub enum WakefulState {
    /// No in-memory state exists; the durable journal+snapshot is
    /// authoritative.
    #[default]
    Asleep,
    /// Restoration is in progress; routing waits on the cell lock.
    Waking,
    /// The actor is live and reachable through the handle.
    Awake(NodeHandle),
    /// A sleep transition started at the given instant.
    GoingToSleep(EventTime),
}

/// The shared cell shard routing consults for one node.
#[derive(Debug)]
pub struct NodeCell {
    qid: QuineId,
    at_time: Option<u64>,
    /// Read-shared for delivery, write-exclusive for wake/sleep.
    pub(crate) lock: RwLock<WakefulState>,
    /// Incremented on each wake; shards evict low-cost nodes first.
    pub(crate) cost_to_sleep: AtomicU64,
}

impl NodeCell {
    /// Creates a cell in the `Asleep` state.
    pub(crate) fn new(qid: QuineId, at_time: Option<u64>) -> Self {
        Self {
            qid,
            at_time,
            lock: RwLock::new(WakefulState::Asleep),
            cost_to_sleep: AtomicU64::new(0),
        }
    }

    /// The node this cell tracks.
    pub fn qid(&self) -> QuineId {
        self.qid
    }

    /// Historical instant, if this cell tracks a historical view.
    pub fn at_time(&self) -> Option<u64> {
        self.at_time
    }

    /// Number of wakes so far; the shard's eviction bias.
    pub fn cost_to_sleep(&self) -> u64 {
        self.cost_to_sleep.load(Ordering::Relaxed)
    }

    /// Non-blocking attempt to get the live handle.
    ///
    /// Fails during wake and sleep transitions (the lock is held
    /// exclusively) and while the node is asleep.
    pub fn try_handle(&self) -> Option<NodeHandle> {
        let guard = self.lock.try_read().ok()?;
        match &*guard {
            WakefulState::Awake(handle) => Some(handle.clone()),
            _ => None,
        }
    }
}

/// The current wall clock as an event-time upper bound.
pub(crate) fn wall_event_time() -> EventTime {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    EventTime::largest_in_millis(now_ms)
}

/// Restores a node's state from the latest snapshot plus the journal tail.
///
/// For historical views (`at_time` set), restoration stops at the bound:
/// the latest snapshot at or before it, then journal records through it.
/// Replay applies events locally with all side effects suppressed — no
/// outbound messages, no new journal records — then rebuilds the derived
/// index, drops subscriptions to deregistered fragments, and silently
/// realigns cached answers with the restored state.
///
/// Returns the state together with a clock positioned after the last
/// replayed event, so newly issued stamps continue the strict order.
pub(crate) async fn restore_node(
    qid: QuineId,
    at_time: Option<u64>,
    persistor: &dyn Persistor,
    registry: &DgnRegistry,
) -> Result<(NodeState, EventClock)> {
    let upper = at_time.map_or(EventTime::MAX, EventTime::largest_in_millis);

    let snapshot = persistor.get_latest_snapshot(qid, upper).await.map_err(NodeError::from)?;
    let mut clock = EventClock::new();
    let (mut state, journal_from) = match snapshot {
        Some((_, blob)) => {
            let decoded = match decode_snapshot(&blob) {
                Ok(decoded) => decoded,
                Err(err) => {
                    return PersistorPermanentSnafu { message: err.to_string() }.fail();
                },
            };
            let from = decoded.at.successor();
            // Stamps issued after this wake must exceed everything the
            // snapshot covers, even within the same wall millisecond.
            clock.bump_to(decoded.at);
            (NodeState::from_snapshot(decoded), from)
        },
        None => (NodeState::new(), EventTime::MIN),
    };

    let journal = persistor
        .get_journal_with_time(qid, journal_from, upper, true)
        .await
        .map_err(NodeError::from)?;
    let mut suppressed = SideEffects::default();
    let replayed = journal.len();
    for (at, event) in journal {
        clock.bump_to(at);
        match event {
            NodeEvent::Property(e) => state.apply_node_change(&NodeChangeEvent::Property(e)),
            NodeEvent::Edge(e) => state.apply_node_change(&NodeChangeEvent::Edge(e)),
            NodeEvent::DomainIndex(e) => {
                apply_domain_index_event(&mut state, registry, qid, &e, false, &mut suppressed);
            },
        }
    }
    debug_assert!(suppressed.is_empty(), "replay must not emit side effects");

    // Rebuild the derived index; garbage-collect subscriptions to fragments
    // no longer registered globally.
    let (index, stale) =
        LocalEventIndex::rebuild(&state.subscribers, &std::collections::BTreeMap::new(), registry);
    state.index = index;
    for dgn_id in &stale {
        state.subscribers.remove(dgn_id);
    }

    // Realign cached answers with the restored state, without notifying:
    // peers observed all pre-sleep effects already.
    let subscribed: Vec<_> = state.subscribers.keys().copied().collect();
    for dgn_id in subscribed {
        if let Some(dgn) = registry.get(dgn_id) {
            ensure_subscription_to_domain_edges(&mut state, qid, &dgn, false, &mut suppressed);
            update_answer_and_notify_subscribers(&mut state, qid, &dgn, false, &mut suppressed);
        }
    }
    debug_assert!(suppressed.is_empty());

    tracing::debug!(
        node = %qid,
        historical = at_time.is_some(),
        replayed,
        stale_fragments = stale.len(),
        "node restored"
    );
    Ok((state, clock))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_starts_asleep() {
        let cell = NodeCell::new(QuineId::from_u64(1), None);
        assert!(matches!(*cell.lock.try_read().unwrap(), WakefulState::Asleep));
        assert!(cell.try_handle().is_none());
        assert_eq!(cell.cost_to_sleep(), 0);
    }

    #[test]
    fn test_wall_event_time_is_recent() {
        let t = wall_event_time();
        assert!(t > EventTime::MIN);
        assert!(t < EventTime::MAX);
    }
}
