//! The node actor: single-writer event processing for one graph node.
//!
//! Exactly one tokio task owns a node's mutable state. Messages arrive over
//! an mpsc channel and are handled strictly one at a time; when a
//! PersistorFirst write is awaited, later messages simply wait in the
//! channel in arrival order, which realizes message-processing suspension
//! without an explicit stash. Async persistence completions from the
//! MemoryFirst write lane come back as ordinary inbox messages, so no
//! completion callback ever touches state concurrently.
//!
//! Every mutation flows through the same guard pipeline: historical and
//! unhealthy rejection, effect filtering, event-time stamping, then
//! persist-and-apply in the order the configured [`EffectOrder`] dictates.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use strandgraph_persist::{Persistor, encode_snapshot, retry_transient_forever};
use strandgraph_types::{
    DomainIndexEvent, EdgeEvent, EffectOrder, EventClock, EventTime, GraphConfig, Hash,
    NodeChangeEvent, NodeError, PropertyEvent, PropertyKey, QuineId, SqPartId, StandingQueryId,
    SubscriberRef,
    error::{
        IllegalHistoricalUpdateSnafu, PersistorPermanentSnafu, Result, UnhealthySnafu,
    },
    standing_query::StandingQueryPattern,
};
use tokio::sync::{mpsc, oneshot};

use crate::index::Subscriber;
use crate::messages::{NodeInternalState, NodeMessage, RoutedMessage, SqOutput};
use crate::registry::DgnRegistry;
use crate::state::{MvsqState, NodeState};
use crate::subscribers::{
    SideEffects, apply_domain_index_event, domain_index_has_effect,
    ensure_subscription_to_domain_edges, update_answer_and_notify_subscribers,
};

/// Cheap cloneable handle for sending messages to a node actor.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    qid: QuineId,
    tx: mpsc::UnboundedSender<NodeMessage>,
}

impl NodeHandle {
    /// The node this handle addresses.
    pub fn qid(&self) -> QuineId {
        self.qid
    }

    /// Returns `true` while the actor task is still receiving.
    ///
    /// A crashed actor closes its inbox; the shard then restarts the node
    /// in a clean state from the durable journal and snapshot.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Sends a raw message without waiting for any reply.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ActorGone`] if the actor has stopped.
    pub fn send(&self, message: NodeMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| NodeError::ActorGone { qid: self.qid })
    }

    /// Submits a property event batch and awaits completion.
    ///
    /// Under MemoryFirst the reply resolves once the events are durable;
    /// the in-memory effects are visible to subsequent messages much
    /// earlier.
    ///
    /// # Errors
    ///
    /// Propagates guard and persistence failures.
    pub async fn submit_property_events(
        &self,
        events: Vec<PropertyEvent>,
        at_override: Option<EventTime>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeMessage::PropertyEvents { events, at_override, reply })?;
        rx.await.map_err(|_| NodeError::ActorGone { qid: self.qid })?
    }

    /// Submits an edge event batch and awaits completion.
    ///
    /// # Errors
    ///
    /// Propagates guard and persistence failures.
    pub async fn submit_edge_events(
        &self,
        events: Vec<EdgeEvent>,
        at_override: Option<EventTime>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeMessage::EdgeEvents { events, at_override, reply })?;
        rx.await.map_err(|_| NodeError::ActorGone { qid: self.qid })?
    }

    /// Submits a domain-index event and awaits completion.
    ///
    /// # Errors
    ///
    /// Propagates guard and persistence failures.
    pub async fn submit_domain_index_event(&self, event: DomainIndexEvent) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeMessage::DomainIndexEvent { event, reply: Some(reply) })?;
        rx.await.map_err(|_| NodeError::ActorGone { qid: self.qid })?
    }

    /// Delivers a domain-index event without awaiting its outcome.
    ///
    /// Used by the shard dispatcher for peer-originated messages.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ActorGone`] if the actor has stopped.
    pub fn notify_domain_index_event(&self, event: DomainIndexEvent) -> Result<()> {
        self.send(NodeMessage::DomainIndexEvent { event, reply: None })
    }

    /// Forces a snapshot now. No-op on historical nodes.
    ///
    /// # Errors
    ///
    /// Propagates snapshot encoding and persistence failures.
    pub async fn snapshot_now(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeMessage::SnapshotNow { reply })?;
        rx.await.map_err(|_| NodeError::ActorGone { qid: self.qid })?
    }

    /// Computes the content hash over `(qid, properties, edges)`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ActorGone`] if the actor has stopped.
    pub async fn node_hash(&self) -> Result<Hash> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeMessage::NodeHash { reply })?;
        rx.await.map_err(|_| NodeError::ActorGone { qid: self.qid })
    }

    /// Fetches the in-memory half of the diagnostic record.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ActorGone`] if the actor has stopped.
    pub async fn debug_state(&self) -> Result<NodeInternalState> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeMessage::DebugState { reply })?;
        rx.await.map_err(|_| NodeError::ActorGone { qid: self.qid })
    }

    /// Re-syncs local standing-query registrations against the durable set.
    ///
    /// # Errors
    ///
    /// Propagates persistor read failures.
    pub async fn sync_standing_queries(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeMessage::SyncStandingQueries { reply })?;
        rx.await.map_err(|_| NodeError::ActorGone { qid: self.qid })?
    }

    /// Asks the actor to write its final snapshot and stop.
    ///
    /// # Errors
    ///
    /// Returns the snapshot failure that aborted the sleep, if any.
    pub(crate) async fn sleep(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeMessage::Sleep { reply })?;
        // A dropped reply means the actor already stopped, which is the
        // outcome sleep wants.
        rx.await.unwrap_or(Ok(()))
    }
}

/// Everything needed to start a node actor.
pub(crate) struct NodeActorSeed {
    pub qid: QuineId,
    pub at_time: Option<u64>,
    pub config: GraphConfig,
    pub clock: EventClock,
    pub state: NodeState,
    pub persistor: Arc<dyn Persistor>,
    pub registry: DgnRegistry,
    pub outbound: mpsc::UnboundedSender<RoutedMessage>,
}

/// Operations queued on the MemoryFirst per-node write lane.
///
/// The lane is a single task draining a queue, so the backend receives a
/// node's writes in the order they were issued even across retries.
enum LaneOp {
    NodeChange {
        events: Vec<(EventTime, NodeChangeEvent)>,
        done: oneshot::Sender<Result<()>>,
    },
    DomainIndex {
        events: Vec<(EventTime, DomainIndexEvent)>,
        done: Option<oneshot::Sender<Result<()>>>,
    },
    Snapshot {
        key: EventTime,
        captured: EventTime,
        blob: Vec<u8>,
    },
}

/// Single-writer actor owning one node's state.
pub(crate) struct NodeActor {
    qid: QuineId,
    at_time: Option<u64>,
    config: GraphConfig,
    clock: EventClock,
    state: NodeState,
    persistor: Arc<dyn Persistor>,
    registry: DgnRegistry,
    outbound: mpsc::UnboundedSender<RoutedMessage>,
    inbox: mpsc::UnboundedReceiver<NodeMessage>,
    lane: Option<mpsc::UnboundedSender<LaneOp>>,
    healthy: bool,
}

/// Spawns the actor task and returns its handle.
pub(crate) fn spawn(seed: NodeActorSeed) -> NodeHandle {
    let (tx, rx) = mpsc::unbounded_channel();

    // Historical views never write, so they get no write lane.
    let lane = (seed.config.effect_order == EffectOrder::MemoryFirst && seed.at_time.is_none())
        .then(|| {
            spawn_write_lane(
                seed.qid,
                Arc::clone(&seed.persistor),
                seed.config.retry.clone(),
                tx.clone(),
            )
        });

    let actor = NodeActor {
        qid: seed.qid,
        at_time: seed.at_time,
        config: seed.config,
        clock: seed.clock,
        state: seed.state,
        persistor: seed.persistor,
        registry: seed.registry,
        outbound: seed.outbound,
        inbox: rx,
        lane,
        healthy: true,
    };
    tokio::spawn(actor.run());

    NodeHandle { qid: seed.qid, tx }
}

/// Spawns the per-node write lane and returns its queue.
fn spawn_write_lane(
    qid: QuineId,
    persistor: Arc<dyn Persistor>,
    retry: strandgraph_types::PersistRetryConfig,
    actor_tx: mpsc::UnboundedSender<NodeMessage>,
) -> mpsc::UnboundedSender<LaneOp> {
    let (tx, mut rx) = mpsc::unbounded_channel::<LaneOp>();
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            match op {
                LaneOp::NodeChange { events, done } => {
                    let result = retry_transient_forever(&retry, "node_change_events", || {
                        let persistor = Arc::clone(&persistor);
                        let events = events.clone();
                        async move { persistor.persist_node_change_events(qid, events).await }
                    })
                    .await;
                    if let Err(err) = &result {
                        let _ = actor_tx
                            .send(NodeMessage::PersistFailed { message: err.to_string() });
                    }
                    let _ = done.send(result.map_err(Into::into));
                },
                LaneOp::DomainIndex { events, done } => {
                    let result = retry_transient_forever(&retry, "domain_index_events", || {
                        let persistor = Arc::clone(&persistor);
                        let events = events.clone();
                        async move { persistor.persist_domain_index_events(qid, events).await }
                    })
                    .await;
                    if let Err(err) = &result {
                        let _ = actor_tx
                            .send(NodeMessage::PersistFailed { message: err.to_string() });
                    }
                    if let Some(done) = done {
                        let _ = done.send(result.map_err(Into::into));
                    }
                },
                LaneOp::Snapshot { key, captured, blob } => {
                    let result = retry_transient_forever(&retry, "snapshot", || {
                        let persistor = Arc::clone(&persistor);
                        let blob = blob.clone();
                        async move { persistor.persist_snapshot(qid, key, blob).await }
                    })
                    .await;
                    match result {
                        Ok(()) => {
                            let _ = actor_tx.send(NodeMessage::SnapshotPersisted { at: captured });
                        },
                        Err(err) => {
                            let _ = actor_tx
                                .send(NodeMessage::PersistFailed { message: err.to_string() });
                        },
                    }
                },
            }
        }
    });
    tx
}

impl NodeActor {
    /// Message loop: one message at a time until `Sleep` or channel close.
    async fn run(mut self) {
        while let Some(message) = self.inbox.recv().await {
            if !self.handle(message).await {
                break;
            }
        }
        tracing::debug!(node = %self.qid, "node actor stopped");
    }

    /// Handles one message. Returns `false` to stop the loop.
    async fn handle(&mut self, message: NodeMessage) -> bool {
        match message {
            NodeMessage::PropertyEvents { events, at_override, reply } => {
                let deduped = dedup_last_per_key(events);
                let changes = deduped.into_iter().map(NodeChangeEvent::Property).collect();
                self.submit_node_changes(changes, at_override, reply).await;
                true
            },
            NodeMessage::EdgeEvents { events, at_override, reply } => {
                let changes = events.into_iter().map(NodeChangeEvent::Edge).collect();
                self.submit_node_changes(changes, at_override, reply).await;
                true
            },
            NodeMessage::DomainIndexEvent { event, reply } => {
                self.ingest_domain_index_event(event, reply).await;
                true
            },
            NodeMessage::SnapshotNow { reply } => {
                let result = self.write_snapshot().await;
                let _ = reply.send(result);
                true
            },
            NodeMessage::NodeHash { reply } => {
                let _ = reply.send(self.state.node_hash(self.qid));
                true
            },
            NodeMessage::DebugState { reply } => {
                let _ = reply.send(self.debug_record());
                true
            },
            NodeMessage::SyncStandingQueries { reply } => {
                let result = self.sync_standing_queries().await;
                let _ = reply.send(result);
                true
            },
            NodeMessage::SnapshotPersisted { at } => {
                self.clear_dirty_up_to(at);
                true
            },
            NodeMessage::PersistFailed { message } => {
                tracing::error!(node = %self.qid, message, "marking node unhealthy");
                self.healthy = false;
                true
            },
            NodeMessage::Sleep { reply } => self.handle_sleep(reply).await,
        }
    }

    /// Rejects mutations on historical views and unhealthy nodes before
    /// anything touches the persistor.
    fn precheck_mutation(&self) -> Result<()> {
        if let Some(at_millis) = self.at_time {
            return IllegalHistoricalUpdateSnafu { qid: self.qid, at_millis }.fail();
        }
        if !self.healthy {
            return UnhealthySnafu { qid: self.qid }.fail();
        }
        Ok(())
    }

    /// The guard pipeline shared by the property and edge paths.
    async fn submit_node_changes(
        &mut self,
        events: Vec<NodeChangeEvent>,
        at_override: Option<EventTime>,
        reply: oneshot::Sender<Result<()>>,
    ) {
        if let Err(err) = self.precheck_mutation() {
            let _ = reply.send(Err(err));
            return;
        }

        let effective = self.filter_effective(events);
        if effective.is_empty() {
            // Nothing to journal, nothing to apply.
            let _ = reply.send(Ok(()));
            return;
        }

        let stamped = self.stamp(effective, at_override);
        match self.config.effect_order {
            EffectOrder::PersistorFirst => {
                // Awaiting here suspends all further message processing on
                // this node until the events are durable.
                match self
                    .persistor
                    .persist_node_change_events(self.qid, stamped.clone())
                    .await
                {
                    Ok(()) => {
                        self.apply_and_post(&stamped).await;
                        let _ = reply.send(Ok(()));
                    },
                    Err(err) => {
                        if !err.is_retryable() {
                            self.healthy = false;
                        }
                        tracing::warn!(
                            node = %self.qid,
                            error = %err,
                            "write failed, in-memory state unchanged"
                        );
                        let _ = reply.send(Err(err.into()));
                    },
                }
            },
            EffectOrder::MemoryFirst => {
                self.apply_and_post(&stamped).await;
                self.enqueue_lane(LaneOp::NodeChange { events: stamped, done: reply });
            },
        }
    }

    /// Filters out events with no effect, checking each event against the
    /// state as modified by the earlier events in the same batch, and
    /// canonicalizes the survivors.
    fn filter_effective(&self, events: Vec<NodeChangeEvent>) -> Vec<NodeChangeEvent> {
        let mut effective = Vec::new();
        let mut added: HashSet<strandgraph_types::HalfEdge> = HashSet::new();
        let mut removed: HashSet<strandgraph_types::HalfEdge> = HashSet::new();

        for event in events {
            match &event {
                NodeChangeEvent::Edge(edge_event) => {
                    let edge = edge_event.half_edge();
                    let present = (self.state.edges.contains(edge) || added.contains(edge))
                        && !removed.contains(edge);
                    let has_effect = match edge_event {
                        EdgeEvent::Added(_) => !present,
                        EdgeEvent::Removed(_) => present,
                    };
                    if !has_effect {
                        continue;
                    }
                    match edge_event {
                        EdgeEvent::Added(e) => {
                            added.insert(e.clone());
                            removed.remove(e);
                        },
                        EdgeEvent::Removed(e) => {
                            removed.insert(e.clone());
                            added.remove(e);
                        },
                    }
                    effective.push(event);
                },
                NodeChangeEvent::Property(_) => {
                    // Property batches are pre-deduplicated to one event
                    // per key, so checking against current state suffices.
                    if self.state.node_change_has_effect(&event) {
                        effective.push(self.state.canonicalize_node_change(event));
                    }
                },
            }
        }
        effective
    }

    /// Stamps events with strictly increasing event times.
    ///
    /// A caller-supplied override becomes the first event's stamp when the
    /// clock has not already passed it; the clock never regresses.
    fn stamp(
        &mut self,
        events: Vec<NodeChangeEvent>,
        at_override: Option<EventTime>,
    ) -> Vec<(EventTime, NodeChangeEvent)> {
        let mut stamped = Vec::with_capacity(events.len());
        let mut first = true;
        for event in events {
            let at = match at_override {
                Some(over) if first && over > self.clock.peek() => {
                    self.clock.bump_to(over);
                    over
                },
                _ => self.clock.tick(),
            };
            first = false;
            stamped.push((at, event));
        }
        stamped
    }

    /// Applies events in memory, bumps the dirty marker, and runs
    /// post-actions.
    async fn apply_and_post(&mut self, stamped: &[(EventTime, NodeChangeEvent)]) {
        for (_, event) in stamped {
            self.state.apply_node_change(event);
        }
        if let Some((at, _)) = stamped.last() {
            self.state.latest_update_after_snapshot = Some(*at);
        }

        let effects = self.run_post_actions(stamped);
        self.dispatch_effects(effects).await;

        if self.config.snapshot_on_update
            && let Err(err) = self.write_snapshot().await
        {
            tracing::warn!(node = %self.qid, error = %err, "snapshot on update failed");
        }
    }

    /// Consults the local event index for each event and drives the
    /// interested subscribers: multiple-values updates are accumulated and
    /// dispatched once per subscriber in event order; domain-graph
    /// subscriptions are re-ensured and re-answered; subscriptions to
    /// globally-deregistered fragments are dropped.
    fn run_post_actions(&mut self, stamped: &[(EventTime, NodeChangeEvent)]) -> SideEffects {
        let mut effects = SideEffects::default();
        let mut mvsq_updates: BTreeMap<(StandingQueryId, SqPartId), Vec<NodeChangeEvent>> =
            BTreeMap::new();
        let mut dgns_to_check: BTreeSet<strandgraph_types::ids::DgnId> = BTreeSet::new();
        let mut stale: BTreeSet<strandgraph_types::ids::DgnId> = BTreeSet::new();

        // The index is taken out for the duration of the scan because the
        // removal callback needs the rest of the state.
        let mut index = std::mem::take(&mut self.state.index);
        for (_, event) in stamped {
            index.standing_queries_watching(event, |subscriber| match subscriber {
                Subscriber::MultipleValuesSq { sq_id, part_id } => {
                    if self.state.mvsq.contains_key(&(sq_id, part_id)) {
                        mvsq_updates.entry((sq_id, part_id)).or_default().push(event.clone());
                        false
                    } else {
                        true
                    }
                },
                Subscriber::DomainNodeIndex { dgn_id } => {
                    if self.registry.contains(dgn_id) {
                        dgns_to_check.insert(dgn_id);
                        false
                    } else {
                        stale.insert(dgn_id);
                        true
                    }
                },
            });
        }
        self.state.index = index;

        // Self-heal: the fragment disappeared from the global registry, so
        // the local subscription record goes too.
        for dgn_id in stale {
            self.state.subscribers.remove(&dgn_id);
            tracing::debug!(node = %self.qid, dgn = %dgn_id, "dropped stale fragment subscription");
        }

        for ((sq_id, part_id), events) in mvsq_updates {
            if let Some(part) = self.state.mvsq.get_mut(&(sq_id, part_id)) {
                for event in &events {
                    match event {
                        NodeChangeEvent::Property(PropertyEvent::Set { key, value })
                            if part.spec.watched_properties.contains(key) =>
                        {
                            part.accumulated.insert(key.clone(), value.clone());
                        },
                        NodeChangeEvent::Property(PropertyEvent::Removed { key, .. }) => {
                            part.accumulated.remove(key);
                        },
                        _ => {},
                    }
                }
                for subscriber in &part.subscribers {
                    effects.routed.push(RoutedMessage::SqOutput(SqOutput::MvsqUpdate {
                        query_id: sq_id,
                        part_id,
                        from: self.qid,
                        subscriber: *subscriber,
                        events: events.clone(),
                    }));
                }
            }
        }

        for dgn_id in dgns_to_check {
            if let Some(dgn) = self.registry.get(dgn_id) {
                ensure_subscription_to_domain_edges(
                    &mut self.state,
                    self.qid,
                    &dgn,
                    true,
                    &mut effects,
                );
                update_answer_and_notify_subscribers(
                    &mut self.state,
                    self.qid,
                    &dgn,
                    true,
                    &mut effects,
                );
            }
        }

        effects
    }

    /// Journals notification records and sends outbound messages.
    async fn dispatch_effects(&mut self, effects: SideEffects) {
        if effects.is_empty() {
            return;
        }

        if !effects.self_events.is_empty() {
            let stamped: Vec<(EventTime, DomainIndexEvent)> = effects
                .self_events
                .into_iter()
                .map(|event| (self.clock.tick(), event))
                .collect();
            match self.config.effect_order {
                EffectOrder::PersistorFirst => {
                    if let Err(err) =
                        self.persistor.persist_domain_index_events(self.qid, stamped).await
                    {
                        if !err.is_retryable() {
                            self.healthy = false;
                        }
                        tracing::warn!(
                            node = %self.qid,
                            error = %err,
                            "failed to journal notification records"
                        );
                    }
                },
                EffectOrder::MemoryFirst => {
                    self.enqueue_lane(LaneOp::DomainIndex { events: stamped, done: None });
                },
            }
        }

        for message in effects.routed {
            let _ = self.outbound.send(message);
        }
    }

    /// Journals, applies, and reacts to one domain-index event.
    async fn ingest_domain_index_event(
        &mut self,
        event: DomainIndexEvent,
        reply: Option<oneshot::Sender<Result<()>>>,
    ) {
        if let Err(err) = self.precheck_mutation() {
            if let Some(reply) = reply {
                let _ = reply.send(Err(err));
            }
            return;
        }
        if !domain_index_has_effect(&self.state, &event) {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(()));
            }
            return;
        }

        let at = self.clock.tick();
        match self.config.effect_order {
            EffectOrder::PersistorFirst => {
                match self
                    .persistor
                    .persist_domain_index_events(self.qid, vec![(at, event.clone())])
                    .await
                {
                    Ok(()) => {
                        self.apply_domain_index(&event).await;
                        if let Some(reply) = reply {
                            let _ = reply.send(Ok(()));
                        }
                    },
                    Err(err) => {
                        if !err.is_retryable() {
                            self.healthy = false;
                        }
                        if let Some(reply) = reply {
                            let _ = reply.send(Err(err.into()));
                        }
                    },
                }
            },
            EffectOrder::MemoryFirst => {
                self.apply_domain_index(&event).await;
                self.enqueue_lane(LaneOp::DomainIndex { events: vec![(at, event)], done: reply });
            },
        }
    }

    /// Applies a domain-index event live (replies enabled) and dispatches
    /// whatever the subscription engine produced.
    async fn apply_domain_index(&mut self, event: &DomainIndexEvent) {
        let mut effects = SideEffects::default();
        apply_domain_index_event(
            &mut self.state,
            &self.registry,
            self.qid,
            event,
            true,
            &mut effects,
        );
        self.dispatch_effects(effects).await;
    }

    /// Writes a snapshot of current state per the effect order.
    ///
    /// The dirty marker is cleared only once the write is known durable:
    /// immediately after the awaited PersistorFirst write, or on the
    /// `SnapshotPersisted` completion for the MemoryFirst lane.
    async fn write_snapshot(&mut self) -> Result<()> {
        if self.at_time.is_some() {
            // Historical views are immutable; there is nothing to capture.
            return Ok(());
        }

        let captured = self.clock.peek();
        let snapshot = self.state.to_snapshot(captured);
        let blob = match encode_snapshot(&snapshot) {
            Ok(blob) => blob,
            Err(err) => {
                return PersistorPermanentSnafu { message: err.to_string() }.fail();
            },
        };
        let key =
            if self.config.snapshot_singleton { EventTime::MAX } else { captured };

        match self.config.effect_order {
            EffectOrder::PersistorFirst => {
                match self.persistor.persist_snapshot(self.qid, key, blob).await {
                    Ok(()) => {
                        self.clear_dirty_up_to(captured);
                        Ok(())
                    },
                    Err(err) => {
                        if !err.is_retryable() {
                            self.healthy = false;
                        }
                        Err(err.into())
                    },
                }
            },
            EffectOrder::MemoryFirst => {
                self.enqueue_lane(LaneOp::Snapshot { key, captured, blob });
                Ok(())
            },
        }
    }

    /// Clears the dirty marker if no update landed after `at`.
    fn clear_dirty_up_to(&mut self, at: EventTime) {
        if let Some(marker) = self.state.latest_update_after_snapshot
            && marker <= at
        {
            self.state.latest_update_after_snapshot = None;
        }
    }

    /// Final snapshot and shutdown. Returns `false` when the actor should
    /// stop; a PersistorFirst snapshot failure aborts the sleep instead.
    async fn handle_sleep(&mut self, reply: oneshot::Sender<Result<()>>) -> bool {
        if self.state.latest_update_after_snapshot.is_some() && self.at_time.is_none() {
            let captured = self.clock.peek();
            let snapshot = self.state.to_snapshot(captured);
            let blob = match encode_snapshot(&snapshot) {
                Ok(blob) => blob,
                Err(err) => {
                    let _ = reply
                        .send(PersistorPermanentSnafu { message: err.to_string() }.fail());
                    return true;
                },
            };
            let key =
                if self.config.snapshot_singleton { EventTime::MAX } else { captured };

            let result = match self.config.effect_order {
                EffectOrder::PersistorFirst => {
                    self.persistor.persist_snapshot(self.qid, key, blob).await
                },
                EffectOrder::MemoryFirst => {
                    // The actor is stopping; durability is awaited inline,
                    // with the usual unbounded transient retry.
                    let persistor = Arc::clone(&self.persistor);
                    let qid = self.qid;
                    retry_transient_forever(&self.config.retry, "final_snapshot", || {
                        let persistor = Arc::clone(&persistor);
                        let blob = blob.clone();
                        async move { persistor.persist_snapshot(qid, key, blob).await }
                    })
                    .await
                },
            };

            match result {
                Ok(()) => self.clear_dirty_up_to(captured),
                Err(err) => {
                    tracing::warn!(node = %self.qid, error = %err, "final snapshot failed");
                    let _ = reply.send(Err(err.into()));
                    return true;
                },
            }
        }

        let _ = reply.send(Ok(()));
        false
    }

    /// Installs standing queries created since the last sync and cancels
    /// ones removed, using the durable registration set as the authority.
    async fn sync_standing_queries(&mut self) -> Result<()> {
        let records =
            self.persistor.list_standing_queries().await.map_err(NodeError::from)?;
        for record in &records {
            self.registry.register_query(record);
        }
        let registered: BTreeSet<StandingQueryId> = records.iter().map(|r| r.id).collect();

        for record in &records {
            match &record.pattern {
                StandingQueryPattern::DomainGraph { root, .. } => {
                    let installed = self.state.subscribers.get(root).is_some_and(|entry| {
                        entry.subscribers.contains(&SubscriberRef::Query(record.id))
                    });
                    if !installed {
                        let event = DomainIndexEvent::CreateSubscription {
                            subscriber: SubscriberRef::Query(record.id),
                            dgn_id: *root,
                            related_queries: BTreeSet::from([record.id]),
                        };
                        self.ingest_domain_index_event(event, None).await;
                    }
                },
                StandingQueryPattern::MultipleValues { parts } => {
                    for spec in parts {
                        let part_key = (record.id, spec.part_id);
                        if !self.state.mvsq.contains_key(&part_key) {
                            let accumulated: BTreeMap<PropertyKey, _> = spec
                                .watched_properties
                                .iter()
                                .filter_map(|key| {
                                    self.state
                                        .properties
                                        .get(key)
                                        .map(|value| (key.clone(), value.clone()))
                                })
                                .collect();
                            self.state.index.index_mvsq_part(record.id, spec);
                            self.state.mvsq.insert(part_key, MvsqState {
                                spec: spec.clone(),
                                subscribers: BTreeSet::from([SubscriberRef::Query(record.id)]),
                                accumulated,
                            });
                        }
                    }
                },
            }
        }

        // Drop multiple-values parts whose query is gone.
        let gone: Vec<(StandingQueryId, SqPartId)> = self
            .state
            .mvsq
            .keys()
            .filter(|(sq_id, _)| !registered.contains(sq_id))
            .copied()
            .collect();
        for (sq_id, part_id) in gone {
            self.state.index.remove_subscriber(&Subscriber::MultipleValuesSq { sq_id, part_id });
            self.state.mvsq.remove(&(sq_id, part_id));
        }

        // Cancel domain-graph subscriptions whose query is gone.
        let registered_ref = &registered;
        let cancels: Vec<(strandgraph_types::ids::DgnId, StandingQueryId)> = self
            .state
            .subscribers
            .iter()
            .flat_map(|(dgn_id, entry)| {
                entry.subscribers.iter().filter_map(move |subscriber| match subscriber {
                    SubscriberRef::Query(id) if !registered_ref.contains(id) => {
                        Some((*dgn_id, *id))
                    },
                    _ => None,
                })
            })
            .collect();
        for (dgn_id, query_id) in cancels {
            let event = DomainIndexEvent::CancelSubscription {
                subscriber: SubscriberRef::Query(query_id),
                dgn_id,
            };
            self.ingest_domain_index_event(event, None).await;
            if let Some(entry) = self.state.subscribers.get_mut(&dgn_id) {
                entry.related_queries.remove(&query_id);
            }
        }

        Ok(())
    }

    /// Assembles the in-memory half of the diagnostic record.
    fn debug_record(&self) -> NodeInternalState {
        NodeInternalState {
            qid: self.qid,
            at_time: self.at_time,
            properties: self
                .state
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            edges: self.state.edges.iter().cloned().collect(),
            subscriber_count: self.state.subscribers.len(),
            mvsq_count: self.state.mvsq.len(),
            latest_update_after_snapshot: self.state.latest_update_after_snapshot,
            clock_last: self.clock.peek(),
            healthy: self.healthy,
            journal: Vec::new(),
            collected_at: chrono::Utc::now(),
        }
    }

    /// Queues an operation on the write lane.
    fn enqueue_lane(&mut self, op: LaneOp) {
        match &self.lane {
            Some(lane) => {
                // The lane task only stops when this sender drops, so a
                // failed send means the runtime is shutting down.
                let _ = lane.send(op);
            },
            None => {
                tracing::error!(node = %self.qid, "write lane missing in MemoryFirst mode");
                self.healthy = false;
            },
        }
    }
}

/// Retains only the last event per property key, preserving the relative
/// order of the retained events.
fn dedup_last_per_key(events: Vec<PropertyEvent>) -> Vec<PropertyEvent> {
    let mut seen: HashSet<PropertyKey> = HashSet::new();
    let mut keep = vec![false; events.len()];
    for (i, event) in events.iter().enumerate().rev() {
        if seen.insert(event.key().clone()) {
            keep[i] = true;
        }
    }
    events
        .into_iter()
        .zip(keep)
        .filter_map(|(event, kept)| kept.then_some(event))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use strandgraph_types::PropertyValue;

    use super::*;

    fn set(key: &str, value: u64) -> PropertyEvent {
        PropertyEvent::Set { key: key.into(), value: PropertyValue::of(&value).unwrap() }
    }

    #[test]
    fn test_dedup_keeps_last_event_per_key() {
        let events = vec![set("x", 1), set("y", 1), set("x", 2), set("x", 3)];
        let deduped = dedup_last_per_key(events);
        assert_eq!(deduped, vec![set("y", 1), set("x", 3)]);
    }

    #[test]
    fn test_dedup_preserves_singletons() {
        let events = vec![set("a", 1), set("b", 2)];
        assert_eq!(dedup_last_per_key(events.clone()), events);
    }

    #[test]
    fn test_dedup_empty() {
        assert!(dedup_last_per_key(Vec::new()).is_empty());
    }
}
