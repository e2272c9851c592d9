//! The shard contract: routing, wake-on-delivery, and sleep transitions.
//!
//! A [`GraphShard`] owns the wake/sleep routing for one namespace's nodes.
//! Routing consults each node's [`NodeCell`] under a read-shared lock; a
//! delivery to a sleeping node triggers a wake while the cell is held
//! write-exclusively. The shard also runs the dispatcher that carries
//! node-to-node subscription messages and hands standing-query outputs to
//! their consumer.

use std::collections::HashMap;
use std::sync::{Arc, atomic::Ordering};

use parking_lot::Mutex;
use strandgraph_persist::Persistor;
use strandgraph_types::{
    DomainIndexEvent, EdgeEvent, EventTime, GraphConfig, Hash, NamespaceId, NodeError, NodeRef,
    PropertyEvent, QuineId, StandingQueryId, StandingQueryRecord,
    error::{IllegalHistoricalUpdateSnafu, InvariantViolationSnafu, Result},
};
use tokio::sync::mpsc;

use crate::actor::{self, NodeActorSeed, NodeHandle};
use crate::messages::{NodeInternalState, RoutedMessage, SqOutput};
use crate::registry::DgnRegistry;
use crate::wake::{self, NodeCell, WakefulState};

/// Wake/sleep routing authority for one namespace's nodes.
pub struct GraphShard {
    namespace: NamespaceId,
    config: GraphConfig,
    persistor: Arc<dyn Persistor>,
    registry: DgnRegistry,
    cells: Mutex<HashMap<(QuineId, Option<u64>), Arc<NodeCell>>>,
    outbound: mpsc::UnboundedSender<RoutedMessage>,
}

impl GraphShard {
    /// Creates the shard and spawns its dispatcher.
    ///
    /// Returns the shard and the stream of standing-query outputs. The
    /// dispatcher stops when the shard is dropped.
    pub fn launch(
        namespace: NamespaceId,
        config: GraphConfig,
        persistor: Arc<dyn Persistor>,
        registry: DgnRegistry,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SqOutput>) {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (sq_tx, sq_rx) = mpsc::unbounded_channel();

        let shard = Arc::new(Self {
            namespace,
            config,
            persistor,
            registry,
            cells: Mutex::new(HashMap::new()),
            outbound: outbound_tx,
        });

        let weak = Arc::downgrade(&shard);
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    RoutedMessage::ToNode { to, event } => {
                        let Some(shard) = weak.upgrade() else { break };
                        if let Err(err) = shard.deliver_domain_index(to, event).await {
                            tracing::warn!(to = %to, error = %err, "undeliverable message");
                        }
                    },
                    RoutedMessage::SqOutput(output) => {
                        // A closed consumer just drops outputs.
                        let _ = sq_tx.send(output);
                    },
                }
            }
        });

        (shard, sq_rx)
    }

    /// The namespace this shard serves.
    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    /// Submits a property event batch. Batches are atomic per node.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::IllegalHistoricalUpdate`] without any persistor
    /// interaction for historical refs, and propagates guard or
    /// persistence failures otherwise.
    pub async fn submit_property_events(
        &self,
        node: NodeRef,
        events: Vec<PropertyEvent>,
        at_override: Option<EventTime>,
    ) -> Result<()> {
        self.refuse_historical_mutation(&node)?;
        self.handle_for(node).await?.submit_property_events(events, at_override).await
    }

    /// Submits an edge event batch. Batches are atomic per node.
    ///
    /// # Errors
    ///
    /// Same contract as [`GraphShard::submit_property_events`].
    pub async fn submit_edge_events(
        &self,
        node: NodeRef,
        events: Vec<EdgeEvent>,
        at_override: Option<EventTime>,
    ) -> Result<()> {
        self.refuse_historical_mutation(&node)?;
        self.handle_for(node).await?.submit_edge_events(events, at_override).await
    }

    /// Submits a domain-index event.
    ///
    /// # Errors
    ///
    /// Same contract as [`GraphShard::submit_property_events`].
    pub async fn submit_domain_index_event(
        &self,
        node: NodeRef,
        event: DomainIndexEvent,
    ) -> Result<()> {
        self.refuse_historical_mutation(&node)?;
        self.handle_for(node).await?.submit_domain_index_event(event).await
    }

    /// Forces a snapshot of the node. No-op on historical views.
    ///
    /// # Errors
    ///
    /// Propagates wake and snapshot failures.
    pub async fn snapshot_now(&self, node: NodeRef) -> Result<()> {
        self.handle_for(node).await?.snapshot_now().await
    }

    /// Computes a node's content hash, waking it if needed.
    ///
    /// # Errors
    ///
    /// Propagates wake failures.
    pub async fn node_hash(&self, node: NodeRef) -> Result<Hash> {
        self.handle_for(node).await?.node_hash().await
    }

    /// Assembles the full diagnostic record: in-memory state from the
    /// actor plus the journal read back from the persistor.
    ///
    /// # Errors
    ///
    /// Propagates wake and persistor read failures.
    pub async fn debug_internal_state(&self, node: NodeRef) -> Result<NodeInternalState> {
        let mut record = self.handle_for(node).await?.debug_state().await?;
        let upper = node.at_time.map_or(EventTime::MAX, EventTime::largest_in_millis);
        record.journal = self
            .persistor
            .get_journal_with_time(node.qid, EventTime::MIN, upper, true)
            .await
            .map_err(NodeError::from)?;
        Ok(record)
    }

    /// Puts a live node to sleep: final snapshot if dirty, then release of
    /// in-memory state. No-op if the node is not awake.
    ///
    /// The cell is held write-exclusively for the whole transition, so
    /// inbound routing blocks until the node is asleep (or the sleep
    /// aborts).
    ///
    /// # Errors
    ///
    /// Returns the snapshot failure that aborted the sleep, if any; the
    /// node then remains awake.
    pub async fn sleep_node(&self, qid: QuineId) -> Result<()> {
        let cell = { self.cells.lock().get(&(qid, None)).cloned() };
        let Some(cell) = cell else {
            return Ok(());
        };

        let mut guard = cell.lock.write().await;
        let previous =
            std::mem::replace(&mut *guard, WakefulState::GoingToSleep(wake::wall_event_time()));
        match previous {
            WakefulState::Awake(handle) => match handle.sleep().await {
                Ok(()) => {
                    *guard = WakefulState::Asleep;
                    Ok(())
                },
                Err(NodeError::ActorGone { .. }) => {
                    *guard = WakefulState::Asleep;
                    Ok(())
                },
                Err(err) => {
                    // Sleep aborted; the actor is still running.
                    *guard = WakefulState::Awake(handle);
                    Err(err)
                },
            },
            other => {
                *guard = other;
                Ok(())
            },
        }
    }

    /// Live nodes ordered cheapest-to-re-wake first.
    ///
    /// Shards bias eviction toward the front of this list.
    pub fn sleep_candidates(&self) -> Vec<(QuineId, u64)> {
        let mut candidates: Vec<(QuineId, u64)> = self
            .cells
            .lock()
            .values()
            .filter(|cell| cell.at_time().is_none())
            .map(|cell| (cell.qid(), cell.cost_to_sleep()))
            .collect();
        candidates.sort_by_key(|(_, cost)| *cost);
        candidates
    }

    /// Registers a standing query durably and propagates it to every awake
    /// node. Sleeping nodes pick it up during their wake-time sync.
    ///
    /// # Errors
    ///
    /// Propagates persistor failures.
    pub async fn register_standing_query(&self, record: StandingQueryRecord) -> Result<()> {
        self.persistor.put_standing_query(record.clone()).await.map_err(NodeError::from)?;
        self.registry.register_query(&record);
        self.resync_awake_nodes().await;
        Ok(())
    }

    /// Cancels a standing query durably and propagates the removal.
    ///
    /// # Errors
    ///
    /// Propagates persistor failures.
    pub async fn cancel_standing_query(&self, id: StandingQueryId) -> Result<()> {
        if let Some(record) =
            self.persistor.get_standing_query(id).await.map_err(NodeError::from)?
        {
            self.persistor.delete_standing_query(id).await.map_err(NodeError::from)?;
            self.registry.deregister_query(&record);
        }
        self.resync_awake_nodes().await;
        Ok(())
    }

    /// Returns the live handle for a node, waking it if necessary.
    async fn handle_for(&self, node: NodeRef) -> Result<NodeHandle> {
        if node.namespace != self.namespace {
            return InvariantViolationSnafu {
                message: format!(
                    "node {node} routed to shard for namespace {}",
                    self.namespace
                ),
            }
            .fail();
        }

        let cell = self.cell(node.qid, node.at_time);
        loop {
            {
                let guard = cell.lock.read().await;
                if let WakefulState::Awake(handle) = &*guard
                    && handle.is_alive()
                {
                    return Ok(handle.clone());
                }
            }
            self.wake_cell(&cell).await?;
        }
    }

    /// Wake sequence: exclusive lock, restore, spawn, standing-query sync.
    ///
    /// A failure before the handle is installed aborts the wake and leaves
    /// the cell `Asleep`.
    async fn wake_cell(&self, cell: &Arc<NodeCell>) -> Result<()> {
        let mut guard = cell.lock.write().await;
        if let WakefulState::Awake(handle) = &*guard
            && handle.is_alive()
        {
            return Ok(());
        }
        // Either asleep, or a crashed actor left a dead handle behind; a
        // crashed node restarts clean from its durable state.
        *guard = WakefulState::Waking;

        let result = self.restore_and_spawn(cell).await;
        match result {
            Ok(handle) => {
                cell.cost_to_sleep.fetch_add(1, Ordering::Relaxed);
                *guard = WakefulState::Awake(handle);
                Ok(())
            },
            Err(err) => {
                *guard = WakefulState::Asleep;
                Err(err)
            },
        }
    }

    async fn restore_and_spawn(&self, cell: &Arc<NodeCell>) -> Result<NodeHandle> {
        let (state, clock) = wake::restore_node(
            cell.qid(),
            cell.at_time(),
            self.persistor.as_ref(),
            &self.registry,
        )
        .await?;

        let handle = actor::spawn(NodeActorSeed {
            qid: cell.qid(),
            at_time: cell.at_time(),
            config: self.config.clone(),
            clock,
            state,
            persistor: Arc::clone(&self.persistor),
            registry: self.registry.clone(),
            outbound: self.outbound.clone(),
        });

        // Live nodes register queries created while they slept and emit
        // initial results before any routed message reaches them.
        if cell.at_time().is_none()
            && let Err(err) = handle.sync_standing_queries().await
        {
            // Abort the wake; nothing is dirty yet, so the actor stops
            // without writing anything.
            let _ = handle.sleep().await;
            return Err(err);
        }
        Ok(handle)
    }

    /// Delivers a peer-originated subscription message, waking the target.
    async fn deliver_domain_index(&self, to: QuineId, event: DomainIndexEvent) -> Result<()> {
        let node = NodeRef { namespace: self.namespace, qid: to, at_time: None };
        self.handle_for(node).await?.notify_domain_index_event(event)
    }

    /// Asks every awake node to re-sync its standing queries.
    async fn resync_awake_nodes(&self) {
        let handles: Vec<NodeHandle> = {
            self.cells.lock().values().filter_map(|cell| cell.try_handle()).collect()
        };
        for handle in handles {
            if let Err(err) = handle.sync_standing_queries().await {
                tracing::warn!(node = %handle.qid(), error = %err, "standing-query resync failed");
            }
        }
    }

    fn cell(&self, qid: QuineId, at_time: Option<u64>) -> Arc<NodeCell> {
        Arc::clone(
            self.cells
                .lock()
                .entry((qid, at_time))
                .or_insert_with(|| Arc::new(NodeCell::new(qid, at_time))),
        )
    }

    /// Historical mutation refusal happens at the routing layer, before
    /// any wake and with zero persistor interaction.
    fn refuse_historical_mutation(&self, node: &NodeRef) -> Result<()> {
        match node.at_time {
            Some(at_millis) => {
                IllegalHistoricalUpdateSnafu { qid: node.qid, at_millis }.fail()
            },
            None => Ok(()),
        }
    }
}
