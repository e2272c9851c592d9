//! Fault-injecting persistor wrapper.
//!
//! Wraps any [`Persistor`] and fails node data writes (journal appends and
//! snapshots) according to a configured [`FailureMode`]. Reads and
//! standing-query metadata operations always pass through. Used to verify
//! the retry lane, PersistorFirst failure isolation, and unhealthy-node
//! transitions without a real faulty backend.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use strandgraph_persist::{Persistor, PersistorError, error};
use strandgraph_types::{
    DomainIndexEvent, EventTime, NodeChangeEvent, NodeEvent, QuineId, StandingQueryId,
    StandingQueryRecord,
};

/// How injected write failures behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Never fail.
    None,
    /// Fail the first `n` write calls with a transient error, then succeed.
    TransientTimes(u32),
    /// Fail every write call with a transient error.
    AlwaysTransient,
    /// Fail every write call with a permanent error.
    AlwaysPermanent,
}

/// A [`Persistor`] decorator that injects write failures.
#[derive(Debug)]
pub struct FlakyPersistor<P> {
    inner: Arc<P>,
    mode: FailureMode,
    write_attempts: AtomicU32,
}

impl<P: Persistor> FlakyPersistor<P> {
    /// Wraps `inner` with the given failure mode.
    pub fn new(inner: Arc<P>, mode: FailureMode) -> Self {
        Self { inner, mode, write_attempts: AtomicU32::new(0) }
    }

    /// The wrapped persistor.
    pub fn inner(&self) -> &Arc<P> {
        &self.inner
    }

    /// Total write calls observed, including failed ones.
    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Records one write attempt and returns the injected failure, if any.
    fn check_write(&self) -> Result<(), PersistorError> {
        let attempt = self.write_attempts.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            FailureMode::None => Ok(()),
            FailureMode::TransientTimes(n) if attempt < n => {
                Err(error::TransientSnafu { message: format!("injected failure #{attempt}") }
                    .build())
            },
            FailureMode::TransientTimes(_) => Ok(()),
            FailureMode::AlwaysTransient => {
                Err(error::TransientSnafu { message: "injected transient failure" }.build())
            },
            FailureMode::AlwaysPermanent => {
                Err(error::PermanentSnafu { message: "injected permanent failure" }.build())
            },
        }
    }
}

#[async_trait]
impl<P: Persistor> Persistor for FlakyPersistor<P> {
    async fn persist_node_change_events(
        &self,
        qid: QuineId,
        events: Vec<(EventTime, NodeChangeEvent)>,
    ) -> Result<(), PersistorError> {
        self.check_write()?;
        self.inner.persist_node_change_events(qid, events).await
    }

    async fn persist_domain_index_events(
        &self,
        qid: QuineId,
        events: Vec<(EventTime, DomainIndexEvent)>,
    ) -> Result<(), PersistorError> {
        self.check_write()?;
        self.inner.persist_domain_index_events(qid, events).await
    }

    async fn persist_snapshot(
        &self,
        qid: QuineId,
        at: EventTime,
        blob: Vec<u8>,
    ) -> Result<(), PersistorError> {
        self.check_write()?;
        self.inner.persist_snapshot(qid, at, blob).await
    }

    async fn get_journal_with_time(
        &self,
        qid: QuineId,
        from: EventTime,
        to: EventTime,
        include_domain_index: bool,
    ) -> Result<Vec<(EventTime, NodeEvent)>, PersistorError> {
        self.inner.get_journal_with_time(qid, from, to, include_domain_index).await
    }

    async fn get_latest_snapshot(
        &self,
        qid: QuineId,
        at_or_before: EventTime,
    ) -> Result<Option<(EventTime, Vec<u8>)>, PersistorError> {
        self.inner.get_latest_snapshot(qid, at_or_before).await
    }

    async fn list_standing_queries(&self) -> Result<Vec<StandingQueryRecord>, PersistorError> {
        self.inner.list_standing_queries().await
    }

    async fn get_standing_query(
        &self,
        id: StandingQueryId,
    ) -> Result<Option<StandingQueryRecord>, PersistorError> {
        self.inner.get_standing_query(id).await
    }

    async fn put_standing_query(&self, record: StandingQueryRecord) -> Result<(), PersistorError> {
        self.inner.put_standing_query(record).await
    }

    async fn delete_standing_query(&self, id: StandingQueryId) -> Result<(), PersistorError> {
        self.inner.delete_standing_query(id).await
    }
}
