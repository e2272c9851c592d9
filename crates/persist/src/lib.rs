//! Persistence layer for strandgraph nodes.
//!
//! This crate defines the [`Persistor`] trait — the contract every backend
//! implements for the per-node journal, snapshots, and standing-query
//! metadata — together with the wire codecs for journal records and
//! snapshot blobs, the retry machinery for the per-node write lane, and
//! the in-memory reference persistor used by tests and ephemeral graphs.

pub mod error;
pub mod journal;
pub mod memory;
pub mod persistor;
pub mod retry;
pub mod snapshot;

pub use error::PersistorError;
pub use journal::{decode_journal_record, encode_journal_record};
pub use memory::InMemoryPersistor;
pub use persistor::Persistor;
pub use retry::retry_transient_forever;
pub use snapshot::{NodeSnapshot, SnapshotError, decode_snapshot, encode_snapshot};
