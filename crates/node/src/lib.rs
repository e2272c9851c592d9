//! The strandgraph node core: per-node lifecycle and event processing.
//!
//! Each graph node is an independently addressable, long-lived entity that
//! ingests events, mutates its own state, persists its history, and
//! participates in continuously evaluated standing queries. This crate
//! implements the single-writer node actor, the two-mode persistence
//! ordering protocol (persist-then-apply vs apply-then-persist), event
//! deduplication, snapshot/journal interleaving, the local event→subscriber
//! index, the domain-graph subscription engine, and wake/sleep transitions
//! against a shared persistence backend.

pub mod actor;
pub mod edges;
pub mod index;
pub mod messages;
pub mod registry;
pub mod shard;
pub mod state;
mod subscribers;
pub mod wake;

pub use actor::NodeHandle;
pub use edges::EdgeCollection;
pub use index::{LocalEventIndex, Subscriber};
pub use messages::{NodeInternalState, NodeMessage, RoutedMessage, SqOutput};
pub use registry::DgnRegistry;
pub use shard::GraphShard;
pub use state::{MvsqState, NodeState};
pub use wake::{NodeCell, WakefulState};
