//! Core type definitions for the strandgraph streaming graph interpreter.
//!
//! This crate holds the vocabulary shared by every other strandgraph crate:
//! node identifiers, the per-node event clock, the typed event model,
//! half-edges and property values, the binary codec, the error taxonomy,
//! and runtime configuration.

pub mod codec;
pub mod config;
pub mod dgn;
pub mod error;
pub mod event_time;
pub mod events;
pub mod half_edge;
pub mod hash;
pub mod ids;
pub mod property;
pub mod standing_query;

pub use codec::{CodecError, decode, encode};
pub use config::{ConfigError, EffectOrder, GraphConfig, PersistRetryConfig};
pub use dgn::{DgnSubscription, DomainGraphNode, EdgeRequirement, PropertyTest};
pub use error::NodeError;
pub use event_time::{EventClock, EventTime};
pub use events::{
    DomainIndexEvent, EdgeEvent, NodeChangeEvent, NodeEvent, PropertyEvent, SubscriberRef,
};
pub use half_edge::{EdgeDirection, EdgeLabel, HalfEdge};
pub use hash::{ChunkedHasher, Hash, sha256};
pub use ids::{DgnId, NamespaceId, NodeRef, QuineId, SqPartId, StandingQueryId};
pub use property::{PropertyKey, PropertyValue};
pub use standing_query::{MvsqPartSpec, StandingQueryPattern, StandingQueryRecord};
