//! Error taxonomy for node operations, using snafu.
//!
//! The taxonomy mirrors how failures propagate through the node core:
//! historical-mutation rejections are fatal to the call and never retried,
//! transient persistence failures are retryable, permanent persistence
//! failures poison the node until operator intervention, and invariant
//! violations abort the actor.

use snafu::{Location, Snafu};

use crate::codec::CodecError;
use crate::ids::QuineId;

/// Unified result type for node operations.
pub type Result<T, E = NodeError> = std::result::Result<T, E>;

/// Top-level error type for node operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NodeError {
    /// Caller attempted to mutate a historical node view.
    #[snafu(display("Illegal update to historical node {qid} at time {at_millis}"))]
    IllegalHistoricalUpdate {
        /// The node addressed.
        qid: QuineId,
        /// The historical instant of the refused view.
        at_millis: u64,
    },

    /// Backend reported a transient persistence failure.
    #[snafu(display("Transient persistence failure at {location}: {message}"))]
    PersistorTransient {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Backend reported a permanent persistence failure (schema, codec,
    /// decoding). The node refuses further writes.
    #[snafu(display("Permanent persistence failure at {location}: {message}"))]
    PersistorPermanent {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Node is marked unhealthy after a permanent persistence failure.
    #[snafu(display("Node {qid} is unhealthy and refusing writes"))]
    Unhealthy {
        /// The poisoned node.
        qid: QuineId,
    },

    /// Serialization error.
    #[snafu(display("Serialization error at {location}: {source}"))]
    Codec {
        /// The underlying codec error.
        source: CodecError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The node actor is no longer running.
    #[snafu(display("Node actor for {qid} has shut down"))]
    ActorGone {
        /// The node addressed.
        qid: QuineId,
    },

    /// Internal invariant violated (unexpected state).
    #[snafu(display("Internal invariant violation at {location}: {message}"))]
    InvariantViolation {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },
}

impl NodeError {
    /// Returns `true` for failures that a caller may retry.
    ///
    /// Only transient persistence failures qualify; historical-update and
    /// permanent failures never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::PersistorTransient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_historical_update_display() {
        let err =
            NodeError::IllegalHistoricalUpdate { qid: QuineId::from_u64(7), at_millis: 1000 };
        assert_eq!(
            err.to_string(),
            "Illegal update to historical node 00000000000000000000000000000007 at time 1000"
        );
    }

    #[test]
    fn test_retryability_split() {
        let transient = PersistorTransientSnafu { message: "timeout" }.build();
        assert!(transient.is_retryable());

        let permanent = PersistorPermanentSnafu { message: "bad schema" }.build();
        assert!(!permanent.is_retryable());

        let historical =
            NodeError::IllegalHistoricalUpdate { qid: QuineId::from_u64(1), at_millis: 0 };
        assert!(!historical.is_retryable());
    }
}
