//! Errors reported by persistence backends.

use snafu::{Location, Snafu};
use strandgraph_types::CodecError;

/// Result type for persistor operations.
pub type Result<T, E = PersistorError> = std::result::Result<T, E>;

/// Failure reported by a persistence backend.
///
/// The transient/permanent split drives retry behavior: the MemoryFirst
/// write lane retries transient failures forever, while permanent failures
/// poison the node until operator intervention.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PersistorError {
    /// The backend failed transiently (timeout, unavailable, contention).
    #[snafu(display("Transient backend failure at {location}: {message}"))]
    Transient {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The backend failed permanently (schema mismatch, corruption).
    #[snafu(display("Permanent backend failure at {location}: {message}"))]
    Permanent {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// A stored record failed to encode or decode.
    #[snafu(display("Codec failure at {location}: {source}"))]
    Codec {
        /// The underlying codec error.
        source: CodecError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },
}

impl PersistorError {
    /// Returns `true` if retrying the operation may succeed.
    ///
    /// Codec failures are treated as permanent: the same bytes will fail
    /// the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PersistorError::Transient { .. })
    }
}

impl From<PersistorError> for strandgraph_types::NodeError {
    #[track_caller]
    fn from(err: PersistorError) -> Self {
        let loc = std::panic::Location::caller();
        let location = snafu::Location::new(loc.file(), loc.line(), loc.column());
        match err {
            PersistorError::Transient { message, .. } => {
                strandgraph_types::NodeError::PersistorTransient { message, location }
            },
            PersistorError::Permanent { message, .. } => {
                strandgraph_types::NodeError::PersistorPermanent { message, location }
            },
            PersistorError::Codec { source, .. } => {
                strandgraph_types::NodeError::PersistorPermanent {
                    message: source.to_string(),
                    location,
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability_split() {
        let transient = TransientSnafu { message: "timeout" }.build();
        assert!(transient.is_retryable());

        let permanent = PermanentSnafu { message: "schema" }.build();
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_node_error_conversion_preserves_class() {
        use strandgraph_types::NodeError;

        let err: NodeError = TransientSnafu { message: "busy" }.build().into();
        assert!(matches!(err, NodeError::PersistorTransient { .. }));

        let err: NodeError = PermanentSnafu { message: "corrupt" }.build().into();
        assert!(matches!(err, NodeError::PersistorPermanent { .. }));
    }
}
