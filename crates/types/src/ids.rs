//! Identifier types for graph nodes, namespaces, and standing queries.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Numeric Identifier Types
// ============================================================================

/// Generates a newtype wrapper around a numeric type for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `From<inner>` and `Into<inner>` conversions
/// - `Display` with a semantic prefix (e.g., `ns:0`)
/// - `new()` constructor and `value()` accessor
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident, $inner:ty, $prefix:expr
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Creates a new identifier from a raw value.
            #[inline]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw numeric value.
            #[inline]
            pub const fn value(self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = <$inner as std::str::FromStr>::Err;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.parse::<$inner>().map(Self)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a graph namespace.
    ///
    /// Namespaces partition the node id space; the default namespace is 0.
    ///
    /// # Display
    ///
    /// Formats with `ns:` prefix: `ns:0`.
    NamespaceId, u32, "ns"
);

define_id!(
    /// Unique identifier for a registered domain graph node (DGN).
    ///
    /// A DGN is a globally registered pattern fragment that live nodes
    /// subscribe to and answer for.
    ///
    /// # Display
    ///
    /// Formats with `dgn:` prefix: `dgn:17`.
    DgnId, u64, "dgn"
);

impl NamespaceId {
    /// The default namespace.
    pub const DEFAULT: NamespaceId = NamespaceId::new(0);
}

// ============================================================================
// QuineId
// ============================================================================

/// Stable 16-byte binary identifier for a graph node.
///
/// The interpreter addresses peers exclusively by `QuineId` (logical id plus
/// shard lookup), never by direct reference, which keeps subscriber graphs
/// free of reference cycles.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuineId([u8; 16]);

impl QuineId {
    /// Creates an id from raw bytes.
    #[inline]
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Creates an id whose low 8 bytes carry `value` big-endian.
    ///
    /// Convenience for tests and demos; real deployments derive ids from
    /// external keys.
    pub const fn from_u64(value: u64) -> Self {
        let v = value.to_be_bytes();
        let mut bytes = [0u8; 16];
        let mut i = 0;
        while i < 8 {
            bytes[8 + i] = v[i];
            i += 1;
        }
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for QuineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for QuineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuineId({self})")
    }
}

// ============================================================================
// Standing Query Identifiers
// ============================================================================

/// Globally unique identifier for a standing query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StandingQueryId(Uuid);

impl StandingQueryId {
    /// Wraps an existing UUID.
    #[inline]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random id.
    #[must_use]
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    pub const fn value(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for StandingQueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sq:{}", self.0)
    }
}

/// Identifier for one part of a multiple-values standing query.
///
/// A multiple-values standing query is decomposed into parts; each part is
/// matched independently on subscribing nodes and carries partial-match
/// tuples upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SqPartId(Uuid);

impl SqPartId {
    /// Wraps an existing UUID.
    #[inline]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random id.
    #[must_use]
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    pub const fn value(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SqPartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sqp:{}", self.0)
    }
}

// ============================================================================
// NodeRef
// ============================================================================

/// Reference to a graph node, either live or at a historical instant.
///
/// `at_time = None` denotes the live node. `at_time = Some(millis)` denotes a
/// read-only view of the node as of that wall-clock millisecond; historical
/// refs refuse all mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    /// Namespace the node lives in.
    pub namespace: NamespaceId,
    /// Stable node identifier.
    pub qid: QuineId,
    /// Historical instant in wall-clock milliseconds, if any.
    pub at_time: Option<u64>,
}

impl NodeRef {
    /// Creates a reference to the live node in the default namespace.
    pub const fn live(qid: QuineId) -> Self {
        Self { namespace: NamespaceId::DEFAULT, qid, at_time: None }
    }

    /// Creates a historical reference in the default namespace.
    pub const fn historical(qid: QuineId, at_millis: u64) -> Self {
        Self { namespace: NamespaceId::DEFAULT, qid, at_time: Some(at_millis) }
    }

    /// Returns `true` if this reference denotes a historical snapshot view.
    #[inline]
    pub const fn is_historical(&self) -> bool {
        self.at_time.is_some()
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.at_time {
            Some(t) => write!(f, "{}/{}@{}", self.namespace, self.qid, t),
            None => write!(f, "{}/{}", self.namespace, self.qid),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quine_id_from_u64_roundtrip() {
        let qid = QuineId::from_u64(0xDEAD_BEEF);
        let bytes = qid.as_bytes();
        assert_eq!(&bytes[..8], &[0u8; 8]);
        assert_eq!(u64::from_be_bytes(bytes[8..].try_into().unwrap()), 0xDEAD_BEEF);
    }

    #[test]
    fn test_quine_id_display_is_hex() {
        let qid = QuineId::from_u64(0xFF);
        assert_eq!(qid.to_string(), "000000000000000000000000000000ff");
    }

    #[test]
    fn test_node_ref_historical_flag() {
        let qid = QuineId::from_u64(1);
        assert!(!NodeRef::live(qid).is_historical());
        assert!(NodeRef::historical(qid, 1000).is_historical());
    }

    #[test]
    fn test_namespace_display_prefix() {
        assert_eq!(NamespaceId::DEFAULT.to_string(), "ns:0");
        assert_eq!(DgnId::new(17).to_string(), "dgn:17");
    }

    #[test]
    fn test_standing_query_ids_are_unique() {
        assert_ne!(StandingQueryId::fresh(), StandingQueryId::fresh());
        assert_ne!(SqPartId::fresh(), SqPartId::fresh());
    }
}
