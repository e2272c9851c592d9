//! Snapshot blob format for point-in-time node state capture.
//!
//! - Snapshots serialize a node's full state for fast wake-up
//! - Uses zstd compression on the postcard-encoded body
//! - Format: magic + version + checksum header, then compressed body
//! - Forward/backward compatibility is gated on the version field

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use strandgraph_types::{
    DgnSubscription, EventTime, HalfEdge, Hash, PropertyKey, PropertyValue, QuineId, codec,
    ids::DgnId, sha256,
};

/// Snapshot blob magic bytes.
const SNAPSHOT_MAGIC: [u8; 4] = *b"SGNS";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// Header size: magic (4) + version (4) + checksum (32).
const HEADER_LEN: usize = 40;

/// zstd compression level for snapshot bodies.
const COMPRESSION_LEVEL: i32 = 3;

/// Snapshot error types.
#[derive(Debug, Snafu)]
pub enum SnapshotError {
    /// The blob has invalid magic bytes (not a snapshot).
    #[snafu(display("Invalid snapshot magic"))]
    InvalidMagic,

    /// The snapshot format version is not supported by this build.
    #[snafu(display("Unsupported snapshot version: {version}"))]
    UnsupportedVersion {
        /// The unsupported version number.
        version: u32,
    },

    /// The body checksum does not match the header checksum.
    #[snafu(display("Checksum mismatch: expected {expected:02x?}, got {actual:02x?}"))]
    ChecksumMismatch {
        /// The expected checksum from the header.
        expected: Hash,
        /// The actual checksum computed from the body.
        actual: Hash,
    },

    /// The blob is shorter than its fixed header.
    #[snafu(display("Truncated snapshot: {len} bytes"))]
    Truncated {
        /// Blob length.
        len: usize,
    },

    /// Error encoding or decoding the snapshot body.
    #[snafu(display("Snapshot codec error: {source}"))]
    Codec {
        /// The underlying codec error.
        source: strandgraph_types::CodecError,
    },

    /// Compression or decompression failed.
    #[snafu(display("Snapshot compression error: {source}"))]
    Compression {
        /// The underlying IO error from zstd.
        source: std::io::Error,
    },
}

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Serialized point-in-time state of one node.
///
/// Replaying the journal tail from `at.successor()` atop this state yields
/// the node's live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Event time the snapshot captures.
    pub at: EventTime,
    /// Node properties.
    pub properties: BTreeMap<PropertyKey, PropertyValue>,
    /// Half-edges in insertion order.
    pub edges: Vec<HalfEdge>,
    /// Domain-graph subscription records.
    pub subscribers: BTreeMap<DgnId, DgnSubscription>,
    /// Last answers received from peers, per DGN.
    pub domain_node_index: BTreeMap<QuineId, BTreeMap<DgnId, Option<bool>>>,
}

/// Encodes a snapshot into its durable blob form.
///
/// # Errors
///
/// Returns [`SnapshotError::Codec`] if the body fails to serialize and
/// [`SnapshotError::Compression`] if zstd fails.
pub fn encode_snapshot(snapshot: &NodeSnapshot) -> Result<Vec<u8>> {
    let body = codec::encode(snapshot).map_err(|source| SnapshotError::Codec { source })?;
    let compressed = zstd::bulk::compress(&body, COMPRESSION_LEVEL)
        .map_err(|source| SnapshotError::Compression { source })?;
    let checksum = sha256(&compressed);

    let mut blob = Vec::with_capacity(HEADER_LEN + compressed.len());
    blob.extend_from_slice(&SNAPSHOT_MAGIC);
    blob.extend_from_slice(&SNAPSHOT_VERSION.to_be_bytes());
    blob.extend_from_slice(&checksum);
    blob.extend_from_slice(&compressed);
    Ok(blob)
}

/// Decodes a snapshot blob, verifying magic, version, and checksum.
///
/// # Errors
///
/// Returns [`SnapshotError::Truncated`], [`SnapshotError::InvalidMagic`],
/// [`SnapshotError::UnsupportedVersion`], or
/// [`SnapshotError::ChecksumMismatch`] for malformed blobs, and
/// [`SnapshotError::Codec`] / [`SnapshotError::Compression`] if the body
/// fails to decode.
pub fn decode_snapshot(blob: &[u8]) -> Result<NodeSnapshot> {
    if blob.len() < HEADER_LEN {
        return TruncatedSnafu { len: blob.len() }.fail();
    }
    if blob[0..4] != SNAPSHOT_MAGIC {
        return InvalidMagicSnafu.fail();
    }

    let mut version_buf = [0u8; 4];
    version_buf.copy_from_slice(&blob[4..8]);
    let version = u32::from_be_bytes(version_buf);
    if version != SNAPSHOT_VERSION {
        return UnsupportedVersionSnafu { version }.fail();
    }

    let mut expected = [0u8; 32];
    expected.copy_from_slice(&blob[8..40]);
    let compressed = &blob[HEADER_LEN..];
    let actual = sha256(compressed);
    if expected != actual {
        return ChecksumMismatchSnafu { expected, actual }.fail();
    }

    // Decompressed size is unknown up front; decode_all streams internally.
    let body = zstd::stream::decode_all(compressed)
        .map_err(|source| SnapshotError::Compression { source })?;
    codec::decode(&body).map_err(|source| SnapshotError::Codec { source })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::BTreeSet;

    use strandgraph_types::{EdgeDirection, StandingQueryId, SubscriberRef};

    use super::*;

    fn sample_snapshot() -> NodeSnapshot {
        let mut properties = BTreeMap::new();
        properties.insert("name".into(), PropertyValue::of(&"ada").unwrap());
        properties.insert("age".into(), PropertyValue::of(&36u32).unwrap());

        let mut subscribers = BTreeMap::new();
        subscribers.insert(DgnId::new(7), DgnSubscription {
            subscribers: BTreeSet::from([SubscriberRef::Query(StandingQueryId::fresh())]),
            last_notification: Some(true),
            related_queries: BTreeSet::new(),
        });

        let mut peer_answers = BTreeMap::new();
        peer_answers.insert(DgnId::new(9), Some(false));
        let mut domain_node_index = BTreeMap::new();
        domain_node_index.insert(QuineId::from_u64(3), peer_answers);

        NodeSnapshot {
            at: EventTime::from_parts(500, 2),
            properties,
            edges: vec![
                HalfEdge::new(EdgeDirection::Outgoing, "knows", QuineId::from_u64(3)),
                HalfEdge::new(EdgeDirection::Incoming, "knows", QuineId::from_u64(4)),
            ],
            subscribers,
            domain_node_index,
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let snapshot = sample_snapshot();
        let blob = encode_snapshot(&snapshot).unwrap();
        assert_eq!(decode_snapshot(&blob).unwrap(), snapshot);
    }

    #[test]
    fn test_edge_order_survives_roundtrip() {
        let snapshot = sample_snapshot();
        let blob = encode_snapshot(&snapshot).unwrap();
        let decoded = decode_snapshot(&blob).unwrap();
        assert_eq!(decoded.edges, snapshot.edges, "edge insertion order must be preserved");
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let mut blob = encode_snapshot(&sample_snapshot()).unwrap();
        blob[0] = b'X';
        assert!(matches!(decode_snapshot(&blob), Err(SnapshotError::InvalidMagic)));
    }

    #[test]
    fn test_future_version_rejected() {
        let mut blob = encode_snapshot(&sample_snapshot()).unwrap();
        blob[4..8].copy_from_slice(&99u32.to_be_bytes());
        assert!(matches!(
            decode_snapshot(&blob),
            Err(SnapshotError::UnsupportedVersion { version: 99 })
        ));
    }

    #[test]
    fn test_corrupted_body_detected() {
        let mut blob = encode_snapshot(&sample_snapshot()).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(matches!(decode_snapshot(&blob), Err(SnapshotError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_truncated_blob_rejected() {
        assert!(matches!(decode_snapshot(&[0u8; 10]), Err(SnapshotError::Truncated { len: 10 })));
    }
}
