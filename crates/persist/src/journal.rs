//! Journal record wire format.
//!
//! Each journal record is a fixed header followed by a postcard payload:
//!
//! ```text
//! | event_time: u64 BE | tag: u8 | payload_len: u32 BE | payload |
//! ```
//!
//! The tag discriminates the event family (property / edge / domain-index)
//! so backends can filter domain-index records without decoding payloads,
//! and so records remain identifiable if payload schemas evolve.

use snafu::{ResultExt, Snafu};
use strandgraph_types::{
    CodecError, DomainIndexEvent, EdgeEvent, EventTime, NodeEvent, PropertyEvent, codec,
    events::{TAG_DOMAIN_INDEX, TAG_EDGE, TAG_PROPERTY},
};

/// Fixed header size: event time (8) + tag (1) + payload length (4).
const HEADER_LEN: usize = 13;

/// Errors from journal record encoding and decoding.
#[derive(Debug, Snafu)]
pub enum JournalError {
    /// Payload serialization failed.
    #[snafu(display("Journal payload codec failure: {source}"))]
    Payload {
        /// The underlying codec error.
        source: CodecError,
    },

    /// The record is shorter than its header or declared payload.
    #[snafu(display("Truncated journal record: have {have} bytes, need {need}"))]
    Truncated {
        /// Bytes available.
        have: usize,
        /// Bytes required.
        need: usize,
    },

    /// The record carries a tag this version does not understand.
    #[snafu(display("Unknown journal record tag: {tag}"))]
    UnknownTag {
        /// The unrecognized tag byte.
        tag: u8,
    },
}

/// Result type for journal codec operations.
pub type Result<T> = std::result::Result<T, JournalError>;

/// Encodes one journal record.
///
/// # Errors
///
/// Returns [`JournalError::Payload`] if the event fails to serialize.
pub fn encode_journal_record(at: EventTime, event: &NodeEvent) -> Result<Vec<u8>> {
    let payload = match event {
        NodeEvent::Property(e) => codec::encode(e),
        NodeEvent::Edge(e) => codec::encode(e),
        NodeEvent::DomainIndex(e) => codec::encode(e),
    }
    .context(PayloadSnafu)?;

    let mut record = Vec::with_capacity(HEADER_LEN + payload.len());
    record.extend_from_slice(&at.as_u64().to_be_bytes());
    record.push(event.tag());
    record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    record.extend_from_slice(&payload);
    Ok(record)
}

/// Decodes one journal record from the front of `bytes`.
///
/// Returns the decoded record and the number of bytes consumed, so callers
/// can walk a concatenated record stream.
///
/// # Errors
///
/// Returns [`JournalError::Truncated`] if the buffer ends mid-record,
/// [`JournalError::UnknownTag`] for unrecognized tags, and
/// [`JournalError::Payload`] if the payload fails to decode.
pub fn decode_journal_record(bytes: &[u8]) -> Result<((EventTime, NodeEvent), usize)> {
    if bytes.len() < HEADER_LEN {
        return TruncatedSnafu { have: bytes.len(), need: HEADER_LEN }.fail();
    }

    let mut time_buf = [0u8; 8];
    time_buf.copy_from_slice(&bytes[0..8]);
    let at = EventTime::from_u64(u64::from_be_bytes(time_buf));
    let tag = bytes[8];
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(&bytes[9..13]);
    let payload_len = u32::from_be_bytes(len_buf) as usize;

    let total = HEADER_LEN + payload_len;
    if bytes.len() < total {
        return TruncatedSnafu { have: bytes.len(), need: total }.fail();
    }
    let payload = &bytes[HEADER_LEN..total];

    let event = match tag {
        TAG_PROPERTY => {
            NodeEvent::Property(codec::decode::<PropertyEvent>(payload).context(PayloadSnafu)?)
        },
        TAG_EDGE => NodeEvent::Edge(codec::decode::<EdgeEvent>(payload).context(PayloadSnafu)?),
        TAG_DOMAIN_INDEX => NodeEvent::DomainIndex(
            codec::decode::<DomainIndexEvent>(payload).context(PayloadSnafu)?,
        ),
        tag => return UnknownTagSnafu { tag }.fail(),
    };

    Ok(((at, event), total))
}
