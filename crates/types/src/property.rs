//! Property keys and opaque property values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};

/// Name of a property on a graph node. Keys are unique per node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyKey(String);

impl PropertyKey {
    /// Creates a key from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the key as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque, serialized property value.
///
/// Values are stored and compared as their canonical postcard encoding; the
/// typed view is recovered on demand via [`PropertyValue::decode_as`].
/// Comparing encodings rather than decoded values is what makes the
/// effect-deduplication check cheap and type-agnostic.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyValue(Vec<u8>);

impl PropertyValue {
    /// Encodes a typed value into its canonical stored form.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, CodecError> {
        codec::encode(value).map(Self)
    }

    /// Wraps already-serialized bytes.
    #[inline]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Recovers the typed view of this value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the stored bytes do not decode as `T`.
    pub fn decode_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, CodecError> {
        codec::decode(&self.0)
    }

    /// Returns the stored bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PropertyValue {
    // Bounded hex prefix of the encoding; full payloads can be large.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyValue(")?;
        for byte in self.0.iter().take(8) {
            write!(f, "{byte:02x}")?;
        }
        if self.0.len() > 8 {
            write!(f, "..")?;
        }
        write!(f, ")")
    }
}
