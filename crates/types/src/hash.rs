//! SHA-256 hashing helpers.
//!
//! Used for node content hashes (replay-equivalence checks) and snapshot
//! checksums.

use sha2::{Digest, Sha256};

/// SHA-256 hash output (32 bytes).
pub type Hash = [u8; 32];

/// Compute SHA-256 hash of arbitrary data.
#[inline]
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Incremental SHA-256 over length-prefixed chunks.
///
/// Length prefixes keep the encoding injective: `("ab", "c")` and
/// `("a", "bc")` hash differently.
#[derive(Default)]
pub struct ChunkedHasher {
    inner: Sha256,
}

impl ChunkedHasher {
    /// Creates an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk, prefixed with its length as u64 BE.
    pub fn chunk(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update((data.len() as u64).to_be_bytes());
        self.inner.update(data);
        self
    }

    /// Finalizes and returns the digest.
    #[must_use]
    pub fn finish(self) -> Hash {
        self.inner.finalize().into()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("")
        let expected: Hash = [
            0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f,
            0xb9, 0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b,
            0x78, 0x52, 0xb8, 0x55,
        ];
        assert_eq!(sha256(b""), expected);
    }

    #[test]
    fn test_chunked_hasher_is_injective_over_boundaries() {
        let mut a = ChunkedHasher::new();
        a.chunk(b"ab").chunk(b"c");
        let mut b = ChunkedHasher::new();
        b.chunk(b"a").chunk(b"bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_chunked_hasher_deterministic() {
        let mut a = ChunkedHasher::new();
        a.chunk(b"x").chunk(b"y");
        let mut b = ChunkedHasher::new();
        b.chunk(b"x").chunk(b"y");
        assert_eq!(a.finish(), b.finish());
    }
}
