//! Per-node monotonic event timestamps.
//!
//! Every event applied to a node is stamped with an [`EventTime`]: a 64-bit
//! logical timestamp that is globally comparable and strictly increasing
//! within one node. The stamp combines wall-clock milliseconds with a
//! per-millisecond sequence counter.
//!
//! # Timestamp Structure
//!
//! ```text
//! | 42 bits: timestamp (ms since epoch) | 22 bits: sequence |
//! ```
//!
//! - **Timestamp**: milliseconds since 2024-01-01 00:00:00 UTC (~139 years range)
//! - **Sequence**: counter within each millisecond (4.2M events/ms guaranteed unique)
//!
//! # Monotonicity
//!
//! The [`EventClock`] is owned by exactly one node actor, so no lock is
//! needed. If wall time regresses, the clock keeps issuing stamps in the
//! last observed millisecond (skewing forward relative to the wall) rather
//! than ever going backwards.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Custom epoch: 2024-01-01 00:00:00 UTC (milliseconds since Unix epoch).
const EPOCH_MS: u64 = 1_704_067_200_000;

/// Number of bits used for the sequence portion.
const SEQUENCE_BITS: u32 = 22;

/// Mask for extracting the sequence portion (22 bits).
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// A 64-bit per-node logical timestamp combining wall time and sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct EventTime(u64);

impl EventTime {
    /// The smallest possible event time.
    pub const MIN: EventTime = EventTime(0);

    /// The largest possible event time.
    ///
    /// Used as the upper bound for journal scans and as the fixed key for
    /// singleton snapshots.
    pub const MAX: EventTime = EventTime(u64::MAX);

    /// Builds an event time from milliseconds-since-epoch and a sequence
    /// counter.
    ///
    /// `sequence` is masked to 22 bits.
    #[inline]
    pub const fn from_parts(millis: u64, sequence: u64) -> Self {
        Self((millis << SEQUENCE_BITS) | (sequence & SEQUENCE_MASK))
    }

    /// Reconstructs an event time from its raw 64-bit representation.
    #[inline]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit representation.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the milliseconds-since-epoch portion.
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 >> SEQUENCE_BITS
    }

    /// Returns the within-millisecond sequence portion.
    #[inline]
    pub const fn sequence(self) -> u64 {
        self.0 & SEQUENCE_MASK
    }

    /// Returns the smallest event time strictly greater than `self`.
    ///
    /// Saturates at [`EventTime::MAX`].
    #[inline]
    pub const fn successor(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the largest event time within the given wall-clock
    /// millisecond.
    ///
    /// Historical reads use this to convert a millisecond bound into an
    /// inclusive journal bound.
    #[inline]
    pub const fn largest_in_millis(wall_millis: u64) -> Self {
        let millis = wall_millis.saturating_sub(EPOCH_MS);
        Self::from_parts(millis, SEQUENCE_MASK)
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.millis(), self.sequence())
    }
}

/// Strictly increasing event-time source owned by a single node actor.
///
/// Single-writer by construction: the owning actor is the only issuer, so
/// the clock needs no synchronization.
#[derive(Debug, Default)]
pub struct EventClock {
    /// Last stamp issued (or bumped to).
    last: EventTime,
}

impl EventClock {
    /// Creates a clock that has issued nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next event time, strictly greater than every stamp this
    /// clock has issued or been bumped to.
    pub fn tick(&mut self) -> EventTime {
        let now = Self::wall_millis();
        let next = if now > self.last.millis() {
            // New millisecond — reset sequence
            EventTime::from_parts(now, 0)
        } else if self.last.sequence() < SEQUENCE_MASK {
            // Same millisecond (or wall clock regressed) — increment sequence
            EventTime::from_parts(self.last.millis(), self.last.sequence() + 1)
        } else {
            // Sequence overflow — advance into the next logical millisecond
            EventTime::from_parts(self.last.millis() + 1, 0)
        };
        self.last = next;
        next
    }

    /// Returns the last stamp issued, without advancing the clock.
    #[inline]
    pub fn peek(&self) -> EventTime {
        self.last
    }

    /// Ensures the next `tick` observes a stamp strictly greater than `at`.
    ///
    /// Used when a caller supplies an explicit event-time override: the
    /// clock must never issue a stamp at or below a stamp it has observed.
    pub fn bump_to(&mut self, at: EventTime) {
        if at > self.last {
            self.last = at;
        }
    }

    /// Current wall-clock milliseconds since the custom epoch.
    ///
    /// A clock before the epoch reads as 0; monotonicity is preserved by
    /// `tick` regardless.
    fn wall_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .saturating_sub(EPOCH_MS)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    /// Number of bits used for the timestamp portion (for test verification).
    const TIMESTAMP_BITS: u32 = 42;

    #[test]
    fn test_bit_allocation() {
        // 42 + 22 = 64
        assert_eq!(TIMESTAMP_BITS + SEQUENCE_BITS, 64);
        assert_eq!(SEQUENCE_MASK, 0x3FFFFF);
        assert_eq!(SEQUENCE_MASK.count_ones(), 22);
    }

    #[test]
    fn test_epoch_is_2024_01_01() {
        // 2024-01-01 00:00:00 UTC = 1704067200 seconds since Unix epoch
        assert_eq!(EPOCH_MS, 1_704_067_200_000);
    }

    #[test]
    fn test_from_parts_roundtrip() {
        let t = EventTime::from_parts(123_456, 789);
        assert_eq!(t.millis(), 123_456);
        assert_eq!(t.sequence(), 789);
        assert_eq!(EventTime::from_u64(t.as_u64()), t);
    }

    #[test]
    fn test_tick_is_strictly_increasing() {
        let mut clock = EventClock::new();
        let mut prev = clock.tick();
        for _ in 0..10_000 {
            let next = clock.tick();
            assert!(next > prev, "clock regressed: {next} after {prev}");
            prev = next;
        }
    }

    #[test]
    fn test_ticks_are_unique() {
        let mut clock = EventClock::new();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(clock.tick()));
        }
    }

    #[test]
    fn test_peek_returns_last_issued() {
        let mut clock = EventClock::new();
        let t = clock.tick();
        assert_eq!(clock.peek(), t);
        assert_eq!(clock.peek(), t);
    }

    #[test]
    fn test_bump_to_future_stamp() {
        let mut clock = EventClock::new();
        clock.tick();
        let future = EventTime::from_parts(clock.peek().millis() + 60_000, 5);
        clock.bump_to(future);
        assert_eq!(clock.peek(), future);
        assert!(clock.tick() > future);
    }

    #[test]
    fn test_bump_to_past_stamp_is_ignored() {
        let mut clock = EventClock::new();
        let t = clock.tick();
        clock.bump_to(EventTime::MIN);
        assert_eq!(clock.peek(), t);
    }

    #[test]
    fn test_sequence_overflow_advances_millisecond() {
        let mut clock = EventClock::new();
        let now = clock.tick().millis();
        // Skew far into the future so wall time cannot advance past us,
        // then exhaust the sequence space.
        clock.bump_to(EventTime::from_parts(now + 86_400_000, SEQUENCE_MASK));
        let overflowed = clock.tick();
        assert_eq!(overflowed.millis(), now + 86_400_000 + 1);
        assert_eq!(overflowed.sequence(), 0);
    }

    #[test]
    fn test_largest_in_millis_bounds_the_millisecond() {
        let wall = EPOCH_MS + 5_000;
        let bound = EventTime::largest_in_millis(wall);
        assert_eq!(bound.millis(), 5_000);
        assert_eq!(bound.sequence(), SEQUENCE_MASK);
        assert!(EventTime::from_parts(5_000, 17) <= bound);
        assert!(EventTime::from_parts(5_001, 0) > bound);
    }

    proptest! {
        /// Property: ordering of raw u64 matches ordering of (millis, sequence).
        #[test]
        fn prop_ordering_matches_parts(
            m1 in 0u64..(1 << 42), s1 in 0u64..=SEQUENCE_MASK,
            m2 in 0u64..(1 << 42), s2 in 0u64..=SEQUENCE_MASK
        ) {
            let t1 = EventTime::from_parts(m1, s1);
            let t2 = EventTime::from_parts(m2, s2);
            prop_assert_eq!(t1.cmp(&t2), (m1, s1).cmp(&(m2, s2)));
        }

        /// Property: successor is strictly greater except at MAX.
        #[test]
        fn prop_successor_strictly_greater(raw in 0u64..u64::MAX) {
            let t = EventTime::from_u64(raw);
            prop_assert!(t.successor() > t);
        }
    }
}
