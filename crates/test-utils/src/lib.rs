//! Shared test utilities for strandgraph crates.
//!
//! Nothing here ships in production builds; the crate exists so the fault
//! injection and event-building helpers are written once and shared by
//! every test suite.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::unwrap_used, clippy::expect_used)]

pub mod events;
pub mod flaky;

pub use events::{add_edge, remove_edge, remove_property, set_property};
pub use flaky::{FailureMode, FlakyPersistor};
