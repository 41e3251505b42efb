//! # Stage Test Utilities
//!
//! Helpers shared by the stage crates' tests:
//! - [`fixtures`]: ready-made stages, simulations and pawns
//! - [`determinism`]: replay harness and proptest strategies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod determinism;
pub mod fixtures;

/// Re-exported so dependents share one proptest version.
pub use proptest;
