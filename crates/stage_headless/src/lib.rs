//! Headless scenario runner for CI and determinism checks.
//!
//! Loads RON scenarios, runs them on [`stage_core`] without any rendering and
//! reports the outcome as JSON.
//!
//! - **Single runs**: [`ScenarioRunner`] produces a [`RunReport`]
//! - **Batches**: [`run_batch`] replays a scenario under many seeds
//! - **Determinism**: [`verify_determinism`] compares final state hashes
//!
//! # Example
//!
//! ```bash
//! # Run a scenario and print the report
//! cargo run -p stage_headless -- run --scenario crates/stage_headless/scenarios/crate_haul.ron --json
//!
//! # Run 100 seeds in parallel
//! cargo run -p stage_headless -- batch --count 100 --output results/
//!
//! # Verify determinism
//! cargo run -p stage_headless -- verify --runs 5
//! ```

pub mod batch;
pub mod runner;
pub mod scenario;

pub use batch::{run_batch, verify_determinism, BatchConfig, BatchResults, VerifyReport};
pub use runner::{PawnReport, RunReport, RunnerError, ScenarioRunner};
pub use scenario::{AreaPlacement, PawnPlacement, Scenario, ScenarioError, ScheduledOrder};
