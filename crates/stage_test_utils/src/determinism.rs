//! Replay harness: identical setup must give identical state hashes.
//!
//! # What can break replay
//!
//! Robots, path requests and stage generation must replay exactly from a
//! seed. The usual suspects:
//!
//! - **Floating-point math**: movement interpolation uses
//!   [`stage_core::math::Fixed`] throughout.
//!
//! - **HashMap iteration order**: robots tick in ascending pawn id order and
//!   A* breaks ties on the square ordering.
//!
//! - **System randomness**: every decision draws from the seeded
//!   [`stage_core::stage_generation::StageRng`].
//!
//! The [`strategies`] module feeds the occupancy and script properties.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use stage_core::simulation::StageSimulation;

/// Final hashes of repeated runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// True when every run ended on the same hash.
    pub is_deterministic: bool,
    /// One hash per run, in run order.
    pub hashes: Vec<u64>,
    /// Ticks each run advanced.
    pub ticks: u64,
}

impl DeterminismResult {
    fn from_hashes(hashes: Vec<u64>, ticks: u64) -> Self {
        Self {
            is_deterministic: hashes.windows(2).all(|pair| pair[0] == pair[1]),
            hashes,
            ticks,
        }
    }

    /// Distinct hashes, sorted. A deterministic run yields exactly one.
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// # Panics
    ///
    /// Panics listing every hash if the runs disagree.
    pub fn assert_deterministic(&self) {
        assert!(
            self.is_deterministic,
            "{} runs of {} ticks ended on {} distinct hashes: {:016x?}",
            self.hashes.len(),
            self.ticks,
            self.unique_hashes().len(),
            self.hashes
        );
    }
}

/// Build a state `runs` times, step it `ticks` times and hash the result.
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let hashes = (0..runs)
        .map(|_| {
            let mut state = setup();
            (0..ticks).for_each(|_| step(&mut state));
            hash(&state)
        })
        .collect();
    DeterminismResult::from_hashes(hashes, ticks)
}

/// True if two simulations built by `setup_fn` end on the same
/// [`StageSimulation::state_hash`] after `num_ticks`.
pub fn verify_simulation_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> StageSimulation,
{
    verify_determinism(2, num_ticks, &setup_fn, StageSimulation::tick, StageSimulation::state_hash)
        .is_deterministic
}

/// Run `num_sims` simulations on scoped threads.
///
/// Simulations are single-threaded, so each one is built on the thread that
/// steps it; only the final hash crosses back.
///
/// # Panics
///
/// Panics if a simulation thread panics.
pub fn run_parallel_simulations<F>(setup_fn: F, num_sims: usize, num_ticks: u64) -> DeterminismResult
where
    F: Fn() -> StageSimulation + Sync,
{
    let hashes = thread::scope(|scope| {
        let workers: Vec<_> = (0..num_sims)
            .map(|_| {
                scope.spawn(|| {
                    let mut sim = setup_fn();
                    sim.run_ticks(num_ticks);
                    sim.state_hash()
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("simulation thread panicked"))
            .collect()
    });
    DeterminismResult::from_hashes(hashes, num_ticks)
}

/// Step two fresh simulations side by side and return the first tick whose
/// state hashes differ (0 if they differ before any tick), or `None`.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: u64) -> Option<u64>
where
    F: Fn() -> StageSimulation,
{
    let mut left = setup_fn();
    let mut right = setup_fn();

    for tick in 0..=num_ticks {
        if tick > 0 {
            left.tick();
            right.tick();
        }
        if left.state_hash() != right.state_hash() {
            tracing::warn!(tick, "Simulations diverged");
            return Some(tick);
        }
    }
    None
}

/// Hash any value with the std hasher.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for stage testing.
pub mod strategies {
    use proptest::prelude::*;
    use stage_core::entity_index::EntityId;
    use stage_core::operation::OperationKind;
    use stage_core::square::{Footprint, Square};

    /// A square inside `0..width x 0..height`.
    pub fn arb_square(width: i32, height: i32) -> impl Strategy<Value = Square> {
        (0..width, 0..height).prop_map(|(x, y)| Square::new(x, y))
    }

    /// A footprint up to `max x max`.
    pub fn arb_footprint(max: u32) -> impl Strategy<Value = Footprint> {
        (1..=max, 1..=max).prop_map(|(w, h)| Footprint::new(w, h))
    }

    /// One mutation of an occupancy index.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum IndexOp {
        /// Register `id`.
        Register(EntityId, Square, Footprint),
        /// Move and resize `id`.
        Update(EntityId, Square, Footprint),
        /// Move `id` keeping its footprint.
        UpdateAnchor(EntityId, Square),
        /// Remove `id`.
        Unregister(EntityId),
    }

    /// A single index mutation over a small id pool, so ops collide often.
    pub fn arb_index_op(width: i32, height: i32) -> impl Strategy<Value = IndexOp> {
        let id = 1..6u64;
        prop_oneof![
            (id.clone(), arb_square(width, height), arb_footprint(3))
                .prop_map(|(id, at, fp)| IndexOp::Register(id, at, fp)),
            (id.clone(), arb_square(width, height), arb_footprint(3))
                .prop_map(|(id, at, fp)| IndexOp::Update(id, at, fp)),
            (id.clone(), arb_square(width, height))
                .prop_map(|(id, at)| IndexOp::UpdateAnchor(id, at)),
            id.prop_map(IndexOp::Unregister),
        ]
    }

    /// A sequence of index mutations.
    pub fn arb_index_ops(max_len: usize) -> impl Strategy<Value = Vec<IndexOp>> {
        proptest::collection::vec(arb_index_op(12, 12), 0..max_len)
    }

    /// An operation that needs no other entity.
    pub fn arb_self_operation(width: i32, height: i32) -> impl Strategy<Value = OperationKind> {
        prop_oneof![
            arb_square(width, height).prop_map(|t| OperationKind::MoveTo { target: Some(t) }),
            Just(OperationKind::MoveTo { target: None }),
            Just(OperationKind::Think),
            Just(OperationKind::Happy),
            Just(OperationKind::Freeze),
            arb_square(width, height).prop_map(|at| OperationKind::Thunder { at }),
        ]
    }

    /// A script of self-contained operations.
    pub fn arb_script(max_len: usize) -> impl Strategy<Value = Vec<OperationKind>> {
        proptest::collection::vec(arb_self_operation(10, 10), 1..max_len)
    }
}
