//! Test fixtures and helpers.
//!
//! Pre-built stages and simulations for consistent testing.

use fixed::types::I32F32;
use stage_core::prelude::*;

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Shorthand for [`Square::new`].
#[must_use]
pub const fn sq(x: i32, y: i32) -> Square {
    Square::new(x, y)
}

/// A `width x height` rectangle with every tile present.
#[must_use]
pub fn open_stage(width: u32, height: u32) -> StageData {
    StageData::rectangle(width, height)
}

/// An open rectangle with the given cells removed.
#[must_use]
pub fn stage_with_holes(width: u32, height: u32, holes: &[Square]) -> StageData {
    let mut stage = StageData::rectangle(width, height);
    for hole in holes {
        stage.remove_tile(*hole);
    }
    stage
}

/// Simulation on an open rectangle with default tuning.
#[must_use]
pub fn open_sim(width: u32, height: u32) -> StageSimulation {
    StageSimulation::with_stage(open_stage(width, height), SimulationConfig::default())
}

/// Simulation on an open rectangle where every timed action completes on
/// its first tick.
#[must_use]
pub fn instant_sim(width: u32, height: u32) -> StageSimulation {
    let config = SimulationConfig::default().with_robot(RobotConfig::default().instant_actions());
    StageSimulation::with_stage(open_stage(width, height), config)
}

/// Spawn a unit pawn driven by an [`IdleBrain`].
///
/// # Panics
///
/// Panics if the pawn cannot be spawned at `anchor`.
pub fn spawn_idle_pawn(sim: &mut StageSimulation, anchor: Square) -> EntityId {
    let pawn = sim
        .spawn_pawn(anchor, Footprint::UNIT)
        .expect("fixture pawn spawn");
    sim.attach_robot(pawn, Box::new(IdleBrain))
        .expect("fixture robot attach");
    pawn
}

/// Spawn a unit pawn that plays `script` one operation per decision.
///
/// # Panics
///
/// Panics if the pawn cannot be spawned at `anchor`.
pub fn spawn_scripted_pawn(
    sim: &mut StageSimulation,
    anchor: Square,
    script: impl IntoIterator<Item = OperationKind>,
) -> EntityId {
    let pawn = sim
        .spawn_pawn(anchor, Footprint::UNIT)
        .expect("fixture pawn spawn");
    sim.attach_robot(pawn, Box::new(ScriptedBrain::new(script)))
        .expect("fixture robot attach");
    pawn
}

/// Crowd of wandering pawns on a generated stage, for determinism runs.
#[must_use]
pub fn wandering_crowd(seed: u64, pawns: usize) -> StageSimulation {
    let config = SimulationConfig::default()
        .with_stage(
            StageConfig::open(24, 24)
                .with_seed(seed)
                .with_holes_per_mille(80),
        )
        .with_seed(seed);
    let mut sim = StageSimulation::new(config);

    let mut rng = StageRng::new(seed);
    let mut spawned = 0;
    let mut attempts = 0;
    while spawned < pawns && attempts < pawns * 20 {
        attempts += 1;
        let Some(anchor) = sim.stage().random_tile_coord(&mut rng) else {
            break;
        };
        if let Ok(pawn) = sim.spawn_pawn(anchor, Footprint::UNIT) {
            if sim.attach_brain(pawn, &BrainSpec::Wander).is_ok() {
                spawned += 1;
            }
        }
    }
    sim
}

/// Every pawn's anchor, ascending id.
#[must_use]
pub fn pawn_squares(sim: &StageSimulation) -> Vec<(EntityId, Square)> {
    sim.pawns().map(|p| (p.id(), p.square())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_with_holes_removes_cells() {
        let stage = stage_with_holes(3, 3, &[sq(1, 1)]);
        assert_eq!(stage.len(), 8);
        assert!(!stage.check_tile_exist(sq(1, 1)));
    }

    #[test]
    fn test_wandering_crowd_spawns_requested_pawns() {
        let sim = wandering_crowd(5, 6);
        assert_eq!(sim.pawns().count(), 6);
        assert_eq!(sim.entities().pawns.len(), 6);
    }

    #[test]
    fn test_scripted_fixture_runs_script() {
        let mut sim = instant_sim(4, 4);
        let pawn = spawn_scripted_pawn(&mut sim, sq(0, 0), [OperationKind::Happy]);
        sim.run_ticks(5);
        assert!(sim.events().contains(&StageEvent::Emote {
            pawn,
            kind: EmoteKind::Happy
        }));
    }
}
