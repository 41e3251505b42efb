//! Scenario runner.
//!
//! Builds a [`StageSimulation`] from a [`Scenario`], feeds it the scheduled
//! orders and runs it to completion, summarising the result in a
//! [`RunReport`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use stage_core::prelude::{EntityId, Fixed, StageError, StageSimulation};
use thiserror::Error;

use crate::scenario::Scenario;

/// Error type for scenario runs.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// A placement or order was rejected by the simulation.
    #[error("{what} #{index} rejected: {source}")]
    Placement {
        /// Placement list.
        what: &'static str,
        /// Index in that list.
        index: usize,
        /// Underlying error.
        #[source]
        source: StageError,
    },
    /// Any other simulation error.
    #[error(transparent)]
    Stage(#[from] StageError),
}

/// Final state of one pawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PawnReport {
    /// Pawn id.
    pub id: EntityId,
    /// Final anchor (x, y).
    pub square: (i32, i32),
    /// Remaining health.
    pub health: u32,
    /// Animation key of the final state.
    pub state: String,
    /// Carried object, if any.
    pub carrying: Option<EntityId>,
}

/// Summary of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Scenario name.
    pub scenario: String,
    /// Decision RNG seed used.
    pub seed: u64,
    /// Ticks actually run.
    pub ticks: u64,
    /// True if the run ended early because nothing was left to do.
    pub settled: bool,
    /// Final [`StageSimulation::state_hash`].
    pub state_hash: u64,
    /// Every pawn, ascending id.
    pub pawns: Vec<PawnReport>,
    /// Event counts keyed by event tag.
    pub event_counts: BTreeMap<String, u64>,
}

impl RunReport {
    /// Count for one event tag.
    #[must_use]
    pub fn count(&self, tag: &str) -> u64 {
        self.event_counts.get(tag).copied().unwrap_or(0)
    }

    /// Pawns still alive.
    #[must_use]
    pub fn survivors(&self) -> usize {
        self.pawns.iter().filter(|p| p.state != "dead").count()
    }

    /// Save the report as pretty JSON.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Load a report saved with [`save`](Self::save).
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(std::io::Error::other)
    }
}

/// Runs one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    scenario: Scenario,
}

impl ScenarioRunner {
    /// Runner for `scenario`.
    #[must_use]
    pub fn new(scenario: Scenario) -> Self {
        Self { scenario }
    }

    /// Scenario being run.
    #[must_use]
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Generate the stage and spawn every placement.
    ///
    /// Placement areas are kept free of generated holes.
    pub fn build(&self) -> Result<StageSimulation, RunnerError> {
        let scenario = &self.scenario;
        let mut config = scenario.config.clone();
        config.stage.keep_intact.extend(scenario.placement_areas());
        let mut sim = StageSimulation::new(config);

        for (index, placement) in scenario.facilities.iter().enumerate() {
            placement
                .area()
                .and_then(|(anchor, footprint)| sim.spawn_facility(anchor, footprint))
                .map_err(|source| RunnerError::Placement {
                    what: "facility",
                    index,
                    source,
                })?;
        }
        for (index, placement) in scenario.objects.iter().enumerate() {
            placement
                .area()
                .and_then(|(anchor, footprint)| sim.spawn_object(anchor, footprint))
                .map_err(|source| RunnerError::Placement {
                    what: "object",
                    index,
                    source,
                })?;
        }
        for (index, placement) in scenario.pawns.iter().enumerate() {
            let robot = &sim.config().robot;
            let speed = placement
                .speed
                .and_then(Fixed::checked_from_num)
                .unwrap_or(robot.pawn_speed);
            let health = placement.health.unwrap_or(robot.pawn_health);
            let pawn = placement
                .area()
                .and_then(|(anchor, footprint)| {
                    sim.spawn_pawn_with(anchor, footprint, speed, health)
                })
                .and_then(|pawn| sim.attach_brain(pawn, &placement.brain).map(|()| pawn))
                .map_err(|source| RunnerError::Placement {
                    what: "pawn",
                    index,
                    source,
                })?;
            tracing::debug!(pawn, brain = ?placement.brain, "Scenario pawn ready");
        }

        Ok(sim)
    }

    /// Run the scenario.
    pub fn run(&self) -> Result<RunReport, RunnerError> {
        let scenario = &self.scenario;
        let mut sim = self.build()?;
        let mut orders: Vec<_> = scenario.orders.clone();
        orders.sort_by_key(|order| order.tick);
        let mut orders = orders.into_iter().peekable();
        let mut event_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut settled = false;

        tracing::info!(
            scenario = %scenario.name,
            seed = scenario.config.seed,
            ticks = scenario.ticks,
            pawns = scenario.pawns.len(),
            "Scenario started"
        );

        while sim.get_tick() < scenario.ticks {
            while let Some(order) = orders.next_if(|o| o.tick <= sim.get_tick()) {
                if let Err(e) = sim.request_operation(order.operation()) {
                    tracing::warn!(
                        tick = sim.get_tick(),
                        pawn = order.pawn,
                        operation = %order.kind,
                        error = %e,
                        "Scheduled order dropped"
                    );
                }
            }

            if scenario.stop_when_idle && orders.peek().is_none() && sim.is_settled() {
                settled = true;
                break;
            }

            sim.tick();
            for event in sim.drain_events() {
                *event_counts.entry(event.tag().to_string()).or_insert(0) += 1;
            }
        }

        let report = RunReport {
            scenario: scenario.name.clone(),
            seed: scenario.config.seed,
            ticks: sim.get_tick(),
            settled,
            state_hash: sim.state_hash(),
            pawns: sim
                .pawns()
                .map(|pawn| PawnReport {
                    id: pawn.id(),
                    square: (pawn.square().x, pawn.square().y),
                    health: pawn.health(),
                    state: pawn.animation_key().to_string(),
                    carrying: pawn.carrying(),
                })
                .collect(),
            event_counts,
        };

        tracing::info!(
            scenario = %report.scenario,
            ticks = report.ticks,
            settled = report.settled,
            survivors = report.survivors(),
            state_hash = format!("{:016x}", report.state_hash),
            "Scenario finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{AreaPlacement, PawnPlacement, ScheduledOrder};
    use stage_core::prelude::{
        BrainSpec, OperationKind, RobotConfig, SimulationConfig, Square, StageConfig,
    };

    fn walk_scenario() -> Scenario {
        Scenario {
            name: "walk".to_string(),
            config: SimulationConfig::default().with_stage(StageConfig::open(10, 10)),
            pawns: vec![PawnPlacement::new(0, 0, BrainSpec::Idle)],
            orders: vec![ScheduledOrder {
                tick: 0,
                pawn: 1,
                kind: OperationKind::MoveTo {
                    target: Some(Square::new(3, 0)),
                },
                priority: false,
            }],
            ticks: 200,
            stop_when_idle: true,
            ..Scenario::default()
        }
    }

    #[test]
    fn test_run_walk_settles_at_target() {
        let report = ScenarioRunner::new(walk_scenario()).run().unwrap();

        assert!(report.settled);
        assert!(report.ticks < 200);
        assert_eq!(report.pawns.len(), 1);
        assert_eq!(report.pawns[0].square, (3, 0));
        assert_eq!(report.pawns[0].state, "idle");
        assert_eq!(report.count("MoveFinished"), 1);
        assert_eq!(report.count("OperationStarted"), 1);
    }

    #[test]
    fn test_run_without_stop_uses_every_tick() {
        let scenario = Scenario {
            stop_when_idle: false,
            ticks: 50,
            ..walk_scenario()
        };
        let report = ScenarioRunner::new(scenario).run().unwrap();
        assert!(!report.settled);
        assert_eq!(report.ticks, 50);
    }

    #[test]
    fn test_runs_are_reproducible() {
        let scenario = Scenario::courtyard().with_ticks(300);
        let a = ScenarioRunner::new(scenario.clone()).run().unwrap();
        let b = ScenarioRunner::new(scenario).run().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_overlapping_pawns_are_rejected() {
        let scenario = Scenario {
            pawns: vec![
                PawnPlacement::new(1, 1, BrainSpec::Idle),
                PawnPlacement::new(1, 1, BrainSpec::Idle),
            ],
            ..walk_scenario()
        };
        let err = ScenarioRunner::new(scenario).run().unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Placement {
                what: "pawn",
                index: 1,
                source: StageError::AreaOccupied { .. }
            }
        ));
    }

    #[test]
    fn test_oversized_placement_is_rejected() {
        let mut scenario = walk_scenario();
        scenario.facilities.push(AreaPlacement::new(0, 5, 3_000_000_000, 1));
        let err = ScenarioRunner::new(scenario).run().unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Placement {
                what: "facility",
                index: 0,
                source: StageError::InvalidFootprint { .. }
            }
        ));
    }

    #[test]
    fn test_order_for_unknown_pawn_is_dropped() {
        let mut scenario = walk_scenario();
        scenario.orders.push(ScheduledOrder {
            tick: 2,
            pawn: 42,
            kind: OperationKind::Happy,
            priority: true,
        });
        let report = ScenarioRunner::new(scenario).run().unwrap();
        assert_eq!(report.pawns[0].square, (3, 0));
    }

    #[test]
    fn test_haul_scenario_moves_crate() {
        let scenario = Scenario {
            name: "haul".to_string(),
            config: SimulationConfig::default()
                .with_stage(StageConfig::open(8, 8))
                .with_robot(RobotConfig::default().instant_actions()),
            objects: vec![AreaPlacement::new(1, 0, 1, 1)],
            pawns: vec![PawnPlacement::scripted(
                0,
                0,
                vec![
                    OperationKind::CarryOn { object: 1 },
                    OperationKind::MoveTo {
                        target: Some(Square::new(4, 4)),
                    },
                    OperationKind::PutDown { at: None },
                ],
            )],
            ticks: 400,
            stop_when_idle: true,
            ..Scenario::default()
        };
        let report = ScenarioRunner::new(scenario).run().unwrap();

        assert!(report.settled);
        assert_eq!(report.count("CarriedOn"), 1);
        assert_eq!(report.count("PutDown"), 1);
        assert_eq!(report.pawns[0].square, (4, 4));
        assert_eq!(report.pawns[0].carrying, None);
    }

    #[test]
    fn test_report_save_load() {
        let report = ScenarioRunner::new(walk_scenario()).run().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/walk.json");

        report.save(&path).unwrap();
        assert_eq!(RunReport::load(&path).unwrap(), report);
    }
}
