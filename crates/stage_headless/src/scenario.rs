//! Scenario loading and configuration.
//!
//! Scenarios describe the starting state of a headless run: the simulation
//! config (stage generation included), what to spawn where, which brain
//! drives each pawn and which operations are pushed from outside.
//!
//! Entity ids are handed out in spawn order starting at 1: facilities first,
//! then objects, then pawns, each in list order. Operation arguments and
//! [`ScheduledOrder::pawn`] refer to those ids.

use std::path::Path;

use serde::{Deserialize, Serialize};
use stage_core::prelude::{
    BrainSpec, EntityId, Footprint, OperationKind, PawnOperation, SimulationConfig, Square,
    StageConfig, StageError,
};
use thiserror::Error;

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
}

/// A complete scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Simulation tuning, stage generation included.
    pub config: SimulationConfig,
    /// Facilities, spawned first.
    pub facilities: Vec<AreaPlacement>,
    /// Objects, spawned after facilities.
    pub objects: Vec<AreaPlacement>,
    /// Pawns, spawned last.
    pub pawns: Vec<PawnPlacement>,
    /// Operations pushed to pawns from outside their brains.
    pub orders: Vec<ScheduledOrder>,
    /// Ticks to run.
    pub ticks: u64,
    /// End the run early once every robot is available and no order is left.
    pub stop_when_idle: bool,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: "Empty".to_string(),
            description: String::new(),
            config: SimulationConfig::default(),
            facilities: Vec::new(),
            objects: Vec::new(),
            pawns: Vec::new(),
            orders: Vec::new(),
            ticks: 600,
            stop_when_idle: false,
        }
    }
}

impl Scenario {
    /// Load a scenario from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron_str(&contents)
    }

    /// Load from a RON string.
    pub fn from_ron_str(ron: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = ron::from_str(ron)?;
        Ok(scenario)
    }

    /// Built-in courtyard: a small stage with a workshop, a crate, a few
    /// wanderers and one pawn that hauls the crate next to the workshop.
    #[must_use]
    pub fn courtyard() -> Self {
        let stage = StageConfig::open(16, 16)
            .with_seed(2024)
            .with_holes_per_mille(40);
        Self {
            name: "Courtyard".to_string(),
            description: "Wanderers plus one hauler moving a crate to the workshop".to_string(),
            config: SimulationConfig::default().with_stage(stage).with_seed(2024),
            // id 1
            facilities: vec![AreaPlacement::new(10, 10, 2, 2)],
            // id 2
            objects: vec![AreaPlacement::new(3, 2, 1, 1)],
            // ids 3..=6
            pawns: vec![
                PawnPlacement::scripted(
                    2,
                    2,
                    vec![
                        OperationKind::CarryOn { object: 2 },
                        OperationKind::MoveTo {
                            target: Some(Square::new(9, 9)),
                        },
                        OperationKind::PutDown { at: None },
                        OperationKind::Produce { facility: 1 },
                        OperationKind::Happy,
                    ],
                ),
                PawnPlacement::new(1, 13, BrainSpec::Wander),
                PawnPlacement::new(13, 1, BrainSpec::Wander),
                PawnPlacement::new(14, 14, BrainSpec::Idle),
            ],
            orders: vec![ScheduledOrder {
                tick: 40,
                pawn: 6,
                kind: OperationKind::MoveTo {
                    target: Some(Square::new(7, 14)),
                },
                priority: false,
            }],
            ticks: 1200,
            stop_when_idle: false,
        }
    }

    /// Same scenario with both the stage and the decision RNG reseeded.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self.config.stage.seed = seed;
        self
    }

    /// Same scenario with a different tick count.
    #[must_use]
    pub fn with_ticks(mut self, ticks: u64) -> Self {
        self.ticks = ticks;
        self
    }

    /// Every valid placement area, for keeping them free of generated
    /// holes. Invalid sizes are rejected when the scenario is built.
    pub fn placement_areas(&self) -> impl Iterator<Item = (Square, Footprint)> + '_ {
        self.facilities
            .iter()
            .chain(&self.objects)
            .map(AreaPlacement::area)
            .chain(self.pawns.iter().map(PawnPlacement::area))
            .filter_map(std::result::Result::ok)
    }
}

/// A facility or object placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaPlacement {
    /// Anchor (x, y).
    pub position: (i32, i32),
    /// Footprint (width, height).
    #[serde(default = "unit_size")]
    pub size: (u32, u32),
}

impl AreaPlacement {
    /// Create a placement.
    #[must_use]
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            position: (x, y),
            size: (width, height),
        }
    }

    /// Anchor and footprint.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidFootprint`] for a zero or oversized side.
    pub fn area(&self) -> Result<(Square, Footprint), StageError> {
        area_of(self.position, self.size)
    }
}

/// A pawn placement with the brain that drives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PawnPlacement {
    /// Anchor (x, y).
    pub position: (i32, i32),
    /// Footprint (width, height).
    #[serde(default = "unit_size")]
    pub size: (u32, u32),
    /// Decision hooks.
    #[serde(default)]
    pub brain: BrainSpec,
    /// Overrides the configured pawn speed (cells per second).
    #[serde(default)]
    pub speed: Option<f64>,
    /// Overrides the configured pawn health.
    #[serde(default)]
    pub health: Option<u32>,
}

impl PawnPlacement {
    /// Unit pawn with default speed and health.
    #[must_use]
    pub fn new(x: i32, y: i32, brain: BrainSpec) -> Self {
        Self {
            position: (x, y),
            size: unit_size(),
            brain,
            speed: None,
            health: None,
        }
    }

    /// Unit pawn playing `script`.
    #[must_use]
    pub fn scripted(x: i32, y: i32, script: Vec<OperationKind>) -> Self {
        Self::new(x, y, BrainSpec::Scripted(script))
    }

    /// Anchor and footprint.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidFootprint`] for a zero or oversized side.
    pub fn area(&self) -> Result<(Square, Footprint), StageError> {
        area_of(self.position, self.size)
    }
}

/// An operation pushed to a pawn at a given tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledOrder {
    /// Tick before which the order is requested.
    pub tick: u64,
    /// Pawn id.
    pub pawn: EntityId,
    /// Operation.
    pub kind: OperationKind,
    /// Preempt a running non-priority operation.
    #[serde(default)]
    pub priority: bool,
}

impl ScheduledOrder {
    /// The operation to request.
    #[must_use]
    pub fn operation(&self) -> PawnOperation {
        if self.priority {
            PawnOperation::priority(self.pawn, self.kind)
        } else {
            PawnOperation::new(self.pawn, self.kind)
        }
    }
}

fn unit_size() -> (u32, u32) {
    (1, 1)
}

fn area_of(position: (i32, i32), size: (u32, u32)) -> Result<(Square, Footprint), StageError> {
    let footprint = Footprint::try_new(size.0, size.1)?;
    Ok((Square::new(position.0, position.1), footprint))
}
