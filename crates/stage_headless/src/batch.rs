//! Batch scenario runs.
//!
//! Runs one scenario under many seeds in parallel using rayon. Each worker
//! builds its own simulation; only reports cross threads.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::runner::{RunReport, ScenarioRunner};
use crate::scenario::Scenario;

/// Configuration for a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of runs.
    pub count: u32,
    /// Seed of the first run; run `i` uses `seed_start + i`.
    pub seed_start: u64,
    /// Worker threads (0 = rayon default).
    pub parallel: u32,
    /// Directory for `batch_results.json`.
    pub output_dir: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            count: 16,
            seed_start: 0,
            parallel: 0,
            output_dir: None,
        }
    }
}

impl BatchConfig {
    /// `count` runs from seed 0.
    #[must_use]
    pub fn new(count: u32) -> Self {
        Self {
            count,
            ..Default::default()
        }
    }

    /// Set seed start.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed_start = seed;
        self
    }

    /// Set output directory.
    #[must_use]
    pub fn with_output(mut self, dir: PathBuf) -> Self {
        self.output_dir = Some(dir);
        self
    }
}

/// A run that failed to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    /// Run index.
    pub run_index: u32,
    /// Seed used.
    pub seed: u64,
    /// Error message.
    pub message: String,
}

/// Results from a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResults {
    /// Scenario name.
    pub scenario: String,
    /// Configuration used.
    pub config: BatchConfig,
    /// Reports in seed order.
    pub runs: Vec<RunReport>,
    /// Runs that failed.
    pub errors: Vec<BatchError>,
    /// Wall clock time.
    pub duration_seconds: f64,
}

impl BatchResults {
    /// Mean ticks over successful runs.
    #[must_use]
    pub fn mean_ticks(&self) -> f64 {
        if self.runs.is_empty() {
            return 0.0;
        }
        self.runs.iter().map(|r| r.ticks as f64).sum::<f64>() / self.runs.len() as f64
    }

    /// Fraction of runs that settled before their tick limit.
    #[must_use]
    pub fn settled_rate(&self) -> f64 {
        if self.runs.is_empty() {
            return 0.0;
        }
        self.runs.iter().filter(|r| r.settled).count() as f64 / self.runs.len() as f64
    }

    /// Save results to a JSON file.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Load results from a JSON file.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(std::io::Error::other)
    }
}

fn run_seeded(scenario: &Scenario, index: u32, seed: u64) -> Result<RunReport, BatchError> {
    ScenarioRunner::new(scenario.clone().with_seed(seed))
        .run()
        .map_err(|e| {
            warn!(run = index, seed, error = %e, "Run failed");
            BatchError {
                run_index: index,
                seed,
                message: e.to_string(),
            }
        })
}

/// Run `scenario` once per seed in the batch.
pub fn run_batch(scenario: &Scenario, config: BatchConfig) -> BatchResults {
    let start = Instant::now();
    info!(
        scenario = %scenario.name,
        count = config.count,
        seed_start = config.seed_start,
        "Starting batch"
    );

    let work = || -> Vec<Result<RunReport, BatchError>> {
        (0..config.count)
            .into_par_iter()
            .map(|i| {
                let seed = config.seed_start.wrapping_add(u64::from(i));
                let result = run_seeded(scenario, i, seed);
                debug!(run = i, seed, ok = result.is_ok(), "Run complete");
                result
            })
            .collect()
    };

    let results = if config.parallel > 0 {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallel as usize)
            .build()
        {
            Ok(pool) => pool.install(work),
            Err(e) => {
                warn!(error = %e, "Thread pool unavailable, using the global pool");
                work()
            }
        }
    } else {
        work()
    };

    let mut runs = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(report) => runs.push(report),
            Err(error) => errors.push(error),
        }
    }

    let duration_seconds = start.elapsed().as_secs_f64();
    info!(
        runs = runs.len(),
        failed = errors.len(),
        duration_secs = format!("{duration_seconds:.2}"),
        "Batch complete"
    );

    BatchResults {
        scenario: scenario.name.clone(),
        config,
        runs,
        errors,
        duration_seconds,
    }
}

/// Outcome of a determinism check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Final state hash of each run.
    pub hashes: Vec<u64>,
    /// Runs that failed to build.
    pub errors: Vec<String>,
}

impl VerifyReport {
    /// True if every run built and all hashes match.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.errors.is_empty() && self.hashes.windows(2).all(|w| w[0] == w[1])
    }
}

/// Run the same scenario `runs` times in parallel and compare final hashes.
pub fn verify_determinism(scenario: &Scenario, runs: u32) -> VerifyReport {
    let results: Vec<Result<u64, String>> = (0..runs)
        .into_par_iter()
        .map(|_| {
            ScenarioRunner::new(scenario.clone())
                .run()
                .map(|report| report.state_hash)
                .map_err(|e| e.to_string())
        })
        .collect();

    let mut report = VerifyReport {
        hashes: Vec::new(),
        errors: Vec::new(),
    };
    for result in results {
        match result {
            Ok(hash) => report.hashes.push(hash),
            Err(e) => report.errors.push(e),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::PawnPlacement;
    use stage_core::prelude::*;

    fn small() -> Scenario {
        Scenario::courtyard().with_ticks(120)
    }

    #[test]
    fn test_batch_config_builder() {
        let config = BatchConfig::new(500)
            .with_output(PathBuf::from("/tmp/results"))
            .with_seed(12345);

        assert_eq!(config.count, 500);
        assert_eq!(config.seed_start, 12345);
        assert_eq!(config.output_dir, Some(PathBuf::from("/tmp/results")));
    }

    #[test]
    fn test_run_batch_small() {
        let results = run_batch(&small(), BatchConfig::new(6).with_seed(10));

        assert_eq!(results.runs.len(), 6);
        assert!(results.errors.is_empty());
        let seeds: Vec<u64> = results.runs.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, (10..16).collect::<Vec<_>>());
        assert!((results.mean_ticks() - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_run_batch_with_own_pool() {
        let config = BatchConfig {
            parallel: 2,
            ..BatchConfig::new(3)
        };
        let results = run_batch(&small(), config);
        assert_eq!(results.runs.len(), 3);
    }

    #[test]
    fn test_batch_collects_errors() {
        let mut scenario = small();
        scenario.pawns.push(PawnPlacement::new(1, 13, BrainSpec::Idle));
        let results = run_batch(&scenario, BatchConfig::new(2));

        assert!(results.runs.is_empty());
        assert_eq!(results.errors.len(), 2);
        assert!(results.errors[0].message.contains("pawn"));
    }

    #[test]
    fn test_verify_determinism() {
        let report = verify_determinism(&small(), 4);
        assert_eq!(report.hashes.len(), 4);
        assert!(report.is_deterministic());
    }

    #[test]
    fn test_batch_results_save_load() {
        let results = run_batch(&small(), BatchConfig::new(2));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");

        results.save(&path).unwrap();
        let loaded = BatchResults::load(&path).unwrap();
        assert_eq!(loaded.runs, results.runs);
        assert_eq!(loaded.scenario, "Courtyard");
    }
}
