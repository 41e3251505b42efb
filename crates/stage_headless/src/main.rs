//! Headless stage runner.
//!
//! Runs scenarios without graphics for CI, batch seeds and determinism checks.
//!
//! # Usage
//!
//! ```bash
//! # Run the built-in courtyard scenario
//! cargo run -p stage_headless -- run
//!
//! # Run a scenario file for 300 ticks, printing the JSON report
//! cargo run -p stage_headless -- run --scenario haul.ron --ticks 300 --json
//!
//! # Run 200 seeds on 8 threads
//! cargo run -p stage_headless -- batch --scenario haul.ron --count 200 --parallel 8
//!
//! # Verify determinism
//! cargo run -p stage_headless -- verify --scenario haul.ron --runs 5
//! ```
//!
//! Reports go to stdout, logs to stderr.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stage_headless::{run_batch, verify_determinism, BatchConfig, Scenario, ScenarioRunner};

#[derive(Parser)]
#[command(name = "stage_headless")]
#[command(about = "Headless stage runner for CI and determinism checks")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single scenario
    Run {
        /// Scenario file (defaults to the built-in courtyard)
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Override the scenario tick count
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Override the scenario seed
        #[arg(long)]
        seed: Option<u64>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a scenario under consecutive seeds
    Batch {
        /// Scenario file (defaults to the built-in courtyard)
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Number of runs
        #[arg(short, long, default_value = "16")]
        count: u32,

        /// Seed of the first run
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Worker threads (0 = auto)
        #[arg(short, long, default_value = "0")]
        parallel: u32,

        /// Output directory for batch_results.json
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the same scenario several times and compare state hashes
    Verify {
        /// Scenario file (defaults to the built-in courtyard)
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Override the scenario seed
        #[arg(long)]
        seed: Option<u64>,

        /// Number of runs
        #[arg(short, long, default_value = "5")]
        runs: u32,
    },
}

fn main() {
    let cli = Cli::parse();

    // stdout carries reports
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    match cli.command {
        Some(Commands::Run {
            scenario,
            ticks,
            seed,
            json,
        }) => cmd_run(scenario, ticks, seed, json),
        Some(Commands::Batch {
            scenario,
            count,
            seed,
            parallel,
            output,
        }) => cmd_batch(scenario, count, seed, parallel, output),
        Some(Commands::Verify {
            scenario,
            seed,
            runs,
        }) => cmd_verify(scenario, seed, runs),
        None => cmd_run(None, None, None, false),
    }
}

fn load_scenario(path: Option<PathBuf>, seed: Option<u64>) -> Scenario {
    let scenario = match path {
        Some(path) => match Scenario::load(&path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Failed to load scenario: {e}");
                process::exit(1);
            }
        },
        None => Scenario::courtyard(),
    };
    match seed {
        Some(seed) => scenario.with_seed(seed),
        None => scenario,
    }
}

/// Run a single scenario
fn cmd_run(scenario: Option<PathBuf>, ticks: Option<u64>, seed: Option<u64>, json: bool) {
    let mut scenario = load_scenario(scenario, seed);
    if let Some(ticks) = ticks {
        scenario = scenario.with_ticks(ticks);
    }

    let report = match ScenarioRunner::new(scenario).run() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("FAIL: {e}");
            process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Failed to encode report: {e}");
                process::exit(1);
            }
        }
        return;
    }

    println!("Scenario: {}", report.scenario);
    println!("Ticks: {} (settled: {})", report.ticks, report.settled);
    println!("State hash: {:016x}", report.state_hash);
    println!("Pawns:");
    for pawn in &report.pawns {
        println!(
            "  #{:<3} at ({:>3}, {:>3})  hp {:>3}  {}",
            pawn.id, pawn.square.0, pawn.square.1, pawn.health, pawn.state
        );
    }
    println!("Events:");
    for (tag, count) in &report.event_counts {
        println!("  {tag:<18} {count}");
    }
}

/// Run a scenario under consecutive seeds
fn cmd_batch(
    scenario: Option<PathBuf>,
    count: u32,
    seed: u64,
    parallel: u32,
    output: Option<PathBuf>,
) {
    let scenario = load_scenario(scenario, None);
    let config = BatchConfig {
        count,
        seed_start: seed,
        parallel,
        output_dir: output.clone(),
    };
    let results = run_batch(&scenario, config);

    if let Some(dir) = output {
        let path = dir.join("batch_results.json");
        if let Err(e) = results.save(&path) {
            eprintln!("FATAL: Failed to save results to {}: {e}", path.display());
            process::exit(1);
        }
        eprintln!("Results saved to: {}", path.display());
    }

    eprintln!("\n{}", "=".repeat(50));
    eprintln!("BATCH COMPLETE");
    eprintln!("{}", "=".repeat(50));
    eprintln!("Runs: {}", results.runs.len());
    eprintln!("Duration: {:.2}s", results.duration_seconds);
    eprintln!("Mean ticks: {:.1}", results.mean_ticks());
    eprintln!("Settled: {:.1}%", results.settled_rate() * 100.0);
    if !results.errors.is_empty() {
        eprintln!("\nFAILED RUNS: {}", results.errors.len());
        for error in results.errors.iter().take(10) {
            eprintln!(
                "  Run {} (seed {}): {}",
                error.run_index, error.seed, error.message
            );
        }
        process::exit(1);
    }
}

/// Verify determinism
fn cmd_verify(scenario: Option<PathBuf>, seed: Option<u64>, runs: u32) {
    let scenario = load_scenario(scenario, seed);
    tracing::info!(scenario = %scenario.name, runs, "Verifying determinism");

    let report = verify_determinism(&scenario, runs);
    for error in &report.errors {
        eprintln!("Run failed: {error}");
    }
    if report.is_deterministic() {
        eprintln!("PASS: All {runs} runs produced identical results");
        if let Some(hash) = report.hashes.first() {
            eprintln!("  State hash: {hash:016x}");
        }
    } else {
        eprintln!("FAIL: Non-determinism detected!");
        for (i, hash) in report.hashes.iter().enumerate() {
            eprintln!("  Run {i}: {hash:016x}");
        }
        process::exit(1);
    }
}
