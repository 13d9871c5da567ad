//! beamrun: headless runner for checkpointed particle-tracking jobs.
//!
//! Usage:
//!   beamrun demo-input --output job/beamrun_input.bin --turns 1000 --checkpoint-every 100
//!   beamrun run --input job/beamrun_input.bin --checkpoint job/checkpoint.bin
//!   beamrun inspect job/checkpoint.bin
//!
//! `run` exits 0 when the job completed, 75 when it suspended and should be
//! rescheduled, 1 when it failed.

use anyhow::{Context, Result};
use beamrun_core::{
    checkpoint,
    config::RunnerConfig,
    engine::run_job,
    layout::{RunInput, RunInputBuilder, SimulationState},
    manifest::JobManifest,
    reference_kernel::{fodo_ring, kind_label, linspace_ensemble, ReferenceKernel, SUPPORTED_KINDS},
    types::Turn,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "beamrun")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute or resume a job
    Run {
        /// JSON runner config; flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        input: Option<PathBuf>,

        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Final state file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Outcome JSON file
        #[arg(long)]
        outcome: Option<PathBuf>,

        /// SQLite run ledger (in-memory if not given)
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Suspend when this file appears
        #[arg(long)]
        suspend_file: Option<PathBuf>,

        /// Checkpoint and suspend after this many turns
        #[arg(long)]
        max_turns: Option<Turn>,

        /// Attempts per checkpoint save
        #[arg(long)]
        save_retries: Option<u32>,

        /// Remove the checkpoint once the final state is written
        #[arg(long)]
        discard_checkpoint: bool,
    },

    /// Build a demo FODO ring and ensemble and write a job input plus manifest
    DemoInput {
        #[arg(short, long)]
        output: PathBuf,

        /// Manifest path (defaults to the input path with .json)
        #[arg(long)]
        manifest: Option<PathBuf>,

        #[arg(long, default_value_t = 1000)]
        turns: Turn,

        /// 0 disables interval checkpoints
        #[arg(long, default_value_t = 100)]
        checkpoint_every: Turn,

        #[arg(long, default_value_t = 8)]
        cells: usize,

        #[arg(long, default_value_t = 16)]
        particles: usize,

        /// Largest horizontal offset in the ensemble, in metres
        #[arg(long, default_value_t = 0.03)]
        amplitude: f64,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// First element tracked on the first turn
        #[arg(long)]
        ele_start: Option<String>,

        /// Element the last turn stops at
        #[arg(long)]
        ele_stop: Option<String>,

        #[arg(long, default_value = "demo")]
        study: String,

        #[arg(long, default_value = "fodo")]
        job: String,
    },

    /// Summarise a job input, checkpoint or final state file
    Inspect { path: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match cli.command {
        Commands::Run {
            config,
            input,
            checkpoint,
            output,
            outcome,
            ledger,
            suspend_file,
            max_turns,
            save_retries,
            discard_checkpoint,
        } => {
            let mut cfg = match config {
                Some(path) => RunnerConfig::load(&path)?,
                None => RunnerConfig::default(),
            };
            if let Some(p) = input        { cfg.input_path = p; }
            if let Some(p) = checkpoint   { cfg.checkpoint_path = p; }
            if let Some(p) = output       { cfg.output_path = p; }
            if let Some(p) = outcome      { cfg.outcome_path = p; }
            if let Some(p) = ledger       { cfg.ledger_path = Some(p); }
            if let Some(p) = suspend_file { cfg.suspend_file = Some(p); }
            if let Some(n) = max_turns    { cfg.max_turns_per_invocation = Some(n); }
            if let Some(n) = save_retries { cfg.save_retries = n; }
            if discard_checkpoint         { cfg.discard_checkpoint_on_completion = true; }

            log::debug!("Runner config: {cfg:?}");
            let result = run_job(&cfg, Box::new(ReferenceKernel::new()));
            println!("{}", serde_json::to_string_pretty(&result)?);
            std::process::exit(result.exit_code);
        }
        Commands::DemoInput {
            output,
            manifest,
            turns,
            checkpoint_every,
            cells,
            particles,
            amplitude,
            seed,
            ele_start,
            ele_stop,
            study,
            job,
        } => {
            let mut builder = RunInputBuilder::new(
                fodo_ring(cells, seed),
                linspace_ensemble(particles, amplitude),
                turns,
            )
            .checkpoint_every(checkpoint_every)
            .supported_kinds(&SUPPORTED_KINDS);
            if let Some(name) = ele_start {
                builder = builder.ele_start_at(&name)?;
            }
            if let Some(name) = ele_stop {
                builder = builder.ele_stop_at(&name)?;
            }
            let input = builder.build()?;
            let job_manifest = JobManifest::describe(&study, &job, &input)?;

            if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
            input.write_to(&output)?;
            let manifest_path = manifest.unwrap_or_else(|| output.with_extension("json"));
            job_manifest.write(&manifest_path)?;

            println!("Wrote {} ({})", output.display(), job_manifest.run_id);
            println!("  manifest:   {}", manifest_path.display());
            println!("  elements:   {}", input.num_elements());
            println!("  particles:  {}", job_manifest.num_particles);
            println!("  turns:      {}", input.num_turns());
            Ok(())
        }
        Commands::Inspect { path } => inspect(&path),
    }
}

#[derive(Serialize)]
struct StateSummary {
    current_turn:     Turn,
    capacity:         usize,
    alive:            usize,
    lost:             usize,
    invalid:          usize,
    monitors:         usize,
    monitor_samples:  Vec<usize>,
}

fn summarize_state(state: &SimulationState) -> StateSummary {
    let counts = state.status_counts();
    let monitors = state.monitors();
    StateSummary {
        current_turn:    state.current_turn(),
        capacity:        state.capacity(),
        alive:           counts.alive,
        lost:            counts.lost,
        invalid:         counts.invalid,
        monitors:        monitors.count(),
        monitor_samples: (0..monitors.count()).map(|k| monitors.recorded(k).len()).collect(),
    }
}

/// Figure out what kind of file `path` is and print a JSON summary.
fn inspect(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;

    let summary = if let Ok(input) = RunInput::decode(&bytes) {
        let kinds: std::collections::BTreeMap<String, usize> = input
            .lattice()
            .kind_counts()
            .into_iter()
            .map(|(kind, n)| (kind_label(kind), n))
            .collect();
        serde_json::json!({
            "file":             "run_input",
            "run_id":           input.lineage_id(),
            "num_turns":        input.num_turns(),
            "num_elements":     input.num_elements(),
            "ele_start":        input.ele_start(),
            "ele_stop":         input.ele_stop(),
            "checkpoint_every": input.checkpoint_every(),
            "element_kinds":    kinds,
            "initial_state":    summarize_state(input.initial_state()),
        })
    } else if let Ok(state) = SimulationState::decode(&bytes) {
        serde_json::json!({ "file": "state", "state": summarize_state(&state) })
    } else {
        let state = checkpoint::unframe(path, &bytes)?;
        serde_json::json!({ "file": "checkpoint", "state": summarize_state(&state) })
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
