//! Command-line runner: load a scene, simulate it, print the statistics as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::{LevelFilter, info};
use std::path::PathBuf;

use ncs_radio_simulator::config::RunConfig;
use ncs_radio_simulator::simulation::{Scenario, Scene, SimTimeLogger};

#[derive(Parser)]
#[command(name = "ncs-radio-simulator")]
#[command(about = "Simulates the network stack of a wireless networked control system")]
struct Args {
    /// Scene file (JSON)
    scene: PathBuf,

    /// Run settings (TOML). Defaults to config.toml next to the scene, if present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the seed of the scene
    #[arg(long)]
    seed: Option<u64>,

    /// Override the number of rounds
    #[arg(long)]
    rounds: Option<u32>,

    /// Log level of the simulator's own records
    #[arg(long)]
    log_level: Option<LevelFilter>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| {
        let candidate = RunConfig::config_path_from_scene(&args.scene);
        candidate.exists().then_some(candidate)
    });
    let mut config = match &config_path {
        Some(path) => RunConfig::load(path).with_context(|| format!("loading run settings from {}", path.display()))?,
        None => RunConfig::default(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.rounds.is_some() {
        config.rounds = args.rounds;
    }

    // Logging setup
    let crate_level = match args.log_level {
        Some(level) => level,
        None => config.log_level()?.unwrap_or(LevelFilter::Debug),
    };
    let logger = Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("ncs_radio_simulator"), crate_level)
        .build();
    SimTimeLogger::new(logger).install().context("installing the logger")?;

    info!("Starting up");

    let data = std::fs::read_to_string(&args.scene).with_context(|| format!("reading scene {}", args.scene.display()))?;
    let mut scene = Scene::from_json(&data).with_context(|| format!("parsing scene {}", args.scene.display()))?;
    config.apply(&mut scene).context("applying run settings")?;

    let mut scenario = Scenario::new(scene).context("building the scenario")?;
    let stats = scenario.run().context("running the scenario")?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
