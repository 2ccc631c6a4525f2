use std::error::Error;
use std::io::Write;
use std::path::Path;

use clap::Parser;
use env_logger::Builder;
use log::error;

use vmrepair::core::config::{Algorithm, SimulationConfig};
use vmrepair::core::planner::EvacuationStrategy;
use vmrepair::simulation::ClusterSimulation;

#[derive(Parser, Debug)]
#[clap(about, long_about = None)]
struct Args {
    /// Simulation config (YAML), defaults are used when omitted
    #[clap(short, long)]
    config: Option<String>,

    /// Repair algorithm: centralized or decentralized
    #[clap(short, long)]
    algorithm: Option<String>,

    /// Evacuation strategy of the planner: all-at-once or incremental
    #[clap(short, long)]
    evacuation: Option<String>,

    /// Random seed
    #[clap(short, long)]
    seed: Option<u64>,

    /// File for the JSON-lines trace of the run
    #[clap(short, long)]
    trace_file: Option<String>,
}

fn parse_algorithm(value: &str) -> Result<Algorithm, String> {
    match value.to_lowercase().as_str() {
        "centralized" => Ok(Algorithm::Centralized),
        "decentralized" => Ok(Algorithm::Decentralized),
        _ => Err(format!("unknown algorithm: {}", value)),
    }
}

fn parse_evacuation(value: &str) -> Result<EvacuationStrategy, String> {
    match value.to_lowercase().as_str() {
        "all-at-once" | "allatonce" => Ok(EvacuationStrategy::AllAtOnce),
        "incremental" => Ok(EvacuationStrategy::Incremental),
        _ => Err(format!("unknown evacuation strategy: {}", value)),
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => SimulationConfig::from_file(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(algorithm) = &args.algorithm {
        config.algorithm = parse_algorithm(algorithm)?;
    }
    if let Some(evacuation) = &args.evacuation {
        config.planner.evacuation = parse_evacuation(evacuation)?;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let mut cluster_sim = ClusterSimulation::from_config(config)?;
    if let Some(path) = &args.trace_file {
        cluster_sim.set_trace_file(Path::new(path))?;
    }
    let stats = cluster_sim.run();

    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("mean overloaded hosts: {:.3}", stats.mean_overloaded_hosts());
    Ok(())
}

fn main() {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    if let Err(e) = run(Args::parse()) {
        error!("{}", e);
        std::process::exit(1);
    }
}
