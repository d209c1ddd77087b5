use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;

use dcsim::core::common::Resources;
use dcsim::core::config::SimulationConfig;
use dcsim::simulation::DataCenterSimulation;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
/// Runs a trace-driven data-center simulation
struct Args {
    /// Path to YAML file with the simulation configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Placement strategy override, e.g. "Papso[w1=0.7]"
    #[arg(short, long)]
    strategy: Option<String>,

    /// Path of the binary statistics output, overriding the config
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct RunSummary {
    strategy: String,
    final_time: f64,
    events_processed: u64,
    machines: usize,
    turned_on_machines: usize,
    resource_utilizations: Resources,
    total_power: f64,
    average_power: f64,
    sla_violations: u64,
    migrations: u64,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut config = match SimulationConfig::from_file(&args.config.to_string_lossy()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    if let Some(output) = args.output {
        config.statistics_output = Some(output.to_string_lossy().into_owned());
    }

    let mut sim = match DataCenterSimulation::new(config) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("failed to build simulation: {}", e);
            return ExitCode::FAILURE;
        }
    };

    sim.start();
    sim.wait_until_idle();
    sim.stop();

    for failure in sim.trace_failures() {
        eprintln!("trace error: {}", failure);
    }
    if let Some(error) = sim.take_fatal_error() {
        eprintln!("simulation aborted: {}", error);
        return ExitCode::FAILURE;
    }

    let summary = RunSummary {
        strategy: sim.strategy_name(),
        final_time: sim.current_time(),
        events_processed: sim.processed_event_count(),
        machines: sim.machine_count(),
        turned_on_machines: sim.get_turned_on_machine_count(),
        resource_utilizations: sim.get_resource_utilizations(),
        total_power: sim.get_total_power_consumption(),
        average_power: sim.get_average_power_consumption(),
        sla_violations: sim.get_number_of_sla_violations(),
        migrations: sim.get_migration_count(),
    };
    println!("{}", serde_json::to_string_pretty(&summary).unwrap());
    ExitCode::SUCCESS
}
