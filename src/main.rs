use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use evocpu::config::HardwareConfig;
use evocpu::error::{Error, Result};
use evocpu::metrics::{Snapshot, opcode_histogram};
use evocpu::population::{Population, PopulationConfig, ancestor_genome};

#[derive(Parser)]
#[command(name = "evocpu", about = "Self-replicating programs on a virtual CPU")]
struct Cli {
    /// Random seed for reproducibility.
    #[arg(long)]
    seed: u64,

    /// Number of updates to run.
    #[arg(long)]
    updates: u64,

    /// Number of organism slots.
    #[arg(long, default_value_t = 1 << 10)]
    population_size: usize,

    /// Cycles each organism runs per update.
    #[arg(long, default_value_t = 30)]
    cycles_per_update: usize,

    /// Hardware configuration file (TOML).
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Drop head writes into another organism's memory (true/false).
    /// Required unless the configuration file sets it.
    #[arg(long)]
    write_protect: Option<bool>,

    /// Ancestor genome as instruction symbols; the built-in replicator if absent.
    #[arg(long)]
    ancestor: Option<String>,

    /// Compute and output metrics every N updates.
    #[arg(long, default_value_t = 1)]
    metrics_interval: u64,

    /// Run in benchmark mode: suppress CSV, print throughput stats.
    #[arg(long)]
    benchmark: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn hardware_config(cli: &Cli) -> Result<HardwareConfig> {
    let mut config = match (&cli.config, cli.write_protect) {
        (Some(path), _) => HardwareConfig::load(path)?,
        (None, Some(write_protect)) => HardwareConfig::new(write_protect),
        (None, None) => {
            return Err(Error::InvalidConfig(
                "--write-protect is required without a configuration file".into(),
            ));
        }
    };
    if let Some(write_protect) = cli.write_protect {
        config.write_protect = write_protect;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    if cli.metrics_interval == 0 {
        return Err(Error::InvalidConfig("--metrics-interval must be positive".into()));
    }
    let hw_config = hardware_config(cli)?;
    // An unknown instruction name stops here, before any organism runs.
    let inst_set = Arc::new(hw_config.inst_set()?);
    let ancestor = match &cli.ancestor {
        Some(text) => inst_set.parse_genome(text)?,
        None => ancestor_genome(&inst_set)?,
    };

    let config = PopulationConfig {
        capacity: cli.population_size,
        cycles_per_update: cli.cycles_per_update,
    };
    let mut pop = Population::new(config, Arc::new(hw_config), inst_set.clone(), &ancestor, cli.seed)?;
    info!(
        seed = cli.seed,
        capacity = cli.population_size,
        instructions = inst_set.len(),
        costs = inst_set.has_costs(),
        ancestor = %inst_set.genome_string(&ancestor),
        "population seeded"
    );
    debug!("ancestor listing:\n{}", inst_set.disassemble(&ancestor));

    if cli.benchmark {
        run_benchmark(&mut pop, cli.updates);
        return Ok(());
    }

    println!("{}", Snapshot::CSV_HEADER);
    println!("{}", Snapshot::of(&pop).csv_row());

    let mut births = 0;
    for update in 1..=cli.updates {
        let report = pop.update();
        births += report.births;

        if update % cli.metrics_interval == 0 {
            println!("{}", Snapshot::of(&pop).csv_row());
        }

        if update % 100 == 0 || update == cli.updates {
            info!(update, organisms = pop.occupied(), births, infections = report.infections, "progress");
        }
    }

    let hist = opcode_histogram(&pop.genomes(), &inst_set);
    let mut ranked: Vec<(usize, usize)> = hist.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    for (op, count) in ranked.into_iter().take(5).filter(|&(_, count)| count > 0) {
        let name = inst_set.entries()[op].opcode.name();
        info!(instruction = name, count, "most common");
    }
    Ok(())
}

fn run_benchmark(pop: &mut Population, updates: u64) {
    let start = std::time::Instant::now();
    for _ in 0..updates {
        pop.update();
    }
    let elapsed = start.elapsed();

    let cycles: u64 = pop.iter().map(|o| o.hardware.stats().cycles).sum();
    let updates_per_sec = updates as f64 / elapsed.as_secs_f64();

    eprintln!("Benchmark results:");
    eprintln!("  Updates:           {updates}");
    eprintln!("  Organisms:         {}", pop.occupied());
    eprintln!("  Surviving cycles:  {cycles}");
    eprintln!("  Elapsed:           {elapsed:.2?}");
    eprintln!("  Updates/sec:       {updates_per_sec:.1}");
}
