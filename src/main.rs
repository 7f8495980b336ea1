use std::io;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::Rng;
use tracing_subscriber::{fmt, EnvFilter};

use tempo::models::machine::{run_policy, Policy};
use tempo::models::transport::{run_transport, TransportConfig};
use tempo::models::vehicle::{run_vehicle, VehicleConfig};
use tempo::models::{intro, seeded, SharedRng};
use tempo::{EnvConfig, Environment, Resume, SimResult, Step, Until};

#[derive(Parser)]
#[command(name = "tempo", version, about = "Process-oriented discrete-event simulation demos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// One process awaiting timeout(1, value = 42)
    Intro,
    /// The same, written as a struct with a configurable delay
    Class {
        #[arg(long, default_value_t = 10.0)]
        delay: f64,
    },
    /// A vehicle driving and refuelling until the horizon
    Vehicle(VehicleArgs),
    /// A machine working through a batch of products
    Machine(MachineArgs),
    /// Trucks shuttling between source and demand nodes
    Transport(TransportArgs),
    /// Run a seeded workload twice and compare the event traces
    Replay(ReplayArgs),
}

#[derive(Args, Debug, Clone)]
struct VehicleArgs {
    #[arg(long, default_value_t = 24.0)]
    until: f64,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Args, Debug, Clone)]
struct MachineArgs {
    /// random, fifo or lifo; every policy when omitted
    #[arg(short, long)]
    policy: Option<Policy>,
    #[arg(long, default_value_t = 10)]
    products: u32,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// One demand node, uniform handling, blocking router
    Basic,
    /// Scattered nodes, load/unload times, concurrent router, dated logs
    Scheduled,
}

#[derive(Args, Debug, Clone)]
struct TransportArgs {
    #[arg(long, value_enum, default_value_t = Scenario::Scheduled)]
    mode: Scenario,
    /// Number of vehicles
    #[arg(short, long, default_value_t = 1)]
    vehicles: usize,
    /// Number of demand nodes (scheduled mode)
    #[arg(short, long, default_value_t = 5)]
    nodes: usize,
    /// Simulated time; defaults to the scenario's own horizon
    #[arg(long)]
    simtime: Option<f64>,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Args, Debug, Clone)]
struct ReplayArgs {
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Number of worker processes
    #[arg(long, default_value_t = 5)]
    workers: usize,
    /// Print the first run's trace
    #[arg(long)]
    export: bool,
}

fn init_logging() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Commands::Intro => {
            let (now, value) = intro::run_intro()?;
            println!("now={}, value={}", now.as_f64(), value);
        }
        Commands::Class { delay } => {
            let (now, value) = intro::run_delayed(delay)?;
            println!("now={}, value={}", now.as_f64(), value);
        }
        Commands::Vehicle(args) => {
            let log = run_vehicle(VehicleConfig::default(), seeded(args.seed), args.until)?;
            println!("{} drives, {} refuels before T={}", log.legs.len(), log.refuels, args.until);
        }
        Commands::Machine(args) => {
            let policies = match args.policy {
                Some(policy) => vec![policy],
                None => Policy::ALL.to_vec(),
            };
            for policy in policies {
                println!("Processing {} policy", policy.to_string().to_uppercase());
                let report = run_policy(policy, args.products, seeded(args.seed))?;
                println!("  order: {:?}", report.order());
                println!("  finished at {}", report.finished_at);
            }
        }
        Commands::Transport(args) => run_transport_demo(&args)?,
        Commands::Replay(args) => run_replay(&args)?,
    }
    Ok(())
}

fn run_transport_demo(args: &TransportArgs) -> Result<()> {
    let mut config = match args.mode {
        Scenario::Basic => TransportConfig::basic(),
        Scenario::Scheduled => TransportConfig::scheduled(args.vehicles, args.nodes),
    };
    config.trucks = args.vehicles;
    if let Some(simtime) = args.simtime {
        config.horizon = simtime;
    }
    let report = run_transport(config, seeded(args.seed)).context("transport model failed")?;

    for node in &report.nodes {
        println!(
            "  {:<10} ({:>6.2}, {:>6.2})  served {}",
            node.label, node.x, node.y, node.served
        );
    }
    println!("Total unloaded vehicles in demand nodes: {}", report.unloads());
    println!("Total loaded vehicles in source node: {}", report.loads());
    if let Some(end) = report.end_date {
        println!("Simulation ended at {end}");
    }
    Ok(())
}

// ── Replay check ──────────────────────────────────────────────────────

/// A worker alternating random waits with zero-delay yields.
fn worker(rng: SharedRng, rounds: u32) -> impl FnMut(&mut Environment, Resume) -> SimResult<Step> {
    let mut done = 0;
    move |env: &mut Environment, _input: Resume| {
        if done == rounds {
            return Ok(Step::ret(done as i64));
        }
        done += 1;
        let delay = if done % 2 == 0 {
            0.0
        } else {
            rng.borrow_mut().gen_range(0.0..5.0)
        };
        Ok(Step::wait(env.timeout(delay)?))
    }
}

fn replay_once(args: &ReplayArgs) -> Result<Environment> {
    let mut env = Environment::with_config(EnvConfig::new().with_trace());
    let rng = seeded(args.seed);
    for i in 0..args.workers {
        env.process_named(format!("worker-{i}"), worker(rng.clone(), 6))?;
    }
    env.run(Until::Exhausted)?;
    Ok(env)
}

fn run_replay(args: &ReplayArgs) -> Result<()> {
    let first = replay_once(args)?;
    let second = replay_once(args)?;
    let (Some(a), Some(b)) = (first.trace(), second.trace()) else {
        bail!("trace recording was not enabled");
    };

    println!("  Run 1: {} events, hash {:016x}", a.len(), a.hash());
    println!("  Run 2: {} events, hash {:016x}", b.len(), b.hash());
    if args.export {
        a.export(&mut io::stdout().lock())?;
    }
    if a.hash() != b.hash() {
        bail!("trace mismatch between identical runs");
    }
    println!("  ✓ Traces are identical");
    Ok(())
}
