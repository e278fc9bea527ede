use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use dungeon_core::{run_simulation, SimulationConfig, SimulationReport};
use dungeon_ledger::{LedgerOptions, LocalLedger};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Drive dungeon encounter simulations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation against the in-process ledger and print the summary.
    Run(RunArgs),
    /// Pretty-print a stored report.
    Report(ReportArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    rounds: Option<u32>,
    #[arg(long)]
    players: Option<u32>,
    #[arg(long)]
    seed: Option<u64>,
    /// Encounter reads before the local oracle answers a round.
    #[arg(long, default_value_t = 2)]
    latency: u32,
    /// Where to write the JSON report (overrides the config's report path).
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    id: Option<String>,
}

#[derive(Args)]
struct ReportArgs {
    #[arg(long)]
    input: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init()
        .ok();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(args),
        Commands::Report(args) => handle_report(args),
    }
}

fn handle_run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SimulationConfig::from_path(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SimulationConfig::default(),
    };
    if let Some(rounds) = args.rounds {
        config.simulation.rounds = Some(rounds);
    }
    if let Some(players) = args.players {
        config.simulation.players = Some(players);
    }
    if let Some(seed) = args.seed {
        config.simulation.seed = Some(seed);
    }

    let mut options = LedgerOptions::default().with_latency(args.latency);
    options.funder = config.funding.funder();
    if let Some(seed) = config.simulation.seed {
        options = options.with_seed(seed);
    }
    let ledger = LocalLedger::new(options);

    let run_id = args
        .id
        .unwrap_or_else(|| format!("sim-{}", Utc::now().format("%Y%m%dT%H%M%S")));
    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let report = runtime
        .block_on(run_simulation(&ledger, &config, run_id))
        .context("simulation aborted")?;
    print!("{}", report.render_summary());

    let out = args
        .out
        .or_else(|| config.report.as_ref().map(|r| r.path.clone()));
    if let Some(path) = out {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(target: "dungeon_cli", path = %path.display(), "report written");
    }
    Ok(())
}

fn handle_report(args: ReportArgs) -> Result<()> {
    let data = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let report: SimulationReport = serde_json::from_str(&data)?;
    println!(
        "Report {} ({}) -> {} rounds, {} encounters, {} rolls",
        report.id,
        report.timestamp,
        report.rounds,
        report.encounters.len(),
        report.total_rolls
    );
    print!("{}", report.render_summary());
    Ok(())
}
