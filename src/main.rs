// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use teamforge::metrics::{DecisionLog, DecisionLogger, NullLog};
use teamforge::prelude::*;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long)]
    verbose: bool,
}

/// Flags that override fields of the loaded config.
#[derive(clap::Args, Clone)]
struct Overrides {
    /// JSON file with a full or partial SimConfig
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short = 'n', long)]
    agents: Option<usize>,
    #[arg(short, long)]
    rounds: Option<u32>,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long)]
    skills: Option<usize>,
    #[arg(long)]
    expel: bool,
    #[arg(long)]
    merge: bool,
    #[arg(long)]
    no_public_goods: bool,
    #[arg(long)]
    single_threaded: bool,
    /// Wall-clock limit per round, in seconds
    #[arg(long)]
    time_limit: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    Run {
        #[command(flatten)]
        overrides: Overrides,
        #[arg(short, long)]
        strategy: Option<String>,
        #[arg(long)]
        seed: Option<u64>,
        /// Write CSV decision logs next to the results
        #[arg(long)]
        log: bool,
    },

    Sweep {
        #[command(flatten)]
        overrides: Overrides,
        #[arg(short, long, default_value = "greedy,random")]
        strategies: String,
        #[arg(long, default_value_t = 8)]
        seeds: u64,
        #[arg(long, default_value_t = 1)]
        first_seed: u64,
    },

    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let program_start = Instant::now();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current iteration");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Run {
            overrides,
            strategy,
            seed,
            log,
        } => {
            let mut config = load_config(&overrides)?;
            if let Some(strategy) = strategy {
                config.strategy_name = strategy;
            }
            if let Some(seed) = seed {
                config.seed = Some(seed);
            }
            run_single_simulation(config, log, cancel).await?;
        }

        Commands::Sweep {
            overrides,
            strategies,
            seeds,
            first_seed,
        } => {
            let config = load_config(&overrides)?;
            run_sweep(config, strategies, first_seed, seeds, cancel, program_start).await?;
        }

        Commands::List => {
            println!("\nAvailable Strategies");

            for strategy in StrategyRegistry::global().list() {
                println!("  - {}", strategy);
            }

            println!("\nUsage: cargo run -- run --strategy <name>");
            println!("Example: cargo run -- run --strategy greedy --agents 24 --expel\n");
        }
    }

    let total_time = program_start.elapsed();
    info!("Total runtime: {:.2}s", total_time.as_secs_f64());

    Ok(())
}

fn load_config(overrides: &Overrides) -> Result<SimConfig> {
    let mut config = match &overrides.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<SimConfig>(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SimConfig::default(),
    };
    if let Some(n) = overrides.agents {
        config.num_agents = n;
    }
    if let Some(rounds) = overrides.rounds {
        config.rounds = rounds;
    }
    if let Some(steps) = overrides.steps {
        config.nsteps = steps;
    }
    if let Some(skills) = overrides.skills {
        config.nskills = skills;
    }
    if let Some(secs) = overrides.time_limit {
        config.time_limit = Some(Duration::from_secs(secs));
    }
    config.expel_agents |= overrides.expel;
    config.groups_can_merge |= overrides.merge;
    if overrides.no_public_goods {
        config.public_goods.enabled = false;
    }
    if overrides.single_threaded {
        config.threaded = false;
    }
    config.validate()?;
    if !StrategyRegistry::global().contains(&config.strategy_name) {
        anyhow::bail!("Unknown strategy: {}", config.strategy_name);
    }
    Ok(config)
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.orange/yellow} {pos}/{len} {msg}")?
            .progress_chars("█▓░"),
    );
    Ok(pb)
}

async fn run_single_simulation(config: SimConfig, log: bool, cancel: CancellationToken) -> Result<()> {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    std::fs::create_dir_all("results")?;

    info!("TeamForge: Single Run");
    info!("Strategy: {}", config.strategy_name);
    info!("Agents: {}, Skills: {}, Rounds: {}", config.num_agents, config.nskills, config.rounds);

    let logger = if log {
        let dir = format!("results/{}_{}_log", config.name, timestamp);
        Some(Arc::new(DecisionLogger::new(&dir)?))
    } else {
        None
    };
    let sink: Arc<dyn DecisionLog> = match &logger {
        Some(l) => l.clone(),
        None => Arc::new(NullLog),
    };

    let pb = progress_bar(u64::from(config.rounds))?;
    let bar = pb.clone();
    let session = tokio::task::spawn_blocking(move || -> Result<SessionReport> {
        let mut sim = Simulation::builder(config).log(sink).cancel_token(cancel).build()?;
        let session = sim.run_with(|round| {
            bar.inc(1);
            bar.set_message(format!("Teams: {} | Mean pay: {:.2}", round.team_count(), round.mean_pay()));
        })?;
        Ok(session)
    })
    .await??;
    pb.finish_with_message("Simulation complete");

    if let Some(logger) = logger {
        logger.close()?;
    }

    let path = format!("results/{}_{}.json", session.name, timestamp);
    std::fs::write(&path, serde_json::to_string_pretty(&session)?)?;
    info!("Results saved to: {}", path);

    round_table(&session);
    if let Some(rate) = session.ultimatum_acceptance() {
        println!("Ultimatum offers accepted: {:.1}%", rate * 100.0);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SweepRow {
    strategy: String,
    runs: usize,
    mean_pay: f64,
    mean_iterations: f64,
    mean_teams: f64,
    converged_pct: f64,
}

impl SweepRow {
    fn from_sessions(strategy: &str, sessions: &[SessionReport]) -> Self {
        let n = sessions.len().max(1) as f64;
        let rounds: usize = sessions.iter().map(|s| s.rounds.len()).sum();
        let converged: usize = sessions.iter().map(|s| s.converged_rounds()).sum();
        Self {
            strategy: strategy.to_string(),
            runs: sessions.len(),
            mean_pay: sessions.iter().map(|s| s.mean_pay()).sum::<f64>() / n,
            mean_iterations: sessions.iter().map(|s| s.mean_iterations()).sum::<f64>() / n,
            mean_teams: sessions.iter().map(|s| s.mean_team_count()).sum::<f64>() / n,
            converged_pct: converged as f64 / rounds.max(1) as f64 * 100.0,
        }
    }
}

async fn run_sweep(
    config: SimConfig,
    strategies: String,
    first_seed: u64,
    seeds: u64,
    cancel: CancellationToken,
    global_start: Instant,
) -> Result<()> {
    let strategy_names: Vec<String> = strategies.split(',').map(|s| s.trim().to_string()).collect();
    for name in &strategy_names {
        if !StrategyRegistry::global().contains(name) {
            anyhow::bail!("Unknown strategy: {}", name);
        }
    }

    info!("TeamForge: Sweep");
    info!("Strategies: {}", strategy_names.join(", "));
    info!("Seeds: {}..{}", first_seed, first_seed + seeds);

    let pb = progress_bar(strategy_names.len() as u64 * seeds)?;
    let bar = pb.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<SweepRow>> {
        let mut rows = Vec::new();
        for name in &strategy_names {
            let sessions = (first_seed..first_seed + seeds)
                .into_par_iter()
                .map(|seed| {
                    let mut cfg = config.clone().with_strategy(name.as_str()).with_seed(seed);
                    cfg.name = format!("{}_{}", name, seed);
                    let mut sim = Simulation::builder(cfg).cancel_token(cancel.clone()).build()?;
                    let session = sim.run()?;
                    bar.inc(1);
                    Ok(session)
                })
                .collect::<Result<Vec<SessionReport>>>()?;
            let elapsed = global_start.elapsed();
            info!("  [{}] {} done", format_time(elapsed), name);
            rows.push(SweepRow::from_sessions(name, &sessions));
        }
        Ok(rows)
    })
    .await??;
    pb.finish_with_message("Sweep complete");

    comparison_table(&rows);

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    std::fs::create_dir_all("results")?;
    let path = format!("results/sweep_{}.json", timestamp);
    std::fs::write(&path, serde_json::to_string_pretty(&rows)?)?;
    info!("Sweep saved to: {}", path);
    Ok(())
}

fn format_time(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn round_table(session: &SessionReport) {
    println!("\n╔═══════════════════════════════════════════════════════════════════╗");
    println!("║                          ROUND SUMMARY                            ║");
    println!("╠═══════╦════════════╦══════════════╦═══════╦═════════╦═════════════╣");
    println!("║ Round ║ Iterations ║ End          ║ Teams ║ Largest ║ Mean pay    ║");
    println!("╠═══════╬════════════╬══════════════╬═══════╬═════════╬═════════════╣");

    for round in &session.rounds {
        println!(
            "║ {:>5} ║ {:>10} ║ {:<12} ║ {:>5} ║ {:>7} ║ {:>11.2} ║",
            round.round,
            round.iterations,
            round.end_reason.to_string(),
            round.team_count(),
            round.largest_team(),
            round.mean_pay(),
        );
    }

    println!("╚═══════╩════════════╩══════════════╩═══════╩═════════╩═════════════╝\n");
}

fn comparison_table(rows: &[SweepRow]) {
    println!("\n╔═══════════════════════════════════════════════════════════════════════╗");
    println!("║                          STRATEGY COMPARISON                          ║");
    println!("╠═══════════════╦═══════╦════════════╦════════════╦═══════╦═════════════╣");
    println!("║ Strategy      ║ Runs  ║ Mean pay   ║ Iterations ║ Teams ║ Converged   ║");
    println!("╠═══════════════╬═══════╬════════════╬════════════╬═══════╬═════════════╣");

    for row in rows {
        println!(
            "║ {:<13} ║ {:>5} ║ {:>10.2} ║ {:>10.2} ║ {:>5.1} ║ {:>10.1}% ║",
            row.strategy, row.runs, row.mean_pay, row.mean_iterations, row.mean_teams, row.converged_pct,
        );
    }

    println!("╚═══════════════╩═══════╩════════════╩════════════╩═══════╩═════════════╝\n");

    if let Some(best) = rows.iter().max_by(|a, b| a.mean_pay.total_cmp(&b.mean_pay)) {
        println!("Top Mean Pay: {} ({:.2})", best.strategy, best.mean_pay);
    }
    if let Some(fastest) = rows.iter().min_by(|a, b| a.mean_iterations.total_cmp(&b.mean_iterations)) {
        println!("Fastest Convergence: {} ({:.2} iterations)", fastest.strategy, fastest.mean_iterations);
    }
}
