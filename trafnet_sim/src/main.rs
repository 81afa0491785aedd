//! trafnet Simulator CLI
//!
//! Run deterministic traffic scenarios against the simulation harness.

use clap::Parser;
use trafnet_core::TrafficConfig;
use trafnet_env::TokioContext;
use trafnet_sim::scenarios::ScenarioId;
use trafnet_sim::{ScenarioResult, ScenarioRunner, SimError, SimMap, SimResult};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// trafnet deterministic traffic simulation CLI
#[derive(Parser, Debug)]
#[command(name = "trafnet-sim")]
#[command(about = "Run deterministic traffic scenarios", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Population for free-running scenarios
    #[arg(short, long, default_value = "40")]
    agents: usize,

    /// Scenario to run (straight_cruise, stop_sign_fifo, ..., city_stress, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Maximum simulation duration in seconds
    #[arg(short, long, default_value = "60")]
    duration: f64,

    /// Traffic config JSON (city_stress only)
    #[arg(long)]
    config: Option<String>,

    /// Road network JSON (city_stress only)
    #[arg(long)]
    network: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export simulation frames to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Pace ticks against the wall clock
    #[arg(long)]
    realtime: bool,
}

fn build_runner(args: &Args, seed: u64) -> SimResult<ScenarioRunner> {
    let mut runner = ScenarioRunner::new(seed, args.agents).with_duration(args.duration);
    if let Some(path) = &args.config {
        runner = runner.with_traffic(TrafficConfig::from_json_file(path)?);
    }
    if let Some(path) = &args.network {
        runner = runner.with_map(SimMap::from_json_file(path)?);
    }
    Ok(runner)
}

fn run_all(args: &Args, scenarios: &[ScenarioId], base_seed: u64) -> SimResult<Vec<ScenarioResult>> {
    // Only built when pacing is requested
    let runtime = if args.realtime {
        Some(
            tokio::runtime::Builder::new_multi_thread()
                .enable_time()
                .build()?,
        )
    } else {
        None
    };
    let pacer = TokioContext::new();

    let mut results = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = build_runner(args, seed)?;

        for scenario in scenarios {
            let result = match &runtime {
                Some(rt) => rt.block_on(runner.run_paced(*scenario, &pacer)),
                None => runner.run(*scenario),
            };

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
            results.push(result);
        }
    }
    Ok(results)
}

fn run_export(args: &Args, scenario: ScenarioId, seed: u64, path: &str) -> SimResult<ScenarioResult> {
    info!("Running with export to: {}", path);
    let runner = build_runner(args, seed)?;
    // Three frames per simulated second at the default 30 Hz
    let (result, export) = runner.run_recorded(scenario, 10);
    export.write_to_file(path)?;
    info!("Exported {} frames to {}", export.frames.len(), path);
    Ok(result)
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("trafnet simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(id) => vec![id],
            Err(e) => {
                error!("{}", e);
                let names: Vec<_> = ScenarioId::all().iter().map(|s| s.name()).collect();
                error!("Available scenarios: {}, all", names.join(", "));
                std::process::exit(1);
            }
        }
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    // Handle --export mode
    if let Some(path) = &args.export {
        if scenarios.len() > 1 {
            error!("--export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }
        match run_export(&args, scenarios[0], base_seed, path) {
            Ok(result) if result.passed => {
                info!("✓ {} (seed={}) PASSED - exported to {}", scenarios[0].name(), base_seed, path);
            }
            Ok(result) => {
                error!(
                    "✗ {} FAILED: {}",
                    scenarios[0].name(),
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
                std::process::exit(1);
            }
            Err(e) => {
                error!("Export run failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let all_results = match run_all(&args, &scenarios, base_seed) {
        Ok(results) => results,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "agents": r.final_agent_count,
                    "spawned": r.metrics.spawned,
                    "respawned": r.metrics.respawned,
                    "accidents": r.metrics.accidents,
                    "summary": r.summary,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("{}", SimError::from(e)),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
