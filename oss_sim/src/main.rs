//! OSS orchestrator CLI
//!
//! Launches `worker` processes against a shared simulated clock and stops
//! them all on completion, Ctrl-C, SIGTERM or the real-time deadline.

use clap::Parser;
use nix::unistd::getpid;
use oss_core::{Orchestrator, OrchestratorConfig, RunReport};
use oss_env::{arm_deadline, disarm_deadline, install_shutdown_handlers, OwnedClockRegion, UnixHost};
use oss_sim::cli::{default_worker_path, init_tracing, parse_key, parse_or_exit, CliError};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// Simulated-clock process orchestrator
#[derive(Parser, Debug)]
#[command(name = "oss")]
#[command(about = "Launch worker processes paced by a simulated clock", long_about = None)]
struct Args {
    /// Total number of workers to launch
    #[arg(short = 'n', long = "proc", value_parser = clap::value_parser!(u32).range(1..))]
    proc_count: u32,

    /// Maximum workers running at once
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    simul: u32,

    /// Upper bound of a worker's simulated lifetime, in seconds
    #[arg(short = 't', long = "time-limit", value_parser = clap::value_parser!(u32).range(1..))]
    time_limit: u32,

    /// Simulated milliseconds between launches
    #[arg(short, long)]
    interval: u64,

    /// Seed for worker lifetimes (0 = random from time)
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Real-time limit for the whole run, in seconds
    #[arg(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..))]
    deadline: u64,

    /// Shared memory key of the clock (decimal or 0x hex)
    #[arg(long, default_value = "0x1234", value_parser = parse_key)]
    key: i32,

    /// Worker executable (default: `worker` next to this binary)
    #[arg(long)]
    worker: Option<PathBuf>,

    /// JSON run report on stdout
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: &Args) -> Result<RunReport, CliError> {
    let shutdown = install_shutdown_handlers()?;

    let worker = match &args.worker {
        Some(path) => path.clone(),
        None => default_worker_path()?,
    };
    if !worker.is_file() {
        return Err(CliError::WorkerMissing(worker));
    }
    let host = UnixHost::new(worker, args.key)?;

    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };
    let config = OrchestratorConfig {
        total_workers: args.proc_count,
        concurrency: args.simul,
        max_lifetime_secs: args.time_limit,
        interval_ms: args.interval,
        deadline: Duration::from_secs(args.deadline),
        seed,
        ..Default::default()
    };

    let clock = OwnedClockRegion::create(args.key)?;
    info!("Clock region 0x{:x} created (seed={})", args.key, seed);

    let pid = getpid();
    let mut orchestrator = Orchestrator::new(config.clone(), host, clock, shutdown)?.with_snapshot_hook(
        move |now, table| {
            println!("OSS PID:{} SysClockS: {} SysclockNano: {}", pid, now.seconds, now.nanoseconds);
            print!("{}", table);
        },
    );

    // Backstop for a loop that stops polling the deadline.
    arm_deadline(config.deadline);
    let report = orchestrator.run();
    disarm_deadline();
    Ok(report?)
}

fn print_report(report: &RunReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to encode run report: {}", e),
        }
        return;
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("Stopped: {}", report.reason);
    info!(
        "Workers: {} launched, {} reaped, {} failed launches",
        report.launched, report.reaped, report.spawn_failures
    );
    info!(
        "Clock: {} after {} iterations (increment {}ns)",
        report.final_clock, report.iterations, report.final_increment
    );
    if report.teardown.terminated > 0 {
        info!(
            "Teardown: {} terminated, {} killed, {} left over",
            report.teardown.terminated, report.teardown.killed, report.teardown.leftover
        );
    }
}

fn main() {
    let args: Args = parse_or_exit();
    init_tracing(args.verbose);

    match run(&args) {
        Ok(report) => print_report(&report, args.json),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
