//! OSS worker
//!
//! Attaches the shared clock read-only, waits until its simulated lifetime
//! has passed and reports its progress once per simulated second. SIGINT and
//! SIGTERM end the wait early; the clock is detached either way.

use clap::Parser;
use nix::unistd::{getpid, getppid};
use oss_core::{WorkerPlan, WorkerStatus};
use oss_env::{install_shutdown_handlers, ClockState, ClockSubscription};
use oss_sim::cli::{init_tracing, parse_key, parse_or_exit, CliError};
use std::hint::spin_loop;
use tracing::{error, info, warn};

/// Iterations between parent liveness checks
const PARENT_CHECK_EVERY: u32 = 1024;

/// Simulated-clock worker
#[derive(Parser, Debug)]
#[command(name = "worker")]
#[command(about = "Wait a simulated lifetime on the OSS clock", long_about = None)]
struct Args {
    /// Lifetime seconds
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    seconds: u32,

    /// Lifetime nanoseconds
    #[arg(value_parser = clap::value_parser!(u32).range(1..1_000_000_000))]
    nanoseconds: u32,

    /// Shared memory key of the clock (decimal or 0x hex)
    #[arg(long, default_value = "0x1234", value_parser = parse_key)]
    key: i32,
}

fn run(args: &Args) -> Result<(), CliError> {
    let shutdown = install_shutdown_handlers()?;
    let clock = ClockSubscription::open(args.key)?;
    let pid = getpid().as_raw();
    let parent = getppid();

    let start = clock.read();
    let mut plan = WorkerPlan::new(start, ClockState::new(args.seconds, args.nanoseconds));
    println!("{}", plan.status_line(pid, parent.as_raw(), start));
    println!("--Just Starting");

    let mut polls: u32 = 0;
    loop {
        let now = clock.read();
        match plan.poll(now) {
            WorkerStatus::Waiting => {}
            WorkerStatus::SecondsPassed(elapsed) => {
                println!("{}", plan.status_line(pid, parent.as_raw(), now));
                println!("--{} seconds have passed since starting", elapsed);
            }
            WorkerStatus::Expired => {
                println!("{}", plan.status_line(pid, parent.as_raw(), now));
                println!("--Terminating");
                break;
            }
        }

        if let Some(signal) = shutdown.raised() {
            info!("Worker {} stopping on signal {}", pid, signal);
            break;
        }

        polls = polls.wrapping_add(1);
        if polls % PARENT_CHECK_EVERY == 0 && getppid() != parent {
            warn!("Orchestrator {} is gone; worker {} stopping early", parent, pid);
            break;
        }
        spin_loop();
    }

    clock.close()?;
    Ok(())
}

fn main() {
    let args: Args = parse_or_exit();
    init_tracing(false);

    if let Err(e) = run(&args) {
        error!("{}", e);
        std::process::exit(1);
    }
}
