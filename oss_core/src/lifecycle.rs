//! Run lifecycle: stop conditions and ordered teardown of children.
//!
//! Signals never run teardown themselves. They raise a [`ShutdownFlag`]; the
//! control loop sees it through [`Lifecycle::check`] and tears down outside
//! signal context.

use crate::scheduler::{reap_sweep, ReapSweep};
use crate::table::ProcessTable;
use oss_env::{ClockState, ProcessHost, ShutdownFlag, DEADLINE_SIGNAL};
use serde::Serialize;
use std::hint::spin_loop;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Why the control loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Every worker was launched and reaped
    Completed,

    /// The real-time deadline elapsed (loop check or SIGALRM)
    Deadline,

    /// An interrupt or termination signal arrived
    Interrupted { signal: i32 },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Completed => write!(f, "completed"),
            StopReason::Deadline => write!(f, "deadline"),
            StopReason::Interrupted { signal } => write!(f, "interrupted (signal {})", signal),
        }
    }
}

/// Stop-condition checks for a run.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    deadline: Duration,
    shutdown: ShutdownFlag,
}

impl Lifecycle {
    /// Creates a lifecycle with a real-time `deadline` watching `shutdown`.
    pub fn new(deadline: Duration, shutdown: ShutdownFlag) -> Self {
        Self { deadline, shutdown }
    }

    /// The configured real-time deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Returns a stop reason if a signal arrived or the deadline elapsed.
    pub fn check(&self, real_elapsed: Duration) -> Option<StopReason> {
        if let Some(signal) = self.shutdown.raised() {
            return Some(if signal == DEADLINE_SIGNAL {
                StopReason::Deadline
            } else {
                StopReason::Interrupted { signal }
            });
        }
        if real_elapsed >= self.deadline {
            return Some(StopReason::Deadline);
        }
        None
    }
}

/// What happened to the children during teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Children sent SIGTERM
    pub terminated: u32,

    /// Stragglers sent SIGKILL after the grace period
    pub killed: u32,

    /// Children reaped during teardown
    pub reaped: u32,

    /// Slots still occupied when teardown gave up
    pub leftover: u32,
}

/// Terminates every occupied slot's child and reaps them.
///
/// SIGTERM first, then non-blocking sweeps until the table empties or `grace`
/// of real time passes. Survivors get SIGKILL and one more bounded sweep.
pub fn stop_children<H: ProcessHost>(
    host: &mut H,
    table: &mut ProcessTable,
    now: ClockState,
    grace: Duration,
) -> TeardownReport {
    let mut report = TeardownReport::default();

    for child in table.occupied_children() {
        match host.terminate(child) {
            Ok(()) => report.terminated += 1,
            Err(e) => warn!("Failed to terminate pid={}: {}", child, e),
        }
    }
    report.reaped += sweep_until_empty(host, table, now, grace).reaped;

    if table.active_count() > 0 {
        for child in table.occupied_children() {
            match host.kill(child) {
                Ok(()) => report.killed += 1,
                Err(e) => warn!("Failed to kill pid={}: {}", child, e),
            }
        }
        report.reaped += sweep_until_empty(host, table, now, grace).reaped;
    }

    report.leftover = table.active_count() as u32;
    if report.leftover > 0 {
        warn!("{} worker(s) could not be reaped during teardown", report.leftover);
    } else if report.terminated > 0 {
        info!(
            "Stopped {} worker(s) ({} needed SIGKILL)",
            report.terminated, report.killed
        );
    }
    report
}

fn sweep_until_empty<H: ProcessHost>(
    host: &mut H,
    table: &mut ProcessTable,
    now: ClockState,
    grace: Duration,
) -> ReapSweep {
    let started = Instant::now();
    let mut total = ReapSweep::default();
    loop {
        match reap_sweep(host, table, now) {
            Ok(sweep) => {
                total.reaped += sweep.reaped;
                total.unknown += sweep.unknown;
            }
            Err(e) => {
                warn!("Reap during teardown failed: {}", e);
                break;
            }
        }
        if table.active_count() == 0 || started.elapsed() >= grace {
            break;
        }
        spin_loop();
    }
    total
}
