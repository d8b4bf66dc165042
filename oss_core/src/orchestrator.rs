//! Orchestrator - the single-threaded control loop.
//!
//! # Loop
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ check stop (signal flag, real-time deadline)                 │
//! │ spin (pacer)                                                 │
//! │ clock += controller.increment()                              │
//! │ every N iterations: controller compares sim vs real elapsed  │
//! │ reap every terminated child (non-blocking), free its slot    │
//! │ spawn while total/concurrency/interval/slots allow           │
//! │ every half simulated second: snapshot (clock + table)        │
//! │ stop once everything launched and nothing is running         │
//! └──────────────────────────────────────────────────────────────┘
//!            │ stop reason
//!            ▼
//!   teardown: SIGTERM/SIGKILL children, reap, release the clock
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use oss_core::{Orchestrator, OrchestratorConfig};
//! use oss_env::{install_shutdown_handlers, OwnedClockRegion, UnixHost};
//!
//! let shutdown = install_shutdown_handlers()?;
//! let clock = OwnedClockRegion::create(key)?;
//! let host = UnixHost::new("./worker", key)?;
//! let mut orchestrator = Orchestrator::new(OrchestratorConfig::default(), host, clock, shutdown)?;
//! let report = orchestrator.run()?;
//! ```

use crate::clock;
use crate::error::OrchestratorError;
use crate::lifecycle::{stop_children, Lifecycle, StopReason, TeardownReport};
use crate::pacer::SpinPacer;
use crate::rate::{Adjustment, RateController, RateControllerConfig};
use crate::scheduler::{reap_sweep, LifetimeSampler, Scheduler, SpawnDecision, SpawnLimits};
use crate::table::{ProcessTable, PROCESS_TABLE_CAPACITY};

use oss_env::{ClockState, ClockStore, ProcessHost, ShutdownFlag, WorkerSpec};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for one orchestrator run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Workers to launch over the whole run
    pub total_workers: u32,

    /// Workers alive at once
    pub concurrency: u32,

    /// Upper bound of a worker's simulated lifetime, in seconds
    pub max_lifetime_secs: u32,

    /// Simulated milliseconds between launches
    pub interval_ms: u64,

    /// Process table slots (default: 20)
    pub table_capacity: usize,

    /// Real-time limit for the whole run (default: 60s)
    pub deadline: Duration,

    /// Real time children get to exit after SIGTERM (default: 2s)
    pub grace: Duration,

    /// Simulated nanoseconds between snapshots (default: half a second)
    pub report_every_ns: u64,

    /// Seed for worker lifetimes
    pub seed: u64,

    /// Spin budget per loop iteration
    pub spins_per_tick: u32,

    /// Clock rate feedback tuning
    pub rate: RateControllerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            total_workers: 5,
            concurrency: 3,
            max_lifetime_secs: 3,
            interval_ms: 100,
            table_capacity: PROCESS_TABLE_CAPACITY,
            deadline: Duration::from_secs(60),
            grace: Duration::from_secs(2),
            report_every_ns: 500_000_000,
            seed: 42,
            spins_per_tick: SpinPacer::default().spins_per_tick(),
            rate: RateControllerConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Rejects configurations that cannot describe a run.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.total_workers == 0 {
            return Err(OrchestratorError::config("total workers must be > 0"));
        }
        if self.concurrency == 0 {
            return Err(OrchestratorError::config("concurrency must be > 0"));
        }
        if self.max_lifetime_secs == 0 {
            return Err(OrchestratorError::config("worker time limit must be > 0"));
        }
        if self.table_capacity == 0 {
            return Err(OrchestratorError::config("process table needs at least one slot"));
        }
        if self.report_every_ns == 0 {
            return Err(OrchestratorError::config("snapshot period must be > 0"));
        }
        if self.rate.feedback_every == 0 {
            return Err(OrchestratorError::config("rate feedback period must be > 0"));
        }
        Ok(())
    }

    fn limits(&self) -> SpawnLimits {
        SpawnLimits {
            total: self.total_workers,
            concurrency: self.concurrency,
            interval_ns: self.interval_ms.saturating_mul(1_000_000),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Why the loop stopped
    pub reason: StopReason,

    /// Workers launched
    pub launched: u32,

    /// Workers reaped (including during teardown)
    pub reaped: u32,

    /// Terminated children that matched no slot
    pub unknown_reaped: u32,

    /// Failed fork attempts
    pub spawn_failures: u32,

    /// Loop iterations executed
    pub iterations: u64,

    /// Last clock value written
    pub final_clock: ClockState,

    /// Increment in force when the loop stopped (ns)
    pub final_increment: i64,

    /// Teardown outcome
    pub teardown: TeardownReport,
}

/// Called with the clock and table every snapshot period.
pub type SnapshotHook = Box<dyn FnMut(ClockState, &ProcessTable)>;

/// Owns the process table and the clock's write handle and drives the run.
pub struct Orchestrator<H: ProcessHost, C: ClockStore> {
    config: OrchestratorConfig,
    host: H,
    clock: C,
    table: ProcessTable,
    scheduler: Scheduler,
    controller: RateController,
    pacer: SpinPacer,
    lifetimes: LifetimeSampler,
    lifecycle: Lifecycle,

    iterations: u64,
    spawn_failures: u32,
    unknown_reaped: u32,
    last_clock: ClockState,
    next_snapshot: ClockState,
    on_snapshot: Option<SnapshotHook>,
    teardown: Option<TeardownReport>,
}

impl<H: ProcessHost, C: ClockStore> Orchestrator<H, C> {
    /// Validates `config` and zeroes the clock.
    pub fn new(
        config: OrchestratorConfig,
        host: H,
        mut clock: C,
        shutdown: ShutdownFlag,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        if config.concurrency as usize > config.table_capacity {
            warn!(
                "Concurrency {} exceeds table capacity {}; extra launches wait for a free slot",
                config.concurrency, config.table_capacity
            );
        }

        clock::initialize(&mut clock);

        Ok(Self {
            table: ProcessTable::new(config.table_capacity),
            scheduler: Scheduler::new(config.limits()),
            controller: RateController::new(config.rate.clone()),
            pacer: SpinPacer::new(config.spins_per_tick),
            lifetimes: LifetimeSampler::new(config.max_lifetime_secs, config.seed),
            lifecycle: Lifecycle::new(config.deadline, shutdown),
            iterations: 0,
            spawn_failures: 0,
            unknown_reaped: 0,
            last_clock: ClockState::ZERO,
            next_snapshot: ClockState::ZERO,
            on_snapshot: None,
            teardown: None,
            config,
            host,
            clock,
        })
    }

    /// Installs a hook called with every snapshot.
    pub fn with_snapshot_hook(mut self, hook: impl FnMut(ClockState, &ProcessTable) + 'static) -> Self {
        self.on_snapshot = Some(Box::new(hook));
        self
    }

    /// Runs until a stop condition, then tears down.
    ///
    /// Teardown runs even when the loop fails.
    pub fn run(&mut self) -> Result<RunReport, OrchestratorError> {
        let started = Instant::now();
        self.controller.reset_baseline(Duration::ZERO, self.last_clock);
        info!(
            "Orchestrator starting: total={} concurrency={} time_limit={}s interval={}ms",
            self.config.total_workers,
            self.config.concurrency,
            self.config.max_lifetime_secs,
            self.config.interval_ms
        );

        let outcome = loop {
            match self.step(started.elapsed()) {
                Ok(Some(reason)) => break Ok(reason),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
        };

        let teardown = self.teardown();
        let reason = outcome?;
        let teardown = teardown?;

        info!(
            "Orchestrator stopped ({}) at {} after {} iterations",
            reason, self.last_clock, self.iterations
        );
        Ok(self.report(reason, teardown))
    }

    /// Executes one loop iteration. `real_elapsed` is real time since the
    /// run started.
    pub fn step(&mut self, real_elapsed: Duration) -> Result<Option<StopReason>, OrchestratorError> {
        if let Some(reason) = self.lifecycle.check(real_elapsed) {
            return Ok(Some(reason));
        }

        self.pacer.pace();
        let now = clock::advance(&mut self.clock, self.controller.increment());
        self.last_clock = now;
        self.iterations += 1;

        if let Some(Adjustment::Adjusted { ratio, from, to }) = self.controller.on_iteration(real_elapsed, now) {
            debug!("Clock rate {:.3}x real; increment {}ns -> {}ns", ratio, from, to);
        }

        let sweep = reap_sweep(&mut self.host, &mut self.table, now)?;
        self.scheduler.record_reaped(sweep.reaped);
        self.unknown_reaped += sweep.unknown;

        self.spawn_ready(now);

        if now >= self.next_snapshot {
            while self.next_snapshot <= now {
                self.next_snapshot.advance(self.config.report_every_ns);
            }
            if let Some(hook) = self.on_snapshot.as_mut() {
                hook(now, &self.table);
            }
        }

        if self.scheduler.is_finished(&self.table) {
            return Ok(Some(StopReason::Completed));
        }
        Ok(None)
    }

    fn spawn_ready(&mut self, now: ClockState) {
        while let SpawnDecision::Spawn { slot } = self.scheduler.decide(&self.table, now) {
            let spec = WorkerSpec {
                lifetime: self.lifetimes.sample(),
                launch_time: now,
            };
            match self.host.spawn_worker(&spec) {
                Ok(child) => {
                    self.table.occupy(slot, child, now);
                    self.scheduler.record_spawn(now);
                    info!(
                        "Launched worker pid={} in slot {} at {} (lifetime {})",
                        child, slot, now, spec.lifetime
                    );
                }
                Err(e) => {
                    // The slot was never occupied, so it stays free.
                    warn!("Worker launch failed, retrying next iteration: {}", e);
                    self.spawn_failures += 1;
                    break;
                }
            }
        }
    }

    /// Stops every child and releases the clock. Idempotent.
    pub fn teardown(&mut self) -> Result<TeardownReport, OrchestratorError> {
        if let Some(report) = self.teardown {
            return Ok(report);
        }
        let report = stop_children(&mut self.host, &mut self.table, self.last_clock, self.config.grace);
        self.scheduler.record_reaped(report.reaped);
        self.teardown = Some(report);
        self.clock.release()?;
        Ok(report)
    }

    fn report(&self, reason: StopReason, teardown: TeardownReport) -> RunReport {
        RunReport {
            reason,
            launched: self.scheduler.launched(),
            reaped: self.scheduler.reaped(),
            unknown_reaped: self.unknown_reaped,
            spawn_failures: self.spawn_failures,
            iterations: self.iterations,
            final_clock: self.last_clock,
            final_increment: self.controller.current_increment(),
            teardown,
        }
    }

    /// The process table.
    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    /// Launch accounting.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The rate controller.
    pub fn controller(&self) -> &RateController {
        &self.controller
    }

    /// The process host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable access to the process host.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// The clock store.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Last clock value written.
    pub fn now(&self) -> ClockState {
        self.last_clock
    }

    /// Iterations executed so far.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Failed launch attempts so far.
    pub fn spawn_failures(&self) -> u32 {
        self.spawn_failures
    }

    /// True once teardown has run.
    pub fn is_torn_down(&self) -> bool {
        self.teardown.is_some()
    }
}

impl<H: ProcessHost, C: ClockStore> Drop for Orchestrator<H, C> {
    fn drop(&mut self) {
        if self.teardown.is_none() {
            if let Err(e) = self.teardown() {
                warn!("Teardown on drop failed: {}", e);
            }
        }
    }
}
