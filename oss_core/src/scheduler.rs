//! Spawn and reap scheduling.
//!
//! Spawn decisions are checked in a fixed order each iteration: total count,
//! concurrency, inter-arrival interval, then slot availability. Reaping drains
//! every terminated child without blocking.

use crate::table::ProcessTable;
use oss_env::{ClockState, EnvError, ProcessHost, NANOS_PER_SEC};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, warn};

/// Limits the scheduler enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnLimits {
    /// Workers to launch over the whole run
    pub total: u32,

    /// Workers alive at once
    pub concurrency: u32,

    /// Minimum simulated nanoseconds between launches
    pub interval_ns: u64,
}

/// What the scheduler allows this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpawnDecision {
    /// Launch into the given free slot
    Spawn { slot: usize },

    /// Every requested worker has been launched
    TotalReached,

    /// `concurrency` workers are already alive
    ConcurrencyLimit,

    /// Too little simulated time since the last launch
    IntervalPending { remaining_ns: u64 },

    /// Every slot is occupied (soft backpressure)
    TableFull,
}

/// Launch accounting for one run.
#[derive(Debug, Clone)]
pub struct Scheduler {
    limits: SpawnLimits,
    launched: u32,
    reaped: u32,
    last_spawn: Option<ClockState>,
}

impl Scheduler {
    /// Creates a scheduler that has launched nothing yet.
    pub fn new(limits: SpawnLimits) -> Self {
        Self {
            limits,
            launched: 0,
            reaped: 0,
            last_spawn: None,
        }
    }

    /// The configured limits.
    pub fn limits(&self) -> SpawnLimits {
        self.limits
    }

    /// Workers launched so far.
    pub fn launched(&self) -> u32 {
        self.launched
    }

    /// Workers reaped so far.
    pub fn reaped(&self) -> u32 {
        self.reaped
    }

    /// Decides whether a worker may be launched at simulated time `now`.
    pub fn decide(&self, table: &ProcessTable, now: ClockState) -> SpawnDecision {
        if self.launched >= self.limits.total {
            return SpawnDecision::TotalReached;
        }
        if table.active_count() >= self.limits.concurrency as usize {
            return SpawnDecision::ConcurrencyLimit;
        }
        if let Some(last) = self.last_spawn {
            let since = now.nanos_since(last);
            if since < self.limits.interval_ns {
                return SpawnDecision::IntervalPending {
                    remaining_ns: self.limits.interval_ns - since,
                };
            }
        }
        match table.first_free() {
            Some(slot) => SpawnDecision::Spawn { slot },
            None => SpawnDecision::TableFull,
        }
    }

    /// Records a successful launch at `now`.
    pub fn record_spawn(&mut self, now: ClockState) {
        self.launched += 1;
        self.last_spawn = Some(now);
    }

    /// Records `count` reaped workers.
    pub fn record_reaped(&mut self, count: u32) {
        self.reaped += count;
    }

    /// True once every worker was launched and none is still running.
    pub fn is_finished(&self, table: &ProcessTable) -> bool {
        self.launched == self.limits.total && table.active_count() == 0
    }
}

/// Result of one reap sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapSweep {
    /// Children whose slots were freed
    pub reaped: u32,

    /// Terminated children no slot was tracking
    pub unknown: u32,
}

/// Collects every terminated child without blocking and frees their slots.
pub fn reap_sweep<H: ProcessHost>(
    host: &mut H,
    table: &mut ProcessTable,
    now: ClockState,
) -> Result<ReapSweep, EnvError> {
    let mut sweep = ReapSweep::default();
    while let Some(exit) = host.try_reap(now)? {
        match table.release(exit.child) {
            Some(slot) => {
                debug!(
                    "Reaped worker pid={} ({:?}) launched at {}",
                    exit.child, exit.kind, slot.launch_time
                );
                sweep.reaped += 1;
            }
            None => {
                warn!("Reaped pid={} with no matching slot; ignoring", exit.child);
                sweep.unknown += 1;
            }
        }
    }
    Ok(sweep)
}

/// Draws worker lifetimes: seconds uniform in `[1, max_seconds]`, nanoseconds
/// uniform in `[1, 1e9)`.
#[derive(Debug, Clone)]
pub struct LifetimeSampler {
    max_seconds: u32,
    rng: ChaCha8Rng,
}

impl LifetimeSampler {
    /// Creates a sampler seeded with `seed`.
    pub fn new(max_seconds: u32, seed: u64) -> Self {
        Self {
            max_seconds: max_seconds.max(1),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Draws one lifetime. Both fields are always positive.
    pub fn sample(&mut self) -> ClockState {
        ClockState {
            seconds: self.rng.gen_range(1..=self.max_seconds),
            nanoseconds: self.rng.gen_range(1..NANOS_PER_SEC),
        }
    }
}
