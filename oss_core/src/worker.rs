//! Worker-side clock logic.
//!
//! A worker is told how long to live in simulated time. It reads the clock
//! once to fix its termination target and then polls until the clock reaches
//! it. Reads may be slightly stale; that only delays termination by a few
//! increments.

use oss_env::ClockState;

/// A worker's start and termination times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPlan {
    /// Clock value when the worker attached
    pub started: ClockState,

    /// Clock value at which the worker terminates
    pub target: ClockState,

    last_second: u32,
}

/// What a poll of the clock means for the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Still waiting, nothing to report
    Waiting,

    /// The simulated second changed; carries whole seconds since start
    SecondsPassed(u32),

    /// The target was reached
    Expired,
}

impl WorkerPlan {
    /// Computes the target as `now + lifetime` using the clock's carry rule.
    pub fn new(now: ClockState, lifetime: ClockState) -> Self {
        Self {
            started: now,
            target: now.offset_by(lifetime),
            last_second: now.seconds,
        }
    }

    /// Classifies a fresh clock reading.
    pub fn poll(&mut self, now: ClockState) -> WorkerStatus {
        if now >= self.target {
            return WorkerStatus::Expired;
        }
        if now.seconds > self.last_second {
            self.last_second = now.seconds;
            return WorkerStatus::SecondsPassed(now.seconds - self.started.seconds);
        }
        WorkerStatus::Waiting
    }

    /// The worker status line printed at start, on each new second and at
    /// termination.
    pub fn status_line(&self, pid: i32, ppid: i32, now: ClockState) -> String {
        format!(
            "WORKER PID:{} PPID:{} SysClockS: {} SysclockNano: {} TermTimeS: {} TermTimeNano: {}",
            pid, ppid, now.seconds, now.nanoseconds, self.target.seconds, self.target.nanoseconds
        )
    }
}
