//! In-memory process host and clock for deterministic orchestrator runs.

use nix::errno::Errno;
use oss_env::{
    ChildExit, ClockState, ClockStore, EnvError, ExitKind, ProcessHandle, ProcessHost, WorkerSpec,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

const SIGTERM: i32 = 15;
const SIGKILL: i32 = 9;

#[derive(Debug, Default)]
struct ClockCell {
    state: ClockState,
    released: bool,
}

/// Simulated clock kept in process memory.
///
/// Clones share the same clock, so a test can keep one handle while the
/// orchestrator owns another.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    cell: Arc<Mutex<ClockCell>>,
}

impl SimClock {
    /// Creates a clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value.
    pub fn now(&self) -> ClockState {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    /// Returns true once the owner released it.
    pub fn is_released(&self) -> bool {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner).released
    }
}

impl ClockStore for SimClock {
    fn read(&self) -> ClockState {
        self.now()
    }

    fn write(&mut self, state: ClockState) {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner).state = state;
    }

    fn release(&mut self) -> Result<(), EnvError> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner).released = true;
        Ok(())
    }
}

/// A launch recorded by [`SimHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnRecord {
    /// Handle handed back to the orchestrator
    pub child: ProcessHandle,

    /// What the worker was asked to do
    pub spec: WorkerSpec,
}

/// Simulated workers.
///
/// A child finishes (exit code 0) once the simulated clock passed at reap
/// time reaches `launch_time + lifetime`. Signals end it immediately unless
/// SIGTERM is being ignored.
#[derive(Debug)]
pub struct SimHost {
    next_pid: i32,
    live: BTreeMap<ProcessHandle, ClockState>,
    exited: VecDeque<ChildExit>,
    history: Vec<SpawnRecord>,
    fail_next_spawns: u32,
    ignore_sigterm: bool,
    max_live: usize,
}

impl SimHost {
    /// Creates a host with no children. Pids start at 1000.
    pub fn new() -> Self {
        Self {
            next_pid: 1000,
            live: BTreeMap::new(),
            exited: VecDeque::new(),
            history: Vec::new(),
            fail_next_spawns: 0,
            ignore_sigterm: false,
            max_live: 0,
        }
    }

    /// Makes the next `count` launches fail like a resource-starved fork.
    pub fn fail_next_spawns(&mut self, count: u32) {
        self.fail_next_spawns = count;
    }

    /// Children ignore SIGTERM and need SIGKILL.
    pub fn set_ignore_sigterm(&mut self, ignore: bool) {
        self.ignore_sigterm = ignore;
    }

    /// Children that have not been reaped and were not signalled.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Returns true if `child` is still running.
    pub fn is_live(&self, child: ProcessHandle) -> bool {
        self.live.contains_key(&child)
    }

    /// Highest number of simultaneously running children seen.
    pub fn max_live(&self) -> usize {
        self.max_live
    }

    /// Every launch in order.
    pub fn spawned(&self) -> &[SpawnRecord] {
        &self.history
    }

    fn signal(&mut self, child: ProcessHandle, signal: i32) {
        if self.live.remove(&child).is_some() {
            self.exited.push_back(ChildExit {
                child,
                kind: ExitKind::Signaled(signal),
            });
        }
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessHost for SimHost {
    fn spawn_worker(&mut self, spec: &WorkerSpec) -> Result<ProcessHandle, EnvError> {
        if self.fail_next_spawns > 0 {
            self.fail_next_spawns -= 1;
            return Err(EnvError::Fork(Errno::EAGAIN));
        }

        let child = ProcessHandle(self.next_pid);
        self.next_pid += 1;
        self.live.insert(child, spec.launch_time.offset_by(spec.lifetime));
        self.history.push(SpawnRecord { child, spec: *spec });
        self.max_live = self.max_live.max(self.live.len());
        Ok(child)
    }

    fn try_reap(&mut self, now: ClockState) -> Result<Option<ChildExit>, EnvError> {
        if let Some(exit) = self.exited.pop_front() {
            return Ok(Some(exit));
        }
        let due = self
            .live
            .iter()
            .find(|(_, deadline)| **deadline <= now)
            .map(|(child, _)| *child);
        Ok(due.map(|child| {
            self.live.remove(&child);
            ChildExit {
                child,
                kind: ExitKind::Exited(0),
            }
        }))
    }

    fn terminate(&mut self, child: ProcessHandle) -> Result<(), EnvError> {
        if !self.ignore_sigterm {
            self.signal(child, SIGTERM);
        }
        Ok(())
    }

    fn kill(&mut self, child: ProcessHandle) -> Result<(), EnvError> {
        self.signal(child, SIGKILL);
        Ok(())
    }
}
