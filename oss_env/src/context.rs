//! Core environment traits used by the orchestrator.

use crate::error::EnvError;
use crate::types::{ChildExit, ClockState, ProcessHandle, WorkerSpec};

/// Storage for the simulated clock.
///
/// The orchestrator is the only writer. Production storage is the shared
/// memory region (`OwnedClockRegion`); simulations keep it in memory.
pub trait ClockStore {
    /// Returns the current clock value.
    fn read(&self) -> ClockState;

    /// Overwrites the clock value.
    fn write(&mut self, state: ClockState);

    /// Releases whatever backs the clock. Must be idempotent.
    fn release(&mut self) -> Result<(), EnvError> {
        Ok(())
    }
}

/// Launching, reaping and signalling worker processes.
///
/// # Implementations
///
/// - **Production**: `UnixHost` - `fork`/`execv`, `waitpid(WNOHANG)`, `kill`
/// - **Simulation**: `SimHost` - in-memory children that finish when the
///   simulated clock passes their lifetime
///
/// No method may block waiting for a child.
pub trait ProcessHost {
    /// Starts one worker and returns its handle.
    fn spawn_worker(&mut self, spec: &WorkerSpec) -> Result<ProcessHandle, EnvError>;

    /// Collects one terminated child, if any, without blocking.
    ///
    /// `now` is the simulated clock at the time of the call. Hosts backed by
    /// real processes ignore it.
    fn try_reap(&mut self, now: ClockState) -> Result<Option<ChildExit>, EnvError>;

    /// Asks a child to stop (SIGTERM). A child that is already gone is not
    /// an error.
    fn terminate(&mut self, child: ProcessHandle) -> Result<(), EnvError>;

    /// Forces a child to stop (SIGKILL). A child that is already gone is not
    /// an error.
    fn kill(&mut self, child: ProcessHandle) -> Result<(), EnvError>;
}
