//! OSS Environment Abstraction Layer
//!
//! This crate owns every interaction with the operating system so that the
//! orchestrator engine in `oss_core` can run against real processes and shared
//! memory (production) or against an in-memory harness (simulation).
//!
//! # What lives here
//!
//! - The shared clock region: SysV shared memory holding two 32-bit integers,
//!   attached read/write by the orchestrator and read-only by workers
//! - A POSIX named semaphore guarding attach/detach
//! - Signal handlers that only raise an atomic shutdown flag
//! - `UnixHost`: fork/exec, non-blocking reaping, termination signals
//!
//! # Example
//!
//! ```ignore
//! use oss_env::{ClockStore, OwnedClockRegion, DEFAULT_CLOCK_KEY};
//!
//! let mut clock = OwnedClockRegion::create(DEFAULT_CLOCK_KEY)?;
//! clock.write(ClockState::new(0, 10_000));
//! clock.release()?;
//! ```

mod context;
mod error;
mod lock;
mod region;
mod signals;
mod types;
mod unix_impl;

pub use context::{ClockStore, ProcessHost};
pub use error::EnvError;
pub use lock::{LockGuard, NamedLock, DEFAULT_LOCK_TIMEOUT};
pub use region::{
    lock_name_for, Attachment, ClockReader, ClockSubscription, ClockWriter, OwnedClockRegion,
    ReadOnly, ReadWrite, SharedClock, SharedRegion, DEFAULT_CLOCK_KEY,
};
pub use signals::{
    arm_deadline, disarm_deadline, install_shutdown_handlers, ShutdownFlag, DEADLINE_SIGNAL,
    SHUTDOWN_SIGNALS,
};
pub use types::{ChildExit, ClockState, ExitKind, ProcessHandle, WorkerSpec, NANOS_PER_SEC};
pub use unix_impl::UnixHost;
