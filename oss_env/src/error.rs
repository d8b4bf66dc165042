//! Error types for the OSS environment abstraction.

use nix::errno::Errno;
use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A shared memory syscall (`shmget`, `shmat`, `shmdt`, `shmctl`) failed
    #[error("Shared memory error: {op} failed for key {key:#x}: {source}")]
    SharedMemory {
        op: &'static str,
        key: i32,
        #[source]
        source: Errno,
    },

    /// The named cross-process lock could not be opened, taken or released
    #[error("Lock error: {op} failed for {name}: {source}")]
    Lock {
        op: &'static str,
        name: String,
        #[source]
        source: Errno,
    },

    /// `fork` failed (resource exhaustion, usually transient)
    #[error("Fork failed: {0}")]
    Fork(#[source] Errno),

    /// The worker program path or arguments cannot be handed to `exec`
    #[error("Invalid worker command: {0}")]
    InvalidCommand(String),

    /// `waitpid` failed with something other than "no children"
    #[error("Wait failed: {0}")]
    Wait(#[source] Errno),

    /// Delivering a signal to a child failed
    #[error("Signal delivery to {pid} failed: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: Errno,
    },

    /// Installing a signal handler failed
    #[error("Signal handler installation failed: {0}")]
    HandlerInstall(#[source] Errno),
}

impl EnvError {
    /// Creates a shared memory error from the current `errno`.
    pub fn shm(op: &'static str, key: i32) -> Self {
        Self::SharedMemory {
            op,
            key,
            source: Errno::last(),
        }
    }

    /// Creates a lock error from the current `errno`.
    pub fn lock(op: &'static str, name: impl Into<String>) -> Self {
        Self::Lock {
            op,
            name: name.into(),
            source: Errno::last(),
        }
    }
}
