//! Signal-driven shutdown requests.
//!
//! Handlers only store the signal number in an atomic. The control loop polls
//! the flag and performs teardown outside signal context.

use crate::error::EnvError;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

/// Signals that request an orderly shutdown.
pub const SHUTDOWN_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGALRM];

/// Signal number the deadline alarm raises the flag with.
pub const DEADLINE_SIGNAL: i32 = libc::SIGALRM;

/// The process-wide flag the handlers write to.
static INSTALLED: OnceLock<ShutdownFlag> = OnceLock::new();

/// A shutdown request shared between a signal handler and the control loop.
///
/// Holds the number of the first signal received, or zero.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    signal: Arc<AtomicI32>,
}

impl ShutdownFlag {
    /// Creates a flag that nothing has raised yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a shutdown request. The first request wins.
    pub fn raise(&self, signal: i32) {
        let _ = self
            .signal
            .compare_exchange(0, signal, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Returns the signal that raised the flag, if any.
    pub fn raised(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            signal => Some(signal),
        }
    }

    /// Returns true once a shutdown was requested.
    pub fn is_raised(&self) -> bool {
        self.raised().is_some()
    }
}

extern "C" fn on_shutdown_signal(signal: libc::c_int) {
    if let Some(flag) = INSTALLED.get() {
        flag.raise(signal);
    }
}

/// Installs handlers for [`SHUTDOWN_SIGNALS`] and returns the flag they raise.
///
/// Repeated calls return the same process-wide flag.
pub fn install_shutdown_handlers() -> Result<ShutdownFlag, EnvError> {
    let flag = INSTALLED.get_or_init(ShutdownFlag::new).clone();
    let action = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in SHUTDOWN_SIGNALS {
        unsafe { sigaction(signal, &action) }.map_err(EnvError::HandlerInstall)?;
    }
    debug!("Installed shutdown handlers for {:?}", SHUTDOWN_SIGNALS);
    Ok(flag)
}

/// Arms SIGALRM to fire after `deadline` (rounded up to whole seconds).
pub fn arm_deadline(deadline: Duration) {
    let mut secs = deadline.as_secs();
    if deadline.subsec_nanos() > 0 {
        secs += 1;
    }
    let secs = secs.clamp(1, libc::c_uint::MAX as u64) as libc::c_uint;
    let _ = nix::unistd::alarm::set(secs);
    debug!("Armed real-time deadline alarm for {}s", secs);
}

/// Cancels a pending deadline alarm.
pub fn disarm_deadline() {
    let _ = nix::unistd::alarm::cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_starts_clear() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_raised());
        assert_eq!(flag.raised(), None);
    }

    #[test]
    fn test_first_signal_wins() {
        let flag = ShutdownFlag::new();
        flag.raise(libc::SIGINT);
        flag.raise(libc::SIGALRM);
        assert_eq!(flag.raised(), Some(libc::SIGINT));
    }

    #[test]
    fn test_clones_share_state() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        other.raise(libc::SIGTERM);
        assert!(flag.is_raised());
    }

    #[test]
    fn test_install_returns_process_flag() {
        let a = install_shutdown_handlers().unwrap();
        let b = install_shutdown_handlers().unwrap();
        // Raising through the handler path is observable on both handles.
        on_shutdown_signal(libc::SIGTERM);
        assert_eq!(a.raised(), Some(libc::SIGTERM));
        assert_eq!(b.raised(), Some(libc::SIGTERM));
    }
}
