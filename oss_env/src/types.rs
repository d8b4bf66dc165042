//! Common types for the OSS environment abstraction.

use serde::{Deserialize, Serialize};

/// Nanoseconds in one simulated second.
pub const NANOS_PER_SEC: u32 = 1_000_000_000;

/// A point on (or a span of) the simulated clock.
///
/// Ordering is lexicographic on `(seconds, nanoseconds)`, which matches time
/// ordering as long as `nanoseconds < NANOS_PER_SEC`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClockState {
    /// Whole simulated seconds
    pub seconds: u32,

    /// Sub-second part, always below `NANOS_PER_SEC`
    pub nanoseconds: u32,
}

impl ClockState {
    /// The zero instant.
    pub const ZERO: Self = Self {
        seconds: 0,
        nanoseconds: 0,
    };

    /// Builds a normalized state, carrying excess nanoseconds into seconds.
    pub fn new(seconds: u32, nanoseconds: u32) -> Self {
        let mut state = Self {
            seconds,
            nanoseconds: 0,
        };
        state.advance(nanoseconds as u64);
        state
    }

    /// Builds a state from a total nanosecond count.
    pub fn from_nanos(total: u64) -> Self {
        let mut state = Self::ZERO;
        state.advance(total);
        state
    }

    /// Total nanoseconds represented by this state.
    pub fn as_nanos(&self) -> u64 {
        self.seconds as u64 * NANOS_PER_SEC as u64 + self.nanoseconds as u64
    }

    /// Adds `delta_ns`, carrying every full second of overflow into `seconds`.
    ///
    /// Deltas larger than one second carry several seconds at once. Seconds
    /// saturate at `u32::MAX` instead of wrapping.
    pub fn advance(&mut self, delta_ns: u64) {
        let total = self.nanoseconds as u64 + delta_ns;
        let carry = total / NANOS_PER_SEC as u64;
        self.nanoseconds = (total % NANOS_PER_SEC as u64) as u32;
        self.seconds = u32::try_from(self.seconds as u64 + carry).unwrap_or(u32::MAX);
    }

    /// Returns `self + span` without modifying `self`.
    pub fn offset_by(&self, span: ClockState) -> Self {
        let mut out = Self {
            seconds: self.seconds.saturating_add(span.seconds),
            nanoseconds: self.nanoseconds,
        };
        out.advance(span.nanoseconds as u64);
        out
    }

    /// Nanoseconds from `earlier` to `self`, zero if `earlier` is later.
    pub fn nanos_since(&self, earlier: ClockState) -> u64 {
        self.as_nanos().saturating_sub(earlier.as_nanos())
    }
}

impl std::fmt::Display for ClockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}s", self.seconds, self.nanoseconds)
    }
}

/// OS identifier of a child process.
///
/// Zero means "no process" and marks unused table slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessHandle(pub i32);

impl ProcessHandle {
    /// Placeholder stored in free slots.
    pub const NONE: Self = Self(0);

    /// Returns the raw pid.
    pub fn as_raw(&self) -> i32 {
        self.0
    }
}

impl From<nix::unistd::Pid> for ProcessHandle {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl std::fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// What a spawned worker is told to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSpec {
    /// Simulated lifetime passed on the worker's command line
    pub lifetime: ClockState,

    /// Clock value recorded just before the fork
    pub launch_time: ClockState,
}

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitKind {
    /// Normal exit with the given code
    Exited(i32),

    /// Killed by the given signal number
    Signaled(i32),
}

/// A terminated child collected by a non-blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// The child that terminated
    pub child: ProcessHandle,

    /// Exit code or fatal signal
    pub kind: ExitKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_nanoseconds() {
        let state = ClockState::new(2, 3_500_000_000);
        assert_eq!(state, ClockState::new(5, 500_000_000));
        assert_eq!(state.seconds, 5);
        assert_eq!(state.nanoseconds, 500_000_000);
    }

    #[test]
    fn test_advance_carries_exact_second() {
        let mut state = ClockState::new(0, 999_999_999);
        state.advance(1);
        assert_eq!(state, ClockState { seconds: 1, nanoseconds: 0 });
    }

    #[test]
    fn test_offset_by_matches_worker_example() {
        // Clock at 6s 100ns, worker asked to live 5s 500000ns.
        let now = ClockState::new(6, 100);
        let target = now.offset_by(ClockState::new(5, 500_000));
        assert_eq!(target, ClockState::new(11, 500_100));
    }

    #[test]
    fn test_offset_by_carries_overflow() {
        let now = ClockState::new(1, 900_000_000);
        let target = now.offset_by(ClockState::new(2, 200_000_000));
        assert_eq!(target, ClockState::new(4, 100_000_000));
    }

    #[test]
    fn test_ordering_is_time_ordering() {
        assert!(ClockState::new(1, 0) > ClockState::new(0, 999_999_999));
        assert!(ClockState::new(3, 5) < ClockState::new(3, 6));
    }

    #[test]
    fn test_nanos_since_saturates() {
        let a = ClockState::new(1, 0);
        let b = ClockState::new(2, 250);
        assert_eq!(b.nanos_since(a), 1_000_000_250);
        assert_eq!(a.nanos_since(b), 0);
    }

    #[test]
    fn test_advance_saturates_seconds() {
        let mut state = ClockState::new(u32::MAX, 0);
        state.advance(5 * NANOS_PER_SEC as u64);
        assert_eq!(state.seconds, u32::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(ClockState::new(3, 42).to_string(), "3.000000042s");
        assert_eq!(ProcessHandle(77).to_string(), "77");
    }
}
