//! The simulated clock.
//!
//! A seconds + nanoseconds pair advanced in software. Only the orchestrator
//! writes it, so increments take no lock.

use oss_env::{ClockState, ClockStore};

/// Resets the clock to zero.
pub fn initialize<C: ClockStore>(clock: &mut C) {
    clock.write(ClockState::ZERO);
}

/// Adds `delta_ns` to `state`, carrying nanosecond overflow into seconds.
///
/// Deltas of a second or more (e.g. an accumulated backlog) carry several
/// seconds in one call.
pub fn increment(state: &mut ClockState, delta_ns: u64) {
    state.advance(delta_ns);
}

/// Advances the stored clock by `delta_ns` and returns the new value.
pub fn advance<C: ClockStore>(clock: &mut C, delta_ns: u64) -> ClockState {
    let mut state = clock.read();
    increment(&mut state, delta_ns);
    clock.write(state);
    state
}
