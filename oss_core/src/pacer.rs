//! Spin pacing for the control loop.
//!
//! The orchestrator never calls a timed wait. Each iteration instead burns a
//! fixed budget of spin-loop hints before the clock is incremented; the rate
//! controller compensates for however long that budget takes on this machine.

use std::hint::{black_box, spin_loop};

/// A fixed CPU-bound delay between clock increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinPacer {
    spins_per_tick: u32,
}

impl SpinPacer {
    /// Creates a pacer spinning `spins_per_tick` times per iteration.
    pub fn new(spins_per_tick: u32) -> Self {
        Self { spins_per_tick }
    }

    /// Spin budget per iteration.
    pub fn spins_per_tick(&self) -> u32 {
        self.spins_per_tick
    }

    /// Burns one iteration's budget.
    pub fn pace(&self) {
        let mut acc = 0u32;
        for i in 0..self.spins_per_tick {
            spin_loop();
            acc = black_box(acc.wrapping_add(i));
        }
        black_box(acc);
    }
}

impl Default for SpinPacer {
    fn default() -> Self {
        Self::new(2_000)
    }
}
