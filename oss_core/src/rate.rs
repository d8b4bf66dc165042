//! Adaptive rate controller for the simulated clock.
//!
//! The control loop paces itself with a CPU spin instead of a timed wait, and
//! the cost of that spin moves with machine load. Every `feedback_every`
//! iterations the controller compares simulated elapsed time with real
//! elapsed time and nudges the per-iteration increment toward a 1:1 ratio.
//!
//! ```text
//! ratio = sim_elapsed / real_elapsed
//! |ratio - 1| <= dead_band           -> no change
//! delta = inc * adjustment_factor * (ratio - 1)
//! delta = clamp(delta, ±max_step_ratio * inc)
//! inc   = clamp(inc - delta, min_increment, max_increment)
//! ```
//!
//! Proportional only: the plant is noisy and only the average rate matters.

use oss_env::ClockState;
use serde::Serialize;
use std::time::Duration;

/// Tuning for [`RateController`].
#[derive(Debug, Clone)]
pub struct RateControllerConfig {
    /// Main-loop iterations between feedback checks (default: 500)
    pub feedback_every: u64,

    /// Half-width of the no-change band around a ratio of 1.0 (default: 0.05)
    pub dead_band: f64,

    /// Proportional gain (default: 0.5)
    pub adjustment_factor: f64,

    /// Largest single change as a fraction of the current increment (default: 0.25)
    pub max_step_ratio: f64,

    /// Increment used before the first feedback, in nanoseconds
    pub initial_increment: i64,

    /// Lower bound on the increment, in nanoseconds
    pub min_increment: i64,

    /// Upper bound on the increment, in nanoseconds
    pub max_increment: i64,
}

impl Default for RateControllerConfig {
    fn default() -> Self {
        Self {
            feedback_every: 500,
            dead_band: 0.05,
            adjustment_factor: 0.5,
            max_step_ratio: 0.25,
            initial_increment: 10_000,
            min_increment: 100,
            max_increment: 50_000_000,
        }
    }
}

/// Outcome of one feedback check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Adjustment {
    /// No real time passed since the last check; nothing measured
    Skipped,

    /// Ratio inside the dead-band; increment unchanged
    WithinDeadBand { ratio: f64 },

    /// Increment moved from `from` to `to`
    Adjusted { ratio: f64, from: i64, to: i64 },
}

/// Bounded proportional controller over the clock increment.
#[derive(Debug, Clone)]
pub struct RateController {
    config: RateControllerConfig,

    /// Nanoseconds added to the clock per iteration
    current_increment: i64,

    /// Real time at the last feedback check
    last_feedback_real_time: Duration,

    /// Simulated time at the last feedback check
    last_feedback_sim_time: ClockState,

    /// Iterations since the last feedback check
    iterations_since_feedback: u64,
}

impl RateController {
    /// Creates a controller with both baselines at zero.
    pub fn new(config: RateControllerConfig) -> Self {
        let min = config.min_increment.max(1);
        let max = config.max_increment.max(min);
        let current_increment = config.initial_increment.clamp(min, max);
        Self {
            config: RateControllerConfig {
                min_increment: min,
                max_increment: max,
                ..config
            },
            current_increment,
            last_feedback_real_time: Duration::ZERO,
            last_feedback_sim_time: ClockState::ZERO,
            iterations_since_feedback: 0,
        }
    }

    /// Nanoseconds to add to the clock this iteration.
    pub fn increment(&self) -> u64 {
        self.current_increment as u64
    }

    /// Current increment as the controller tracks it.
    pub fn current_increment(&self) -> i64 {
        self.current_increment
    }

    /// The active configuration (bounds already sanitized).
    pub fn config(&self) -> &RateControllerConfig {
        &self.config
    }

    /// Moves both baselines without adjusting anything.
    pub fn reset_baseline(&mut self, real_now: Duration, sim_now: ClockState) {
        self.last_feedback_real_time = real_now;
        self.last_feedback_sim_time = sim_now;
        self.iterations_since_feedback = 0;
    }

    /// Counts one main-loop iteration and runs feedback when one is due.
    pub fn on_iteration(&mut self, real_now: Duration, sim_now: ClockState) -> Option<Adjustment> {
        self.iterations_since_feedback += 1;
        if self.iterations_since_feedback < self.config.feedback_every.max(1) {
            return None;
        }
        self.iterations_since_feedback = 0;
        Some(self.observe(real_now, sim_now))
    }

    /// Compares elapsed simulated and real time since the last check and
    /// adjusts the increment.
    pub fn observe(&mut self, real_now: Duration, sim_now: ClockState) -> Adjustment {
        let real_elapsed = real_now.saturating_sub(self.last_feedback_real_time).as_nanos() as f64;
        if real_elapsed <= 0.0 {
            return Adjustment::Skipped;
        }
        let sim_elapsed = sim_now.nanos_since(self.last_feedback_sim_time) as f64;

        self.last_feedback_real_time = real_now;
        self.last_feedback_sim_time = sim_now;

        let ratio = sim_elapsed / real_elapsed;
        self.apply_ratio(ratio)
    }

    /// Applies one proportional step for an observed sim/real ratio.
    pub fn apply_ratio(&mut self, ratio: f64) -> Adjustment {
        if !ratio.is_finite() {
            return Adjustment::Skipped;
        }
        let error = ratio - 1.0;
        if error.abs() <= self.config.dead_band {
            return Adjustment::WithinDeadBand { ratio };
        }

        let current = self.current_increment as f64;
        let max_step = self.config.max_step_ratio.abs() * current;
        let delta = (current * self.config.adjustment_factor * error).clamp(-max_step, max_step);

        let from = self.current_increment;
        let proposed = (current - delta).round();
        let to = if proposed.is_finite() {
            (proposed as i64).clamp(self.config.min_increment, self.config.max_increment)
        } else {
            from
        };
        self.current_increment = to;

        Adjustment::Adjusted { ratio, from, to }
    }
}

impl Default for RateController {
    fn default() -> Self {
        Self::new(RateControllerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn controller(initial: i64) -> RateController {
        RateController::new(RateControllerConfig {
            initial_increment: initial,
            min_increment: 100,
            max_increment: 1_000_000,
            ..Default::default()
        })
    }

    #[test]
    fn test_dead_band_leaves_increment_alone() {
        let mut rc = controller(10_000);
        assert_eq!(rc.apply_ratio(1.04), Adjustment::WithinDeadBand { ratio: 1.04 });
        assert_eq!(rc.apply_ratio(0.96), Adjustment::WithinDeadBand { ratio: 0.96 });
        assert_eq!(rc.current_increment(), 10_000);
    }

    #[test]
    fn test_fast_clock_shrinks_increment() {
        let mut rc = controller(10_000);
        // 20% fast: delta = 10000 * 0.5 * 0.2 = 1000
        match rc.apply_ratio(1.2) {
            Adjustment::Adjusted { from, to, ratio } => {
                assert_eq!(from, 10_000);
                assert_eq!(to, 9_000);
                assert_relative_eq!(ratio, 1.2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_slow_clock_grows_increment() {
        let mut rc = controller(10_000);
        rc.apply_ratio(0.8);
        assert_eq!(rc.current_increment(), 11_000);
    }

    #[test]
    fn test_step_is_capped() {
        let mut rc = controller(10_000);
        // Ratio 100 would propose a huge cut; capped at 25%.
        rc.apply_ratio(100.0);
        assert_eq!(rc.current_increment(), 7_500);

        rc.apply_ratio(0.0);
        // error = -1 -> delta = -0.5 * inc, capped at 25%
        assert_eq!(rc.current_increment(), 9_375);
    }

    #[test]
    fn test_observe_uses_elapsed_since_last_check() {
        let mut rc = controller(10_000);
        // 10ms real, 20ms simulated -> ratio 2
        let adj = rc.observe(Duration::from_millis(10), ClockState::from_nanos(20_000_000));
        assert!(matches!(adj, Adjustment::Adjusted { ratio, .. } if (ratio - 2.0).abs() < 1e-9));

        // Next window: 10ms real, 10ms simulated -> within band
        let adj = rc.observe(Duration::from_millis(20), ClockState::from_nanos(30_000_000));
        assert_eq!(adj, Adjustment::WithinDeadBand { ratio: 1.0 });
    }

    #[test]
    fn test_observe_without_real_time_is_skipped() {
        let mut rc = controller(10_000);
        assert_eq!(rc.observe(Duration::ZERO, ClockState::new(5, 0)), Adjustment::Skipped);
        assert_eq!(rc.current_increment(), 10_000);
    }

    #[test]
    fn test_on_iteration_runs_every_n() {
        let mut rc = RateController::new(RateControllerConfig {
            feedback_every: 3,
            ..Default::default()
        });
        let now = Duration::from_millis(1);
        assert!(rc.on_iteration(now, ClockState::ZERO).is_none());
        assert!(rc.on_iteration(now, ClockState::ZERO).is_none());
        assert!(rc.on_iteration(now, ClockState::ZERO).is_some());
        assert!(rc.on_iteration(now, ClockState::ZERO).is_none());
    }

    #[test]
    fn test_initial_increment_is_clamped() {
        let rc = controller(5);
        assert_eq!(rc.current_increment(), 100);
        let rc = controller(i64::MAX);
        assert_eq!(rc.current_increment(), 1_000_000);
    }

    #[test]
    fn test_converges_toward_parity() {
        // The loop takes a fixed 50us of real time per iteration; the right
        // increment is therefore 50_000ns.
        let mut rc = controller(1_000);
        let per_iter_real = Duration::from_micros(50);
        let mut real = Duration::ZERO;
        let mut sim = ClockState::ZERO;
        for _ in 0..200 {
            for _ in 0..100 {
                real += per_iter_real;
                sim.advance(rc.increment());
            }
            rc.observe(real, sim);
        }
        let inc = rc.current_increment() as f64;
        assert!((inc / 50_000.0 - 1.0).abs() <= 0.06, "increment {} not near 50000", inc);
    }

    proptest! {
        #[test]
        fn prop_increment_stays_in_bounds(
            initial in -10_000_000i64..10_000_000,
            ratios in proptest::collection::vec(
                prop_oneof![0.0f64..10.0, Just(0.0), Just(1e12), Just(f64::INFINITY), Just(f64::NAN)],
                1..200,
            ),
        ) {
            let mut rc = controller(initial);
            for ratio in ratios {
                rc.apply_ratio(ratio);
                prop_assert!(rc.current_increment() >= 100);
                prop_assert!(rc.current_increment() <= 1_000_000);
            }
        }

        #[test]
        fn prop_single_step_never_exceeds_cap(ratio in 0.0f64..1e9, initial in 100i64..1_000_000) {
            let mut rc = controller(initial);
            if let Adjustment::Adjusted { from, to, .. } = rc.apply_ratio(ratio) {
                let change = (to - from).abs() as f64;
                prop_assert!(change <= 0.25 * from as f64 + 1.0);
            }
        }
    }
}
