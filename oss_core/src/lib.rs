//! OSS Core - simulated-clock process orchestrator
//!
//! Launches a bounded population of worker processes, paces their arrival and
//! concurrency against a simulated clock kept in shared memory, and tears the
//! whole cohort down after a real-time deadline or an interrupt.
//!
//! 1. **Clock**: seconds + nanoseconds advanced in software, single writer
//! 2. **Rate control**: proportional feedback keeping simulated time near real time
//! 3. **Scheduling**: total, concurrency and inter-arrival limits over a fixed table

pub mod clock;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod pacer;
pub mod rate;
pub mod scheduler;
pub mod table;
pub mod worker;

// Re-export key types for convenience
pub use error::OrchestratorError;
pub use lifecycle::{Lifecycle, StopReason, TeardownReport};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunReport, SnapshotHook};
pub use pacer::SpinPacer;
pub use rate::{Adjustment, RateController, RateControllerConfig};
pub use scheduler::{LifetimeSampler, ReapSweep, Scheduler, SpawnDecision, SpawnLimits};
pub use table::{ProcessSlot, ProcessTable, PROCESS_TABLE_CAPACITY};
pub use worker::{WorkerPlan, WorkerStatus};
