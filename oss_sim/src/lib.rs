//! OSS simulation harness and command-line front ends
//!
//! `SimHost` and `SimClock` stand in for forked workers and the shared memory
//! clock so the orchestrator loop can be driven step by step with exact
//! simulated time. The `oss` and `worker` binaries wire the same loop to
//! real processes.
//!
//! # Usage
//!
//! ```ignore
//! use oss_core::{Orchestrator, OrchestratorConfig};
//! use oss_env::ShutdownFlag;
//! use oss_sim::{SimClock, SimHost};
//!
//! let clock = SimClock::new();
//! let mut orchestrator =
//!     Orchestrator::new(OrchestratorConfig::default(), SimHost::new(), clock.clone(), ShutdownFlag::new())?;
//! while orchestrator.step(Duration::ZERO)?.is_none() {}
//! ```

pub mod cli;
mod context;

pub use context::{SimClock, SimHost, SpawnRecord};
