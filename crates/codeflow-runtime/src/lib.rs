//! # codeflow-runtime
//!
//! Scheduler hierarchy for the codeflow codelet engine.
//!
//! This crate provides:
//! - Runtime configuration (defaults plus `CFL_*` environment overrides)
//! - CPU affinity (topology discovery, thread pinning)
//! - Top-level schedulers: launch queue, ready queue, Fifo wiring, policies
//! - Micro schedulers (sub-schedulers) fed by the top level
//! - Worker thread management

pub mod config;
pub mod affinity;
pub mod scheduler;
pub mod sub_scheduler;
pub mod worker;

// Re-exports
pub use config::{ConfigError, RuntimeConfig};
pub use affinity::{AffinityProvider, Distribution, ThreadAffinity};
pub use scheduler::{
    FifoTable, LaunchClosure, SchedStats, StatsSnapshot, TpPolicyKind, TpScheduler,
};
pub use sub_scheduler::{MicroScheduler, MicroStats, SubScheduler};
pub use worker::{current_worker_id, WorkerPool, WorkerSpec};
