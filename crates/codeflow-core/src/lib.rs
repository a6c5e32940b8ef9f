//! # codeflow-core
//!
//! Core types for the codeflow codelet/dataflow engine.
//!
//! This crate is platform-agnostic and contains no thread management.
//! The scheduler hierarchy lives in `codeflow-runtime`.
//!
//! ## Modules
//!
//! - `id` - Procedure, codelet and Fifo identifiers
//! - `error` - Error types
//! - `spinlock` - Lock primitive used by the lock-based Fifo and codelet bodies
//! - `backoff` - Retry and idle backoff policies
//! - `fifo` - Bounded streaming queues (lock-based, lock-free, message queue)
//! - `codelet` - Codelet, dependency counter, firing contract
//! - `procedure` - Threaded procedures (codelet groups with ref-counted teardown)
//! - `stream` - Typed stream links wiring a producer codelet to a consumer
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod error;
pub mod spinlock;
pub mod backoff;
pub mod fifo;
pub mod codelet;
pub mod procedure;
pub mod stream;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::{CodeletKey, FifoId, ProcId};
pub use error::{PopError, PushError, SchedError, SchedResult, WorkerError};
pub use spinlock::{RawLock, SpinLock};
pub use backoff::{IdleBackoff, RetryPolicy};
pub use fifo::{
    new_fifo, Fifo, FifoBackend, FifoControl, FifoHeader, FifoMeta, FifoPair, LockFreeFifo, MsgQFifo,
    SoftFifo,
};
pub use codelet::{Codelet, CodeletKind, CodeletRef, FireContext, Signal, StreamPorts, Target};
pub use procedure::{ProcedureBuilder, ReadySink, ThreadedProcedure};
pub use stream::{same_link, StreamEndpoint, StreamLink};
pub use env::{env_get, env_get_bool, env_get_micros, env_get_opt, env_get_str, env_is_set};
pub use kprint::LogLevel;

/// Constants shared by the core and the runtime
pub mod constants {
    /// Fifo capacity used when the scheduler wires a stream link
    pub const DEFAULT_FIFO_CAPACITY: usize = 10;

    /// Placement hint meaning "no preference"
    pub const NO_PLACEMENT: u32 = 0;

    /// Maximum top-level schedulers (clusters)
    pub const MAX_CLUSTERS: usize = 64;

    /// Maximum sub-schedulers per cluster
    pub const MAX_WORKERS_PER_CLUSTER: usize = 256;

    /// Cache line size for alignment
    pub const CACHE_LINE_SIZE: usize = 64;
}
