//! Library defaults for `RuntimeConfig`

use codeflow_core::constants::DEFAULT_FIFO_CAPACITY;

/// Top-level schedulers (one per cluster)
pub const NUM_CLUSTERS: usize = 1;

/// Micro schedulers under each top-level scheduler
pub const WORKERS_PER_CLUSTER: usize = 2;

/// Top-level policy name, parsed by `TpPolicyKind::from_str`
pub const TP_POLICY: &str = "roundrobin";

/// Bounded queue of each micro scheduler
pub const MICRO_QUEUE_CAPACITY: usize = 256;

/// Capacity of a Fifo wired without a per-link override
pub const FIFO_CAPACITY: usize = DEFAULT_FIFO_CAPACITY;

/// Backend for links created through the runtime
pub const FIFO_BACKEND: &str = "soft";

/// Poll-loop sleep bounds, microseconds
pub const BACKOFF_MIN_US: u64 = 1;
pub const BACKOFF_MAX_US: u64 = 500;

/// Spins, then as many yields, before a micro scheduler parks
pub const IDLE_SPINS: u32 = 64;

pub const PARK_TIMEOUT_US: u64 = 1_000;

pub const PIN_THREADS: bool = false;

pub const DEBUG_LOGGING: bool = cfg!(feature = "debug-logging");
