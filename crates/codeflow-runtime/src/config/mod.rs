//! Runtime configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env`)
//! 3. Library defaults (`defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use codeflow_runtime::config::RuntimeConfig;
//! use codeflow_runtime::TpPolicyKind;
//!
//! let config = RuntimeConfig::from_env()
//!     .num_clusters(2)
//!     .workers_per_cluster(4)
//!     .tp_policy(TpPolicyKind::PushFull);
//! ```

pub mod defaults;

use crate::scheduler::TpPolicyKind;

use codeflow_core::constants::{MAX_CLUSTERS, MAX_WORKERS_PER_CLUSTER};
use codeflow_core::env::{env_get, env_get_bool, env_get_micros, env_get_opt};
use codeflow_core::{FifoBackend, SchedError};

use std::time::Duration;

/// Shape and tuning of the scheduler hierarchy
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Top-level schedulers
    pub num_clusters: usize,
    /// Micro schedulers per top-level scheduler
    pub workers_per_cluster: usize,
    /// Policy every top-level scheduler runs
    pub tp_policy: TpPolicyKind,
    /// Bounded queue of each micro scheduler
    pub micro_queue_capacity: usize,
    /// Fifo capacity when a link has no override
    pub fifo_capacity: usize,
    /// Backend of links made by `Runtime::stream`
    pub fifo_backend: FifoBackend,
    /// Top-level poll loop sleep, first step
    pub backoff_min: Duration,
    /// Top-level poll loop sleep, ceiling
    pub backoff_max: Duration,
    /// Micro scheduler spins (and yields) before parking
    pub idle_spins: u32,
    /// Micro scheduler park timeout
    pub park_timeout: Duration,
    /// Pin each worker thread to a core
    pub pin_threads: bool,
    /// Raise the log level to debug
    pub debug_logging: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Library defaults with environment overrides
    ///
    /// Environment variables (all optional):
    /// - `CFL_CLUSTERS` - Top-level schedulers
    /// - `CFL_WORKERS_PER_CLUSTER` - Micro schedulers per cluster
    /// - `CFL_TP_POLICY` - roundrobin, pushfull, static, dynamic, workpush
    /// - `CFL_MICRO_QUEUE_CAPACITY` - Micro scheduler queue size
    /// - `CFL_FIFO_CAPACITY` - Default Fifo capacity
    /// - `CFL_FIFO_BACKEND` - soft, lockfree, msgq
    /// - `CFL_BACKOFF_MIN_US` / `CFL_BACKOFF_MAX_US` - Poll loop sleep bounds
    /// - `CFL_IDLE_SPINS` - Spins before parking
    /// - `CFL_PARK_TIMEOUT_US` - Park timeout
    /// - `CFL_PIN_THREADS` - Pin workers to cores (0/1)
    /// - `CFL_DEBUG` - Debug logging (0/1)
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            num_clusters: env_get("CFL_CLUSTERS", base.num_clusters),
            workers_per_cluster: env_get("CFL_WORKERS_PER_CLUSTER", base.workers_per_cluster),
            tp_policy: env_get_opt("CFL_TP_POLICY").unwrap_or(base.tp_policy),
            micro_queue_capacity: env_get("CFL_MICRO_QUEUE_CAPACITY", base.micro_queue_capacity),
            fifo_capacity: env_get("CFL_FIFO_CAPACITY", base.fifo_capacity),
            fifo_backend: env_get_opt("CFL_FIFO_BACKEND").unwrap_or(base.fifo_backend),
            backoff_min: env_get_micros("CFL_BACKOFF_MIN_US", base.backoff_min),
            backoff_max: env_get_micros("CFL_BACKOFF_MAX_US", base.backoff_max),
            idle_spins: env_get("CFL_IDLE_SPINS", base.idle_spins),
            park_timeout: env_get_micros("CFL_PARK_TIMEOUT_US", base.park_timeout),
            pin_threads: env_get_bool("CFL_PIN_THREADS", base.pin_threads),
            debug_logging: env_get_bool("CFL_DEBUG", base.debug_logging),
        }
    }

    /// Library defaults only, no environment lookups
    pub fn new() -> Self {
        Self {
            num_clusters: defaults::NUM_CLUSTERS,
            workers_per_cluster: defaults::WORKERS_PER_CLUSTER,
            tp_policy: defaults::TP_POLICY.parse().unwrap_or_default(),
            micro_queue_capacity: defaults::MICRO_QUEUE_CAPACITY,
            fifo_capacity: defaults::FIFO_CAPACITY,
            fifo_backend: defaults::FIFO_BACKEND.parse().unwrap_or_default(),
            backoff_min: Duration::from_micros(defaults::BACKOFF_MIN_US),
            backoff_max: Duration::from_micros(defaults::BACKOFF_MAX_US),
            idle_spins: defaults::IDLE_SPINS,
            park_timeout: Duration::from_micros(defaults::PARK_TIMEOUT_US),
            pin_threads: defaults::PIN_THREADS,
            debug_logging: defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn num_clusters(mut self, n: usize) -> Self {
        self.num_clusters = n;
        self
    }

    pub fn workers_per_cluster(mut self, n: usize) -> Self {
        self.workers_per_cluster = n;
        self
    }

    pub fn tp_policy(mut self, policy: TpPolicyKind) -> Self {
        self.tp_policy = policy;
        self
    }

    pub fn micro_queue_capacity(mut self, cap: usize) -> Self {
        self.micro_queue_capacity = cap;
        self
    }

    pub fn fifo_capacity(mut self, cap: usize) -> Self {
        self.fifo_capacity = cap;
        self
    }

    pub fn fifo_backend(mut self, backend: FifoBackend) -> Self {
        self.fifo_backend = backend;
        self
    }

    pub fn backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max;
        self
    }

    pub fn idle_spins(mut self, spins: u32) -> Self {
        self.idle_spins = spins;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn pin_threads(mut self, enable: bool) -> Self {
        self.pin_threads = enable;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Total OS threads: one per top-level scheduler plus its micro schedulers
    pub fn total_threads(&self) -> usize {
        self.num_clusters * (self.workers_per_cluster + 1)
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_clusters == 0 {
            return Err(ConfigError::InvalidValue("num_clusters must be > 0"));
        }
        if self.num_clusters > MAX_CLUSTERS {
            return Err(ConfigError::InvalidValue("num_clusters must be <= 64"));
        }
        if self.workers_per_cluster > MAX_WORKERS_PER_CLUSTER {
            return Err(ConfigError::InvalidValue("workers_per_cluster must be <= 256"));
        }
        if self.workers_per_cluster == 0 && self.tp_policy.needs_sub_schedulers() {
            return Err(ConfigError::InvalidValue(
                "policy dispatches to micro schedulers; workers_per_cluster must be > 0",
            ));
        }
        if self.micro_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("micro_queue_capacity must be > 0"));
        }
        if self.fifo_capacity == 0 {
            return Err(ConfigError::InvalidValue("fifo_capacity must be > 0"));
        }
        if self.backoff_min.is_zero() {
            return Err(ConfigError::InvalidValue("backoff_min must be > 0"));
        }
        if self.backoff_min > self.backoff_max {
            return Err(ConfigError::InvalidValue("backoff_min must be <= backoff_max"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("codeflow configuration:");
        eprintln!("  num_clusters:          {}", self.num_clusters);
        eprintln!("  workers_per_cluster:   {}", self.workers_per_cluster);
        eprintln!("  tp_policy:             {}", self.tp_policy);
        eprintln!("  micro_queue_capacity:  {}", self.micro_queue_capacity);
        eprintln!("  fifo_capacity:         {}", self.fifo_capacity);
        eprintln!("  fifo_backend:          {}", self.fifo_backend);
        eprintln!("  backoff:               {:?}..{:?}", self.backoff_min, self.backoff_max);
        eprintln!("  idle_spins:            {}", self.idle_spins);
        eprintln!("  park_timeout:          {:?}", self.park_timeout);
        eprintln!("  pin_threads:           {}", self.pin_threads);
        eprintln!("  debug_logging:         {}", self.debug_logging);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for SchedError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => SchedError::InvalidConfig(msg),
        }
    }
}
