//! CPU affinity and topology
//!
//! The runtime asks an `AffinityProvider` for its shape (clusters and
//! micro schedulers per cluster) and, when pinning is on, for the core of
//! every worker thread. Worker threads are numbered cluster by cluster:
//!
//! ```text
//! cluster c:  top-level thread = c * (M + 1)
//!             micro m          = c * (M + 1) + 1 + m
//! ```
//!
//! # Platform Support
//!
//! - **Linux**: allowed-core discovery and pinning via `nix::sched`,
//!   current core via `sched_getcpu`
//! - **Other**: cores are `0..available_parallelism`, pinning is a no-op

use crate::scheduler::TpPolicyKind;

use codeflow_core::{kdebug, WorkerError};

use core::fmt;
use core::str::FromStr;

/// How worker threads are laid out over the allowed cores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distribution {
    /// Stride across the machine so clusters land far apart
    #[default]
    Spread,
    /// Consecutive cores
    Compact,
}

impl FromStr for Distribution {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spread" => Ok(Distribution::Spread),
            "compact" => Ok(Distribution::Compact),
            _ => Err("unknown distribution (expected spread or compact)"),
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distribution::Spread => f.write_str("spread"),
            Distribution::Compact => f.write_str("compact"),
        }
    }
}

/// Topology and placement source for the runtime
pub trait AffinityProvider: Send {
    /// Discover the usable cores; false when none can be found
    fn generate_mask(&mut self) -> bool;

    fn clusters(&self) -> usize;

    fn workers_per_cluster(&self) -> usize;

    /// Core for worker thread `worker` (numbered as in the module docs)
    fn core_for(&self, worker: usize) -> Option<usize>;

    /// Policy the provider was configured with, if it carries one
    fn policy(&self) -> Option<TpPolicyKind> {
        None
    }
}

/// Default provider: a cluster × worker grid over the allowed cores
#[derive(Debug, Clone)]
pub struct ThreadAffinity {
    clusters: usize,
    workers: usize,
    distribution: Distribution,
    policy: TpPolicyKind,
    cores: Vec<usize>,
}

impl ThreadAffinity {
    pub fn new(
        workers: usize,
        clusters: usize,
        distribution: Distribution,
        policy: TpPolicyKind,
    ) -> Self {
        Self {
            clusters,
            workers,
            distribution,
            policy,
            cores: Vec::new(),
        }
    }

    /// Cores found by the last `generate_mask`
    pub fn cores(&self) -> &[usize] {
        &self.cores
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    fn total_threads(&self) -> usize {
        self.clusters * (self.workers + 1)
    }
}

impl AffinityProvider for ThreadAffinity {
    fn generate_mask(&mut self) -> bool {
        self.cores = allowed_cores();
        kdebug!(
            "affinity: {} cores for {} threads ({})",
            self.cores.len(),
            self.total_threads(),
            self.distribution
        );
        !self.cores.is_empty() && self.clusters > 0
    }

    fn clusters(&self) -> usize {
        self.clusters
    }

    fn workers_per_cluster(&self) -> usize {
        self.workers
    }

    fn core_for(&self, worker: usize) -> Option<usize> {
        let n = self.cores.len();
        if n == 0 {
            return None;
        }
        let slot = match self.distribution {
            Distribution::Compact => worker % n,
            Distribution::Spread => {
                let stride = (n / self.total_threads().max(1)).max(1);
                (worker * stride + worker / n) % n
            }
        };
        Some(self.cores[slot])
    }

    fn policy(&self) -> Option<TpPolicyKind> {
        Some(self.policy)
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
        use nix::unistd::Pid;

        /// Cores this process may run on (respects cgroups and taskset)
        pub fn allowed_cores() -> Vec<usize> {
            match sched_getaffinity(Pid::from_raw(0)) {
                Ok(set) => (0..CpuSet::count())
                    .filter(|&c| set.is_set(c).unwrap_or(false))
                    .collect(),
                Err(_) => fallback_cores(),
            }
        }

        /// Pin the calling thread to `core`
        pub fn pin_current(core: usize) -> Result<(), WorkerError> {
            let mut set = CpuSet::new();
            set.set(core).map_err(|_| WorkerError::AffinityFailed)?;
            sched_setaffinity(Pid::from_raw(0), &set).map_err(|_| WorkerError::AffinityFailed)
        }

        /// Core the calling thread is running on right now
        pub fn current_core() -> Option<usize> {
            // Safety: no arguments, returns -1 on failure
            let cpu = unsafe { libc::sched_getcpu() };
            usize::try_from(cpu).ok()
        }
    } else {
        pub fn allowed_cores() -> Vec<usize> {
            fallback_cores()
        }

        pub fn pin_current(_core: usize) -> Result<(), WorkerError> {
            Ok(())
        }

        pub fn current_core() -> Option<usize> {
            None
        }
    }
}

fn fallback_cores() -> Vec<usize> {
    let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    (0..n).collect()
}
