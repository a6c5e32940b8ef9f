//! # codeflow - codelet dataflow engine
//!
//! Fine-grained task graphs expressed as codelets guarded by dependency
//! counters, executed by a hierarchy of schedulers over a fixed pool of OS
//! threads. Adjacent codelets can stream data element by element through a
//! bounded Fifo instead of waiting for full completion.
//!
//! ## Quick Start
//!
//! ```ignore
//! use codeflow::{Codelet, ProcedureBuilder, Runtime, RuntimeConfig};
//!
//! let rt = Runtime::from_config(RuntimeConfig::from_env())?;
//! rt.run(|done| {
//!     let mut b = ProcedureBuilder::new().named("hello");
//!     let end = b.next_index() + 1;
//!     b.add(Codelet::new(0, |_| println!("start")).signal(end));
//!     b.add(Codelet::new(1, |_| println!("end")).signal_to(done));
//!     b.build()
//! })?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//!                 Runtime::run(launch)
//!                          │ round robin over clusters
//!          ┌───────────────┴───────────────┐
//!          ▼                               ▼
//!   ┌─────────────┐   steal launch   ┌─────────────┐
//!   │  tp0 (top)  │ ◄──────────────► │  tp1 (top)  │
//!   │ launch/ready│                  │ launch/ready│
//!   │ Fifo wiring │                  │ Fifo wiring │
//!   └──────┬──────┘                  └──────┬──────┘
//!     ┌────┴────┐                      ┌────┴────┐
//!     ▼         ▼                      ▼         ▼
//!  mc0.0     mc0.1                  mc1.0     mc1.1
//! ```

mod signal;

pub use signal::FinalSignal;

// Re-export core types
pub use codeflow_core::{
    same_link, Codelet, CodeletKey, CodeletKind, CodeletRef, FifoBackend, FireContext, PopError,
    ProcId, ProcedureBuilder, PushError, RetryPolicy, SchedError, SchedResult, Signal, StreamLink,
    StreamPorts, Target, ThreadedProcedure, WorkerError,
};

// Re-export kprint macros for debug logging
pub use codeflow_core::{fatal, kdebug, kerror, kinfo, kprint, kprintln, ktrace, kwarn};
pub use codeflow_core::kprint::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};

// Re-export env utilities
pub use codeflow_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use codeflow_runtime::{
    AffinityProvider, ConfigError, Distribution, MicroStats, RuntimeConfig, StatsSnapshot,
    ThreadAffinity, TpPolicyKind,
};

use codeflow_runtime::worker::thread_index;
use codeflow_runtime::{
    LaunchClosure, MicroScheduler, SubScheduler, TpScheduler, WorkerPool, WorkerSpec,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Cluster {
    tp: Arc<TpScheduler>,
    micros: Vec<Arc<MicroScheduler>>,
}

/// Runtime handle owning the scheduler hierarchy and its threads
pub struct Runtime {
    config: RuntimeConfig,
    clusters: Vec<Cluster>,
    pool: WorkerPool,
    next_cluster: AtomicUsize,
    running: AtomicBool,
}

impl Runtime {
    /// Build the hierarchy described by `affinity` and start its threads
    ///
    /// The provider decides the shape (clusters, micro schedulers per
    /// cluster) and the core of every thread; `config` supplies the rest.
    pub fn new(config: RuntimeConfig, mut affinity: impl AffinityProvider) -> SchedResult<Self> {
        codeflow_core::kprint::init();
        if config.debug_logging && codeflow_core::kprint::log_level() < LogLevel::Debug {
            set_log_level(LogLevel::Debug);
        }

        let config = config
            .num_clusters(affinity.clusters())
            .workers_per_cluster(affinity.workers_per_cluster());
        config.validate()?;

        if !affinity.generate_mask() {
            kerror!("affinity provider found no usable cores");
            return Err(SchedError::AffinityUnavailable);
        }
        if let Some(p) = affinity.policy() {
            if p != config.tp_policy {
                kwarn!("affinity provider policy {} ignored, running {}", p, config.tp_policy);
            }
        }

        let clusters = build_clusters(&config);
        let mut rt = Self {
            pool: WorkerPool::new(config.total_threads()),
            config,
            clusters,
            next_cluster: AtomicUsize::new(0),
            running: AtomicBool::new(true),
        };
        // On a spawn failure `rt` drops here and joins what did start
        rt.spawn_workers(&affinity)?;

        kdebug!(
            "runtime up: {} clusters x {} micro schedulers, policy {}",
            rt.clusters.len(),
            rt.config.workers_per_cluster,
            rt.config.tp_policy
        );
        Ok(rt)
    }

    /// Shape taken from `config`, threads spread over the allowed cores
    pub fn from_config(config: RuntimeConfig) -> SchedResult<Self> {
        let affinity = ThreadAffinity::new(
            config.workers_per_cluster,
            config.num_clusters,
            Distribution::Spread,
            config.tp_policy,
        );
        Self::new(config, affinity)
    }

    fn spawn_workers(&mut self, affinity: &impl AffinityProvider) -> SchedResult<()> {
        let m = self.config.workers_per_cluster;
        let pin = self.config.pin_threads;
        let core = |idx: usize| if pin { affinity.core_for(idx) } else { None };

        for (c, cluster) in self.clusters.iter().enumerate() {
            for (i, mc) in cluster.micros.iter().enumerate() {
                let idx = thread_index(c, m, Some(i));
                let mc = mc.clone();
                self.pool.spawn(
                    WorkerSpec::new(idx, format!("cfl-mc{}.{}", c, i)).pinned(core(idx)),
                    move || mc.run_loop(),
                )?;
            }
            let idx = thread_index(c, m, None);
            let tp = cluster.tp.clone();
            self.pool.spawn(
                WorkerSpec::new(idx, format!("cfl-tp{}", c)).pinned(core(idx)),
                move || tp.run_loop(),
            )?;
        }
        Ok(())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// New stream link using the configured backend
    pub fn stream<T: Send + 'static>(&self) -> StreamLink<T> {
        StreamLink::new(self.config.fifo_backend)
    }

    /// Queue a launch closure and return its completion signal
    ///
    /// `launch` runs on a scheduler thread and receives the signal the
    /// built procedure must fire when it is done.
    pub fn submit<F>(&self, launch: F) -> SchedResult<Arc<FinalSignal>>
    where
        F: FnOnce(Arc<dyn Signal>) -> SchedResult<Arc<ThreadedProcedure>> + Send + 'static,
    {
        if !self.is_running() {
            return Err(SchedError::NotRunning);
        }
        let done = Arc::new(FinalSignal::new());
        let signal: Arc<dyn Signal> = done.clone();
        let on_err = done.clone();
        let closure = LaunchClosure::new(move || {
            let built = launch(signal);
            if let Err(e) = &built {
                on_err.fail(e.clone());
            }
            built
        })
        .labeled("run");

        let c = self.next_cluster.fetch_add(1, Ordering::Relaxed) % self.clusters.len();
        self.clusters[c].tp.enqueue_launch(closure);
        Ok(done)
    }

    /// Launch a procedure and block until it signals completion
    pub fn run<F>(&self, launch: F) -> SchedResult<()>
    where
        F: FnOnce(Arc<dyn Signal>) -> SchedResult<Arc<ThreadedProcedure>> + Send + 'static,
    {
        self.submit(launch)?.wait()
    }

    /// Like `run`, failing with `SchedError::Timeout` when the procedure
    /// does not complete in time (a stalled pipeline)
    pub fn run_timeout<F>(&self, launch: F, timeout: Duration) -> SchedResult<()>
    where
        F: FnOnce(Arc<dyn Signal>) -> SchedResult<Arc<ThreadedProcedure>> + Send + 'static,
    {
        let done = self.submit(launch)?;
        let res = done.wait_timeout(timeout);
        if res == Err(SchedError::Timeout) {
            kwarn!("run did not complete within {:?}", timeout);
        }
        res
    }

    /// Counters summed over all top-level schedulers
    pub fn stats(&self) -> StatsSnapshot {
        let mut total = StatsSnapshot::default();
        for cluster in &self.clusters {
            total += cluster.tp.stats();
        }
        total
    }

    /// Counters of every micro scheduler, cluster by cluster
    pub fn micro_stats(&self) -> Vec<MicroStats> {
        self.clusters
            .iter()
            .flat_map(|c| c.micros.iter().map(|mc| mc.stats()))
            .collect()
    }

    /// Stop every scheduler loop and join the threads
    ///
    /// Work still queued is dropped. Calling it again is a no-op.
    pub fn shutdown(&mut self) -> SchedResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for cluster in &self.clusters {
            cluster.tp.stop();
            for mc in &cluster.micros {
                mc.stop();
            }
        }
        let joined = self.pool.join();

        let mut dropped = 0;
        for cluster in &self.clusters {
            dropped += cluster.tp.drain();
            dropped += cluster.micros.iter().map(|mc| mc.drain()).sum::<usize>();
        }
        kdebug!("runtime down, {} queued items dropped, {:?}", dropped, self.stats());
        joined.map_err(SchedError::from)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            kerror!("runtime shutdown: {}", e);
        }
    }
}

fn build_clusters(config: &RuntimeConfig) -> Vec<Cluster> {
    let clusters: Vec<Cluster> = (0..config.num_clusters)
        .map(|c| {
            let micros: Vec<Arc<MicroScheduler>> = (0..config.workers_per_cluster)
                .map(|i| {
                    Arc::new(MicroScheduler::new(
                        c,
                        i,
                        config.micro_queue_capacity,
                        config.idle_spins,
                        config.park_timeout,
                    ))
                })
                .collect();
            let subs: Vec<Arc<dyn SubScheduler>> = micros
                .iter()
                .map(|mc| mc.clone() as Arc<dyn SubScheduler>)
                .collect();
            Cluster { tp: Arc::new(TpScheduler::new(c, config, subs)), micros }
        })
        .collect();

    let peers: Vec<_> = clusters.iter().map(|c| Arc::downgrade(&c.tp)).collect();
    for cluster in &clusters {
        cluster.tp.set_peers(peers.clone());
    }
    clusters
}
