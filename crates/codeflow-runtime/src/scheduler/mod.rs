//! Top-level scheduler (one per cluster)
//!
//! Owns a stealable launch queue, a ready-codelet queue, the live-Fifo
//! table and the sub-schedulers of its cluster. One OS thread runs
//! `run_loop`:
//!
//! ```text
//! while alive {
//!     1. pop a launch closure (or steal one from a peer) and launch it
//!     2. drain the ready queue:
//!          prepare(cd)   - wire the stream if cd is an unwired producer
//!          dispatch(cd)  - per policy: sub-scheduler or local fire
//!     3. nothing found: sleep (1us doubling to 500us), reap dead Fifos
//! }
//! ```
//!
//! Only this thread pops the ready queue. Anyone may push to it (that is
//! how `dec_dep` makes codelets ready), and peers may steal launch
//! closures, but wiring and popping a producer never race.

mod fifo_table;
mod launch;
mod policy;
mod stats;

pub use fifo_table::FifoTable;
pub use launch::LaunchClosure;
pub use policy::TpPolicyKind;
pub use stats::{SchedStats, StatsSnapshot};

use crate::config::RuntimeConfig;
use crate::sub_scheduler::SubScheduler;
use stats::bump;

use codeflow_core::{
    fatal, kdebug, kprint, ktrace, kwarn, CodeletRef, FifoControl, FifoMeta, IdleBackoff, ReadySink,
    ThreadedProcedure,
};

use crossbeam_deque::{Injector, Steal};
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

pub struct TpScheduler {
    id: usize,
    policy: TpPolicyKind,
    launch: Injector<LaunchClosure>,
    ready: SegQueue<CodeletRef>,
    subs: Vec<Arc<dyn SubScheduler>>,
    peers: OnceLock<Vec<Weak<TpScheduler>>>,
    fifos: FifoTable,
    rr: AtomicUsize,
    stats: SchedStats,
    alive: AtomicBool,
    fifo_capacity: usize,
    backoff_min: Duration,
    backoff_max: Duration,
}

impl TpScheduler {
    pub fn new(id: usize, config: &RuntimeConfig, subs: Vec<Arc<dyn SubScheduler>>) -> Self {
        Self {
            id,
            policy: config.tp_policy,
            launch: Injector::new(),
            ready: SegQueue::new(),
            subs,
            peers: OnceLock::new(),
            fifos: FifoTable::new(),
            rr: AtomicUsize::new(0),
            stats: SchedStats::default(),
            alive: AtomicBool::new(true),
            fifo_capacity: config.fifo_capacity,
            backoff_min: config.backoff_min,
            backoff_max: config.backoff_max,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn policy(&self) -> TpPolicyKind {
        self.policy
    }

    pub fn num_subs(&self) -> usize {
        self.subs.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn fifos(&self) -> &FifoTable {
        &self.fifos
    }

    /// Log tag of this scheduler's thread
    pub fn tag(&self) -> String {
        format!("tp{}", self.id)
    }

    /// Peers to steal launch closures from; set once, self entries ignored
    pub fn set_peers(&self, peers: Vec<Weak<TpScheduler>>) {
        if self.peers.set(peers).is_err() {
            kwarn!("peers of tp{} already set", self.id);
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Round-robin sub-scheduler index
    #[inline]
    pub fn next_index(&self) -> usize {
        self.rr.fetch_add(1, Ordering::Relaxed) % self.subs.len().max(1)
    }

    /// Queue a launch closure on this scheduler
    pub fn enqueue_launch(&self, closure: LaunchClosure) {
        self.launch.push(closure);
    }

    pub fn pending_launches(&self) -> usize {
        self.launch.len()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn pop_ready(&self) -> Option<CodeletRef> {
        self.ready.pop()
    }

    // ------------------------------------------------------------------
    // Step 1: launch or steal
    // ------------------------------------------------------------------

    fn pop_launch(&self) -> Option<LaunchClosure> {
        steal_one(&self.launch)
    }

    fn steal_launch(&self) -> Option<LaunchClosure> {
        if !self.policy.steals() {
            return None;
        }
        let peers = self.peers.get()?;
        for peer in peers.iter().filter_map(Weak::upgrade) {
            if peer.id == self.id {
                continue;
            }
            if let Some(closure) = steal_one(&peer.launch) {
                ktrace!("stole {:?} from tp{}", closure, peer.id);
                bump(&self.stats.stolen);
                return Some(closure);
            }
        }
        None
    }

    /// Build the procedure and push its initially ready codelets here
    fn run_launch(self: &Arc<Self>, closure: LaunchClosure) {
        let label = closure.label();
        match closure.build() {
            Ok(tp) => {
                bump(&self.stats.launched);
                let sink: Arc<dyn ReadySink> = self.clone();
                tp.launch(sink);
            }
            Err(e) => kwarn!("launch closure {} failed: {}", label, e),
        }
    }

    // ------------------------------------------------------------------
    // Step 2: prepare and dispatch
    // ------------------------------------------------------------------

    /// Wire `cd`'s outbound stream if it is an unwired producer
    ///
    /// Allocates the queue, installs it in the shared link, registers it in
    /// the live-Fifo table and signals the consumer once. Returns true when
    /// this call did the wiring.
    ///
    /// A link already wired for a different producer means two procedures
    /// share one stream link; its consumer would never be signalled, so
    /// that is fatal.
    pub fn prepare(&self, cd: &CodeletRef) -> bool {
        let Some(ports) = cd.codelet().ports() else {
            return false;
        };
        let (Some(consumer), Some(out)) = (ports.consumer, ports.outbound.as_ref()) else {
            return false;
        };
        if let Some(fifo) = out.fifo() {
            check_wired_for(cd, fifo.as_ref());
            return false;
        }

        let capacity = out.capacity().unwrap_or(self.fifo_capacity);
        let meta = FifoMeta::new(self.fifos.next_id(), capacity, out.backend())
            .cluster(self.id as u64);
        let consumer = cd.procedure().codelet_ref(consumer);

        match out.wire(meta, cd.key(), consumer.key()) {
            Some(fifo) => {
                kdebug!(
                    "wired {} {} -> {} ({} x{})",
                    fifo.meta().id,
                    cd,
                    consumer,
                    fifo.meta().backend,
                    capacity
                );
                self.fifos.insert(fifo);
                bump(&self.stats.fifos_allocated);
                consumer.dec_dep();
                true
            }
            None => {
                if let Some(fifo) = out.fifo() {
                    check_wired_for(cd, fifo.as_ref());
                }
                false
            }
        }
    }

    /// Fire on this thread with teardown bookkeeping
    fn fire_local(&self, cd: CodeletRef) {
        bump(&self.stats.fired_locally);
        if ThreadedProcedure::complete_one(cd) {
            bump(&self.stats.procedures_destroyed);
        }
    }

    /// Push to sub-schedulers round robin until one accepts
    fn push_until_accepted(&self, mut cd: CodeletRef) {
        let n = self.subs.len();
        let mut misses = 0usize;
        loop {
            match self.subs[self.next_index()].push_codelet(cd) {
                Ok(()) => {
                    bump(&self.stats.dispatched);
                    return;
                }
                Err(back) => {
                    bump(&self.stats.rejected);
                    cd = back;
                    misses += 1;
                    if misses % n == 0 {
                        if !self.is_alive() {
                            kwarn!("dropping {} at shutdown, all sub-schedulers full", cd);
                            return;
                        }
                        // Every sub-scheduler is full; give them time to drain
                        std::thread::yield_now();
                    }
                }
            }
        }
    }

    /// Try each sub-scheduler once from the round-robin offset
    fn push_once_each(&self, mut cd: CodeletRef) -> Result<(), CodeletRef> {
        let n = self.subs.len();
        let start = self.next_index();
        for k in 0..n {
            match self.subs[(start + k) % n].push_codelet(cd) {
                Ok(()) => {
                    bump(&self.stats.dispatched);
                    return Ok(());
                }
                Err(back) => {
                    bump(&self.stats.rejected);
                    cd = back;
                }
            }
        }
        Err(cd)
    }

    pub fn dispatch(&self, cd: CodeletRef) {
        match self.policy {
            TpPolicyKind::RoundRobin | TpPolicyKind::WorkPush if !self.subs.is_empty() => {
                self.push_until_accepted(cd)
            }
            TpPolicyKind::PushFull => {
                if let Err(cd) = self.push_once_each(cd) {
                    ktrace!("all sub-schedulers full, firing {} locally", cd);
                    self.fire_local(cd);
                }
            }
            _ => self.fire_local(cd),
        }
    }

    /// Drain the ready queue; returns how many codelets were handled
    pub fn drain_ready(&self) -> usize {
        let mut n = 0;
        while let Some(cd) = self.ready.pop() {
            self.prepare(&cd);
            self.dispatch(cd);
            n += 1;
        }
        n
    }

    /// One loop iteration; returns true when any work was found
    pub fn poll_once(self: &Arc<Self>) -> bool {
        let closure = self.pop_launch().or_else(|| self.steal_launch());
        let launched = match closure {
            Some(closure) => {
                self.run_launch(closure);
                true
            }
            None => false,
        };
        let handled = self.drain_ready();
        launched || handled > 0
    }

    pub fn run_loop(self: &Arc<Self>) {
        kprint::set_context(self.tag());
        kdebug!("{} scheduler started with {} sub-schedulers", self.policy, self.subs.len());

        let mut backoff = IdleBackoff::new(self.backoff_min, self.backoff_max);
        while self.is_alive() {
            if self.poll_once() {
                backoff.reset();
                continue;
            }
            let reaped = self.fifos.reap();
            if reaped > 0 {
                self.stats.fifos_reaped.fetch_add(reaped as u64, Ordering::Relaxed);
            }
            backoff.idle();
        }

        if self.policy.clears_fifos_on_exit() {
            let n = self.fifos.destroy_all();
            kdebug!("destroyed {} fifos at exit", n);
        }
        kdebug!("scheduler stopped: {:?}", self.stats());
        kprint::clear_context();
    }

    /// Drop queued launch closures and ready codelets; returns how many
    pub fn drain(&self) -> usize {
        let mut n = 0;
        while self.pop_launch().is_some() {
            n += 1;
        }
        while self.ready.pop().is_some() {
            n += 1;
        }
        n
    }
}

impl ReadySink for TpScheduler {
    fn push_codelet(&self, cd: CodeletRef) {
        let hint = cd.codelet().placement_hint();
        if self.policy.routes_by_placement()
            && hint != 0
            && !self.subs.is_empty()
            && !cd.codelet().is_streaming()
        {
            let target = (hint as usize - 1) % self.subs.len();
            match self.subs[target].push_codelet(cd) {
                Ok(()) => {
                    bump(&self.stats.dispatched);
                    return;
                }
                Err(back) => {
                    bump(&self.stats.rejected);
                    self.ready.push(back);
                    return;
                }
            }
        }
        self.ready.push(cd);
    }
}

fn steal_one<T>(queue: &Injector<T>) -> Option<T> {
    loop {
        match queue.steal() {
            Steal::Success(v) => return Some(v),
            Steal::Empty => return None,
            Steal::Retry => std::hint::spin_loop(),
        }
    }
}

// A wired link must belong to the producer being prepared
fn check_wired_for(cd: &CodeletRef, fifo: &dyn FifoControl) {
    if fifo.producer() != Some(cd.key()) {
        fatal!(
            "{}: stream link {} already wired for {:?} -> {:?}",
            cd,
            fifo.meta().id,
            fifo.producer(),
            fifo.consumer()
        );
    }
}
