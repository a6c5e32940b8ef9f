//! `MicroScheduler` - bounded queue drained by one worker thread
//!
//! The worker pops codelets and fires them with teardown bookkeeping. When
//! the queue runs dry it spins, then yields, then parks with a timeout; a
//! push unparks it.

use super::SubScheduler;

use codeflow_core::{kdebug, kprint, CodeletRef, ThreadedProcedure};

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, Thread};
use std::time::Duration;

pub struct MicroScheduler {
    cluster: usize,
    index: usize,
    queue: ArrayQueue<CodeletRef>,
    alive: AtomicBool,
    parked: AtomicBool,
    thread: OnceLock<Thread>,
    idle_spins: u32,
    park_timeout: Duration,
    executed: AtomicU64,
    destroyed: AtomicU64,
}

/// Counters of one micro scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MicroStats {
    pub executed: u64,
    pub procedures_destroyed: u64,
}

impl MicroScheduler {
    pub fn new(
        cluster: usize,
        index: usize,
        capacity: usize,
        idle_spins: u32,
        park_timeout: Duration,
    ) -> Self {
        Self {
            cluster,
            index,
            queue: ArrayQueue::new(capacity.max(1)),
            alive: AtomicBool::new(true),
            parked: AtomicBool::new(false),
            thread: OnceLock::new(),
            idle_spins,
            park_timeout,
            executed: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        }
    }

    pub fn cluster(&self) -> usize {
        self.cluster
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Log tag of this scheduler's worker thread
    pub fn tag(&self) -> String {
        format!("mc{}.{}", self.cluster, self.index)
    }

    pub fn stats(&self) -> MicroStats {
        MicroStats {
            executed: self.executed.load(Ordering::Relaxed),
            procedures_destroyed: self.destroyed.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Fire one codelet on the calling thread; returns false when idle
    pub fn run_once(&self) -> bool {
        match self.queue.pop() {
            Some(cd) => {
                if ThreadedProcedure::complete_one(cd) {
                    self.destroyed.fetch_add(1, Ordering::Relaxed);
                }
                self.executed.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Worker loop; returns after `stop`
    pub fn run_loop(&self) {
        let _ = self.thread.set(thread::current());
        kprint::set_context(self.tag());
        kdebug!("micro scheduler started");

        let spins = self.idle_spins;
        let mut idle = 0u32;
        while self.is_alive() {
            if self.run_once() {
                idle = 0;
                continue;
            }
            idle = idle.saturating_add(1);
            if idle <= spins {
                std::hint::spin_loop();
            } else if idle <= spins.saturating_mul(2) {
                thread::yield_now();
            } else {
                self.parked.store(true, Ordering::SeqCst);
                if self.queue.is_empty() && self.is_alive() {
                    thread::park_timeout(self.park_timeout);
                }
                self.parked.store(false, Ordering::SeqCst);
            }
        }

        kdebug!("micro scheduler stopped ({} executed)", self.executed.load(Ordering::Relaxed));
        kprint::clear_context();
    }

    pub fn stop(&self) {
        self.alive.store(false, Ordering::Release);
        self.wake();
    }

    /// Drop anything still queued; returns how many
    pub fn drain(&self) -> usize {
        let mut n = 0;
        while self.queue.pop().is_some() {
            n += 1;
        }
        n
    }

    fn wake(&self) {
        if let Some(t) = self.thread.get() {
            t.unpark();
        }
    }
}

impl SubScheduler for MicroScheduler {
    fn push_codelet(&self, cd: CodeletRef) -> Result<(), CodeletRef> {
        self.queue.push(cd)?;
        if self.parked.load(Ordering::SeqCst) {
            self.wake();
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeflow_core::{Codelet, ProcedureBuilder, ReadySink};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<CodeletRef>>);

    impl ReadySink for Collect {
        fn push_codelet(&self, cd: CodeletRef) {
            self.0.lock().unwrap().push(cd);
        }
    }

    fn ready_codelets(n: usize, hits: &Arc<AtomicUsize>) -> Vec<CodeletRef> {
        let mut b = ProcedureBuilder::new();
        for _ in 0..n {
            let hits = hits.clone();
            b.add(Codelet::new(0, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let tp = b.build().unwrap();
        let sink = Arc::new(Collect::default());
        tp.launch(sink.clone());
        let out = std::mem::take(&mut *sink.0.lock().unwrap());
        out
    }

    #[test]
    fn test_rejects_when_full() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mc = MicroScheduler::new(0, 0, 2, 1, Duration::from_millis(1));
        let mut cds = ready_codelets(3, &hits).into_iter();

        assert!(mc.push_codelet(cds.next().unwrap()).is_ok());
        assert!(mc.push_codelet(cds.next().unwrap()).is_ok());
        let back = mc.push_codelet(cds.next().unwrap()).unwrap_err();
        assert_eq!(back.index(), 2);
        assert_eq!(mc.len(), 2);
    }

    #[test]
    fn test_run_once_fires_and_tears_down() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mc = MicroScheduler::new(0, 1, 8, 1, Duration::from_millis(1));
        for cd in ready_codelets(2, &hits) {
            mc.push_codelet(cd).unwrap();
        }
        assert!(mc.run_once());
        assert!(mc.run_once());
        assert!(!mc.run_once());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(
            mc.stats(),
            MicroStats { executed: 2, procedures_destroyed: 1 }
        );
    }

    #[test]
    fn test_worker_thread_wakes_on_push() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mc = Arc::new(MicroScheduler::new(0, 0, 8, 1, Duration::from_millis(50)));
        let worker = {
            let mc = Arc::clone(&mc);
            thread::spawn(move || mc.run_loop())
        };

        // Let it reach the park phase
        thread::sleep(Duration::from_millis(10));
        for cd in ready_codelets(4, &hits) {
            mc.push_codelet(cd).unwrap();
        }
        while hits.load(Ordering::SeqCst) < 4 {
            thread::yield_now();
        }

        mc.stop();
        worker.join().unwrap();
        assert_eq!(mc.stats().executed, 4);
        assert_eq!(mc.tag(), "mc0.0");
    }
}
