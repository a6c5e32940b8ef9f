//! Per-scheduler counters

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SchedStats {
    pub(crate) launched: AtomicU64,
    pub(crate) stolen: AtomicU64,
    pub(crate) fired_locally: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) fifos_allocated: AtomicU64,
    pub(crate) fifos_reaped: AtomicU64,
    pub(crate) procedures_destroyed: AtomicU64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl SchedStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            launched: get(&self.launched),
            stolen: get(&self.stolen),
            fired_locally: get(&self.fired_locally),
            dispatched: get(&self.dispatched),
            rejected: get(&self.rejected),
            fifos_allocated: get(&self.fifos_allocated),
            fifos_reaped: get(&self.fifos_reaped),
            procedures_destroyed: get(&self.procedures_destroyed),
        }
    }
}

/// Point-in-time copy of `SchedStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Launch closures run (own and stolen)
    pub launched: u64,
    /// Launch closures taken from a peer
    pub stolen: u64,
    pub fired_locally: u64,
    /// Codelets accepted by a micro scheduler
    pub dispatched: u64,
    /// Push attempts a micro scheduler refused
    pub rejected: u64,
    pub fifos_allocated: u64,
    pub fifos_reaped: u64,
    pub procedures_destroyed: u64,
}

impl core::ops::AddAssign for StatsSnapshot {
    fn add_assign(&mut self, o: Self) {
        self.launched += o.launched;
        self.stolen += o.stolen;
        self.fired_locally += o.fired_locally;
        self.dispatched += o.dispatched;
        self.rejected += o.rejected;
        self.fifos_allocated += o.fifos_allocated;
        self.fifos_reaped += o.fifos_reaped;
        self.procedures_destroyed += o.procedures_destroyed;
    }
}
