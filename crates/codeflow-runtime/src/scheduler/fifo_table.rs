//! Live-Fifo table of one top-level scheduler
//!
//! Every queue the scheduler wires is registered here. An entry whose
//! producer and consumer have both detached is reaped: closed, cleared and
//! dropped from the table. The stream links keep their own handles, so a
//! reaped queue is freed when the last link clone goes away.

use codeflow_core::{kdebug, FifoControl, FifoId, SpinLock};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct FifoTable {
    live: SpinLock<Vec<Arc<dyn FifoControl>>>,
    next_id: AtomicU64,
}

impl Default for FifoTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FifoTable {
    pub fn new() -> Self {
        Self {
            live: SpinLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Id for the next queue this scheduler wires
    pub fn next_id(&self) -> FifoId {
        FifoId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, fifo: Arc<dyn FifoControl>) {
        self.live.lock().push(fifo);
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries with no producer and no consumer; returns how many
    pub fn reap(&self) -> usize {
        let dead: Vec<Arc<dyn FifoControl>> = {
            let mut live = self.live.lock();
            let (dead, keep): (Vec<_>, Vec<_>) = live.drain(..).partition(|f| f.is_detached());
            *live = keep;
            dead
        };
        for fifo in &dead {
            kdebug!("reap {} ({} left queued)", fifo.meta().id, fifo.len());
            fifo.close();
            fifo.clear();
        }
        dead.len()
    }

    /// Close and clear every entry; returns how many
    pub fn destroy_all(&self) -> usize {
        let all = core::mem::take(&mut *self.live.lock());
        for fifo in &all {
            fifo.close();
            fifo.clear();
        }
        all.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeflow_core::{new_fifo, CodeletKey, FifoBackend, FifoHeader, FifoMeta, ProcId};

    fn wired(table: &FifoTable) -> Arc<dyn FifoControl> {
        let tp = ProcId::new(1);
        let meta = FifoMeta::new(table.next_id(), 4, FifoBackend::Soft).for_elem::<u32>();
        let header =
            FifoHeader::with_endpoints(meta, CodeletKey::new(tp, 0), CodeletKey::new(tp, 1));
        let pair = new_fifo::<u32>(FifoBackend::Soft, header);
        pair.typed.push(1).unwrap();
        table.insert(Arc::clone(&pair.control));
        pair.control
    }

    #[test]
    fn test_ids_are_sequential() {
        let t = FifoTable::new();
        assert_eq!(t.next_id(), FifoId::new(1));
        assert_eq!(t.next_id(), FifoId::new(2));
    }

    #[test]
    fn test_reap_only_detached() {
        let t = FifoTable::new();
        let a = wired(&t);
        let b = wired(&t);

        a.disassoc_prod();
        assert_eq!(t.reap(), 0, "consumer still attached");

        a.disassoc_cons();
        assert_eq!(t.reap(), 1);
        assert_eq!(t.len(), 1);
        assert!(a.is_closed());
        assert!(a.is_empty());
        assert!(!b.is_closed());
    }

    #[test]
    fn test_destroy_all() {
        let t = FifoTable::new();
        let a = wired(&t);
        let _b = wired(&t);
        assert_eq!(t.destroy_all(), 2);
        assert!(t.is_empty());
        assert!(a.is_closed());
    }
}
