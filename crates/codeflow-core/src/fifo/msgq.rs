//! `MsgQFifo` - message-queue backed stream
//!
//! Unbounded: push always succeeds while the queue is open. `pop` blocks
//! until an element arrives, the producer detaches or the queue is closed;
//! `peek` polls and never blocks. `capacity` in the meta is advisory for
//! this backend.

use super::{empty_error, Fifo, FifoBackend, FifoControl, FifoHeader, FifoMeta};
use crate::error::{PopError, PushError};
use crate::id::FifoId;

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

struct Queue<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Message-queue Fifo with blocking pop
pub struct MsgQFifo<T> {
    header: FifoHeader,
    queue: Mutex<Queue<T>>,
    ready: Condvar,
}

impl<T> MsgQFifo<T> {
    pub fn new() -> Self {
        Self::with_header(FifoHeader::new(
            FifoMeta::new(FifoId::new(0), 0, FifoBackend::MsgQ).for_elem::<T>(),
        ))
    }

    pub fn with_header(header: FifoHeader) -> Self {
        let hint = header.meta().capacity;
        Self {
            header,
            queue: Mutex::new(Queue {
                items: VecDeque::with_capacity(hint),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    // A panic while holding the lock cannot leave the deque half-updated
    fn lock(&self) -> MutexGuard<'_, Queue<T>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Non-blocking pop
    pub fn try_pop(&self) -> Result<T, PopError> {
        let mut q = self.lock();
        match q.items.pop_front() {
            Some(v) => Ok(v),
            None => Err(empty_error(q.closed, self.header.producer_done())),
        }
    }

    /// Pop, waiting at most `timeout` for an element
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, PopError> {
        let q = self.lock();
        let (mut q, _) = self
            .ready
            .wait_timeout_while(q, timeout, |q| self.starved(q))
            .unwrap_or_else(|e| e.into_inner());
        match q.items.pop_front() {
            Some(v) => Ok(v),
            None => Err(empty_error(q.closed, self.header.producer_done())),
        }
    }

    // Nothing queued and something may still arrive
    fn starved(&self, q: &Queue<T>) -> bool {
        q.items.is_empty() && !q.closed && !self.header.producer_done()
    }
}

impl<T> Default for MsgQFifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> FifoControl for MsgQFifo<T> {
    fn header(&self) -> &FifoHeader {
        &self.header
    }

    fn len(&self) -> usize {
        self.lock().items.len()
    }

    fn clear(&self) {
        self.lock().items.clear();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn disassoc_prod(&self) {
        // Under the queue lock so a blocked pop cannot miss the wakeup
        let q = self.lock();
        self.header.detach_producer();
        drop(q);
        self.ready.notify_all();
    }
}

impl<T: Send> Fifo<T> for MsgQFifo<T> {
    /// `qPut`
    fn push(&self, value: T) -> Result<(), PushError<T>> {
        let mut q = self.lock();
        if q.closed {
            return Err(PushError::Closed(value));
        }
        q.items.push_back(value);
        drop(q);
        self.ready.notify_one();
        Ok(())
    }

    /// `qGet`: blocks until an element, end of stream or close
    fn pop(&self) -> Result<T, PopError> {
        let q = self.lock();
        let mut q = self
            .ready
            .wait_while(q, |q| self.starved(q))
            .unwrap_or_else(|e| e.into_inner());
        q.items.pop_front().ok_or(PopError::Closed)
    }

    /// `qPoll`
    fn peek(&self) -> Result<T, PopError>
    where
        T: Clone,
    {
        let q = self.lock();
        match q.items.front() {
            Some(v) => Ok(v.clone()),
            None => Err(empty_error(q.closed, self.header.producer_done())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{CodeletKey, ProcId};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_is_unbounded() {
        let q = MsgQFifo::<u32>::new();
        for v in 0..1000 {
            q.push(v).unwrap();
        }
        assert_eq!(q.len(), 1000);
        assert_eq!(q.peek(), Ok(0));
        assert_eq!(q.pop(), Ok(0));
        assert_eq!(q.len(), 999);
    }

    #[test]
    fn test_poll_and_try_pop_on_empty() {
        let q = MsgQFifo::<u32>::new();
        assert_eq!(q.peek(), Err(PopError::Empty));
        assert_eq!(q.try_pop(), Err(PopError::Empty));
        assert_eq!(q.pop_timeout(Duration::from_millis(5)), Err(PopError::Empty));
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let q = Arc::new(MsgQFifo::<u64>::new());
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(20));
        q.push(77).unwrap();
        assert_eq!(consumer.join().unwrap(), Ok(77));
    }

    #[test]
    fn test_close_wakes_blocked_pop() {
        let q = Arc::new(MsgQFifo::<u64>::new());
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(consumer.join().unwrap(), Err(PopError::Closed));
    }

    #[test]
    fn test_producer_detach_wakes_blocked_pop() {
        let p = CodeletKey::new(ProcId::new(2), 0);
        let c = CodeletKey::new(ProcId::new(2), 1);
        let meta = FifoMeta::new(FifoId::new(5), 0, FifoBackend::MsgQ);
        let q = Arc::new(MsgQFifo::<u64>::with_header(FifoHeader::with_endpoints(meta, p, c)));
        q.push(8).unwrap();

        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || (q.pop(), q.pop()))
        };
        thread::sleep(Duration::from_millis(20));
        q.disassoc_prod();

        assert_eq!(consumer.join().unwrap(), (Ok(8), Err(PopError::Closed)));
        assert!(!q.is_closed());
        assert_eq!(q.try_pop(), Err(PopError::Closed));
    }

    #[test]
    fn test_drains_after_close() {
        let q = MsgQFifo::<u8>::new();
        q.push(1).unwrap();
        q.close();
        assert!(matches!(q.push(2), Err(PushError::Closed(2))));
        assert_eq!(q.pop(), Ok(1));
        assert_eq!(q.pop(), Err(PopError::Closed));
    }
}
