//! `LockFreeFifo` - single-producer/single-consumer ring
//!
//! head and tail are monotonically increasing counters; the slot index is
//! `counter % capacity`. The ring is empty when `head == tail` and full when
//! `tail - head == capacity`, so every slot is usable.
//!
//! # Atomics
//!
//! - producer: reads head (Acquire) to check fullness, writes the slot,
//!   publishes tail (Release)
//! - consumer: reads tail (Acquire) to check emptiness, reads the slot,
//!   publishes head (Release)
//!
//! Only one producer thread and one consumer thread may use a ring at a
//! time. Each side carries an ownership flag; a second thread entering the
//! same side is a discipline violation and aborts.

use super::{empty_error, Fifo, FifoBackend, FifoControl, FifoHeader, FifoMeta};
use crate::error::{PopError, PushError};
use crate::id::FifoId;
use crate::fatal;

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[repr(align(64))]
struct Padded<T>(T);

/// Lock-free bounded SPSC Fifo
pub struct LockFreeFifo<T> {
    header: FifoHeader,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Consumer position
    head: Padded<AtomicUsize>,
    /// Producer position
    tail: Padded<AtomicUsize>,
    producing: AtomicBool,
    consuming: AtomicBool,
    closed: AtomicBool,
}

// Safety: a slot is written only by the producer between its fullness check
// and the tail publish, and read only by the consumer between its emptiness
// check and the head publish. The side flags keep each side single-threaded.
unsafe impl<T: Send> Send for LockFreeFifo<T> {}
unsafe impl<T: Send> Sync for LockFreeFifo<T> {}

/// Holds one side of the ring for the duration of an operation
struct SideGuard<'a>(&'a AtomicBool);

impl<'a> SideGuard<'a> {
    fn enter(flag: &'a AtomicBool, side: &str) -> Self {
        if flag
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            fatal!("LockFreeFifo: concurrent {} on a single-{} ring", side, side);
        }
        SideGuard(flag)
    }

    fn enter_wait(flag: &'a AtomicBool) -> Self {
        while flag
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        SideGuard(flag)
    }
}

impl Drop for SideGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T> LockFreeFifo<T> {
    /// `initBuff(capacity)`
    pub fn new(capacity: usize) -> Self {
        Self::with_header(FifoHeader::new(
            FifoMeta::new(FifoId::new(0), capacity, FifoBackend::LockFree).for_elem::<T>(),
        ))
    }

    pub fn with_header(header: FifoHeader) -> Self {
        let capacity = header.meta().capacity;
        Self {
            header,
            slots: (0..capacity)
                .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
                .collect(),
            head: Padded(AtomicUsize::new(0)),
            tail: Padded(AtomicUsize::new(0)),
            producing: AtomicBool::new(false),
            consuming: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn slot(&self, counter: usize) -> *mut MaybeUninit<T> {
        self.slots[counter % self.slots.len()].get()
    }

    /// Consumer-side pop without the closed check; caller holds the consumer side
    fn take_one(&self) -> Option<T> {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // Safety: head < tail, so the producer initialized this slot and
        // published it with the Release store on tail.
        let value = unsafe { (*self.slot(head)).assume_init_read() };
        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

impl<T: Send> FifoControl for LockFreeFifo<T> {
    fn header(&self) -> &FifoHeader {
        &self.header
    }

    fn len(&self) -> usize {
        let tail = self.tail.0.load(Ordering::Acquire);
        let head = self.head.0.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(self.capacity())
    }

    fn clear(&self) {
        let _consumer = SideGuard::enter_wait(&self.consuming);
        while self.take_one().is_some() {}
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T: Send> Fifo<T> for LockFreeFifo<T> {
    fn push(&self, value: T) -> Result<(), PushError<T>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PushError::Closed(value));
        }
        let _producer = SideGuard::enter(&self.producing, "producer");
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.capacity() {
            return Err(PushError::Full(value));
        }
        // Safety: the slot is outside [head, tail), so the consumer is not reading it
        unsafe { (*self.slot(tail)).write(value) };
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// `pull`
    fn pop(&self) -> Result<T, PopError> {
        let _consumer = SideGuard::enter(&self.consuming, "consumer");
        // Loaded before the emptiness check: a detach seen here follows the last push
        let done = self.header.producer_done();
        match self.take_one() {
            Some(v) => Ok(v),
            None => Err(empty_error(self.closed.load(Ordering::Acquire), done)),
        }
    }

    fn peek(&self) -> Result<T, PopError>
    where
        T: Clone,
    {
        let _consumer = SideGuard::enter(&self.consuming, "consumer");
        let done = self.header.producer_done();
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        if head == tail {
            return Err(empty_error(self.closed.load(Ordering::Acquire), done));
        }
        // Safety: same publication argument as take_one; we only borrow
        Ok(unsafe { (*self.slot(head)).assume_init_ref().clone() })
    }
}

impl<T> Drop for LockFreeFifo<T> {
    fn drop(&mut self) {
        let mut head = *self.head.0.get_mut();
        let tail = *self.tail.0.get_mut();
        while head != tail {
            // Safety: exclusive access; [head, tail) are initialized
            unsafe { (*self.slot(head)).assume_init_drop() };
            head = head.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_all_slots_usable() {
        let q = LockFreeFifo::<u32>::new(4);
        for v in 0..4 {
            q.push(v).unwrap();
        }
        assert_eq!(q.len(), 4);
        assert!(matches!(q.push(99), Err(PushError::Full(99))));
        assert_eq!(q.pop(), Ok(0));
        q.push(4).unwrap();
        let rest: Vec<u32> = (0..4).map(|_| q.pop().unwrap()).collect();
        assert_eq!(rest, vec![1, 2, 3, 4]);
        assert_eq!(q.pop(), Err(PopError::Empty));
    }

    #[test]
    fn test_peek_and_clear() {
        let q = LockFreeFifo::<String>::new(3);
        q.push("x".into()).unwrap();
        q.push("y".into()).unwrap();
        assert_eq!(q.peek().as_deref(), Ok("x"));
        assert_eq!(q.len(), 2);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.peek(), Err(PopError::Empty));
    }

    #[test]
    fn test_drop_releases_queued_values() {
        let marker = Arc::new(());
        {
            let q = LockFreeFifo::<Arc<()>>::new(4);
            q.push(Arc::clone(&marker)).unwrap();
            q.push(Arc::clone(&marker)).unwrap();
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_spsc_threads_preserve_order() {
        const N: u64 = 50_000;
        let q = Arc::new(LockFreeFifo::<u64>::new(16));

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..N {
                    let mut v = i;
                    while let Err(e) = q.push(v) {
                        v = e.into_inner();
                        std::hint::spin_loop();
                    }
                }
            })
        };

        let mut next = 0;
        while next < N {
            if let Ok(v) = q.pop() {
                assert_eq!(v, next);
                next += 1;
            }
        }
        producer.join().unwrap();
    }
}
