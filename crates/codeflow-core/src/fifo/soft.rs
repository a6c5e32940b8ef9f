//! `SoftFifo` - lock-based ring buffer
//!
//! One spinlock guards head, tail and the full/empty flag pair, so push,
//! pop, peek and clear are mutually exclusive. Full and empty are told
//! apart by the flags, not by a sacrificed slot: every slot is usable.
//!
//! ```text
//! push: !full  -> slots[tail] = v; tail = (tail+1) % cap; full  = tail == head
//! pop:  !empty -> v = slots[head]; head = (head+1) % cap; empty = head == tail
//! ```

use super::{empty_error, Fifo, FifoControl, FifoHeader, FifoMeta};
use crate::error::{PopError, PushError};
use crate::id::FifoId;
use crate::spinlock::SpinLock;

struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    full: bool,
    empty: bool,
    closed: bool,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            full: capacity == 0,
            empty: true,
            closed: false,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        if self.full {
            self.capacity()
        } else if self.empty {
            0
        } else if self.tail > self.head {
            self.tail - self.head
        } else {
            self.capacity() - self.head + self.tail
        }
    }

    fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.full = self.capacity() == 0;
        self.empty = true;
    }
}

/// Lock-based bounded Fifo
pub struct SoftFifo<T> {
    header: FifoHeader,
    ring: SpinLock<Ring<T>>,
}

impl<T> SoftFifo<T> {
    /// Standalone queue with no producer/consumer identity
    pub fn new(capacity: usize) -> Self {
        Self::with_header(FifoHeader::new(
            FifoMeta::new(FifoId::new(0), capacity, super::FifoBackend::Soft).for_elem::<T>(),
        ))
    }

    pub fn with_header(header: FifoHeader) -> Self {
        let capacity = header.meta().capacity;
        Self {
            header,
            ring: SpinLock::new(Ring::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.header.meta().capacity
    }

    pub fn is_full(&self) -> bool {
        self.ring.lock().full
    }
}

impl<T: Send> FifoControl for SoftFifo<T> {
    fn header(&self) -> &FifoHeader {
        &self.header
    }

    fn len(&self) -> usize {
        self.ring.lock().len()
    }

    fn clear(&self) {
        self.ring.lock().reset();
    }

    fn close(&self) {
        self.ring.lock().closed = true;
    }

    fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }
}

impl<T: Send> Fifo<T> for SoftFifo<T> {
    fn push(&self, value: T) -> Result<(), PushError<T>> {
        let mut ring = self.ring.lock();
        if ring.closed {
            return Err(PushError::Closed(value));
        }
        if ring.full {
            return Err(PushError::Full(value));
        }
        let tail = ring.tail;
        ring.slots[tail] = Some(value);
        ring.tail = (tail + 1) % ring.capacity();
        ring.empty = false;
        if ring.tail == ring.head {
            ring.full = true;
        }
        Ok(())
    }

    fn pop(&self) -> Result<T, PopError> {
        let mut ring = self.ring.lock();
        if ring.empty {
            return Err(empty_error(ring.closed, self.header.producer_done()));
        }
        let head = ring.head;
        let value = ring.slots[head].take();
        ring.head = (head + 1) % ring.capacity();
        ring.full = false;
        if ring.head == ring.tail {
            ring.empty = true;
        }
        value.ok_or(PopError::Empty)
    }

    fn peek(&self) -> Result<T, PopError>
    where
        T: Clone,
    {
        let ring = self.ring.lock();
        if ring.empty {
            return Err(empty_error(ring.closed, self.header.producer_done()));
        }
        ring.slots[ring.head].clone().ok_or(PopError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::FifoBackend;
    use crate::id::{CodeletKey, ProcId};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_four_boundary() {
        let q = SoftFifo::<i32>::new(4);
        for v in 0..3 {
            q.push(v).unwrap();
            assert!(!q.is_full());
        }
        // 4th push succeeds and sets full
        q.push(3).unwrap();
        assert!(q.is_full());
        assert_eq!(q.len(), 4);

        // Further pushes fail until a pop
        assert!(matches!(q.push(4), Err(PushError::Full(4))));
        assert!(matches!(q.push(5), Err(PushError::Full(5))));

        assert_eq!(q.pop(), Ok(0));
        assert!(!q.is_full());
        q.push(4).unwrap();
        assert!(q.is_full());
    }

    #[test]
    fn test_pop_empty_fails() {
        let q = SoftFifo::<i32>::new(2);
        assert_eq!(q.pop(), Err(PopError::Empty));
        assert_eq!(q.peek(), Err(PopError::Empty));
        q.push(1).unwrap();
        q.pop().unwrap();
        assert_eq!(q.pop(), Err(PopError::Empty));
    }

    #[test]
    fn test_wraps_around() {
        let q = SoftFifo::<u32>::new(3);
        let mut expected = 0;
        for round in 0..10u32 {
            q.push(round * 2).unwrap();
            q.push(round * 2 + 1).unwrap();
            assert_eq!(q.pop(), Ok(expected));
            assert_eq!(q.pop(), Ok(expected + 1));
            expected += 2;
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_peek_does_not_remove() {
        let q = SoftFifo::<String>::new(2);
        q.push("a".to_string()).unwrap();
        q.push("b".to_string()).unwrap();
        assert_eq!(q.peek().as_deref(), Ok("a"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().as_deref(), Ok("a"));
        assert_eq!(q.peek().as_deref(), Ok("b"));
    }

    #[test]
    fn test_clear_resets() {
        let q = SoftFifo::<u8>::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.clear();
        assert!(q.is_empty());
        assert!(!q.is_full());
        q.push(3).unwrap();
        assert_eq!(q.pop(), Ok(3));
    }

    #[test]
    fn test_producer_consumer_threads() {
        const N: u32 = 10_000;
        let q = Arc::new(SoftFifo::<u32>::new(10));

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..N {
                    let mut v = i;
                    loop {
                        match q.push(v) {
                            Ok(()) => break,
                            Err(e) => {
                                v = e.into_inner();
                                std::hint::spin_loop();
                            }
                        }
                    }
                }
            })
        };

        let mut got = Vec::with_capacity(N as usize);
        while got.len() < N as usize {
            match q.pop() {
                Ok(v) => got.push(v),
                Err(_) => std::hint::spin_loop(),
            }
        }
        producer.join().unwrap();
        assert!(got.iter().copied().eq(0..N));
    }

    #[test]
    fn test_drain_after_producer_detach() {
        let q = Arc::new(SoftFifo::<u32>::with_header(FifoHeader::with_endpoints(
            FifoMeta::new(FifoId::new(3), 4, FifoBackend::Soft),
            CodeletKey::new(ProcId::new(1), 0),
            CodeletKey::new(ProcId::new(1), 1),
        )));
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for v in 0..100 {
                    let mut v = v;
                    while let Err(e) = q.push(v) {
                        v = e.into_inner();
                        std::hint::spin_loop();
                    }
                }
                q.disassoc_prod();
            })
        };

        let mut got = Vec::new();
        loop {
            match q.pop() {
                Ok(v) => got.push(v),
                Err(PopError::Empty) => std::hint::spin_loop(),
                Err(PopError::Closed) => break,
            }
        }
        producer.join().unwrap();
        assert!(got.iter().copied().eq(0..100));
    }
}
