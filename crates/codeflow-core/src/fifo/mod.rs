//! Bounded streaming queues
//!
//! A Fifo links exactly one producer codelet to exactly one consumer
//! codelet. Three interchangeable backends share one typed contract:
//!
//! - `SoftFifo` - lock-based ring, fixed capacity, non-blocking push/pop
//! - `LockFreeFifo` - single-producer/single-consumer ring with atomic indices
//! - `MsgQFifo` - message queue: unconditional push, blocking pop
//!
//! The element type is a compile-time parameter (`Fifo<T>`). What the
//! scheduler needs to track heterogeneous queues - capacity, element size,
//! producer/consumer identity - lives in the untyped `FifoMeta` /
//! `FifoHeader` pair and is reached through `FifoControl`, never by casting
//! back to a concrete queue type.
//!
//! # Full/empty convention
//!
//! Both bounded backends use counted occupancy: all `capacity` slots are
//! usable. A capacity-4 queue accepts 4 pushes; the 5th fails until a pop.
//!
//! # End of stream
//!
//! Once the producer has been detached (`disassoc_prod`), a pop on an empty
//! queue returns `PopError::Closed` instead of `Empty`: nothing more will
//! arrive. Elements pushed before the detach are still delivered first.

mod soft;
mod lockfree;
mod msgq;

pub use soft::SoftFifo;
pub use lockfree::LockFreeFifo;
pub use msgq::MsgQFifo;

use crate::error::{PopError, PushError};
use crate::id::{CodeletKey, FifoId};
use crate::spinlock::SpinLock;

use core::fmt;
use core::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which queue implementation backs a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FifoBackend {
    /// Lock-based ring buffer
    #[default]
    Soft,
    /// Lock-free single-producer/single-consumer ring
    LockFree,
    /// Message-queue backed, blocking pop
    MsgQ,
}

impl FifoBackend {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FifoBackend::Soft => "soft",
            FifoBackend::LockFree => "lockfree",
            FifoBackend::MsgQ => "msgq",
        }
    }

    /// True for backends whose push fails when `capacity` elements are queued
    pub const fn is_bounded(&self) -> bool {
        !matches!(self, FifoBackend::MsgQ)
    }
}

impl fmt::Display for FifoBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FifoBackend {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "soft" | "lock" | "locked" => Ok(FifoBackend::Soft),
            "lockfree" | "lock-free" | "spsc" | "ring" => Ok(FifoBackend::LockFree),
            "msgq" | "mq" | "message" => Ok(FifoBackend::MsgQ),
            _ => Err("unknown fifo backend (expected soft, lockfree or msgq)"),
        }
    }
}

/// Untyped description of a Fifo
///
/// Fixed at creation. `elem_size` is `size_of::<T>()` of the element type,
/// recorded so bookkeeping can reason about memory without knowing `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoMeta {
    pub id: FifoId,
    pub cluster: u64,
    pub local_mem: u64,
    pub capacity: usize,
    pub elem_size: usize,
    pub backend: FifoBackend,
}

impl FifoMeta {
    pub fn new(id: FifoId, capacity: usize, backend: FifoBackend) -> Self {
        Self {
            id,
            cluster: 0,
            local_mem: 0,
            capacity,
            elem_size: 0,
            backend,
        }
    }

    pub fn cluster(mut self, cluster: u64) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn local_mem(mut self, local_mem: u64) -> Self {
        self.local_mem = local_mem;
        self
    }

    /// Record the element size of `T`
    pub fn for_elem<T>(mut self) -> Self {
        self.elem_size = core::mem::size_of::<T>();
        self
    }
}

/// Metadata plus severable producer/consumer identity
///
/// Embedded in every backend. Detaching an endpoint only clears the
/// identity; the ring stays drainable until its owner destroys it.
pub struct FifoHeader {
    meta: FifoMeta,
    producer: SpinLock<Option<CodeletKey>>,
    consumer: SpinLock<Option<CodeletKey>>,
    /// Set once the producer has been detached
    producer_done: AtomicBool,
}

impl FifoHeader {
    pub fn new(meta: FifoMeta) -> Self {
        Self {
            meta,
            producer: SpinLock::new(None),
            consumer: SpinLock::new(None),
            producer_done: AtomicBool::new(false),
        }
    }

    pub fn with_endpoints(meta: FifoMeta, producer: CodeletKey, consumer: CodeletKey) -> Self {
        Self {
            meta,
            producer: SpinLock::new(Some(producer)),
            consumer: SpinLock::new(Some(consumer)),
            producer_done: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn meta(&self) -> &FifoMeta {
        &self.meta
    }

    fn detach_producer(&self) {
        self.producer.lock().take();
        self.producer_done.store(true, Ordering::Release);
    }

    /// The producer has detached; an empty queue will stay empty
    ///
    /// Backends must load this before checking for emptiness (or under
    /// the same lock as their pushes) so a final push is never missed.
    #[inline]
    pub fn producer_done(&self) -> bool {
        self.producer_done.load(Ordering::Acquire)
    }
}

/// Error for a pop on an empty queue
#[inline]
fn empty_error(closed: bool, producer_done: bool) -> PopError {
    if closed || producer_done {
        PopError::Closed
    } else {
        PopError::Empty
    }
}

impl fmt::Debug for FifoHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FifoHeader")
            .field("meta", &self.meta)
            .field("producer", &*self.producer.lock())
            .field("consumer", &*self.consumer.lock())
            .field("producer_done", &self.producer_done())
            .finish()
    }
}

/// Untyped view of a Fifo, used by the scheduler's live-Fifo table
pub trait FifoControl: Send + Sync {
    fn header(&self) -> &FifoHeader;

    /// Number of queued elements (approximate under concurrency)
    fn len(&self) -> usize;

    /// Drop all queued elements and reset the ring
    fn clear(&self);

    /// Mark the queue destroyed; later pushes and pops fail with `Closed`
    fn close(&self);

    fn is_closed(&self) -> bool;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn meta(&self) -> &FifoMeta {
        self.header().meta()
    }

    fn producer(&self) -> Option<CodeletKey> {
        *self.header().producer.lock()
    }

    fn consumer(&self) -> Option<CodeletKey> {
        *self.header().consumer.lock()
    }

    /// Sever the producer link and mark end of stream; idempotent, never deallocates
    fn disassoc_prod(&self) {
        self.header().detach_producer();
    }

    /// Sever the consumer link; idempotent, never deallocates
    fn disassoc_cons(&self) {
        self.header().consumer.lock().take();
    }

    /// Both endpoints have been severed
    fn is_detached(&self) -> bool {
        self.producer().is_none() && self.consumer().is_none()
    }
}

/// Typed queue contract shared by all backends
///
/// All operations report success or failure; none panics on a full or
/// empty queue. `peek` copies the head element out without removing it.
pub trait Fifo<T>: FifoControl {
    fn push(&self, value: T) -> Result<(), PushError<T>>;

    fn pop(&self) -> Result<T, PopError>;

    fn peek(&self) -> Result<T, PopError>
    where
        T: Clone;
}

/// Both views of one freshly created queue
pub struct FifoPair<T> {
    pub typed: Arc<dyn Fifo<T>>,
    pub control: Arc<dyn FifoControl>,
}

/// Construct a queue of the given backend
///
/// The two returned handles point at the same instance.
pub fn new_fifo<T>(backend: FifoBackend, header: FifoHeader) -> FifoPair<T>
where
    T: Send + 'static,
{
    match backend {
        FifoBackend::Soft => {
            let q = Arc::new(SoftFifo::<T>::with_header(header));
            FifoPair { typed: q.clone(), control: q }
        }
        FifoBackend::LockFree => {
            let q = Arc::new(LockFreeFifo::<T>::with_header(header));
            FifoPair { typed: q.clone(), control: q }
        }
        FifoBackend::MsgQ => {
            let q = Arc::new(MsgQFifo::<T>::with_header(header));
            FifoPair { typed: q.clone(), control: q }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ProcId;

    fn header(capacity: usize, backend: FifoBackend) -> FifoHeader {
        let p = CodeletKey::new(ProcId::new(1), 0);
        let c = CodeletKey::new(ProcId::new(1), 1);
        FifoHeader::with_endpoints(
            FifoMeta::new(FifoId::new(9), capacity, backend).for_elem::<u64>(),
            p,
            c,
        )
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("soft".parse::<FifoBackend>(), Ok(FifoBackend::Soft));
        assert_eq!("SPSC".parse::<FifoBackend>(), Ok(FifoBackend::LockFree));
        assert_eq!("msgq".parse::<FifoBackend>(), Ok(FifoBackend::MsgQ));
        assert!("ring-of-fire".parse::<FifoBackend>().is_err());
    }

    #[test]
    fn test_meta_records_elem_size() {
        let meta = FifoMeta::new(FifoId::new(1), 10, FifoBackend::Soft).for_elem::<u32>();
        assert_eq!(meta.elem_size, 4);
        assert_eq!(meta.capacity, 10);
    }

    #[test]
    fn test_round_trip_every_backend() {
        for backend in [FifoBackend::Soft, FifoBackend::LockFree, FifoBackend::MsgQ] {
            let pair = new_fifo::<u64>(backend, header(8, backend));
            for v in [3u64, 1, 4, 1, 5, 9, 2, 6] {
                pair.typed.push(v).unwrap();
            }
            assert_eq!(pair.control.len(), 8);
            let out: Vec<u64> = (0..8).map(|_| pair.typed.pop().unwrap()).collect();
            assert_eq!(out, vec![3, 1, 4, 1, 5, 9, 2, 6], "backend {}", backend);
        }
    }

    #[test]
    fn test_disassoc_is_idempotent_and_keeps_data() {
        let pair = new_fifo::<u64>(FifoBackend::Soft, header(4, FifoBackend::Soft));
        pair.typed.push(11).unwrap();

        pair.control.disassoc_prod();
        pair.control.disassoc_prod();
        assert!(pair.control.producer().is_none());
        assert!(pair.control.consumer().is_some());
        assert!(!pair.control.is_detached());

        pair.control.disassoc_cons();
        pair.control.disassoc_cons();
        assert!(pair.control.is_detached());

        // Still drainable after both ends are gone
        assert_eq!(pair.typed.pop(), Ok(11));
        assert_eq!(pair.typed.pop(), Err(PopError::Closed));
    }

    #[test]
    fn test_end_of_stream_every_backend() {
        for backend in [FifoBackend::Soft, FifoBackend::LockFree, FifoBackend::MsgQ] {
            let pair = new_fifo::<u64>(backend, header(4, backend));
            pair.typed.push(1).unwrap();
            pair.typed.push(2).unwrap();
            assert_eq!(pair.typed.pop(), Ok(1));
            if backend != FifoBackend::MsgQ {
                pair.typed.pop().unwrap();
                assert_eq!(pair.typed.pop(), Err(PopError::Empty), "backend {}", backend);
                pair.typed.push(2).unwrap();
            }

            pair.control.disassoc_prod();
            assert!(pair.control.header().producer_done());
            assert_eq!(pair.typed.peek(), Ok(2));
            assert_eq!(pair.typed.pop(), Ok(2), "backend {}", backend);
            assert_eq!(pair.typed.peek(), Err(PopError::Closed), "backend {}", backend);
            assert_eq!(pair.typed.pop(), Err(PopError::Closed), "backend {}", backend);
            assert!(!pair.control.is_closed());
        }
    }

    #[test]
    fn test_standalone_header_stays_empty() {
        let q = SoftFifo::<u8>::new(2);
        assert!(!q.header().producer_done());
        assert_eq!(q.pop(), Err(PopError::Empty));
    }

    #[test]
    fn test_close_rejects_every_backend() {
        for backend in [FifoBackend::Soft, FifoBackend::LockFree, FifoBackend::MsgQ] {
            let pair = new_fifo::<u64>(backend, header(4, backend));
            pair.control.close();
            assert!(pair.control.is_closed());
            assert!(matches!(pair.typed.push(1), Err(PushError::Closed(1))));
            assert_eq!(pair.typed.pop(), Err(PopError::Closed));
        }
    }
}
