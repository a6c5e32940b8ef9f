//! Stream links between a producer codelet and a consumer codelet
//!
//! A `StreamLink<T>` is created by the application, handed to the producer
//! (`Codelet::produces`) and to the consumer (`Codelet::consumes`), and
//! captured by both bodies. No queue exists until the scheduler pops the
//! producer and wires the link through its untyped `StreamEndpoint` view;
//! from then on both sides resolve to the same queue instance.
//!
//! When the producer codelet finishes, its end of the queue is detached and
//! the consumer sees `PopError::Closed` once the queue is drained, so a
//! consumer can loop until end of stream without knowing the count.
//!
//! ```ignore
//! let link = StreamLink::<u64>::new(FifoBackend::Soft);
//!
//! let out = link.clone();
//! let load = Codelet::new(0, move |_| {
//!     for v in 0..N { out.push_retry(v, &RetryPolicy::default()).ok(); }
//! }).produces(&link, COPY);
//!
//! let inp = link.clone();
//! let copy = Codelet::new(0, move |_| {
//!     while let Ok(v) = inp.pop_retry(&RetryPolicy::default()) { /* ... */ }
//! }).consumes(&link);
//! ```

use crate::backoff::RetryPolicy;
use crate::error::{PopError, PushError};
use crate::fatal;
use crate::fifo::{new_fifo, Fifo, FifoBackend, FifoControl, FifoHeader, FifoMeta, FifoPair};
use crate::id::CodeletKey;

use core::fmt;
use std::sync::{Arc, OnceLock};

/// Untyped view of a stream link, held by codelets and the scheduler
pub trait StreamEndpoint: Send + Sync {
    /// Install a fresh queue described by `meta`
    ///
    /// Returns the control view only to the call that installed it; every
    /// later call returns `None`. The element size is filled in from the
    /// link's element type.
    fn wire(
        &self,
        meta: FifoMeta,
        producer: CodeletKey,
        consumer: CodeletKey,
    ) -> Option<Arc<dyn FifoControl>>;

    /// The installed queue, if wired
    fn fifo(&self) -> Option<Arc<dyn FifoControl>>;

    fn backend(&self) -> FifoBackend;

    /// Per-link capacity override
    fn capacity(&self) -> Option<usize>;

    fn is_wired(&self) -> bool {
        self.fifo().is_some()
    }
}

/// Two endpoint handles refer to the same link
pub fn same_link(a: &Arc<dyn StreamEndpoint>, b: &Arc<dyn StreamEndpoint>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

struct LinkInner<T> {
    backend: FifoBackend,
    capacity: Option<usize>,
    slot: OnceLock<FifoPair<T>>,
}

impl<T: Send + 'static> StreamEndpoint for LinkInner<T> {
    fn wire(
        &self,
        meta: FifoMeta,
        producer: CodeletKey,
        consumer: CodeletKey,
    ) -> Option<Arc<dyn FifoControl>> {
        let mut installed = false;
        let pair = self.slot.get_or_init(|| {
            installed = true;
            let meta = meta.for_elem::<T>();
            new_fifo::<T>(meta.backend, FifoHeader::with_endpoints(meta, producer, consumer))
        });
        installed.then(|| Arc::clone(&pair.control))
    }

    fn fifo(&self) -> Option<Arc<dyn FifoControl>> {
        self.slot.get().map(|p| Arc::clone(&p.control))
    }

    fn backend(&self) -> FifoBackend {
        self.backend
    }

    fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

/// Typed handle to a producer/consumer stream
///
/// Cloning is cheap; all clones share one link.
pub struct StreamLink<T> {
    inner: Arc<LinkInner<T>>,
}

impl<T> Clone for StreamLink<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Send + 'static> StreamLink<T> {
    /// Link whose queue gets the scheduler's configured capacity
    pub fn new(backend: FifoBackend) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                backend,
                capacity: None,
                slot: OnceLock::new(),
            }),
        }
    }

    /// Link with its own queue capacity, at least one element
    pub fn with_capacity(backend: FifoBackend, capacity: usize) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                backend,
                capacity: Some(capacity.max(1)),
                slot: OnceLock::new(),
            }),
        }
    }

    pub fn endpoint(&self) -> Arc<dyn StreamEndpoint> {
        self.inner.clone()
    }

    pub fn is_wired(&self) -> bool {
        self.inner.slot.get().is_some()
    }

    pub fn backend(&self) -> FifoBackend {
        self.inner.backend
    }

    #[inline]
    fn queue(&self) -> &Arc<dyn Fifo<T>> {
        match self.inner.slot.get() {
            Some(pair) => &pair.typed,
            None => fatal!("stream link used before the scheduler wired it"),
        }
    }

    /// Single push attempt
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        self.queue().push(value)
    }

    /// Single pop attempt
    pub fn pop(&self) -> Result<T, PopError> {
        self.queue().pop()
    }

    pub fn peek(&self) -> Result<T, PopError>
    where
        T: Clone,
    {
        self.queue().peek()
    }

    /// Push, retrying on `Full` as `policy` allows
    ///
    /// `Closed` is returned at once. After the attempt budget runs out the
    /// value comes back in `PushError::Full`.
    pub fn push_retry(&self, value: T, policy: &RetryPolicy) -> Result<(), PushError<T>> {
        let q = self.queue();
        let mut step = policy.stepper();
        let mut value = value;
        loop {
            match q.push(value) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(v)) => {
                    if !step.wait() {
                        return Err(PushError::Full(v));
                    }
                    value = v;
                }
                Err(closed) => return Err(closed),
            }
        }
    }

    /// Pop, retrying on `Empty` as `policy` allows
    ///
    /// Returns `Closed` at once when the producer has detached and nothing
    /// is left, or when the queue was destroyed.
    pub fn pop_retry(&self, policy: &RetryPolicy) -> Result<T, PopError> {
        let q = self.queue();
        let mut step = policy.stepper();
        loop {
            match q.pop() {
                Err(PopError::Empty) if step.wait() => continue,
                other => return other,
            }
        }
    }

    /// Elements currently queued; 0 before wiring
    pub fn len(&self) -> usize {
        self.inner.slot.get().map_or(0, |p| p.control.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for StreamLink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamLink")
            .field("backend", &self.inner.backend)
            .field("capacity", &self.inner.capacity)
            .field("wired", &self.inner.slot.get().map(|p| *p.control.meta()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{FifoId, ProcId};
    use std::time::Duration;

    fn keys() -> (CodeletKey, CodeletKey) {
        let tp = ProcId::new(5);
        (CodeletKey::new(tp, 1), CodeletKey::new(tp, 2))
    }

    fn meta(capacity: usize) -> FifoMeta {
        FifoMeta::new(FifoId::new(3), capacity, FifoBackend::Soft)
    }

    #[test]
    fn test_wire_installs_exactly_once() {
        let link = StreamLink::<u32>::new(FifoBackend::Soft);
        let (p, c) = keys();
        let ep = link.endpoint();

        assert!(!ep.is_wired());
        let first = ep.wire(meta(4), p, c);
        assert!(first.is_some());
        assert!(ep.wire(meta(4), p, c).is_none());
        assert!(link.is_wired());

        let ctrl = first.unwrap();
        assert_eq!(ctrl.meta().elem_size, 4);
        assert_eq!(ctrl.producer(), Some(p));
        assert_eq!(ctrl.consumer(), Some(c));
    }

    #[test]
    fn test_both_handles_share_one_queue() {
        let link = StreamLink::<u64>::new(FifoBackend::Soft);
        let producer_side = link.clone();
        let consumer_side = link.clone();
        let (p, c) = keys();
        let ctrl = link.endpoint().wire(meta(2), p, c).unwrap();

        producer_side.push(10).unwrap();
        producer_side.push(20).unwrap();
        assert!(producer_side.push(30).is_err());
        assert_eq!(ctrl.len(), 2);
        assert_eq!(consumer_side.peek(), Ok(10));
        assert_eq!(consumer_side.pop(), Ok(10));
        assert_eq!(consumer_side.pop(), Ok(20));
        assert!(consumer_side.is_empty());

        let again = link.endpoint().fifo().unwrap();
        assert!(Arc::ptr_eq(&ctrl, &again));
    }

    #[test]
    fn test_same_link_identity() {
        let a = StreamLink::<u8>::new(FifoBackend::Soft);
        let b = StreamLink::<u8>::new(FifoBackend::Soft);
        assert!(same_link(&a.endpoint(), &a.clone().endpoint()));
        assert!(!same_link(&a.endpoint(), &b.endpoint()));
    }

    #[test]
    fn test_push_retry_gives_value_back() {
        let link = StreamLink::<String>::with_capacity(FifoBackend::LockFree, 1);
        let (p, c) = keys();
        link.endpoint()
            .wire(FifoMeta::new(FifoId::new(1), 1, FifoBackend::LockFree), p, c)
            .unwrap();

        link.push("a".into()).unwrap();
        let err = link.push_retry("b".into(), &RetryPolicy::spin(8)).unwrap_err();
        assert!(err.is_full());
        assert_eq!(err.into_inner(), "b");
    }

    #[test]
    fn test_pop_retry_waits_for_producer() {
        let link = StreamLink::<u32>::new(FifoBackend::Soft);
        let (p, c) = keys();
        link.endpoint().wire(meta(4), p, c).unwrap();

        let producer = {
            let link = link.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                link.push(9).unwrap();
            })
        };
        assert_eq!(link.pop_retry(&RetryPolicy::default()), Ok(9));
        producer.join().unwrap();
        assert_eq!(link.pop_retry(&RetryPolicy::spin(4)), Err(PopError::Empty));
    }

    #[test]
    fn test_consumer_loops_until_end_of_stream() {
        for backend in [FifoBackend::Soft, FifoBackend::LockFree, FifoBackend::MsgQ] {
            let link = StreamLink::<u32>::with_capacity(backend, 8);
            let (p, c) = keys();
            let ctrl = link
                .endpoint()
                .wire(FifoMeta::new(FifoId::new(7), 8, backend), p, c)
                .unwrap();

            let producer = {
                let link = link.clone();
                std::thread::spawn(move || {
                    for v in 0..200 {
                        link.push_retry(v, &RetryPolicy::default()).unwrap();
                    }
                    ctrl.disassoc_prod();
                })
            };

            let mut got = Vec::new();
            while let Ok(v) = link.pop_retry(&RetryPolicy::default()) {
                got.push(v);
            }
            producer.join().unwrap();
            assert!(got.iter().copied().eq(0..200), "backend {}", backend);
            assert_eq!(link.pop(), Err(PopError::Closed));
        }
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let link = StreamLink::<u8>::with_capacity(FifoBackend::Soft, 0);
        assert_eq!(link.endpoint().capacity(), Some(1));
        let link = StreamLink::<u8>::with_capacity(FifoBackend::Soft, 16);
        assert_eq!(link.endpoint().capacity(), Some(16));
    }
}
