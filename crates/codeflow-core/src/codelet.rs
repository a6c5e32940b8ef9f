//! Codelets: the unit of work
//!
//! A codelet is a run-to-completion body guarded by a dependency counter.
//! Each `dec_dep` takes one off the counter; the decrement that takes it
//! from 1 to 0 hands the codelet to its procedure's ready sink. When the
//! body returns, the codelet detaches from any wired stream and decrements
//! every target in its signal list exactly once.
//!
//! ```text
//!   deps=2 --dec--> deps=1 --dec--> deps=0 ==> ready sink ==> fire
//!                                                            |
//!                       targets[i].dec_dep()  <--------------+
//! ```
//!
//! Codelets do not point at their procedure. The scheduler passes them
//! around as `CodeletRef` = (procedure handle, index).

use crate::fatal;
use crate::id::CodeletKey;
use crate::procedure::ThreadedProcedure;
use crate::spinlock::SpinLock;
use crate::stream::{StreamEndpoint, StreamLink};

use core::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Anything that can receive a dependency signal
pub trait Signal: Send + Sync {
    fn dec_dep(&self);
}

/// One entry of a codelet's signal list
#[derive(Clone)]
pub enum Target {
    /// Codelet at this index in the same procedure
    Local(usize),
    /// Codelet in another procedure, or a completion signal
    External(Arc<dyn Signal>),
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Local(i) => write!(f, "Local({})", i),
            Target::External(_) => write!(f, "External(..)"),
        }
    }
}

/// Stream endpoints of a streaming codelet
#[derive(Default, Clone)]
pub struct StreamPorts {
    /// Downstream codelet wired when this codelet is first dispatched
    pub consumer: Option<usize>,
    /// Link this codelet pushes into
    pub outbound: Option<Arc<dyn StreamEndpoint>>,
    /// Link this codelet pops from
    pub inbound: Option<Arc<dyn StreamEndpoint>>,
}

impl StreamPorts {
    /// Producer side still waiting for its queue
    pub fn needs_wiring(&self) -> bool {
        self.consumer.is_some() && self.outbound.as_ref().is_some_and(|ep| !ep.is_wired())
    }
}

impl fmt::Debug for StreamPorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPorts")
            .field("consumer", &self.consumer)
            .field("outbound", &self.outbound.as_ref().map(|ep| ep.is_wired()))
            .field("inbound", &self.inbound.as_ref().map(|ep| ep.is_wired()))
            .finish()
    }
}

#[derive(Debug, Default, Clone)]
pub enum CodeletKind {
    #[default]
    Plain,
    Streaming(StreamPorts),
}

type Body = Box<dyn FnOnce(&FireContext<'_>) + Send>;

/// A dependency-guarded body
pub struct Codelet {
    deps: AtomicU32,
    initial_deps: u32,
    placement: u32,
    kind: CodeletKind,
    targets: Vec<Target>,
    body: SpinLock<Option<Body>>,
    name: Option<String>,
}

impl Codelet {
    /// Codelet that becomes ready after `deps` signals
    pub fn new<F>(deps: u32, body: F) -> Self
    where
        F: FnOnce(&FireContext<'_>) + Send + 'static,
    {
        Self {
            deps: AtomicU32::new(deps),
            initial_deps: deps,
            placement: crate::constants::NO_PLACEMENT,
            kind: CodeletKind::Plain,
            targets: Vec::new(),
            body: SpinLock::new(Some(Box::new(body))),
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Placement hint; 0 means none
    pub fn placement(mut self, hint: u32) -> Self {
        self.placement = hint;
        self
    }

    /// Signal the codelet at `index` in the same procedure on completion
    pub fn signal(mut self, index: usize) -> Self {
        self.targets.push(Target::Local(index));
        self
    }

    /// Signal an arbitrary target on completion
    pub fn signal_to(mut self, target: Arc<dyn Signal>) -> Self {
        self.targets.push(Target::External(target));
        self
    }

    fn ports_mut(&mut self) -> &mut StreamPorts {
        if let CodeletKind::Plain = self.kind {
            self.kind = CodeletKind::Streaming(StreamPorts::default());
        }
        match &mut self.kind {
            CodeletKind::Streaming(ports) => ports,
            CodeletKind::Plain => unreachable!(),
        }
    }

    /// Push into `link`, whose consumer is the codelet at `consumer`
    pub fn produces<T: Send + 'static>(mut self, link: &StreamLink<T>, consumer: usize) -> Self {
        let ports = self.ports_mut();
        ports.consumer = Some(consumer);
        ports.outbound = Some(link.endpoint());
        self
    }

    /// Pop from `link`
    ///
    /// Adds one dependency, satisfied when the scheduler wires the link.
    pub fn consumes<T: Send + 'static>(mut self, link: &StreamLink<T>) -> Self {
        self.ports_mut().inbound = Some(link.endpoint());
        self.initial_deps += 1;
        *self.deps.get_mut() += 1;
        self
    }

    #[inline]
    pub fn deps(&self) -> u32 {
        self.deps.load(Ordering::Acquire)
    }

    #[inline]
    pub fn initial_deps(&self) -> u32 {
        self.initial_deps
    }

    #[inline]
    pub fn placement_hint(&self) -> u32 {
        self.placement
    }

    #[inline]
    pub fn kind(&self) -> &CodeletKind {
        &self.kind
    }

    pub fn ports(&self) -> Option<&StreamPorts> {
        match &self.kind {
            CodeletKind::Streaming(ports) => Some(ports),
            CodeletKind::Plain => None,
        }
    }

    #[inline]
    pub fn is_streaming(&self) -> bool {
        matches!(self.kind, CodeletKind::Streaming(_))
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Body already taken
    pub fn has_fired(&self) -> bool {
        self.body.lock().is_none()
    }
}

impl fmt::Debug for Codelet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codelet")
            .field("name", &self.name)
            .field("deps", &self.deps())
            .field("placement", &self.placement)
            .field("kind", &self.kind)
            .field("targets", &self.targets)
            .finish()
    }
}

/// Non-owning-by-codelet handle: procedure plus index
#[derive(Clone)]
pub struct CodeletRef {
    tp: Arc<ThreadedProcedure>,
    index: usize,
}

impl CodeletRef {
    pub(crate) fn new(tp: Arc<ThreadedProcedure>, index: usize) -> Self {
        Self { tp, index }
    }

    #[inline]
    pub fn procedure(&self) -> &Arc<ThreadedProcedure> {
        &self.tp
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn codelet(&self) -> &Codelet {
        self.tp.codelet(self.index)
    }

    #[inline]
    pub fn key(&self) -> CodeletKey {
        CodeletKey::new(self.tp.id(), self.index as u32)
    }

    /// Take one dependency off; the last one makes the codelet ready
    pub fn dec_dep(&self) {
        let prev = self.codelet().deps.fetch_sub(1, Ordering::AcqRel);
        match prev {
            0 => fatal!("dec_dep on {} with no outstanding dependencies", self),
            1 => self.tp.ready(self.clone()),
            _ => {}
        }
    }

    /// Run the body, detach from streams, then signal every target
    ///
    /// Each activation fires at most once; a second fire aborts.
    pub fn fire(&self) {
        let codelet = self.codelet();
        let body = codelet.body.lock().take();
        let Some(body) = body else {
            fatal!("{} fired twice", self);
        };

        crate::ktrace!("fire {}", self);
        body(&FireContext { tp: &self.tp, index: self.index });

        if let Some(ports) = codelet.ports() {
            if let Some(q) = ports.outbound.as_ref().and_then(|ep| ep.fifo()) {
                q.disassoc_prod();
            }
            if let Some(q) = ports.inbound.as_ref().and_then(|ep| ep.fifo()) {
                q.disassoc_cons();
            }
        }

        for target in &codelet.targets {
            match target {
                Target::Local(i) => self.tp.codelet_ref(*i).dec_dep(),
                Target::External(sig) => sig.dec_dep(),
            }
        }
    }
}

impl Signal for CodeletRef {
    fn dec_dep(&self) {
        CodeletRef::dec_dep(self)
    }
}

impl fmt::Debug for CodeletRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for CodeletRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.codelet().name() {
            Some(name) => write!(f, "{}({})", self.key(), name),
            None => write!(f, "{}", self.key()),
        }
    }
}

/// What a body sees while it runs
pub struct FireContext<'a> {
    tp: &'a Arc<ThreadedProcedure>,
    index: usize,
}

impl<'a> FireContext<'a> {
    pub fn procedure(&self) -> &'a Arc<ThreadedProcedure> {
        self.tp
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn key(&self) -> CodeletKey {
        CodeletKey::new(self.tp.id(), self.index as u32)
    }

    /// Signal a codelet of the same procedure in addition to the signal list
    pub fn signal(&self, index: usize) {
        self.tp.codelet_ref(index).dec_dep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{ProcedureBuilder, ReadySink};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<CodeletRef>>);

    impl ReadySink for Collect {
        fn push_codelet(&self, cd: CodeletRef) {
            self.0.lock().unwrap().push(cd);
        }
    }

    impl Collect {
        fn drain(&self) -> Vec<CodeletRef> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    struct Count(AtomicUsize);

    impl Signal for Count {
        fn dec_dep(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_ready_only_at_zero() {
        let mut b = ProcedureBuilder::new();
        let gate = b.add(Codelet::new(0, |_| {}).signal(1).signal(1));
        let joined = b.add(Codelet::new(2, |_| {}));
        let tp = b.build().unwrap();
        let sink = Arc::new(Collect::default());
        tp.launch(sink.clone());

        let ready = sink.drain();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].index(), gate);

        // Two targets on the same codelet: both fire, one push at the end
        ready[0].fire();
        let ready = sink.drain();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].index(), joined);
        assert_eq!(tp.codelet(joined).deps(), 0);
    }

    #[test]
    fn test_fire_signals_each_target_once() {
        let done = Arc::new(Count(AtomicUsize::new(0)));
        let ran = Arc::new(AtomicUsize::new(0));
        let mut b = ProcedureBuilder::new();
        let r = ran.clone();
        b.add(
            Codelet::new(0, move |ctx| {
                assert_eq!(ctx.index(), 0);
                r.fetch_add(1, Ordering::SeqCst);
            })
            .named("only")
            .signal_to(done.clone()),
        );
        let tp = b.build().unwrap();
        let sink = Arc::new(Collect::default());
        tp.launch(sink.clone());

        let cd = sink.drain().pop().unwrap();
        assert_eq!(format!("{}", cd), format!("{}.cd0(only)", tp.id()));
        cd.fire();
        assert!(cd.codelet().has_fired());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(done.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_context_signal_extra_target() {
        let mut b = ProcedureBuilder::new();
        b.add(Codelet::new(0, |ctx| ctx.signal(1)));
        b.add(Codelet::new(1, |_| {}));
        let tp = b.build().unwrap();
        let sink = Arc::new(Collect::default());
        tp.launch(sink.clone());

        sink.drain()[0].fire();
        assert_eq!(sink.drain()[0].index(), 1);
    }

    #[test]
    fn test_consumes_adds_wiring_dependency() {
        let link = StreamLink::<u8>::new(crate::fifo::FifoBackend::Soft);
        let cd = Codelet::new(1, |_| {}).consumes(&link);
        assert_eq!(cd.deps(), 2);
        assert_eq!(cd.initial_deps(), 2);
        assert!(cd.is_streaming());
        assert!(cd.ports().unwrap().inbound.is_some());

        let producer = Codelet::new(0, |_| {}).produces(&link, 1);
        assert!(producer.ports().unwrap().needs_wiring());
    }

    #[test]
    fn test_concurrent_dec_dep_pushes_once() {
        const SIGNALS: u32 = 64;
        let mut b = ProcedureBuilder::new();
        b.add(Codelet::new(SIGNALS, |_| {}));
        let tp = b.build().unwrap();
        let sink = Arc::new(Collect::default());
        tp.launch(sink.clone());
        assert!(sink.drain().is_empty());

        let handles: Vec<_> = (0..SIGNALS)
            .map(|_| {
                let cd = tp.codelet_ref(0);
                std::thread::spawn(move || cd.dec_dep())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sink.drain().len(), 1);
        assert_eq!(tp.codelet(0).deps(), 0);
    }
}
