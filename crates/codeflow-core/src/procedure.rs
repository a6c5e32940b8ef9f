//! Threaded procedures
//!
//! A threaded procedure (TP) owns a fixed set of codelets. It is built once
//! with `ProcedureBuilder`, launched into a ready sink (normally a top-level
//! scheduler's ready queue), and torn down when its last codelet completes.
//!
//! # Teardown
//!
//! `pending` starts at the number of codelets. Every execution path runs
//! `complete_one` after a fire: disposable procedures take one off
//! `pending`, and the thread that takes the last one destroys the
//! procedure. Caller-owned procedures are never counted down by the
//! scheduler; their owner decides when they are done.

use crate::codelet::{Codelet, CodeletRef, Target};
use crate::error::{SchedError, SchedResult};
use crate::fatal;
use crate::id::ProcId;
use crate::spinlock::SpinLock;
use crate::stream::{same_link, StreamEndpoint};

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

/// Where ready codelets go
pub trait ReadySink: Send + Sync {
    fn push_codelet(&self, cd: CodeletRef);
}

type TeardownHook = Box<dyn FnOnce(ProcId) + Send>;

/// A group of codelets with ref-counted teardown
pub struct ThreadedProcedure {
    id: ProcId,
    name: Option<String>,
    codelets: Box<[Codelet]>,
    pending: AtomicU32,
    disposable: bool,
    destroyed: AtomicBool,
    sink: OnceLock<Arc<dyn ReadySink>>,
    teardown: SpinLock<Vec<TeardownHook>>,
}

impl ThreadedProcedure {
    #[inline]
    pub fn id(&self) -> ProcId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.codelets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.codelets.is_empty()
    }

    #[inline]
    pub fn codelet(&self, index: usize) -> &Codelet {
        &self.codelets[index]
    }

    pub fn codelet_ref(self: &Arc<Self>, index: usize) -> CodeletRef {
        debug_assert!(index < self.codelets.len());
        CodeletRef::new(Arc::clone(self), index)
    }

    /// Codelets not yet accounted for by `dec_ref`
    #[inline]
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Bind the ready sink and push every codelet that starts ready
    ///
    /// Only codelets built with zero dependencies are pushed here; anything
    /// else becomes ready through `dec_dep`. Launching twice aborts.
    pub fn launch(self: &Arc<Self>, sink: Arc<dyn ReadySink>) {
        if self.sink.set(sink).is_err() {
            fatal!("{} launched twice", self.id);
        }
        crate::kdebug!("launch {} ({} codelets)", self.id, self.codelets.len());
        for (i, cd) in self.codelets.iter().enumerate() {
            if cd.initial_deps() == 0 {
                self.ready(self.codelet_ref(i));
            }
        }
    }

    pub(crate) fn ready(&self, cd: CodeletRef) {
        match self.sink.get() {
            Some(sink) => sink.push_codelet(cd),
            None => fatal!("{} became ready before {} was launched", cd, self.id),
        }
    }

    /// True when the scheduler owns teardown of this procedure
    #[inline]
    pub fn check_parent(&self) -> bool {
        self.disposable
    }

    /// Account for one completed codelet; true for the last one
    pub fn dec_ref(&self) -> bool {
        match self.pending.fetch_sub(1, Ordering::AcqRel) {
            0 => fatal!("dec_ref on {} with nothing pending", self.id),
            prev => prev == 1,
        }
    }

    /// Run the teardown hooks; exactly once per procedure
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            fatal!("{} destroyed twice", self.id);
        }
        let hooks = core::mem::take(&mut *self.teardown.lock());
        crate::kdebug!("destroy {} ({} hooks)", self.id, hooks.len());
        for hook in hooks {
            hook(self.id);
        }
    }

    /// Fire `cd` and do the post-fire bookkeeping
    ///
    /// Returns true when this call destroyed the procedure.
    pub fn complete_one(cd: CodeletRef) -> bool {
        let tp = Arc::clone(cd.procedure());
        let disposable = tp.check_parent();
        cd.fire();
        drop(cd);
        if disposable && tp.dec_ref() {
            tp.destroy();
            return true;
        }
        false
    }
}

impl fmt::Debug for ThreadedProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedProcedure")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("codelets", &self.codelets.len())
            .field("pending", &self.pending())
            .field("disposable", &self.disposable)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Collects codelets, then validates and freezes them into a procedure
pub struct ProcedureBuilder {
    name: Option<String>,
    codelets: Vec<Codelet>,
    disposable: bool,
    teardown: Vec<TeardownHook>,
}

impl Default for ProcedureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcedureBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            codelets: Vec::new(),
            disposable: true,
            teardown: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Register a codelet; its index is the registration order
    pub fn add(&mut self, codelet: Codelet) -> usize {
        self.codelets.push(codelet);
        self.codelets.len() - 1
    }

    /// Index the next `add` will return
    pub fn next_index(&self) -> usize {
        self.codelets.len()
    }

    /// The caller owns teardown; the scheduler never counts this procedure down
    pub fn caller_owned(mut self) -> Self {
        self.disposable = false;
        self
    }

    pub fn on_teardown<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnOnce(ProcId) + Send + 'static,
    {
        self.teardown.push(Box::new(hook));
        self
    }

    fn validate(&self) -> SchedResult<()> {
        let n = self.codelets.len();
        if n == 0 {
            return Err(SchedError::InvalidProcedure("procedure has no codelets".into()));
        }
        if n > u32::MAX as usize {
            return Err(SchedError::InvalidProcedure("too many codelets".into()));
        }

        for (i, cd) in self.codelets.iter().enumerate() {
            for t in cd.targets() {
                if let Target::Local(j) = t {
                    if *j >= n {
                        return Err(SchedError::InvalidProcedure(format!(
                            "codelet {} signals codelet {} of {}",
                            i, j, n
                        )));
                    }
                }
            }

            let Some(ports) = cd.ports() else { continue };
            let Some(consumer) = ports.consumer else { continue };
            if consumer >= n {
                return Err(SchedError::InvalidProcedure(format!(
                    "codelet {} streams to codelet {} of {}",
                    i, consumer, n
                )));
            }
            if consumer == i {
                return Err(SchedError::InvalidProcedure(format!(
                    "codelet {} streams to itself",
                    i
                )));
            }
            let (Some(out), Some(inb)) = (
                ports.outbound.as_ref(),
                self.codelets[consumer].ports().and_then(|p| p.inbound.as_ref()),
            ) else {
                return Err(SchedError::InvalidProcedure(format!(
                    "codelet {} streams to codelet {}, which consumes no stream",
                    i, consumer
                )));
            };
            if !same_link(out, inb) {
                return Err(SchedError::InvalidProcedure(format!(
                    "codelets {} and {} are not on the same stream link",
                    i, consumer
                )));
            }
            if out.is_wired() {
                return Err(SchedError::InvalidProcedure(format!(
                    "stream link of codelet {} is already wired",
                    i
                )));
            }
        }
        self.validate_links()
    }

    /// One producer and one consumer per stream link, and every consumer fed
    fn validate_links(&self) -> SchedResult<()> {
        let mut outs: Vec<(usize, &Arc<dyn StreamEndpoint>)> = Vec::new();
        let mut ins: Vec<(usize, &Arc<dyn StreamEndpoint>)> = Vec::new();
        for (i, cd) in self.codelets.iter().enumerate() {
            let Some(ports) = cd.ports() else { continue };
            if let Some(out) = ports.outbound.as_ref() {
                if let Some((j, _)) = outs.iter().find(|(_, o)| same_link(o, out)) {
                    return Err(SchedError::InvalidProcedure(format!(
                        "codelets {} and {} both produce into one stream link",
                        j, i
                    )));
                }
                outs.push((i, out));
            }
            if let Some(inb) = ports.inbound.as_ref() {
                if let Some((j, _)) = ins.iter().find(|(_, c)| same_link(c, inb)) {
                    return Err(SchedError::InvalidProcedure(format!(
                        "codelets {} and {} both consume one stream link",
                        j, i
                    )));
                }
                ins.push((i, inb));
            }
        }

        for (j, _) in ins {
            let fed = outs.iter().any(|(i, _)| {
                self.codelets[*i].ports().and_then(|p| p.consumer) == Some(j)
            });
            if !fed {
                return Err(SchedError::InvalidProcedure(format!(
                    "codelet {} consumes a stream link no producer feeds",
                    j
                )));
            }
        }
        Ok(())
    }

    pub fn build(self) -> SchedResult<Arc<ThreadedProcedure>> {
        self.validate()?;
        let n = self.codelets.len() as u32;
        Ok(Arc::new(ThreadedProcedure {
            id: ProcId::next(),
            name: self.name,
            codelets: self.codelets.into_boxed_slice(),
            pending: AtomicU32::new(n),
            disposable: self.disposable,
            destroyed: AtomicBool::new(false),
            sink: OnceLock::new(),
            teardown: SpinLock::new(self.teardown),
        }))
    }
}
