//! Worker thread management
//!
//! Every scheduler in the hierarchy (top-level and micro) runs its poll
//! loop on a dedicated OS thread spawned here. Thread indices follow the
//! cluster layout: cluster `c` owns index `c * (M + 1)` for its top-level
//! scheduler and `c * (M + 1) + 1 + m` for micro scheduler `m`.

use crate::affinity;

use codeflow_core::{fatal, kdebug, kwarn, WorkerError};

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

/// What a worker thread runs and where
pub struct WorkerSpec {
    /// Position in the cluster layout
    pub index: usize,
    pub name: String,
    /// Core to pin to, if any
    pub core: Option<usize>,
}

impl WorkerSpec {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self { index, name: name.into(), core: None }
    }

    pub fn pinned(mut self, core: Option<usize>) -> Self {
        self.core = core;
        self
    }
}

/// Pool of worker threads
///
/// The pool only owns the join handles. Stopping is done through each
/// scheduler's own alive flag, after which `join` collects the threads.
pub struct WorkerPool {
    handles: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            handles: Vec::with_capacity(capacity),
        }
    }

    /// Spawn one worker thread
    ///
    /// A panic escaping `body` is an invariant violation and aborts the
    /// process.
    pub fn spawn<F>(&mut self, worker: WorkerSpec, body: F) -> Result<(), WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let WorkerSpec { index, name, core } = worker;
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                set_current_worker_id(index);
                if let Some(core) = core {
                    if let Err(e) = affinity::pin_current(core) {
                        kwarn!("{}: pin to core {} failed: {}", thread_name, core, e);
                    }
                }

                if panic::catch_unwind(AssertUnwindSafe(body)).is_err() {
                    fatal!("worker {} panicked", thread_name);
                }
            })
            .map_err(|_| WorkerError::SpawnFailed)?;

        kdebug!("spawned worker {} (index {}, core {:?})", name, index, core);
        self.handles.push((name, handle));
        Ok(())
    }

    /// Wait for all workers to finish
    ///
    /// Every thread is joined even when an earlier one failed; the first
    /// failure is returned.
    pub fn join(&mut self) -> Result<(), WorkerError> {
        let mut result = Ok(());
        for (name, handle) in self.handles.drain(..) {
            if handle.join().is_err() {
                kwarn!("worker {} ended abnormally", name);
                if result.is_ok() {
                    result = Err(WorkerError::Panicked);
                }
            }
        }
        result
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.handles.len()
    }
}

/// Thread-local worker index
thread_local! {
    static CURRENT_WORKER_ID: Cell<usize> = const { Cell::new(usize::MAX) };
}

/// Set the current worker index for this thread
pub fn set_current_worker_id(id: usize) {
    CURRENT_WORKER_ID.with(|cell| cell.set(id));
}

/// Worker index of this thread, `None` outside the pool
#[inline]
pub fn current_worker_id() -> Option<usize> {
    let id = CURRENT_WORKER_ID.with(|cell| cell.get());
    (id != usize::MAX).then_some(id)
}

/// Index of a scheduler thread in the cluster layout
///
/// `micro` is `None` for the top-level scheduler of `cluster`.
#[inline]
pub fn thread_index(cluster: usize, micros_per_cluster: usize, micro: Option<usize>) -> usize {
    let base = cluster * (micros_per_cluster + 1);
    match micro {
        None => base,
        Some(m) => base + 1 + m,
    }
}
