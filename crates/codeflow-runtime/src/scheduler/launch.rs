//! Launch closures
//!
//! A launch closure builds a threaded procedure on the scheduler thread
//! that runs it. It sits in a scheduler's launch queue until that scheduler
//! (or, for stealing policies, a peer) pops it.

use codeflow_core::{SchedResult, ThreadedProcedure};

use core::fmt;
use std::sync::Arc;

type Factory = Box<dyn FnOnce() -> SchedResult<Arc<ThreadedProcedure>> + Send>;

pub struct LaunchClosure {
    label: &'static str,
    factory: Factory,
}

impl LaunchClosure {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnOnce() -> SchedResult<Arc<ThreadedProcedure>> + Send + 'static,
    {
        Self { label: "launch", factory: Box::new(factory) }
    }

    /// Launch an already-built procedure
    pub fn procedure(tp: Arc<ThreadedProcedure>) -> Self {
        Self { label: "prebuilt", factory: Box::new(move || Ok(tp)) }
    }

    pub fn labeled(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub(crate) fn build(self) -> SchedResult<Arc<ThreadedProcedure>> {
        (self.factory)()
    }
}

impl fmt::Debug for LaunchClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LaunchClosure({})", self.label)
    }
}
