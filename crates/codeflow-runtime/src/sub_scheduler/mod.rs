//! Sub-schedulers (second level of the hierarchy)
//!
//! A top-level scheduler hands ready codelets to the sub-schedulers it
//! owns. Sub-schedulers only ever receive codelets; they never pop the
//! top-level ready queue, so a streaming producer is always wired before
//! any sub-scheduler can see it.
//!
//! # Implementors
//!
//! - `MicroScheduler` (default): bounded queue plus one worker thread that
//!   fires codelets and runs teardown bookkeeping.
//! - Test doubles (always-reject, recording) live in the scheduler tests.

mod micro;

pub use micro::{MicroScheduler, MicroStats};

use codeflow_core::CodeletRef;

/// Receives codelets from a top-level scheduler.
///
/// **Contract:**
/// - `push_codelet()` must NEVER block. A full sub-scheduler hands the
///   codelet back in `Err` so the caller can try elsewhere.
/// - An accepted codelet is fired exactly once, followed by the owning
///   procedure's `complete_one` bookkeeping.
pub trait SubScheduler: Send + Sync {
    fn push_codelet(&self, cd: CodeletRef) -> Result<(), CodeletRef>;

    /// Codelets accepted but not yet fired
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
