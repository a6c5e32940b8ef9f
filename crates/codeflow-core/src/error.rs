//! Error types for the codeflow engine
//!
//! Queue operations never fail loudly: they hand back a `PushError` (with
//! the rejected value) or a `PopError`, and the caller decides whether to
//! retry. Invariant violations are not errors at all; they go through
//! `fatal!` and abort the process.

use core::fmt;

/// Result type for scheduler and runtime operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors reported by construction and runtime management
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Configuration rejected by validation
    InvalidConfig(&'static str),

    /// Procedure graph rejected by `ProcedureBuilder::build`
    InvalidProcedure(String),

    /// Affinity provider could not generate a placement mask
    AffinityUnavailable,

    /// Runtime is not running
    NotRunning,

    /// Runtime already started
    AlreadyRunning,

    /// A run did not complete within its deadline (stuck pipeline)
    Timeout,

    /// Worker thread error
    Worker(WorkerError),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            SchedError::InvalidProcedure(msg) => write!(f, "invalid procedure: {}", msg),
            SchedError::AffinityUnavailable => write!(f, "affinity mask generation failed"),
            SchedError::NotRunning => write!(f, "runtime not running"),
            SchedError::AlreadyRunning => write!(f, "runtime already running"),
            SchedError::Timeout => write!(f, "run timed out"),
            SchedError::Worker(e) => write!(f, "worker error: {}", e),
        }
    }
}

impl std::error::Error for SchedError {}

/// Worker thread related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Failed to spawn worker thread
    SpawnFailed,

    /// Worker thread panicked
    Panicked,

    /// Failed to pin the thread to its core
    AffinityFailed,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::SpawnFailed => write!(f, "failed to spawn worker thread"),
            WorkerError::Panicked => write!(f, "worker thread panicked"),
            WorkerError::AffinityFailed => write!(f, "failed to set thread affinity"),
        }
    }
}

impl From<WorkerError> for SchedError {
    fn from(e: WorkerError) -> Self {
        SchedError::Worker(e)
    }
}

/// Error returned by a Fifo push; the element is handed back
#[derive(Clone, PartialEq, Eq)]
pub enum PushError<T> {
    /// Queue is full
    Full(T),
    /// Queue was destroyed by its owner
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the element that was not pushed
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(v) | PushError::Closed(v) => v,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, PushError::Full(_))
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full(_) => write!(f, "Full(..)"),
            PushError::Closed(_) => write!(f, "Closed(..)"),
        }
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full(_) => write!(f, "fifo full"),
            PushError::Closed(_) => write!(f, "fifo closed"),
        }
    }
}

impl<T> std::error::Error for PushError<T> {}

/// Error returned by a Fifo pop or peek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// Queue is empty
    Empty,
    /// Queue was destroyed by its owner
    Closed,
}

impl fmt::Display for PopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PopError::Empty => write!(f, "fifo empty"),
            PopError::Closed => write!(f, "fifo closed"),
        }
    }
}

impl std::error::Error for PopError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SchedError::Timeout;
        assert_eq!(format!("{}", e), "run timed out");

        let e = SchedError::Worker(WorkerError::SpawnFailed);
        assert_eq!(format!("{}", e), "worker error: failed to spawn worker thread");
    }

    #[test]
    fn test_push_error_hands_value_back() {
        let e = PushError::Full(42u32);
        assert!(e.is_full());
        assert_eq!(e.into_inner(), 42);
        assert_eq!(format!("{}", PushError::Closed(1u8)), "fifo closed");
    }

    #[test]
    fn test_error_conversion() {
        let err: SchedError = WorkerError::Panicked.into();
        assert!(matches!(err, SchedError::Worker(WorkerError::Panicked)));
    }
}
