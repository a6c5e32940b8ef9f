//! Identifier types for procedures, codelets and Fifos

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_PROC_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a threaded procedure
///
/// Allocated from a process-wide counter; 0 is never handed out and is
/// reserved as the `NONE` sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ProcId(u64);

impl ProcId {
    /// Sentinel value indicating no procedure
    pub const NONE: ProcId = ProcId(0);

    /// Allocate the next process-unique id
    #[inline]
    pub fn next() -> Self {
        ProcId(NEXT_PROC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a ProcId from a raw value
    #[inline]
    pub const fn new(raw: u64) -> Self {
        ProcId(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "ProcId(NONE)")
        } else {
            write!(f, "ProcId({})", self.0)
        }
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tp{}", self.0)
    }
}

/// Identity of one codelet: its procedure plus its registration index
///
/// This is what a Fifo records as its producer/consumer. It is a plain
/// value, never a reference, so a Fifo can outlive both codelets.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeletKey {
    pub proc: ProcId,
    pub index: u32,
}

impl CodeletKey {
    #[inline]
    pub const fn new(proc: ProcId, index: u32) -> Self {
        Self { proc, index }
    }
}

impl fmt::Debug for CodeletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.cd{}", self.proc, self.index)
    }
}

impl fmt::Display for CodeletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifier of a Fifo, unique within the scheduler that allocated it
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct FifoId(u64);

impl FifoId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        FifoId(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for FifoId {
    #[inline]
    fn from(raw: u64) -> Self {
        FifoId(raw)
    }
}

impl fmt::Display for FifoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fifo{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proc_ids_are_unique() {
        let a = ProcId::next();
        let b = ProcId::next();
        assert_ne!(a, b);
        assert!(!a.is_none());
        assert!(ProcId::NONE.is_none());
    }

    #[test]
    fn test_codelet_key_display() {
        let key = CodeletKey::new(ProcId::new(7), 2);
        assert_eq!(format!("{}", key), "tp7.cd2");
    }
}
